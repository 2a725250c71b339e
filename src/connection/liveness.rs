//! Ping/pong supervision of an open connection.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;

use super::scheduler::ScheduledTask;

/// What a probe firing asks the connection to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Probe {
    /// Send a ping and re-arm.
    SendPing,
    /// The previous ping was never answered.
    TimedOut,
}

/// Tracks the outstanding ping and the next scheduled probe.
///
/// Only the connection's serialized context touches this. A probe task that
/// was cancelled but had already queued its event is filtered out by
/// [`LivenessMonitor::fired`].
#[derive(Debug)]
pub(crate) struct LivenessMonitor {
    interval: Option<Duration>,
    awaiting_pong: bool,
    probe: Option<ScheduledTask>,
    generation: u64,
}

impl LivenessMonitor {
    pub(crate) fn new(interval: Option<Duration>) -> Self {
        Self {
            interval,
            awaiting_pong: false,
            probe: None,
            generation: 0,
        }
    }

    pub(crate) fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Store a new interval. Re-arming is left to the caller, which knows
    /// whether the connection is open.
    pub(crate) fn set_interval(&mut self, interval: Option<Duration>) {
        self.interval = interval;
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.probe.is_some()
    }

    pub(crate) fn is_awaiting_pong(&self) -> bool {
        self.awaiting_pong
    }

    /// Advance the probe: ask for a ping, or report that the last one went
    /// unanswered.
    pub(crate) fn tick(&mut self) -> Probe {
        if self.awaiting_pong {
            Probe::TimedOut
        } else {
            self.awaiting_pong = true;
            Probe::SendPing
        }
    }

    /// Schedule the next probe after the configured interval. Does nothing
    /// when pinging is disabled.
    pub(crate) fn arm<E>(&mut self, events: &UnboundedSender<E>, event: impl FnOnce(u64) -> E)
    where
        E: Send + 'static,
    {
        let Some(interval) = self.interval else {
            return;
        };
        if let Some(previous) = self.probe.take() {
            previous.cancel();
        }
        self.generation = self.generation.wrapping_add(1);
        let generation = self.generation;
        self.probe = Some(ScheduledTask::schedule(
            interval,
            generation,
            events,
            event(generation),
        ));
    }

    /// Accept a probe firing. Returns `false` for a firing that lost the race
    /// against cancellation or re-arming.
    pub(crate) fn fired(&mut self, generation: u64) -> bool {
        if self.probe.as_ref().map(ScheduledTask::generation) != Some(generation) {
            return false;
        }
        self.probe = None;
        true
    }

    pub(crate) fn pong_received(&mut self) {
        self.awaiting_pong = false;
    }

    /// Drop the scheduled probe and forget any outstanding ping.
    pub(crate) fn cancel(&mut self) {
        if let Some(probe) = self.probe.take() {
            probe.cancel();
        }
        self.awaiting_pong = false;
    }
}
