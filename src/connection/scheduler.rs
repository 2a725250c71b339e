//! One-shot timers that fire as events in the connection's serialized context.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

/// A pending one-shot timer.
///
/// The spawned task holds a sender clone only until it fires. Cancelling
/// aborts the task; an event that was already queued before cancellation is
/// recognised as stale by its `generation` and ignored by the receiver.
#[derive(Debug)]
pub(crate) struct ScheduledTask {
    generation: u64,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Deliver `event` on `events` after `delay`.
    pub(crate) fn schedule<E>(
        delay: Duration,
        generation: u64,
        events: &UnboundedSender<E>,
        event: E,
    ) -> Self
    where
        E: Send + 'static,
    {
        let events = events.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(event);
        });
        Self { generation, handle }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn cancel(self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = ScheduledTask::schedule(Duration::from_secs(5), 7, &tx, "fired");
        assert_eq!(task.generation(), 7);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.recv().await, Some("fired"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_task_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = ScheduledTask::schedule(Duration::from_secs(1), 1, &tx, ());
        task.cancel();
        drop(tx);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(rx.recv().await, None);
    }
}
