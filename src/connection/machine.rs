//! The connection state machine.
//!
//! One task owns all connection state. Application calls arrive as
//! [`Command`]s on a FIFO channel; handshake results, inbound frames, read
//! failures and timer firings arrive as [`Event`]s. Nothing outside this task
//! mutates connection state, so no locks are needed.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::close::{close_frame, peer_close_code};
use super::dispatcher::{Dispatcher, Notification, SentCallback};
use super::liveness::{LivenessMonitor, Probe};
use super::scheduler::ScheduledTask;
use super::state::ConnectionState;
use crate::config::{Config, Limits};
use crate::error::{Error, Result};
use crate::message::{CloseCode, Data};
use crate::protocol::handshake::{self, HandshakeRequest};
use crate::protocol::{Assembled, Frame, MaskKeyGenerator, OpCode, Reassembler};
use crate::target::Target;
use crate::transport::{BoxedStream, Connector};

/// Requests from application handles, processed in order.
pub(crate) enum Command {
    Connect {
        target: Target,
        headers: Vec<(String, String)>,
        timeout: Option<Duration>,
    },
    Send {
        data: Data,
        on_sent: Option<SentCallback>,
    },
    Ping,
    Close(CloseCode),
    SetPingInterval(Option<Duration>),
    /// The last application handle is gone.
    Shutdown,
}

/// Internal events. Connection-bound events carry the epoch of the connect
/// attempt that produced them so leftovers from an earlier connection are
/// ignored.
pub(crate) enum Event {
    Handshake {
        epoch: u64,
        result: Result<(BoxedStream, BytesMut)>,
    },
    Frame {
        epoch: u64,
        frame: Frame,
    },
    ReadFailed {
        epoch: u64,
        error: Error,
    },
    TransportClosed {
        epoch: u64,
        error: Option<Error>,
    },
    PingTimer(u64),
    CloseTimer(u64),
}

/// The write half of an open connection plus its reader task.
struct Channel {
    writer: WriteHalf<BoxedStream>,
    reader: JoinHandle<()>,
    out: BytesMut,
}

impl Channel {
    async fn send(&mut self, frame: &Frame) -> Result<()> {
        self.out.clear();
        frame.write(&mut self.out);
        self.writer.write_all(&self.out).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn close(mut self) {
        self.reader.abort();
        if let Err(error) = self.writer.shutdown().await {
            tracing::debug!(%error, "transport shutdown failed");
        }
    }
}

pub(crate) struct Machine {
    config: Config,
    connector: Arc<dyn Connector>,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    epoch: u64,
    handshake: Option<JoinHandle<()>>,
    channel: Option<Channel>,
    reassembler: Reassembler,
    liveness: LivenessMonitor,
    close_timer: Option<ScheduledTask>,
    close_generation: u64,
    masks: MaskKeyGenerator,
    dispatcher: Dispatcher,
    commands: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
}

impl Machine {
    pub(crate) fn new(
        config: Config,
        connector: Arc<dyn Connector>,
        commands: mpsc::UnboundedReceiver<Command>,
        state_tx: watch::Sender<ConnectionState>,
        dispatcher: Dispatcher,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            reassembler: Reassembler::new(config.limits.clone()),
            liveness: LivenessMonitor::new(config.ping_interval),
            config,
            connector,
            state: ConnectionState::Disconnected,
            state_tx,
            epoch: 0,
            handshake: None,
            channel: None,
            close_timer: None,
            close_generation: 0,
            masks: MaskKeyGenerator::new(),
            dispatcher,
            commands,
            events_tx,
            events_rx,
        }
    }

    /// Drive the connection until the last application handle is dropped.
    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                Some(event) = self.events_rx.recv() => self.handle_event(event).await,
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    if self.handle_command(command).await.is_break() {
                        break;
                    }
                }
            }
        }
        self.shutdown().await;
    }

    async fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Connect {
                target,
                headers,
                timeout,
            } => self.connect(target, headers, timeout),
            Command::Send { data, on_sent } => self.send(data, on_sent).await,
            Command::Ping => self.ping().await,
            Command::Close(code) => self.close(code).await,
            Command::SetPingInterval(interval) => self.set_ping_interval(interval).await,
            Command::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Handshake { epoch, result } => self.on_handshake(epoch, result).await,
            Event::Frame { epoch, frame } => {
                if self.is_live(epoch) {
                    self.on_frame(frame).await;
                }
            }
            Event::ReadFailed { epoch, error } => {
                if self.is_live(epoch) {
                    self.protocol_error(error).await;
                    // The reader is gone, so the peer's close can never arrive.
                    if let Some(code) = self.state.pending_close() {
                        self.teardown(code).await;
                    }
                }
            }
            Event::TransportClosed { epoch, error } => {
                if self.is_live(epoch) {
                    self.on_transport_closed(error).await;
                }
            }
            Event::PingTimer(generation) => {
                if self.liveness.fired(generation) && self.state.is_connected() {
                    self.probe().await;
                }
            }
            Event::CloseTimer(generation) => self.on_close_timeout(generation).await,
        }
    }

    fn is_live(&self, epoch: u64) -> bool {
        epoch == self.epoch && self.channel.is_some()
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "connection state changed");
        }
        self.state = state;
        self.state_tx.send_replace(state);
    }

    fn report(&self, error: Error) {
        self.dispatcher.notify(Notification::Error(error));
    }

    fn connect(&mut self, target: Target, headers: Vec<(String, String)>, timeout: Option<Duration>) {
        if !self.state.is_disconnected() {
            tracing::warn!(state = %self.state, "connect called while not disconnected");
            self.report(Error::AlreadyConnected);
            return;
        }

        self.epoch = self.epoch.wrapping_add(1);
        let epoch = self.epoch;
        let timeout = timeout.unwrap_or(self.config.timeouts.connect);
        self.set_state(ConnectionState::Connecting);
        tracing::debug!(host = %target.host, port = target.port, resource = %target.resource, "connecting");

        let connector = Arc::clone(&self.connector);
        let limits = self.config.limits.clone();
        let events = self.events_tx.clone();
        self.handshake = Some(tokio::spawn(async move {
            let opening = open(connector.as_ref(), &target, headers, &limits);
            let result = match tokio::time::timeout(timeout, opening).await {
                Ok(result) => result,
                Err(_) => Err(Error::ConnectTimeout),
            };
            let _ = events.send(Event::Handshake { epoch, result });
        }));
    }

    async fn on_handshake(&mut self, epoch: u64, result: Result<(BoxedStream, BytesMut)>) {
        if epoch != self.epoch {
            tracing::trace!("dropping handshake result from a previous attempt");
            return;
        }
        let pending = match self.state {
            ConnectionState::Connecting => None,
            ConnectionState::Disconnecting(code) if self.channel.is_none() => Some(code),
            ConnectionState::Disconnecting(_)
            | ConnectionState::Connected
            | ConnectionState::Disconnected => return,
        };
        self.handshake = None;

        let (stream, leftover) = match result {
            Ok(opened) => opened,
            Err(error) => {
                tracing::error!(%error, "connect failed");
                self.set_state(ConnectionState::Disconnected);
                self.report(error);
                return;
            }
        };

        let (reader, writer) = tokio::io::split(stream);
        let reader = tokio::spawn(read_frames(
            reader,
            leftover,
            self.config.limits.clone(),
            self.config.read_buffer_size,
            epoch,
            self.events_tx.clone(),
        ));
        self.channel = Some(Channel {
            writer,
            reader,
            out: BytesMut::with_capacity(self.config.read_buffer_size),
        });
        self.set_state(ConnectionState::Connected);
        tracing::info!("websocket connected");
        self.dispatcher.notify(Notification::Connected);

        match pending {
            Some(code) => self.close(code).await,
            None => self.set_ping_interval(self.liveness.interval()).await,
        }
    }

    /// Mask and write one frame.
    async fn write(&mut self, frame: Frame) -> Result<()> {
        let Some(channel) = self.channel.as_mut() else {
            return Err(Error::Disconnected);
        };
        let frame = frame.with_mask(self.masks.next_key());
        tracing::trace!(opcode = %frame.opcode, len = frame.payload().len(), "sending frame");
        channel.send(&frame).await
    }

    async fn send(&mut self, data: Data, on_sent: Option<SentCallback>) {
        let result = if self.state.is_connected() {
            let frame = match data {
                Data::Text(text) => Frame::text(Bytes::from(text)),
                Data::Binary(bytes) => Frame::binary(bytes),
            };
            self.write(frame).await
        } else {
            Err(Error::Disconnected)
        };

        if let Some(on_sent) = on_sent {
            self.dispatcher
                .notify(Notification::Sent(on_sent, result.clone()));
        }
        match result {
            Ok(()) => {}
            Err(Error::Disconnected) => self.report(Error::Disconnected),
            Err(error) => self.transport_failed(error).await,
        }
    }

    async fn ping(&mut self) {
        if !self.state.is_connected() {
            self.report(Error::Disconnected);
            return;
        }
        if let Err(error) = self.write(Frame::ping(Bytes::new())).await {
            self.transport_failed(error).await;
        }
    }

    /// Start the close handshake. Idempotent.
    async fn close(&mut self, code: CloseCode) {
        match self.state {
            ConnectionState::Connected => {
                self.liveness.cancel();
                self.set_state(ConnectionState::Disconnecting(code));
                tracing::debug!(%code, "sending close frame");
                if let Err(error) = self.write(close_frame(code)).await {
                    self.transport_failed(error).await;
                    return;
                }
                self.arm_close_timer();
            }
            ConnectionState::Connecting => self.set_state(ConnectionState::Disconnecting(code)),
            ConnectionState::Disconnecting(_) | ConnectionState::Disconnected => {
                tracing::trace!(%code, state = %self.state, "close ignored");
            }
        }
    }

    fn arm_close_timer(&mut self) {
        if let Some(timer) = self.close_timer.take() {
            timer.cancel();
        }
        self.close_generation = self.close_generation.wrapping_add(1);
        let generation = self.close_generation;
        self.close_timer = Some(ScheduledTask::schedule(
            self.config.timeouts.close,
            generation,
            &self.events_tx,
            Event::CloseTimer(generation),
        ));
    }

    async fn on_close_timeout(&mut self, generation: u64) {
        if self.close_timer.as_ref().map(ScheduledTask::generation) != Some(generation) {
            return;
        }
        self.close_timer = None;
        if let Some(code) = self.state.pending_close() {
            tracing::warn!(%code, "peer did not confirm close in time");
            self.teardown(code).await;
        }
    }

    /// Apply a ping interval and (re)arm or cancel the probe to match.
    async fn set_ping_interval(&mut self, interval: Option<Duration>) {
        self.liveness.set_interval(interval);
        match interval {
            Some(_) if self.state.is_connected() => {
                if self.liveness.is_armed() {
                    self.liveness.arm(&self.events_tx, Event::PingTimer);
                } else {
                    self.liveness.cancel();
                    self.probe().await;
                }
            }
            Some(_) => {}
            None => self.liveness.cancel(),
        }
    }

    async fn probe(&mut self) {
        match self.liveness.tick() {
            Probe::SendPing => {
                tracing::trace!("liveness ping");
                if let Err(error) = self.write(Frame::ping(Bytes::new())).await {
                    self.transport_failed(error).await;
                    return;
                }
                self.liveness.arm(&self.events_tx, Event::PingTimer);
            }
            Probe::TimedOut => {
                tracing::warn!("pong not received within the ping interval");
                self.report(Error::Transport(
                    "pong not received within the ping interval".into(),
                ));
                self.close(CloseCode::Abnormal).await;
                if !self.state.is_disconnected() {
                    self.teardown(CloseCode::Abnormal).await;
                }
            }
        }
    }

    async fn on_frame(&mut self, frame: Frame) {
        if let Err(violation) = frame.validate() {
            self.protocol_error(violation.into()).await;
            return;
        }
        tracing::trace!(opcode = %frame.opcode, fin = frame.fin, len = frame.payload().len(), "frame received");

        match frame.opcode {
            OpCode::Close => self.on_close_frame(&frame).await,
            OpCode::Text | OpCode::Binary | OpCode::Continuation | OpCode::Ping | OpCode::Pong => {
                match self.reassembler.append(&frame) {
                    Ok(Some(assembled)) => self.on_assembled(assembled).await,
                    Ok(None) => {}
                    Err(error) => self.protocol_error(error).await,
                }
            }
        }
    }

    async fn on_assembled(&mut self, assembled: Assembled) {
        match assembled {
            Assembled::Data(data) => self.dispatcher.notify(Notification::Data(data)),
            Assembled::Ping(payload) => {
                if self.state.is_connected() {
                    if let Err(error) = self.write(Frame::pong(payload)).await {
                        self.transport_failed(error).await;
                        return;
                    }
                }
                self.dispatcher.notify(Notification::Ping);
            }
            Assembled::Pong(_) => {
                self.liveness.pong_received();
                self.dispatcher.notify(Notification::Pong);
            }
        }
    }

    async fn on_close_frame(&mut self, frame: &Frame) {
        match self.state {
            ConnectionState::Disconnecting(code) => {
                tracing::debug!(%code, "close confirmed by peer");
                self.teardown(code).await;
            }
            ConnectionState::Connected => {
                let code = peer_close_code(frame);
                tracing::debug!(%code, "peer initiated close");
                self.close(code).await;
                if let Some(code) = self.state.pending_close() {
                    self.teardown(code).await;
                }
            }
            ConnectionState::Connecting | ConnectionState::Disconnected => {}
        }
    }

    async fn protocol_error(&mut self, error: Error) {
        tracing::warn!(%error, "protocol violation");
        let code = error.close_code();
        self.reassembler.reset();
        self.report(error);
        self.close(code).await;
    }

    async fn on_transport_closed(&mut self, error: Option<Error>) {
        let code = match self.state {
            ConnectionState::Connected => CloseCode::Abnormal,
            ConnectionState::Disconnecting(code) => code,
            ConnectionState::Connecting | ConnectionState::Disconnected => return,
        };
        match error {
            Some(error) => {
                tracing::error!(%error, "transport read failed");
                self.report(error);
            }
            None => tracing::debug!("transport closed by peer"),
        }
        self.teardown(code).await;
    }

    async fn transport_failed(&mut self, error: Error) {
        tracing::error!(%error, "transport write failed");
        self.report(error);
        let code = self.state.pending_close().unwrap_or(CloseCode::Abnormal);
        self.teardown(code).await;
    }

    /// Release the transport and report `code` as the final close code.
    async fn teardown(&mut self, code: CloseCode) {
        if self.state.is_disconnected() {
            return;
        }
        self.liveness.cancel();
        if let Some(timer) = self.close_timer.take() {
            timer.cancel();
        }
        self.reassembler.reset();
        if let Some(channel) = self.channel.take() {
            channel.close().await;
        }
        self.set_state(ConnectionState::Disconnected);
        tracing::info!(%code, "websocket disconnected");
        self.dispatcher.notify(Notification::Disconnected(code));
    }

    async fn shutdown(&mut self) {
        if let Some(handshake) = self.handshake.take() {
            handshake.abort();
        }
        if self.channel.is_none() {
            self.set_state(ConnectionState::Disconnected);
            return;
        }
        self.close(CloseCode::GoingAway).await;
        if let Some(code) = self.state.pending_close() {
            self.teardown(code).await;
        }
    }
}

/// Connect the transport and run the opening handshake.
async fn open(
    connector: &dyn Connector,
    target: &Target,
    headers: Vec<(String, String)>,
    limits: &Limits,
) -> Result<(BoxedStream, BytesMut)> {
    let request = HandshakeRequest::new(target, headers)?;
    let mut stream = connector.connect(target).await?;
    let leftover = handshake::negotiate(&mut stream, &request, limits).await?;
    Ok((stream, leftover))
}

/// Decode frames from the read half and forward them to the machine.
async fn read_frames(
    mut reader: ReadHalf<BoxedStream>,
    mut buf: BytesMut,
    limits: Limits,
    read_size: usize,
    epoch: u64,
    events: mpsc::UnboundedSender<Event>,
) {
    loop {
        loop {
            match Frame::parse(&mut buf, &limits) {
                Ok(Some(frame)) => {
                    if events.send(Event::Frame { epoch, frame }).is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(violation) => {
                    let _ = events.send(Event::ReadFailed {
                        epoch,
                        error: violation.into(),
                    });
                    return;
                }
            }
        }

        buf.reserve(read_size);
        match reader.read_buf(&mut buf).await {
            Ok(0) => {
                let _ = events.send(Event::TransportClosed { epoch, error: None });
                return;
            }
            Ok(_) => {}
            Err(error) => {
                let _ = events.send(Event::TransportClosed {
                    epoch,
                    error: Some(error.into()),
                });
                return;
            }
        }
    }
}
