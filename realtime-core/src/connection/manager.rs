// Connection manager
// Owns the active transport, the outbound queue and both timers

use super::heartbeat::HeartbeatMonitor;
use super::queue::OutboundQueue;
use super::reconnect::ReconnectScheduler;
use super::state_machine::{next_state, ConnectionState, StatusSnapshot, Trigger};
use crate::config::{ConnectOptions, ConnectionConfig};
use crate::error::ConnectionError;
use crate::events::{EventName, EventPayload, EventRegistry, Subscription};
use crate::logging::{create_span, redact_url};
use crate::protocol::{InboundMessage, OutboundMessage, PingFrame};
use crate::transport::{
    resolve_destination, Destination, LoopbackTransport, ReadyState, Transport,
    TransportConnector, TransportEvent, TransportSink, WebSocketConnector, CLOSE_NORMAL,
    CLOSE_STALE,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn, Instrument};

/// Work delivered to the manager's dispatcher task
#[derive(Debug)]
enum Signal {
    Transport { generation: u64, event: TransportEvent },
    ReconnectDue { timer: u64 },
    HeartbeatTick { timer: u64 },
}

/// Events produced under the state lock, dispatched after it is released
#[derive(Default)]
struct Outbox(Vec<(EventName, EventPayload)>);

impl Outbox {
    fn push(&mut self, name: EventName, payload: EventPayload) {
        self.0.push((name, payload));
    }
}

struct ActiveTransport {
    generation: u64,
    handle: Box<dyn Transport>,
}

struct Inner {
    state: ConnectionState,
    url: Option<String>,
    is_mock: bool,
    options: ConnectOptions,
    explicit_disconnect: bool,
    transport: Option<ActiveTransport>,
    generation: u64,
    queue: OutboundQueue,
    reconnect: ReconnectScheduler,
    heartbeat: HeartbeatMonitor,
    last_open_at_ms: Option<i64>,
    last_inbound_at_ms: Option<i64>,
}

impl Inner {
    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: self.state,
            url: self.url.clone(),
            is_mock: self.is_mock,
            reconnect_attempt: self.reconnect.attempt(),
            last_open_at_ms: self.last_open_at_ms,
            last_inbound_at_ms: self.last_inbound_at_ms,
            queued_count: self.queue.len(),
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.transport.as_ref().map(|t| t.generation) == Some(generation)
    }

    fn transport_ready(&self) -> bool {
        self.transport
            .as_ref()
            .map_or(false, |t| t.handle.ready_state() == ReadyState::Open)
    }

    /// Apply `trigger`; records a `status` event when the state changes
    fn transition(&mut self, trigger: Trigger, outbox: &mut Outbox) -> bool {
        let Some(next) = next_state(self.state, trigger) else {
            trace!(state = %self.state, ?trigger, "trigger ignored");
            return false;
        };

        let previous = self.state;
        self.state = next;
        if previous != next {
            info!(from = %previous, to = %next, ?trigger, "connection state changed");
        }
        outbox.push(EventName::Status, EventPayload::Status(self.snapshot()));
        true
    }

    /// Drop the active transport so its later events are ignored
    fn detach_transport(&mut self) -> Option<Box<dyn Transport>> {
        self.transport.take().map(|t| t.handle)
    }
}

struct Shared {
    config: ConnectionConfig,
    connector: Option<Arc<dyn TransportConnector>>,
    events: EventRegistry,
    signals: mpsc::UnboundedSender<Signal>,
    inner: Mutex<Inner>,
}

/// Realtime connection manager.
///
/// Cheap to clone; clones share one connection. Must be created inside a
/// Tokio runtime. No operation returns an error: failures are published as
/// `error` events and, where eligible, followed by an automatic reconnect.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Manager using real WebSocket transports
    pub fn new(config: ConnectionConfig) -> Self {
        Self::build(config, Some(Arc::new(WebSocketConnector::new())))
    }

    /// Manager using a custom transport connector
    pub fn with_connector(
        config: ConnectionConfig,
        connector: Arc<dyn TransportConnector>,
    ) -> Self {
        Self::build(config, Some(connector))
    }

    /// Manager without network support; every connection runs in mock mode
    pub fn offline(config: ConnectionConfig) -> Self {
        Self::build(config, None)
    }

    fn build(config: ConnectionConfig, connector: Option<Arc<dyn TransportConnector>>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let inner = Inner {
            state: ConnectionState::Idle,
            url: None,
            is_mock: false,
            options: ConnectOptions::default(),
            explicit_disconnect: false,
            transport: None,
            generation: 0,
            queue: OutboundQueue::new(config.queue.capacity),
            reconnect: ReconnectScheduler::new(config.reconnect.clone()),
            heartbeat: HeartbeatMonitor::new(config.heartbeat.clone()),
            last_open_at_ms: None,
            last_inbound_at_ms: None,
        };

        let shared = Arc::new(Shared {
            config,
            connector,
            events: EventRegistry::new(),
            signals: tx,
            inner: Mutex::new(inner),
        });

        tokio::spawn(
            run_dispatcher(Arc::downgrade(&shared), rx).instrument(create_span("dispatcher")),
        );
        Self { shared }
    }

    /// Start connecting. Returns immediately; watch `open`/`error`/`close`/`status`.
    ///
    /// Ignored while a connection is already active.
    pub fn connect(&self, options: ConnectOptions) {
        let mut outbox = Outbox::default();
        {
            let mut inner = self.shared.inner.lock();
            inner.reconnect.cancel();
            inner.explicit_disconnect = false;
            inner.options = options;

            if inner.state.accepts_connect() {
                self.shared.establish(&mut inner, &mut outbox);
            } else {
                debug!(state = %inner.state, "connect ignored, connection already active");
            }
        }
        self.shared.dispatch(outbox);
    }

    /// Stop all activity and suppress automatic reconnects. Idempotent.
    pub fn disconnect(&self) {
        let mut outbox = Outbox::default();
        {
            let mut inner = self.shared.inner.lock();
            inner.explicit_disconnect = true;
            inner.reconnect.cancel();
            inner.heartbeat.stop();

            if inner.transition(Trigger::Disconnect, &mut outbox) {
                let is_mock = inner.is_mock;
                if let Some(mut transport) = inner.detach_transport() {
                    transport.close(CLOSE_NORMAL, "client disconnect");
                    outbox.push(
                        EventName::Close,
                        EventPayload::Close {
                            code: CLOSE_NORMAL,
                            reason: "client disconnect".to_string(),
                            is_mock,
                        },
                    );
                }
                inner.transition(Trigger::Settled, &mut outbox);
                info!("disconnected");
            }
        }
        self.shared.dispatch(outbox);
    }

    /// Transmit now if the transport is ready, otherwise queue for the next open
    pub fn send(&self, message: impl Into<OutboundMessage>) {
        self.shared.send_frame(message.into().into_frame());
    }

    /// Serialize `value` to JSON and send it; serialization failures become `error` events
    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) {
        match serde_json::to_string(value) {
            Ok(frame) => self.shared.send_frame(frame),
            Err(e) => {
                let err = ConnectionError::send_with_cause("failed to serialize message", e);
                warn!(error = %err, "dropping unserializable message");
                self.shared.emit_error(err);
            }
        }
    }

    pub fn status(&self) -> StatusSnapshot {
        self.shared.inner.lock().snapshot()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    /// True when a sent frame would go straight to the transport
    pub fn is_connected(&self) -> bool {
        self.shared.inner.lock().transport_ready()
    }

    /// True while a reconnect timer is armed
    pub fn reconnect_pending(&self) -> bool {
        self.shared.inner.lock().reconnect.is_pending()
    }

    pub fn subscribe<F>(&self, name: impl Into<EventName>, handler: F) -> Subscription
    where
        F: Fn(&EventPayload) + Send + Sync + 'static,
    {
        self.shared.events.subscribe(name, handler)
    }

    /// Resolve with the next payload published under `name`
    pub fn once(
        &self,
        name: impl Into<EventName>,
    ) -> impl Future<Output = Option<EventPayload>> + Send + 'static {
        self.shared.events.once(name)
    }
}

impl Shared {
    fn dispatch(&self, outbox: Outbox) {
        for (name, payload) in outbox.0 {
            self.events.emit(&name, &payload);
        }
    }

    fn emit_error(&self, err: ConnectionError) {
        self.events.emit(&EventName::Error, &EventPayload::Error(err));
    }

    fn sink(&self, generation: u64) -> TransportSink {
        let tx = self.signals.clone();
        TransportSink::new(move |event| {
            let _ = tx.send(Signal::Transport { generation, event });
        })
    }

    /// Resolve the destination and create a fresh transport for it
    fn establish(&self, inner: &mut Inner, outbox: &mut Outbox) {
        if let Some(mut stale) = inner.detach_transport() {
            stale.close(CLOSE_NORMAL, "superseded");
        }
        inner.heartbeat.stop();

        let destination = resolve_destination(
            self.config.address.as_deref(),
            self.config.origin.as_deref(),
            inner.options.destination_path.as_deref(),
            self.connector.is_some(),
        );

        inner.generation += 1;
        let generation = inner.generation;
        let sink = self.sink(generation);

        let created = match destination {
            Destination::Mock => {
                // the loopback is always available, retries are pointless
                inner.options.auto_reconnect = false;
                inner.url = None;
                inner.is_mock = true;
                inner.transition(Trigger::Connect { mock: true }, outbox);
                info!("no usable destination, running in mock mode");

                let mut transport = LoopbackTransport::new(self.config.mock_open_delay);
                transport
                    .open(sink)
                    .map(|_| Box::new(transport) as Box<dyn Transport>)
            }
            Destination::Real(url) => {
                inner.url = Some(url.clone());
                inner.is_mock = false;
                inner.transition(Trigger::Connect { mock: false }, outbox);
                info!(url = %redact_url(&url), attempt = inner.reconnect.attempt(), "connecting");

                match &self.connector {
                    Some(connector) => connector
                        .create(&url, inner.options.subprotocols.as_slice())
                        .and_then(|mut transport| transport.open(sink).map(|_| transport)),
                    None => Err(ConnectionError::construction(
                        "no transport connector",
                        url,
                    )),
                }
            }
        };

        match created {
            Ok(handle) => inner.transport = Some(ActiveTransport { generation, handle }),
            Err(err) => {
                warn!(error = %err, "transport construction failed");
                self.fail(inner, err, outbox);
            }
        }
    }

    /// Move to `Error`, publish `err`, and retry if eligible
    fn fail(&self, inner: &mut Inner, err: ConnectionError, outbox: &mut Outbox) {
        inner.heartbeat.stop();
        if let Some(mut transport) = inner.detach_transport() {
            transport.close(CLOSE_NORMAL, "transport error");
        }
        outbox.push(EventName::Error, EventPayload::Error(err));
        inner.transition(Trigger::TransportError, outbox);
        self.schedule_reconnect(inner);
    }

    fn schedule_reconnect(&self, inner: &mut Inner) {
        if inner.explicit_disconnect {
            debug!("reconnect suppressed after explicit disconnect");
            return;
        }
        if !inner.options.auto_reconnect {
            debug!("auto reconnect disabled");
            return;
        }

        let tx = self.signals.clone();
        let attempt = inner.reconnect.attempt();
        let delay = inner.reconnect.arm(move |timer| {
            let _ = tx.send(Signal::ReconnectDue { timer });
        });
        info!(attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
    }

    fn send_frame(&self, frame: String) {
        let mut outbox = Outbox::default();
        {
            let mut inner = self.inner.lock();
            if inner.transport_ready() {
                let result = match inner.transport.as_mut() {
                    Some(active) => active.handle.send(&frame),
                    None => Ok(()),
                };
                if let Err(err) = result {
                    warn!(error = %err, "send failed, frame queued");
                    inner.queue.enqueue(frame);
                    outbox.push(EventName::Error, EventPayload::Error(err));
                }
            } else {
                inner.queue.enqueue(frame);
                trace!(queued = inner.queue.len(), "frame queued until open");
            }
        }
        self.dispatch(outbox);
    }

    /// Transmit queued frames in submission order; failures put the rest back
    fn flush_queue(&self, inner: &mut Inner, outbox: &mut Outbox) {
        let frames = inner.queue.drain();
        if frames.is_empty() {
            return;
        }
        let total = frames.len();
        let Some(active) = inner.transport.as_mut() else {
            inner.queue.restore(frames);
            return;
        };

        let mut remaining = frames.into_iter();
        while let Some(frame) = remaining.next() {
            if let Err(err) = active.handle.send(&frame) {
                warn!(error = %err, "flush interrupted, requeueing");
                let mut unsent = vec![frame];
                unsent.extend(remaining);
                inner.queue.restore(unsent);
                outbox.push(EventName::Error, EventPayload::Error(err));
                return;
            }
        }
        debug!(count = total, "flushed outbound queue");
    }

    fn handle_signal(&self, signal: Signal) {
        let mut outbox = Outbox::default();
        {
            let mut inner = self.inner.lock();
            match signal {
                Signal::Transport { generation, event } => {
                    if !inner.is_current(generation) {
                        trace!(generation, ?event, "ignoring event from detached transport");
                    } else {
                        self.on_transport_event(&mut inner, event, &mut outbox);
                    }
                }
                Signal::ReconnectDue { timer } => {
                    if inner.reconnect.take_fired(timer) {
                        self.on_reconnect_due(&mut inner, &mut outbox);
                    }
                }
                Signal::HeartbeatTick { timer } => {
                    if inner.heartbeat.is_current(timer) {
                        self.on_heartbeat_tick(&mut inner, &mut outbox);
                    }
                }
            }
        }
        self.dispatch(outbox);
    }

    fn on_transport_event(&self, inner: &mut Inner, event: TransportEvent, outbox: &mut Outbox) {
        match event {
            TransportEvent::Opened => {
                let mut open_outbox = Outbox::default();
                if !inner.transition(Trigger::TransportOpen, &mut open_outbox) {
                    return;
                }
                inner.reconnect.reset();
                inner.last_open_at_ms = Some(chrono::Utc::now().timestamp_millis());
                if inner.state == ConnectionState::Open {
                    let tx = self.signals.clone();
                    inner.heartbeat.start(move |timer| {
                        let _ = tx.send(Signal::HeartbeatTick { timer });
                    });
                }
                self.flush_queue(inner, outbox);
                info!(
                    is_mock = inner.is_mock,
                    url = %inner.url.as_deref().map(redact_url).unwrap_or_default(),
                    "connection open"
                );

                outbox.push(EventName::Open, EventPayload::Open { is_mock: inner.is_mock });
                // status reflects the reset attempt counter and flushed queue
                outbox.push(EventName::Status, EventPayload::Status(inner.snapshot()));
            }
            TransportEvent::Message(frame) => {
                inner.last_inbound_at_ms = Some(chrono::Utc::now().timestamp_millis());
                inner.heartbeat.record_inbound();

                let message = InboundMessage::parse(frame, inner.is_mock);
                let envelope = message.envelope();
                outbox.push(EventName::Message, EventPayload::Message(message));
                if let Some(envelope) = envelope {
                    trace!(event = %envelope.event, "demultiplexed envelope");
                    outbox.push(
                        EventName::from(envelope.event),
                        EventPayload::Domain(envelope.data),
                    );
                }
            }
            TransportEvent::Closed { code, reason } => {
                inner.detach_transport();
                self.on_closed(inner, code, reason, outbox);
            }
            TransportEvent::Errored(err) => self.fail(inner, err, outbox),
        }
    }

    /// Settle a released transport into `Closed` and retry if eligible
    fn on_closed(&self, inner: &mut Inner, code: u16, reason: String, outbox: &mut Outbox) {
        inner.heartbeat.stop();
        info!(code, %reason, "transport closed");

        outbox.push(
            EventName::Close,
            EventPayload::Close {
                code,
                reason,
                is_mock: inner.is_mock,
            },
        );
        inner.transition(Trigger::TransportClose, outbox);
        self.schedule_reconnect(inner);
    }

    fn on_reconnect_due(&self, inner: &mut Inner, outbox: &mut Outbox) {
        if inner.explicit_disconnect || !inner.options.auto_reconnect {
            return;
        }
        if !inner.state.accepts_connect() {
            debug!(state = %inner.state, "reconnect skipped");
            return;
        }
        info!(attempt = inner.reconnect.attempt(), "reconnecting");
        self.establish(inner, outbox);
    }

    fn on_heartbeat_tick(&self, inner: &mut Inner, outbox: &mut Outbox) {
        if inner.state != ConnectionState::Open {
            inner.heartbeat.stop();
            return;
        }

        let ping = PingFrame::now().to_frame();
        if let Some(active) = inner.transport.as_mut() {
            if let Err(e) = active.handle.send(&ping) {
                debug!(error = %e, "heartbeat ping not sent");
            }
        }

        let Some(idle) = inner.heartbeat.stale_for() else {
            return;
        };
        let threshold = inner.heartbeat.threshold();
        let err = ConnectionError::stale(idle.as_millis() as u64, threshold.as_millis() as u64);
        warn!(error = %err, "forcing transport closed");
        inner.heartbeat.stop();
        outbox.push(EventName::Error, EventPayload::Error(err));

        // a dead peer may never complete the close, so settle without waiting for it
        if let Some(mut transport) = inner.detach_transport() {
            transport.close(CLOSE_STALE, "heartbeat stale");
        }
        self.on_closed(inner, CLOSE_STALE, "heartbeat stale".to_string(), outbox);
    }
}

async fn run_dispatcher(shared: Weak<Shared>, mut signals: mpsc::UnboundedReceiver<Signal>) {
    while let Some(signal) = signals.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.handle_signal(signal);
    }
    trace!("connection dispatcher stopped");
}
