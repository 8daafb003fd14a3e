// Shared test harness: a scripted transport driven by the test body

#![allow(dead_code)]

use parking_lot::Mutex;
use realtime_core::transport::{ReadyState, Transport, TransportConnector, TransportSink};
use realtime_core::{
    ConnectionError, ConnectionManager, ConnectionResult, EventName, EventPayload,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Let the manager's dispatcher drain pending signals
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// Test-side view of one transport created by [`ScriptedConnector`]
pub struct ScriptedHandle {
    pub url: String,
    pub subprotocols: Vec<String>,
    sink: Mutex<Option<TransportSink>>,
    state: Mutex<ReadyState>,
    sent: Mutex<Vec<String>>,
    closes: Mutex<Vec<(u16, String)>>,
    fail_sends: AtomicBool,
    silent_close: AtomicBool,
}

impl ScriptedHandle {
    fn new(url: &str, subprotocols: &[String]) -> Self {
        Self {
            url: url.to_string(),
            subprotocols: subprotocols.to_vec(),
            sink: Mutex::new(None),
            state: Mutex::new(ReadyState::Connecting),
            sent: Mutex::new(Vec::new()),
            closes: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
            silent_close: AtomicBool::new(false),
        }
    }

    fn with_sink(&self, f: impl FnOnce(&TransportSink)) {
        if let Some(sink) = self.sink.lock().as_ref() {
            f(sink);
        }
    }

    /// Simulate the handshake completing
    pub fn accept(&self) {
        *self.state.lock() = ReadyState::Open;
        self.with_sink(|sink| sink.opened());
    }

    /// Simulate an inbound frame
    pub fn deliver(&self, frame: &str) {
        self.with_sink(|sink| sink.message(frame.to_string()));
    }

    /// Simulate a transport-level failure
    pub fn fail(&self, message: &str) {
        *self.state.lock() = ReadyState::Closed;
        self.with_sink(|sink| sink.errored(ConnectionError::transport(message)));
    }

    /// Simulate the server closing the connection
    pub fn server_close(&self, code: u16, reason: &str) {
        *self.state.lock() = ReadyState::Closed;
        self.with_sink(|sink| sink.closed(code, reason));
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Record closes without ever reporting `closed`, like a peer that went away
    pub fn set_silent_close(&self, silent: bool) {
        self.silent_close.store(silent, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Sent frames excluding heartbeat pings
    pub fn sent_payloads(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|frame| !frame.starts_with(r#"{"type":"ping""#))
            .collect()
    }

    pub fn pings(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|frame| frame.starts_with(r#"{"type":"ping""#))
            .collect()
    }

    pub fn closes(&self) -> Vec<(u16, String)> {
        self.closes.lock().clone()
    }
}

struct ScriptedTransport(Arc<ScriptedHandle>);

impl Transport for ScriptedTransport {
    fn open(&mut self, sink: TransportSink) -> ConnectionResult<()> {
        *self.0.sink.lock() = Some(sink);
        Ok(())
    }

    fn send(&mut self, frame: &str) -> ConnectionResult<()> {
        if *self.0.state.lock() != ReadyState::Open {
            return Err(ConnectionError::send("scripted transport not open"));
        }
        if self.0.fail_sends.load(Ordering::SeqCst) {
            return Err(ConnectionError::send("scripted send failure"));
        }
        self.0.sent.lock().push(frame.to_string());
        Ok(())
    }

    fn close(&mut self, code: u16, reason: &str) {
        let mut state = self.0.state.lock();
        if *state == ReadyState::Closed {
            return;
        }
        *state = ReadyState::Closed;
        drop(state);

        self.0.closes.lock().push((code, reason.to_string()));
        if !self.0.silent_close.load(Ordering::SeqCst) {
            self.0.with_sink(|sink| sink.closed(code, reason));
        }
    }

    fn ready_state(&self) -> ReadyState {
        *self.0.state.lock()
    }
}

/// Connector whose transports are controlled by the test
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    created: Arc<Mutex<Vec<Arc<ScriptedHandle>>>>,
    fail_create: Arc<AtomicBool>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.created.lock().len()
    }

    pub fn transport(&self, index: usize) -> Arc<ScriptedHandle> {
        Arc::clone(&self.created.lock()[index])
    }

    pub fn latest(&self) -> Arc<ScriptedHandle> {
        let created = self.created.lock();
        Arc::clone(created.last().expect("no transport created"))
    }
}

impl TransportConnector for ScriptedConnector {
    fn create(&self, url: &str, subprotocols: &[String]) -> ConnectionResult<Box<dyn Transport>> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ConnectionError::construction("scripted construction failure", url));
        }
        let handle = Arc::new(ScriptedHandle::new(url, subprotocols));
        self.created.lock().push(Arc::clone(&handle));
        Ok(Box::new(ScriptedTransport(handle)))
    }
}

/// Records every payload published for a set of event names
#[derive(Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<(String, EventPayload)>>>,
}

impl EventRecorder {
    pub fn attach(manager: &ConnectionManager, names: &[&str]) -> Self {
        let recorder = Self::default();
        for name in names {
            let events = Arc::clone(&recorder.events);
            let label = name.to_string();
            manager.subscribe(EventName::from(*name), move |payload| {
                events.lock().push((label.clone(), payload.clone()));
            });
        }
        recorder
    }

    pub fn all(&self) -> Vec<(String, EventPayload)> {
        self.events.lock().clone()
    }

    pub fn named(&self, name: &str) -> Vec<EventPayload> {
        self.events
            .lock()
            .iter()
            .filter(|(label, _)| label == name)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.named(name).len()
    }

    pub fn errors(&self) -> Vec<ConnectionError> {
        self.named("error")
            .into_iter()
            .filter_map(|payload| match payload {
                EventPayload::Error(err) => Some(err),
                _ => None,
            })
            .collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.named("message")
            .into_iter()
            .filter_map(|payload| match payload {
                EventPayload::Message(msg) => Some(msg.raw),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}
