// In-process loopback transport used in mock mode

use super::{ReadyState, SharedReadyState, Transport, TransportSink};
use crate::error::{ConnectionError, ConnectionResult};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Echoes every sent frame back as an inbound message without touching the network
pub struct LoopbackTransport {
    open_delay: Duration,
    state: SharedReadyState,
    sink: Option<TransportSink>,
    open_task: Option<JoinHandle<()>>,
}

impl LoopbackTransport {
    pub fn new(open_delay: Duration) -> Self {
        Self {
            open_delay,
            state: SharedReadyState::new(ReadyState::Connecting),
            sink: None,
            open_task: None,
        }
    }
}

impl Transport for LoopbackTransport {
    fn open(&mut self, sink: TransportSink) -> ConnectionResult<()> {
        if self.sink.is_some() {
            return Err(ConnectionError::construction(
                "loopback transport already opened",
                "open called twice",
            ));
        }

        let delay = self.open_delay;
        let state = self.state.clone();
        let opener = sink.clone();
        self.open_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if state.transition(ReadyState::Connecting, ReadyState::Open) {
                debug!(delay_ms = delay.as_millis() as u64, "loopback transport open");
                opener.opened();
            }
        }));
        self.sink = Some(sink);
        Ok(())
    }

    fn send(&mut self, frame: &str) -> ConnectionResult<()> {
        match (&self.sink, self.state.get()) {
            (Some(sink), ReadyState::Open) => {
                trace!(len = frame.len(), "loopback echo");
                sink.message(frame.to_string());
                Ok(())
            }
            (_, state) => Err(ConnectionError::send(format!(
                "loopback transport not open ({:?})",
                state
            ))),
        }
    }

    fn close(&mut self, code: u16, reason: &str) {
        if let Some(task) = self.open_task.take() {
            task.abort();
        }
        if self.state.get() == ReadyState::Closed {
            return;
        }
        self.state.set(ReadyState::Closed);
        if let Some(sink) = &self.sink {
            sink.closed(code, reason);
        }
    }

    fn ready_state(&self) -> ReadyState {
        self.state.get()
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        if let Some(task) = self.open_task.take() {
            task.abort();
        }
    }
}
