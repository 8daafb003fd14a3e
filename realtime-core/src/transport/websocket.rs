// WebSocket transport over tokio-tungstenite

use super::{ReadyState, SharedReadyState, Transport, TransportConnector, TransportSink};
use crate::error::{ConnectionError, ConnectionResult};
use crate::logging::redact_url;
use futures_util::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Close code reported when the peer closed without a status
const CLOSE_NO_STATUS: u16 = 1005;

/// Close code reported when the stream ended without a close frame
const CLOSE_ABNORMAL: u16 = 1006;

/// Default bound on the opening handshake
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on an orderly close before the connection is dropped
const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Creates [`WebSocketTransport`]s
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    connect_timeout: Duration,
    close_timeout: Duration,
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

impl WebSocketConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give up on a handshake that takes longer than `timeout`
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Drop a connection whose close has not completed within `timeout`
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }
}

impl TransportConnector for WebSocketConnector {
    fn create(&self, url: &str, subprotocols: &[String]) -> ConnectionResult<Box<dyn Transport>> {
        let transport = WebSocketTransport::new(url, subprotocols, self.connect_timeout)?
            .with_close_timeout(self.close_timeout);
        Ok(Box::new(transport))
    }
}

/// WebSocket transport for a realtime backend
pub struct WebSocketTransport {
    url: String,
    request: Option<Request>,
    connect_timeout: Duration,
    close_timeout: Duration,
    state: SharedReadyState,
    sink: Option<TransportSink>,
    outgoing: Option<mpsc::UnboundedSender<Message>>,
    task: Option<JoinHandle<()>>,
}

impl WebSocketTransport {
    /// Validate the URL and prepare the handshake request
    pub fn new(
        url: &str,
        subprotocols: &[String],
        connect_timeout: Duration,
    ) -> ConnectionResult<Self> {
        let mut request = url.into_client_request().map_err(|e| {
            ConnectionError::construction(format!("invalid WebSocket URL {}", url), e)
        })?;

        if !subprotocols.is_empty() {
            let header = HeaderValue::from_str(&subprotocols.join(", "))
                .map_err(|e| ConnectionError::construction("invalid subprotocol list", e))?;
            request.headers_mut().insert("Sec-WebSocket-Protocol", header);
        }

        Ok(Self {
            url: url.to_string(),
            request: Some(request),
            connect_timeout,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            state: SharedReadyState::new(ReadyState::Connecting),
            sink: None,
            outgoing: None,
            task: None,
        })
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Abort the connection task if the close handshake stalls, e.g. behind a
    /// write blocked on a peer that stopped reading
    fn arm_close_deadline(&self) {
        let (Some(task), Some(sink)) = (&self.task, &self.sink) else {
            return;
        };
        let abort = task.abort_handle();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            abort.abort();
            self.state.set(ReadyState::Closed);
            return;
        };

        let state = self.state.clone();
        let sink = sink.clone();
        let timeout = self.close_timeout;
        runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if state.transition(ReadyState::Closing, ReadyState::Closed) {
                abort.abort();
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "WebSocket close timed out, dropping connection"
                );
                sink.closed(CLOSE_ABNORMAL, "close timed out");
            }
        });
    }
}

impl Transport for WebSocketTransport {
    fn open(&mut self, sink: TransportSink) -> ConnectionResult<()> {
        let request = self.request.take().ok_or_else(|| {
            ConnectionError::construction("WebSocket transport already opened", self.url.clone())
        })?;
        tokio::runtime::Handle::try_current()
            .map_err(|e| ConnectionError::construction("no Tokio runtime available", e))?;

        let (tx, rx) = mpsc::unbounded_channel();
        self.outgoing = Some(tx);

        info!(url = %redact_url(&self.url), "connecting WebSocket");
        self.sink = Some(sink.clone());
        self.task = Some(tokio::spawn(run_connection(
            request,
            self.connect_timeout,
            self.state.clone(),
            sink,
            rx,
        )));
        Ok(())
    }

    fn send(&mut self, frame: &str) -> ConnectionResult<()> {
        if self.state.get() != ReadyState::Open {
            return Err(ConnectionError::send(format!(
                "WebSocket not open ({:?})",
                self.state.get()
            )));
        }

        match &self.outgoing {
            Some(tx) => tx
                .send(Message::Text(frame.to_string()))
                .map_err(|_| ConnectionError::send("WebSocket writer has shut down")),
            None => Err(ConnectionError::send("WebSocket not opened")),
        }
    }

    fn close(&mut self, code: u16, reason: &str) {
        let previous = self.state.get();
        if matches!(previous, ReadyState::Closing | ReadyState::Closed) {
            return;
        }
        self.state.set(ReadyState::Closing);

        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: Cow::Owned(reason.to_string()),
        };
        let queued = self
            .outgoing
            .as_ref()
            .map(|tx| tx.send(Message::Close(Some(frame))).is_ok())
            .unwrap_or(false);

        if queued {
            self.arm_close_deadline();
        } else {
            // never opened, or the connection task already ended
            if let Some(task) = self.task.take() {
                task.abort();
            }
            self.state.set(ReadyState::Closed);
        }
        debug!(code, reason, "WebSocket close requested");
    }

    fn ready_state(&self) -> ReadyState {
        self.state.get()
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        // dropping `outgoing` stops an open connection; a pending handshake is aborted
        if self.state.get() == ReadyState::Connecting {
            if let Some(task) = self.task.take() {
                task.abort();
            }
        }
    }
}

async fn run_connection(
    request: Request,
    connect_timeout: Duration,
    state: SharedReadyState,
    sink: TransportSink,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
) {
    let ws = match tokio::time::timeout(connect_timeout, connect_async(request)).await {
        Ok(Ok((ws, _response))) => ws,
        Ok(Err(e)) => {
            error!("WebSocket connection failed: {}", e);
            if state.finish() {
                sink.errored(ConnectionError::transport_with_cause(
                    "WebSocket connection failed",
                    e,
                ));
            }
            return;
        }
        Err(elapsed) => {
            error!("WebSocket connection timed out after {:?}", connect_timeout);
            if state.finish() {
                sink.errored(ConnectionError::transport_with_cause(
                    format!("WebSocket connection timed out after {:?}", connect_timeout),
                    elapsed,
                ));
            }
            return;
        }
    };

    // close() may have been called during the handshake; the queued close frame handles it
    if state.transition(ReadyState::Connecting, ReadyState::Open) {
        info!("WebSocket connected");
        sink.opened();
    }

    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            outbound = outgoing.recv() => match outbound {
                Some(Message::Close(frame)) => {
                    let (code, reason) = frame
                        .as_ref()
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((CLOSE_NO_STATUS, String::new()));
                    if let Err(e) = write.send(Message::Close(frame)).await {
                        debug!("close frame not delivered: {}", e);
                    }
                    let _ = write.close().await;
                    if state.finish() {
                        sink.closed(code, reason);
                    }
                    return;
                }
                Some(message) => {
                    if let Err(e) = write.send(message).await {
                        error!("WebSocket write failed: {}", e);
                        if state.finish() {
                            sink.errored(ConnectionError::transport_with_cause(
                                "WebSocket write failed",
                                e,
                            ));
                        }
                        return;
                    }
                }
                None => {
                    // transport handle dropped
                    let _ = write.close().await;
                    state.finish();
                    return;
                }
            },
            inbound = read.next() => match inbound {
                Some(Ok(Message::Text(text))) => sink.message(text),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => sink.message(text),
                    Err(_) => warn!("dropping non UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.into_owned()))
                        .unwrap_or((CLOSE_NO_STATUS, String::new()));
                    info!(code, %reason, "WebSocket closed by server");
                    if state.finish() {
                        sink.closed(code, reason);
                    }
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    if state.finish() {
                        sink.errored(ConnectionError::transport_with_cause("WebSocket error", e));
                    }
                    return;
                }
                None => {
                    warn!("WebSocket stream ended");
                    if state.finish() {
                        sink.closed(CLOSE_ABNORMAL, "stream ended");
                    }
                    return;
                }
            }
        }
    }
}
