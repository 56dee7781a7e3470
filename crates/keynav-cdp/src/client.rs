//! Chrome DevTools Protocol client over a WebSocket.
//!
//! A `CdpClient` owns one connection to one debugging target (a page, the
//! extension's service worker, or the browser itself). Commands carry an
//! auto-incrementing id; a reader task matches each response frame back to
//! the caller waiting on that id and forwards event frames to subscribers.
//!
//! Test code issues one command at a time and awaits it, so there is no
//! request pipelining policy here beyond "each call gets its own id".

use crate::error::{HarnessError, Result};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Default time a single command may take before the caller gives up.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Outcome>>>>;
type SubscriberMap = Arc<Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Value>>>>>;

/// Error object of a failed command, as sent by the browser.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct ProtocolError {
    /// Protocol error code (e.g. -32601 for an unknown method).
    pub code: i64,
    /// Human-readable message.
    pub message: String,
}

type Outcome = std::result::Result<Value, ProtocolError>;

/// One decoded frame from the browser.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Frame {
    /// Reply to the command with this id.
    Response { id: u64, outcome: Outcome },
    /// Unsolicited event.
    Event { method: String, params: Value },
}

/// Decodes a text frame. Returns `None` for frames that are neither a
/// response nor an event.
pub(crate) fn parse_frame(text: &str) -> Result<Option<Frame>> {
    let mut value: Value = serde_json::from_str(text)?;

    if let Some(id) = value.get("id").and_then(Value::as_u64) {
        let outcome = match value.get_mut("error") {
            Some(error) => Err(serde_json::from_value(error.take())?),
            None => Ok(value.get_mut("result").map(Value::take).unwrap_or(Value::Null)),
        };
        return Ok(Some(Frame::Response { id, outcome }));
    }

    if let Some(method) = value.get("method").and_then(Value::as_str) {
        let method = method.to_string();
        let params = value.get_mut("params").map(Value::take).unwrap_or(Value::Null);
        return Ok(Some(Frame::Event { method, params }));
    }

    Ok(None)
}

/// Unwraps a `Runtime.evaluate` result into the returned value.
///
/// A thrown exception becomes `ScriptExecutionFailed` carrying the
/// exception's description. `undefined` results map to `null`.
pub(crate) fn evaluation_value(mut result: Value) -> Result<Value> {
    if let Some(details) = result.get("exceptionDetails") {
        let description = details
            .pointer("/exception/description")
            .and_then(Value::as_str)
            .or_else(|| details.get("text").and_then(Value::as_str))
            .unwrap_or("uncaught exception");
        return Err(HarnessError::ScriptExecutionFailed(description.to_string()));
    }

    Ok(result
        .pointer_mut("/result/value")
        .map(Value::take)
        .unwrap_or(Value::Null))
}

/// A connection to one debugging target.
pub struct CdpClient {
    url: String,
    next_id: AtomicU64,
    pending: PendingMap,
    subscribers: SubscriberMap,
    outgoing: mpsc::UnboundedSender<Message>,
    closed: Arc<AtomicBool>,
    command_timeout: Duration,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl std::fmt::Debug for CdpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdpClient")
            .field("url", &self.url)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl CdpClient {
    /// Connects to a target's `webSocketDebuggerUrl`.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionFailed` if the WebSocket handshake fails.
    pub async fn connect(ws_url: &str) -> Result<Self> {
        debug!(url = ws_url, "connecting to debugging target");

        let (stream, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|e| HarnessError::ConnectionFailed {
                url: ws_url.to_string(),
                reason: e.to_string(),
            })?;

        let (sink, source) = stream.split();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let subscribers: SubscriberMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();

        let writer = tokio::spawn(write_loop(sink, outgoing_rx));
        let reader = tokio::spawn(read_loop(
            source,
            pending.clone(),
            subscribers.clone(),
            closed.clone(),
        ));

        info!(url = ws_url, "CDP connection established");

        Ok(Self {
            url: ws_url.to_string(),
            next_id: AtomicU64::new(1),
            pending,
            subscribers,
            outgoing,
            closed,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            reader,
            writer,
        })
    }

    /// Overrides the per-command timeout.
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// WebSocket URL this client is connected to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns true once the target has closed the socket.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Sends a command and waits for its result.
    ///
    /// # Errors
    ///
    /// - `Protocol` if the browser answers with an error object
    /// - `CommandTimeout` if no answer arrives within the command timeout
    /// - `ConnectionClosed` if the socket is gone
    pub async fn send(&self, method: &str, params: Value) -> Result<Value> {
        self.send_with_timeout(method, params, self.command_timeout)
            .await
    }

    /// Sends a command with an explicit timeout.
    ///
    /// # Errors
    ///
    /// Same as [`CdpClient::send`].
    pub async fn send_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        if self.is_closed() {
            return Err(HarnessError::ConnectionClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = json!({ "id": id, "method": method, "params": params });

        // Register before sending so a fast reply can't be missed. The
        // reader flips `closed` under this lock, so a registration either
        // sees the flag or gets cleared with the rest.
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if self.is_closed() {
                return Err(HarnessError::ConnectionClosed);
            }
            pending.insert(id, tx);
        }

        debug!(id, method, "sending CDP command");
        if self
            .outgoing
            .send(Message::Text(frame.to_string().into()))
            .is_err()
        {
            self.pending.lock().await.remove(&id);
            return Err(HarnessError::ConnectionClosed);
        }

        let outcome = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => return Err(HarnessError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(HarnessError::CommandTimeout {
                    method: method.to_string(),
                    timeout,
                });
            }
        };

        outcome.map_err(|err| HarnessError::Protocol {
            method: method.to_string(),
            code: err.code,
            message: err.message,
        })
    }

    /// Enables a protocol domain (`Runtime`, `Profiler`, `Log`, ...).
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn enable(&self, domain: &str) -> Result<()> {
        self.send(&format!("{domain}.enable"), json!({})).await?;
        Ok(())
    }

    /// Subscribes to an event by method name, e.g. `Runtime.consoleAPICalled`.
    ///
    /// The receiver yields each event's `params` and ends when the
    /// connection closes.
    pub async fn subscribe(&self, method: &str) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .await
            .entry(method.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Evaluates an expression with `returnByValue` and `awaitPromise`.
    ///
    /// # Errors
    ///
    /// Returns `ScriptExecutionFailed` if the script throws or the returned
    /// promise rejects.
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let result = self
            .send(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        evaluation_value(result)
    }

    /// Evaluates an expression and deserializes its value.
    ///
    /// # Errors
    ///
    /// Returns an error if evaluation fails or the value has the wrong shape.
    pub async fn evaluate_as<T: DeserializeOwned>(&self, expression: &str) -> Result<T> {
        let value = self.evaluate(expression).await?;
        serde_json::from_value(value).map_err(|e| {
            HarnessError::ScriptExecutionFailed(format!("unexpected result shape: {e}"))
        })
    }

    /// Sends a close frame and stops the background tasks.
    pub async fn close(self) {
        let _ = self.outgoing.send(Message::Close(None));
        // Give the writer a moment to flush the close frame.
        let _ = tokio::time::timeout(Duration::from_millis(200), async {
            while !self.writer.is_finished() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = outgoing.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            warn!(error = %e, "CDP WebSocket write error");
            break;
        }
        if closing {
            break;
        }
    }
}

async fn read_loop(
    mut source: SplitStream<WsStream>,
    pending: PendingMap,
    subscribers: SubscriberMap,
    closed: Arc<AtomicBool>,
) {
    while let Some(message) = source.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => {
                debug!("CDP WebSocket closed by target");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "CDP WebSocket read error");
                break;
            }
        };

        match parse_frame(&text) {
            Ok(Some(Frame::Response { id, outcome })) => {
                if let Some(tx) = pending.lock().await.remove(&id) {
                    let _ = tx.send(outcome);
                }
            }
            Ok(Some(Frame::Event { method, params })) => {
                let mut subscribers = subscribers.lock().await;
                if let Some(senders) = subscribers.get_mut(&method) {
                    senders.retain(|tx| tx.send(params.clone()).is_ok());
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "unparseable CDP frame"),
        }
    }

    {
        let mut pending = pending.lock().await;
        closed.store(true, Ordering::SeqCst);
        // Dropping the senders wakes every waiter with ConnectionClosed.
        pending.clear();
    }
    subscribers.lock().await.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_success_response() {
        let frame = parse_frame(r#"{"id":7,"result":{"frameId":"A1"}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            frame,
            Frame::Response {
                id: 7,
                outcome: Ok(json!({"frameId": "A1"})),
            }
        );
    }

    #[test]
    fn parses_error_response() {
        let frame = parse_frame(
            r#"{"id":3,"error":{"code":-32601,"message":"'Foo.bar' wasn't found"}}"#,
        )
        .unwrap()
        .unwrap();
        match frame {
            Frame::Response { id, outcome: Err(err) } => {
                assert_eq!(id, 3);
                assert_eq!(err.code, -32601);
                assert!(err.message.contains("Foo.bar"));
            }
            other => panic!("expected error response, got {other:?}"),
        }
    }

    #[test]
    fn response_without_result_is_null() {
        let frame = parse_frame(r#"{"id":1}"#).unwrap().unwrap();
        assert_eq!(
            frame,
            Frame::Response {
                id: 1,
                outcome: Ok(Value::Null),
            }
        );
    }

    #[test]
    fn parses_event() {
        let frame = parse_frame(
            r#"{"method":"Runtime.consoleAPICalled","params":{"type":"log","args":[]}}"#,
        )
        .unwrap()
        .unwrap();
        match frame {
            Frame::Event { method, params } => {
                assert_eq!(method, "Runtime.consoleAPICalled");
                assert_eq!(params["type"], "log");
            }
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn ignores_unrecognised_frames() {
        assert!(parse_frame(r#"{"hello":"world"}"#).unwrap().is_none());
    }

    #[test]
    fn rejects_invalid_json() {
        assert!(matches!(parse_frame("not json"), Err(HarnessError::Json(_))));
    }

    #[test]
    fn evaluation_value_extracts_value() {
        let result = json!({"result": {"type": "number", "value": 42}});
        assert_eq!(evaluation_value(result).unwrap(), json!(42));
    }

    #[test]
    fn evaluation_value_maps_undefined_to_null() {
        let result = json!({"result": {"type": "undefined"}});
        assert_eq!(evaluation_value(result).unwrap(), Value::Null);
    }

    #[test]
    fn evaluation_value_reports_exception_description() {
        let result = json!({
            "result": {"type": "object", "subtype": "error"},
            "exceptionDetails": {
                "text": "Uncaught",
                "exception": {"description": "ReferenceError: chrome is not defined"}
            }
        });
        match evaluation_value(result) {
            Err(HarnessError::ScriptExecutionFailed(msg)) => {
                assert_eq!(msg, "ReferenceError: chrome is not defined");
            }
            other => panic!("expected script failure, got {other:?}"),
        }
    }

    /// Serves one WebSocket connection that answers like a target:
    /// `Test.echo` returns its params, `Test.fail` a protocol error,
    /// `Test.silent` nothing, and `Test.hangUp` closes the socket.
    async fn fake_target() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(message)) = ws.next().await {
                let Message::Text(text) = message else {
                    continue;
                };
                let command: Value = serde_json::from_str(&text).unwrap();
                let id = command["id"].clone();
                let reply = match command["method"].as_str() {
                    Some("Test.echo") => json!({"id": id, "result": command["params"]}),
                    Some("Test.fail") => {
                        json!({"id": id, "error": {"code": -32000, "message": "nope"}})
                    }
                    Some("Test.hangUp") => {
                        let _ = ws.close(None).await;
                        break;
                    }
                    _ => continue,
                };
                ws.send(Message::Text(reply.to_string().into())).await.unwrap();
            }
        });
        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn responses_are_matched_by_id() {
        let client = CdpClient::connect(&fake_target().await).await.unwrap();

        let first = client.send("Test.echo", json!({"n": 1})).await.unwrap();
        let second = client.send("Test.echo", json!({"n": 2})).await.unwrap();

        assert_eq!(first, json!({"n": 1}));
        assert_eq!(second, json!({"n": 2}));
        assert_eq!(client.next_id.load(Ordering::SeqCst), 3, "ids start at 1");
    }

    #[tokio::test]
    async fn protocol_errors_carry_code_and_message() {
        let client = CdpClient::connect(&fake_target().await).await.unwrap();

        match client.send("Test.fail", json!({})).await {
            Err(HarnessError::Protocol { method, code, message }) => {
                assert_eq!(method, "Test.fail");
                assert_eq!(code, -32000);
                assert_eq!(message, "nope");
            }
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_drops_the_pending_entry() {
        let client = CdpClient::connect(&fake_target().await).await.unwrap();

        let result = client
            .send_with_timeout("Test.silent", json!({}), Duration::from_millis(50))
            .await;

        assert!(matches!(result, Err(HarnessError::CommandTimeout { .. })));
        assert!(client.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn calls_fail_fast_once_the_target_hangs_up() {
        let client = CdpClient::connect(&fake_target().await).await.unwrap();
        client.send("Test.echo", json!({})).await.unwrap();

        let hung_up = client
            .send_with_timeout("Test.hangUp", json!({}), Duration::from_secs(5))
            .await;
        assert!(matches!(hung_up, Err(HarnessError::ConnectionClosed)), "{hung_up:?}");
        assert!(client.is_closed());

        let started = std::time::Instant::now();
        let after = client
            .send_with_timeout("Test.echo", json!({}), Duration::from_secs(5))
            .await;
        assert!(matches!(after, Err(HarnessError::ConnectionClosed)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn close_during_registration_is_not_a_timeout() {
        let client = Arc::new(CdpClient::connect(&fake_target().await).await.unwrap());

        // Hold the pending map so the call stops right before registering,
        // then mark the connection closed the way the reader does.
        let guard = client.pending.lock().await;
        let call = tokio::spawn({
            let client = client.clone();
            async move {
                client
                    .send_with_timeout("Test.silent", json!({}), Duration::from_secs(5))
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.closed.store(true, Ordering::SeqCst);
        drop(guard);

        let result = tokio::time::timeout(Duration::from_secs(1), call)
            .await
            .expect("call returned before its command timeout")
            .unwrap();
        assert!(matches!(result, Err(HarnessError::ConnectionClosed)), "{result:?}");
    }

    #[test]
    fn evaluation_value_falls_back_to_exception_text() {
        let result = json!({"exceptionDetails": {"text": "Uncaught (in promise)"}});
        assert!(matches!(
            evaluation_value(result),
            Err(HarnessError::ScriptExecutionFailed(msg)) if msg == "Uncaught (in promise)"
        ));
    }
}
