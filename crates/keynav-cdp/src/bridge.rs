//! HTTP bridge polled by the extension.
//!
//! Some extension builds ship a background context that isn't reachable
//! over CDP. Those builds poll `GET /get_command` on a local port, run the
//! command with their own `chrome.*` privileges, and `POST /post_response`
//! with `{id, result}`. The harness side queues commands and waits for the
//! matching response id.

use crate::error::{HarnessError, Result};
use crate::extension::Tab;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How often `send_command` checks for a response.
pub const RESPONSE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default wait for an extension response.
pub const DEFAULT_BRIDGE_TIMEOUT: Duration = Duration::from_secs(5);

/// A command waiting for the extension to pick it up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeCommand {
    /// Correlation id (UUID v4).
    pub id: String,
    /// Command name, e.g. `get_active_tab`.
    pub command: String,
    /// Command arguments.
    #[serde(default)]
    pub params: Value,
}

/// What the extension posts back.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeResponse {
    /// Id of the command being answered.
    pub id: String,
    /// Command result, conventionally `{success, data | error}`.
    pub result: Value,
}

#[derive(Debug, Default)]
struct Inbox {
    /// Ids a caller is still waiting on.
    awaited: HashSet<String>,
    results: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default)]
struct BridgeState {
    queue: Arc<Mutex<VecDeque<BridgeCommand>>>,
    inbox: Arc<Mutex<Inbox>>,
}

impl BridgeState {
    fn enqueue(&self, command: BridgeCommand) {
        self.inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .awaited
            .insert(command.id.clone());
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(command);
    }

    fn next_command(&self) -> Option<BridgeCommand> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Drops a command nobody picked up. Returns true if it was still queued.
    fn withdraw(&self, id: &str) -> bool {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let before = queue.len();
        queue.retain(|c| c.id != id);
        queue.len() != before
    }

    /// Stores a result if someone is still waiting for it. Late or unknown
    /// ids are dropped and reported as `false`.
    fn store_response(&self, response: BridgeResponse) -> bool {
        let mut inbox = self.inbox.lock().unwrap_or_else(PoisonError::into_inner);
        if !inbox.awaited.contains(&response.id) {
            return false;
        }
        inbox.results.insert(response.id, response.result);
        true
    }

    fn take_response(&self, id: &str) -> Option<Value> {
        let mut inbox = self.inbox.lock().unwrap_or_else(PoisonError::into_inner);
        let result = inbox.results.remove(id)?;
        inbox.awaited.remove(id);
        Some(result)
    }

    /// Stops waiting on `id`: withdraws it if still queued and forgets any
    /// result that raced in.
    fn abandon(&self, id: &str) {
        self.withdraw(id);
        let mut inbox = self.inbox.lock().unwrap_or_else(PoisonError::into_inner);
        inbox.awaited.remove(id);
        inbox.results.remove(id);
    }

    fn stored_results(&self) -> usize {
        self.inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .results
            .len()
    }

    fn pending(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

async fn get_command(State(state): State<BridgeState>) -> Json<Option<BridgeCommand>> {
    let command = state.next_command();
    if let Some(command) = &command {
        debug!(id = %command.id, command = %command.command, "extension picked up command");
    }
    Json(command)
}

async fn post_response(
    State(state): State<BridgeState>,
    Json(response): Json<BridgeResponse>,
) -> Json<Value> {
    let id = response.id.clone();
    if state.store_response(response) {
        debug!(%id, "extension responded");
        Json(json!({ "status": "ok" }))
    } else {
        warn!(%id, "dropping response nobody is waiting for");
        Json(json!({ "status": "ignored" }))
    }
}

/// Unwraps a `{success, data, error}` result.
fn into_data(command: &str, result: Value) -> Result<Value> {
    if result.get("success").and_then(Value::as_bool) == Some(false) {
        let reason = result
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error")
            .to_string();
        return Err(HarnessError::BridgeFailed {
            command: command.to_string(),
            reason,
        });
    }
    Ok(result.get("data").cloned().unwrap_or(result))
}

/// Local HTTP bridge server plus the client side of its command queue.
pub struct ExtensionBridge {
    state: BridgeState,
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ExtensionBridge {
    /// Starts the bridge on `127.0.0.1:<port>`. Port 0 picks a free port.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the port can't be bound.
    pub async fn start(port: u16) -> Result<Self> {
        let state = BridgeState::default();
        let app = Router::new()
            .route("/get_command", get(get_command))
            .route("/post_response", post(post_response))
            .with_state(state.clone());

        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port))).await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                warn!("bridge server stopped: {e}");
            }
        });

        info!(%addr, "extension bridge listening");
        Ok(Self { state, addr, task })
    }

    /// Bound address.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL the extension polls.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Commands not yet picked up.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.pending()
    }

    /// Queues a command and waits for the extension's raw result.
    ///
    /// `null` params are sent as `{}` so handlers can read fields off them.
    ///
    /// # Errors
    ///
    /// Returns `BridgeTimeout` if no response arrives in time. The command
    /// is withdrawn from the queue if it was never picked up.
    pub async fn send_command(
        &self,
        command: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let id = uuid::Uuid::new_v4().to_string();
        let params = if params.is_null() { json!({}) } else { params };
        self.state.enqueue(BridgeCommand {
            id: id.clone(),
            command: command.to_string(),
            params,
        });
        debug!(%id, command, "queued bridge command");

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(result) = self.state.take_response(&id) {
                return Ok(result);
            }
            if Instant::now() >= deadline {
                self.state.abandon(&id);
                return Err(HarnessError::BridgeTimeout {
                    command: command.to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(RESPONSE_POLL_INTERVAL).await;
        }
    }

    /// Sends a command and deserializes its `data` payload.
    ///
    /// # Errors
    ///
    /// Returns `BridgeFailed` when the extension reports `success: false`,
    /// or the errors of `send_command`.
    pub async fn request<T: DeserializeOwned>(&self, command: &str, params: Value) -> Result<T> {
        let result = self
            .send_command(command, params, DEFAULT_BRIDGE_TIMEOUT)
            .await?;
        Ok(serde_json::from_value(into_data(command, result)?)?)
    }

    /// Active tab as reported by the extension.
    ///
    /// # Errors
    ///
    /// See `request`.
    pub async fn active_tab(&self) -> Result<Tab> {
        self.request("get_active_tab", json!({})).await
    }

    /// Every tab as reported by the extension, ordered by window then
    /// index.
    ///
    /// # Errors
    ///
    /// See `request`.
    pub async fn all_tabs(&self) -> Result<Vec<Tab>> {
        let mut tabs: Vec<Tab> = self.request("get_all_tabs", json!({})).await?;
        tabs.sort_by_key(|t| (t.window_id, t.index));
        Ok(tabs)
    }
}

impl std::fmt::Debug for ExtensionBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionBridge")
            .field("addr", &self.addr)
            .field("pending", &self.pending())
            .finish()
    }
}

impl Drop for ExtensionBridge {
    fn drop(&mut self) {
        self.task.abort();
    }
}
