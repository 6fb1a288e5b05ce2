//! Subprocess transport: newline-delimited JSON-RPC over a child's stdin/stdout.
//!
//! A reader task routes replies to waiters by request id. Calls are serialized so the child
//! sees at most one in-flight request. stderr is forwarded to tracing.
//!
//! A request's deadline covers writing the frame as well as waiting for the reply. A child
//! that stops draining its stdin leaves a partial frame behind, so the transport is marked
//! dead when the deadline expires mid-write.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::ProviderTransport;
use crate::error::{RelayError, Result};
use crate::registry::protocol::{
    IncomingMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, METHOD_INITIALIZE,
    METHOD_INITIALIZED, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST, initialize_params, parse_tools_list,
    render_tool_result,
};
use crate::types::ToolDescriptor;

type ResponseWaiter = oneshot::Sender<JsonRpcResponse>;
type PendingMap = Arc<Mutex<HashMap<u64, ResponseWaiter>>>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Removes a pending entry when the waiting call finishes or is cancelled.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.id);
    }
}

pub struct StdioTransport {
    name: String,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    pending: PendingMap,
    next_id: AtomicU64,
    call_lock: tokio::sync::Mutex<()>,
    alive: Arc<AtomicBool>,
    child: tokio::sync::Mutex<Option<Child>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stop_grace: Duration,
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("name", &self.name)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl StdioTransport {
    /// Spawn `command` and attach to its pipes.
    pub fn spawn(
        name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        cwd: Option<&Path>,
        stop_grace: Duration,
    ) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            RelayError::ProviderUnavailable(format!(
                "failed to spawn '{command}' for provider '{name}': {e}"
            ))
        })?;
        tracing::info!(provider = %name, pid = ?child.id(), %command, "spawned provider process");

        let missing = |pipe: &str| RelayError::InternalError(format!("child {pipe} was not captured"));
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        let transport = Self::build(name, stdout, stdin, Some(child), stop_grace);
        let stderr_task = tokio::spawn(forward_stderr(name.to_string(), stderr));
        lock(&transport.tasks).push(stderr_task);
        Ok(transport)
    }

    /// Attach to an arbitrary reader/writer pair.
    pub fn from_pipes<R, W>(name: &str, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::build(name, reader, writer, None, Duration::from_secs(5))
    }

    fn build<R, W>(
        name: &str,
        reader: R,
        writer: W,
        child: Option<Child>,
        stop_grace: Duration,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));
        let reader_task = tokio::spawn(read_frames(
            name.to_string(),
            reader,
            pending.clone(),
            alive.clone(),
        ));

        Self {
            name: name.to_string(),
            writer: tokio::sync::Mutex::new(Some(Box::new(writer))),
            pending,
            next_id: AtomicU64::new(1),
            call_lock: tokio::sync::Mutex::new(()),
            alive,
            child: tokio::sync::Mutex::new(child),
            tasks: Mutex::new(vec![reader_task]),
            stop_grace,
        }
    }

    fn closed_error(&self) -> RelayError {
        RelayError::ProviderUnavailable(format!("provider '{}' is not running", self.name))
    }

    async fn write_frame(&self, frame: &str) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(|| self.closed_error())?;

        let written: std::io::Result<()> = async {
            writer.write_all(frame.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        }
        .await;

        written.map_err(|e| {
            self.alive.store(false, Ordering::SeqCst);
            RelayError::ProviderUnavailable(format!(
                "write to provider '{}' failed: {e}",
                self.name
            ))
        })
    }
}

async fn read_frames<R>(name: String, reader: R, pending: PendingMap, alive: Arc<AtomicBool>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(provider = %name, error = %e, "reading provider output failed");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(_) => {
                tracing::debug!(provider = %name, output = %line, "ignoring non-JSON output");
                continue;
            }
        };

        match IncomingMessage::classify(value) {
            Ok(IncomingMessage::Response(response)) => {
                let waiter = response.id.as_u64().and_then(|id| lock(&pending).remove(&id));
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => {
                        tracing::warn!(provider = %name, id = %response.id, "reply for unknown or expired request");
                    }
                }
            }
            Ok(IncomingMessage::Notification { method, .. }) => {
                tracing::debug!(provider = %name, %method, "provider notification");
            }
            Ok(IncomingMessage::Request { method, .. }) => {
                tracing::warn!(provider = %name, %method, "ignoring request from provider");
            }
            Err(e) => {
                tracing::warn!(provider = %name, error = %e, "undecodable provider frame");
            }
        }
    }

    alive.store(false, Ordering::SeqCst);
    // Dropping the senders wakes every waiter with a closed-channel error.
    lock(&pending).clear();
    tracing::info!(provider = %name, "provider output closed");
}

async fn forward_stderr<R>(name: String, stderr: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(provider = %name, "stderr: {line}");
    }
}

impl StdioTransport {
    /// Send a request and wait up to `timeout` for its reply.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<JsonRpcResponse> {
        let _serial = self.call_lock.lock().await;
        if !self.is_alive() {
            return Err(self.closed_error());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        let frame = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        tracing::debug!(provider = %self.name, id, %method, "-> request");

        let written = AtomicBool::new(false);
        let exchange = async {
            self.write_frame(&frame).await?;
            written.store(true, Ordering::SeqCst);
            rx.await.map_err(|_| {
                RelayError::ProviderUnavailable(format!(
                    "provider '{}' exited before answering {method}",
                    self.name
                ))
            })
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                if written.load(Ordering::SeqCst) {
                    tracing::warn!(provider = %self.name, id, %method, "request timed out");
                } else {
                    self.alive.store(false, Ordering::SeqCst);
                    tracing::warn!(provider = %self.name, id, %method, "provider stopped reading its input");
                }
                Err(RelayError::tool_timeout(method, timeout))
            }
        }
    }

    /// Fire-and-forget notification.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let frame = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        self.write_frame(&frame).await
    }
}

#[async_trait]
impl ProviderTransport for StdioTransport {
    async fn initialize(&self, client_name: &str, timeout: Duration) -> Result<Vec<ToolDescriptor>> {
        let init = self
            .request(
                METHOD_INITIALIZE,
                Some(initialize_params(client_name, env!("CARGO_PKG_VERSION"))),
                timeout,
            )
            .await?
            .into_result(METHOD_INITIALIZE)?;
        let server = init
            .pointer("/serverInfo/name")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let protocol = init
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        tracing::debug!(provider = %self.name, server, protocol, "provider initialized");

        self.notify(METHOD_INITIALIZED, Some(json!({}))).await?;

        let listed = self
            .request(METHOD_TOOLS_LIST, Some(json!({})), timeout)
            .await?
            .into_result(METHOD_TOOLS_LIST)?;
        parse_tools_list(listed)
    }

    async fn call_tool(&self, tool: &str, arguments: Value, timeout: Duration) -> Result<String> {
        let result = self
            .request(
                METHOD_TOOLS_CALL,
                Some(json!({ "name": tool, "arguments": arguments })),
                timeout,
            )
            .await?
            .into_result(METHOD_TOOLS_CALL)?;
        render_tool_result(&result)
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        // Closing stdin asks a well-behaved server to exit.
        self.writer.lock().await.take();

        if let Some(mut child) = self.child.lock().await.take() {
            match tokio::time::timeout(self.stop_grace, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::info!(provider = %self.name, %status, "provider process exited");
                }
                Ok(Err(e)) => {
                    tracing::warn!(provider = %self.name, error = %e, "waiting for provider failed");
                }
                Err(_) => {
                    tracing::warn!(provider = %self.name, "provider ignored shutdown, killing");
                    if let Err(e) = child.kill().await {
                        tracing::warn!(provider = %self.name, error = %e, "kill failed");
                    }
                }
            }
        }

        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        lock(&self.pending).clear();
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }
}

/// In-memory MCP servers for tests.
#[cfg(test)]
pub(crate) mod fake {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::{Value, json};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
    use tokio::task::JoinHandle;

    use super::StdioTransport;

    /// Reply produced for one request: delay, then the full `result` or `error` member.
    pub(crate) enum Reply {
        Result(Duration, Value),
        Error(i64, String),
        Silent,
    }

    /// Serve newline-delimited JSON-RPC on `io`, answering each request via `reply`.
    /// Replies are written concurrently, so a slow reply does not hold back faster ones.
    pub(crate) fn serve<F>(io: DuplexStream, reply: F) -> JoinHandle<()>
    where
        F: Fn(&str, &Value) -> Reply + Send + Sync + 'static,
    {
        tokio::spawn(async move {
            let (read, write) = tokio::io::split(io);
            let write = Arc::new(tokio::sync::Mutex::new(write));
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let frame: Value = serde_json::from_str(&line).expect("client sends JSON");
                let Some(id) = frame.get("id").cloned() else {
                    continue;
                };
                let method = frame["method"].as_str().unwrap_or_default().to_string();
                let params = frame.get("params").cloned().unwrap_or(Value::Null);
                let out = match reply(&method, &params) {
                    Reply::Result(delay, result) => {
                        Some((delay, json!({"jsonrpc": "2.0", "id": id, "result": result})))
                    }
                    Reply::Error(code, message) => Some((
                        Duration::ZERO,
                        json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}}),
                    )),
                    Reply::Silent => None,
                };
                if let Some((delay, out)) = out {
                    let write = write.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let mut w = write.lock().await;
                        let _ = w.write_all(format!("{out}\n").as_bytes()).await;
                        let _ = w.flush().await;
                    });
                }
            }
        })
    }

    /// A minimal MCP server advertising `tools` and answering calls through `call`.
    pub(crate) fn mcp_server<F>(io: DuplexStream, tools: Vec<Value>, call: F) -> JoinHandle<()>
    where
        F: Fn(&str, &Value) -> Reply + Send + Sync + 'static,
    {
        serve(io, move |method, params| match method {
            "initialize" => Reply::Result(
                Duration::ZERO,
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "fake", "version": "0.0.1"}
                }),
            ),
            "tools/list" => Reply::Result(Duration::ZERO, json!({"tools": tools.clone()})),
            "tools/call" => call(
                params["name"].as_str().unwrap_or_default(),
                &params["arguments"],
            ),
            other => Reply::Error(-32601, format!("method not found: {other}")),
        })
    }

    /// Text result in MCP `tools/call` shape.
    pub(crate) fn text(delay: Duration, text: &str) -> Reply {
        Reply::Result(delay, json!({"content": [{"type": "text", "text": text}]}))
    }

    /// Client transport wired to a fake server.
    pub(crate) fn connected<F>(name: &str, tools: Vec<Value>, call: F) -> (StdioTransport, JoinHandle<()>)
    where
        F: Fn(&str, &Value) -> Reply + Send + Sync + 'static,
    {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let handle = mcp_server(server, tools, call);
        let (read, write) = tokio::io::split(client);
        (StdioTransport::from_pipes(name, read, write), handle)
    }
}
