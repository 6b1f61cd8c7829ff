//! Tool server session lifecycle.
//!
//! `SessionManager` owns the one live tool session of the process: it spawns
//! the server, wraps its stdio in a transport, runs the handshake, and tears
//! everything down again at shutdown. Every acquisition is recorded on a
//! `ResourceStack` and released in reverse order on every exit path.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::Mutex;

use super::errors::McpError;
use super::session::{McpSession, ToolSession};
use super::transport::StdioTransport;
use super::types::{CallToolResult, McpToolDefinition, ServerConfig};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Timeout for the initialize handshake.
const INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for graceful shutdown before force-killing.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum stderr captured into an error message.
const STDERR_CAPTURE_LIMIT: usize = 2000;

// ─── ResourceStack ───────────────────────────────────────────────────────────

type Release = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), McpError>> + Send>;

/// Acquired resources with their release actions, released last-in first-out.
#[derive(Default)]
pub struct ResourceStack {
    entries: Vec<(String, Release)>,
}

impl ResourceStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a release action for a resource that was just acquired.
    pub fn push<F, Fut>(&mut self, label: impl Into<String>, release: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), McpError>> + Send + 'static,
    {
        let release: Release = Box::new(move || Box::pin(release()));
        self.entries.push((label.into(), release));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Release everything in reverse acquisition order.
    ///
    /// A failing release is logged and does not stop the ones after it.
    /// Returns the failures; the stack is empty afterwards.
    pub async fn close(&mut self) -> Vec<(String, McpError)> {
        let mut failures = Vec::new();
        while let Some((label, release)) = self.entries.pop() {
            match release().await {
                Ok(()) => tracing::debug!(resource = %label, "released"),
                Err(e) => {
                    tracing::error!(resource = %label, error = %e, "failed to release resource");
                    failures.push((label, e));
                }
            }
        }
        failures
    }
}

impl Drop for ResourceStack {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            let labels: Vec<&str> = self.entries.iter().map(|(l, _)| l.as_str()).collect();
            tracing::warn!(resources = ?labels, "resource stack dropped without close");
        }
    }
}

// ─── Establishing a session ──────────────────────────────────────────────────

/// A session plus everything that was acquired to build it.
pub struct Acquired {
    pub session: Arc<dyn ToolSession>,
    pub resources: ResourceStack,
}

/// A failed acquisition, carrying whatever was acquired before the failure.
pub struct AcquireFailure {
    pub error: McpError,
    pub resources: ResourceStack,
}

impl AcquireFailure {
    pub fn new(error: McpError, resources: ResourceStack) -> Self {
        Self { error, resources }
    }
}

/// Spawn the configured server and run the MCP handshake over its stdio.
///
/// Acquisition order: process, transport, session.
pub async fn establish_stdio(
    config: &ServerConfig,
    call_timeout: Duration,
) -> Result<Acquired, AcquireFailure> {
    let mut resources = ResourceStack::new();
    let name = config.name.as_str();

    let mut child = match spawn_process(config) {
        Ok(child) => child,
        Err(e) => return Err(AcquireFailure::new(e, resources)),
    };

    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let server_name = name.to_string();
    resources.push("server process", move || shutdown_process(server_name, child));

    let (Some(stdin), Some(stdout)) = (stdin, stdout) else {
        let e = McpError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdin/stdout".into(),
        };
        return Err(AcquireFailure::new(e, resources));
    };

    let transport = Arc::new(StdioTransport::new(name, stdin, stdout));
    let closing = transport.clone();
    resources.push("stdio transport", move || async move { closing.close().await });

    let handshake = tokio::time::timeout(
        INIT_TIMEOUT,
        McpSession::initialize(transport, call_timeout),
    )
    .await;

    let session = match handshake {
        Ok(Ok(session)) => Arc::new(session),
        Ok(Err(e)) => {
            let stderr_ctx = read_stderr_on_failure(stderr).await;
            let reason = format!("{e}{}", format_stderr_suffix(&stderr_ctx));
            let e = McpError::InitFailed {
                name: name.to_string(),
                reason,
            };
            return Err(AcquireFailure::new(e, resources));
        }
        Err(_) => {
            let stderr_ctx = read_stderr_on_failure(stderr).await;
            let reason = format!(
                "initialization timed out after {}s{}",
                INIT_TIMEOUT.as_secs(),
                format_stderr_suffix(&stderr_ctx)
            );
            let e = McpError::InitFailed {
                name: name.to_string(),
                reason,
            };
            return Err(AcquireFailure::new(e, resources));
        }
    };

    if let Some(info) = session.server_info() {
        tracing::info!(
            server = %name,
            server_name = info.name.as_deref().unwrap_or("unknown"),
            server_version = info.version.as_deref().unwrap_or("unknown"),
            "handshake complete"
        );
    }

    if let Some(stderr) = stderr {
        forward_stderr(name.to_string(), stderr);
    }

    let closing = session.clone();
    resources.push("client session", move || async move {
        closing.close();
        Ok(())
    });

    Ok(Acquired {
        session,
        resources,
    })
}

fn spawn_process(config: &ServerConfig) -> Result<Child, McpError> {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args);

    for (key, value) in &config.env {
        cmd.env(key, value);
    }

    if let Some(dir) = config.cwd.as_deref() {
        cmd.current_dir(dir);
    }

    #[cfg(target_os = "windows")]
    {
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    cmd.spawn().map_err(|e| McpError::SpawnFailed {
        name: config.name.clone(),
        reason: format!("{} ({e})", config.command),
    })
}

/// Wait for the server to exit on its own, then force-kill it.
async fn shutdown_process(name: String, mut child: Child) -> Result<(), McpError> {
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => {
            tracing::debug!(server = %name, %status, "server process exited");
            Ok(())
        }
        Ok(Err(e)) => Err(McpError::TransportError {
            server: name,
            reason: format!("failed to wait for server process: {e}"),
        }),
        Err(_) => {
            tracing::warn!(
                server = %name,
                timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
                "server did not exit in time, killing"
            );
            child.kill().await.map_err(|e| McpError::TransportError {
                server: name,
                reason: format!("failed to kill server process: {e}"),
            })
        }
    }
}

/// Drain server stderr into the log so the pipe never fills up.
fn forward_stderr(name: String, stderr: ChildStderr) {
    use tokio::io::{AsyncBufReadExt, BufReader};

    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(server = %name, "{line}");
        }
    });
}

/// Read any available stderr output from a failed server process.
///
/// Uses a short timeout so an idle stderr never blocks the error path.
async fn read_stderr_on_failure(stderr_handle: Option<ChildStderr>) -> String {
    use tokio::io::AsyncReadExt;

    let Some(mut stderr) = stderr_handle else {
        return String::new();
    };

    let mut buf = String::new();
    match tokio::time::timeout(Duration::from_millis(500), stderr.read_to_string(&mut buf)).await
    {
        Ok(Ok(_)) => {
            if buf.len() > STDERR_CAPTURE_LIMIT {
                let mut end = STDERR_CAPTURE_LIMIT;
                while !buf.is_char_boundary(end) {
                    end -= 1;
                }
                buf.truncate(end);
                buf.push_str("...(truncated)");
            }
            buf
        }
        _ => String::new(),
    }
}

/// Format a stderr suffix for error messages (empty string if no stderr).
fn format_stderr_suffix(stderr: &str) -> String {
    if stderr.trim().is_empty() {
        String::new()
    } else {
        format!(" | stderr: {}", stderr.trim())
    }
}

// ─── SessionManager ──────────────────────────────────────────────────────────

/// Process-wide owner of the tool session.
///
/// Created unconnected. `connect` succeeds once; later calls warn and return
/// `Ok`. `cleanup` always leaves the manager unconnected and can be called
/// any number of times.
pub struct SessionManager {
    connected: AtomicBool,
    session: RwLock<Option<Arc<dyn ToolSession>>>,
    /// Also serializes `connect` against `cleanup`.
    resources: Mutex<ResourceStack>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            session: RwLock::new(None),
            resources: Mutex::new(ResourceStack::new()),
        }
    }

    /// Spawn the configured server and establish the session.
    ///
    /// Tool listing and tool calls on the session time out after
    /// `config.call_timeout_secs`.
    pub async fn connect(&self, config: &ServerConfig) -> Result<(), McpError> {
        self.connect_with(&config.name, || establish_stdio(config, config.call_timeout()))
            .await
    }

    /// Establish the session through a caller-supplied acquisition routine.
    ///
    /// Whatever the routine acquired is released before an error is returned.
    pub async fn connect_with<F, Fut>(&self, server_name: &str, establish: F) -> Result<(), McpError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Acquired, AcquireFailure>>,
    {
        let mut resources = self.resources.lock().await;
        if self.is_connected() {
            tracing::warn!(server = %server_name, "already connected to a tool server");
            return Ok(());
        }

        tracing::info!(server = %server_name, "connecting to tool server");

        let Acquired {
            session,
            resources: mut acquired,
        } = match establish().await {
            Ok(acquired) => acquired,
            Err(AcquireFailure {
                error,
                resources: mut partial,
            }) => {
                partial.close().await;
                tracing::error!(server = %server_name, error = %error, "connection failed");
                return Err(error);
            }
        };

        let tools = match session.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                acquired.close().await;
                let error = McpError::InitFailed {
                    name: server_name.to_string(),
                    reason: format!("tools/list failed after handshake: {e}"),
                };
                tracing::error!(server = %server_name, error = %error, "connection failed");
                return Err(error);
            }
        };

        *resources = acquired;
        self.set_session(Some(session));
        self.connected.store(true, Ordering::SeqCst);

        tracing::info!(
            server = %server_name,
            tools = ?tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            "connected to tool server"
        );
        Ok(())
    }

    /// Whether a session is established.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// The live session, if connected.
    pub fn session(&self) -> Option<Arc<dyn ToolSession>> {
        if !self.is_connected() {
            return None;
        }
        match self.session.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Release the session, transport and process, in that order.
    ///
    /// Never fails: release errors are logged, and the manager is left
    /// unconnected regardless.
    pub async fn cleanup(&self) {
        let mut resources = self.resources.lock().await;
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        self.set_session(None);

        if !was_connected && resources.is_empty() {
            tracing::debug!("cleanup: no tool session to close");
            return;
        }

        tracing::info!(resources = resources.len(), "closing tool session");
        let failures = resources.close().await;
        if failures.is_empty() {
            tracing::info!("tool session closed");
        } else {
            tracing::error!(
                failed = ?failures.iter().map(|(label, _)| label.as_str()).collect::<Vec<_>>(),
                "tool session closed with release errors"
            );
        }
    }

    fn set_session(&self, session: Option<Arc<dyn ToolSession>>) {
        match self.session.write() {
            Ok(mut guard) => *guard = session,
            Err(poisoned) => *poisoned.into_inner() = session,
        }
    }
}

#[async_trait]
impl ToolSession for SessionManager {
    async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, McpError> {
        self.session()
            .ok_or(McpError::NotConnected)?
            .list_tools()
            .await
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallToolResult, McpError> {
        self.session()
            .ok_or(McpError::NotConnected)?
            .call_tool(name, arguments)
            .await
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct StaticSession {
        tools: Vec<McpToolDefinition>,
    }

    #[async_trait]
    impl ToolSession for StaticSession {
        async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, McpError> {
            Ok(self.tools.clone())
        }

        async fn call_tool(
            &self,
            name: &str,
            _arguments: serde_json::Value,
        ) -> Result<CallToolResult, McpError> {
            Ok(CallToolResult::text(format!("called {name}")))
        }
    }

    struct FailingList;

    #[async_trait]
    impl ToolSession for FailingList {
        async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, McpError> {
            Err(McpError::NotConnected)
        }

        async fn call_tool(
            &self,
            _name: &str,
            _arguments: serde_json::Value,
        ) -> Result<CallToolResult, McpError> {
            Err(McpError::NotConnected)
        }
    }

    type Log = Arc<StdMutex<Vec<String>>>;

    fn recording_stack(log: &Log, labels: &[&str]) -> ResourceStack {
        let mut stack = ResourceStack::new();
        for label in labels {
            let log = log.clone();
            let label = label.to_string();
            stack.push(label.clone(), move || async move {
                log.lock().unwrap().push(label);
                Ok(())
            });
        }
        stack
    }

    fn acquired(log: &Log) -> Acquired {
        Acquired {
            session: Arc::new(StaticSession {
                tools: vec![McpToolDefinition {
                    name: "lookup_price".into(),
                    description: "Look up a price".into(),
                    input_schema: serde_json::json!({"type": "object"}),
                }],
            }),
            resources: recording_stack(log, &["process", "transport", "session"]),
        }
    }

    #[tokio::test]
    async fn test_resource_stack_releases_in_reverse_order() {
        let log: Log = Arc::default();
        let mut stack = recording_stack(&log, &["first", "second", "third"]);
        assert_eq!(stack.len(), 3);

        let failures = stack.close().await;
        assert!(failures.is_empty());
        assert!(stack.is_empty());
        assert_eq!(*log.lock().unwrap(), vec!["third", "second", "first"]);
    }

    #[tokio::test]
    async fn test_resource_stack_continues_after_failure() {
        let log: Log = Arc::default();
        let mut stack = recording_stack(&log, &["first"]);
        stack.push("broken", || async {
            Err(McpError::TransportError {
                server: "s".into(),
                reason: "pipe gone".into(),
            })
        });
        let tail = log.clone();
        stack.push("last", move || async move {
            tail.lock().unwrap().push("last".into());
            Ok(())
        });

        let failures = stack.close().await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "broken");
        assert_eq!(*log.lock().unwrap(), vec!["last", "first"]);
    }

    #[tokio::test]
    async fn test_new_manager_is_not_connected() {
        let manager = SessionManager::new();
        assert!(!manager.is_connected());
        assert!(manager.session().is_none());
        assert!(matches!(
            manager.list_tools().await.unwrap_err(),
            McpError::NotConnected
        ));
    }

    #[tokio::test]
    async fn test_connect_then_cleanup_releases_in_reverse() {
        let log: Log = Arc::default();
        let manager = SessionManager::new();

        let l = log.clone();
        manager
            .connect_with("fake", || async move { Ok(acquired(&l)) })
            .await
            .unwrap();
        assert!(manager.is_connected());
        assert_eq!(manager.list_tools().await.unwrap().len(), 1);
        assert!(log.lock().unwrap().is_empty());

        manager.cleanup().await;
        assert!(!manager.is_connected());
        assert_eq!(
            *log.lock().unwrap(),
            vec!["session", "transport", "process"]
        );
    }

    #[tokio::test]
    async fn test_second_connect_is_a_noop() {
        let log: Log = Arc::default();
        let manager = SessionManager::new();

        let l = log.clone();
        manager
            .connect_with("fake", || async move { Ok(acquired(&l)) })
            .await
            .unwrap();

        let mut called = false;
        manager
            .connect_with("fake", || {
                called = true;
                async { Err(AcquireFailure::new(McpError::NotConnected, ResourceStack::new())) }
            })
            .await
            .unwrap();
        assert!(!called, "establish must not run when already connected");
        assert!(manager.is_connected());

        manager.cleanup().await;
    }

    #[tokio::test]
    async fn test_cleanup_twice_is_idempotent() {
        let log: Log = Arc::default();
        let manager = SessionManager::new();
        let l = log.clone();
        manager
            .connect_with("fake", || async move { Ok(acquired(&l)) })
            .await
            .unwrap();

        manager.cleanup().await;
        assert!(!manager.is_connected());
        manager.cleanup().await;
        assert!(!manager.is_connected());
        assert_eq!(log.lock().unwrap().len(), 3, "each resource released once");
    }

    #[tokio::test]
    async fn test_cleanup_without_connect() {
        let manager = SessionManager::new();
        manager.cleanup().await;
        manager.cleanup().await;
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_failed_connect_releases_partial_resources() {
        let log: Log = Arc::default();
        let manager = SessionManager::new();

        let partial = recording_stack(&log, &["process", "transport"]);
        let err = manager
            .connect_with("fake", || async move {
                Err(AcquireFailure::new(
                    McpError::InitFailed {
                        name: "fake".into(),
                        reason: "handshake refused".into(),
                    },
                    partial,
                ))
            })
            .await
            .unwrap_err();

        assert!(err.is_connection_error());
        assert!(!manager.is_connected());
        assert_eq!(*log.lock().unwrap(), vec!["transport", "process"]);
    }

    #[tokio::test]
    async fn test_failed_tool_listing_aborts_connect() {
        let log: Log = Arc::default();
        let manager = SessionManager::new();

        let resources = recording_stack(&log, &["process", "session"]);
        let err = manager
            .connect_with("fake", || async move {
                Ok(Acquired {
                    session: Arc::new(FailingList),
                    resources,
                })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, McpError::InitFailed { .. }));
        assert!(!manager.is_connected());
        assert_eq!(*log.lock().unwrap(), vec!["session", "process"]);
    }

    #[tokio::test]
    async fn test_connect_missing_binary_fails() {
        let manager = SessionManager::new();
        let config = ServerConfig {
            name: "missing".into(),
            command: "/nonexistent/toolchat-test-server".into(),
            args: vec![],
            env: Default::default(),
            cwd: None,
            call_timeout_secs: 30,
        };
        let err = manager.connect(&config).await.unwrap_err();
        assert!(matches!(err, McpError::SpawnFailed { .. }));
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_cleanup_with_failing_release_still_disconnects() {
        let log: Log = Arc::default();
        let manager = SessionManager::new();

        let l = log.clone();
        manager
            .connect_with("fake", || async move {
                let mut resources = recording_stack(&l, &["process"]);
                resources.push("transport", || async {
                    Err(McpError::TransportError {
                        server: "fake".into(),
                        reason: "stdin already closed".into(),
                    })
                });
                let tail = l.clone();
                resources.push("session", move || async move {
                    tail.lock().unwrap().push("session".into());
                    Ok(())
                });
                Ok(Acquired {
                    session: Arc::new(StaticSession { tools: Vec::new() }),
                    resources,
                })
            })
            .await
            .unwrap();

        manager.cleanup().await;
        assert!(!manager.is_connected());
        assert!(manager.session().is_none());
        assert_eq!(*log.lock().unwrap(), vec!["session", "process"]);

        manager.cleanup().await;
        assert!(!manager.is_connected());
        assert_eq!(log.lock().unwrap().len(), 2, "nothing released twice");
    }

    #[tokio::test]
    async fn test_connect_gives_up_when_listing_never_answers() {
        use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader};

        let (client_w, server_r) = duplex(8192);
        let (mut server_w, client_r) = duplex(8192);
        tokio::spawn(async move {
            let mut lines = BufReader::new(server_r).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let msg: serde_json::Value = serde_json::from_str(&line).unwrap();
                if msg["method"] != "initialize" {
                    continue;
                }
                let reply = serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": msg["id"],
                    "result": {"protocolVersion": "2024-11-05", "capabilities": {}}
                });
                let mut out = reply.to_string();
                out.push('\n');
                server_w.write_all(out.as_bytes()).await.unwrap();
            }
        });

        let transport = Arc::new(StdioTransport::from_io("stalled", client_w, client_r));
        let manager = SessionManager::new();
        let err = tokio::time::timeout(
            Duration::from_secs(5),
            manager.connect_with("stalled", || async move {
                let mut resources = ResourceStack::new();
                let closing = transport.clone();
                resources.push("stdio transport", move || async move { closing.close().await });
                match McpSession::initialize(transport, Duration::from_millis(100)).await {
                    Ok(session) => Ok(Acquired {
                        session: Arc::new(session),
                        resources,
                    }),
                    Err(e) => Err(AcquireFailure::new(e, resources)),
                }
            }),
        )
        .await
        .expect("connect must give up on its own")
        .unwrap_err();

        assert!(err.is_connection_error());
        assert!(err.to_string().contains("timed out"));
        assert!(!manager.is_connected());
    }

    #[test]
    fn test_format_stderr_suffix() {
        assert_eq!(format_stderr_suffix(""), "");
        assert_eq!(format_stderr_suffix("  \n"), "");
        assert_eq!(format_stderr_suffix("boom\n"), " | stderr: boom");
    }
}
