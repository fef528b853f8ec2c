//! MCP server state and the stdio request loop.

use serde_json::Value;
use std::io::{BufRead, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use feishu_notify::MessageDispatcher;

use crate::dispatcher::{decode_request, dispatch_jsonrpc};
use crate::error::{McpError, McpResult};
use crate::types::{JsonRpcRequest, JsonRpcResponse, McpServerConfig};

/// Largest partial value buffered while waiting for its closing line.
const MAX_PENDING_BYTES: usize = 4 * 1024 * 1024;

/// Counters reported when the loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeSummary {
    pub requests: u64,
    pub responses: u64,
    pub notifications: u64,
    pub decode_failures: u64,
}

#[derive(Debug, Default)]
struct Flags {
    requested: bool,
    in_flight: bool,
}

#[derive(Debug, Default)]
struct ShutdownState {
    flags: Mutex<Flags>,
    idle: Condvar,
}

impl ShutdownState {
    fn lock(&self) -> MutexGuard<'_, Flags> {
        self.flags.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Lets the owner stop the loop between requests and wait for an
/// in-flight send to finish.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    state: Arc<ShutdownState>,
}

impl ShutdownHandle {
    /// Stop starting new requests. A request already being handled completes.
    pub fn request_shutdown(&self) {
        self.state.lock().requested = true;
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.state.lock().requested
    }

    pub fn is_in_flight(&self) -> bool {
        self.state.lock().in_flight
    }

    /// Block until no request is in flight or `timeout` elapses.
    /// Returns `true` when idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let flags = self.state.lock();
        let (flags, _) = self
            .state
            .idle
            .wait_timeout_while(flags, timeout, |flags| flags.in_flight)
            .unwrap_or_else(|e| e.into_inner());
        !flags.in_flight
    }

    /// Mark a request in flight, unless shutdown was already requested.
    ///
    /// Both flags live under one lock, so once `request_shutdown` returns
    /// no new request can start.
    fn begin(&self) -> Option<InFlightGuard<'_>> {
        let mut flags = self.state.lock();
        if flags.requested {
            return None;
        }
        flags.in_flight = true;
        Some(InFlightGuard { handle: self })
    }
}

struct InFlightGuard<'a> {
    handle: &'a ShutdownHandle,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.handle.state.lock().in_flight = false;
        self.handle.state.idle.notify_all();
    }
}

/// The MCP server: configuration, the active message dispatcher and the
/// logging span all its output is recorded under.
pub struct McpServer {
    config: McpServerConfig,
    dispatcher: RwLock<Arc<MessageDispatcher>>,
    shutdown: ShutdownHandle,
    span: tracing::Span,
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl McpServer {
    /// Create a new server with the given configuration and dispatcher.
    pub fn new(config: McpServerConfig, dispatcher: MessageDispatcher) -> McpResult<Self> {
        if config.server_name.trim().is_empty() {
            return Err(McpError::Config("server_name must not be empty".into()));
        }
        if config.server_version.trim().is_empty() {
            return Err(McpError::Config("server_version must not be empty".into()));
        }

        Ok(Self {
            config,
            dispatcher: RwLock::new(Arc::new(dispatcher)),
            shutdown: ShutdownHandle::default(),
            span: tracing::Span::none(),
        })
    }

    /// Record all server logging under `span`.
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &McpServerConfig {
        &self.config
    }

    /// Snapshot of the active dispatcher.
    pub fn dispatcher(&self) -> Arc<MessageDispatcher> {
        let guard = self.dispatcher.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&*guard)
    }

    /// Swap in a new dispatcher. Calls already holding a snapshot finish
    /// with the old one.
    pub fn update_dispatcher(&self, dispatcher: MessageDispatcher) {
        let mode = dispatcher.security().mode();
        let mut guard = self.dispatcher.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(dispatcher);
        drop(guard);
        self.span.in_scope(|| tracing::info!(security_mode = %mode, "message dispatcher replaced"));
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Handle one decoded request. Returns the response to write, if any.
    pub fn handle_request(&self, request: &JsonRpcRequest) -> Option<JsonRpcResponse> {
        dispatch_jsonrpc(self, request)
    }

    /// Serve requests from `input` until end of input or shutdown.
    ///
    /// Values may be split across lines or share one. A malformed value is
    /// logged and skipped up to the end of the line it started on; no
    /// response is written for it unless it is an object carrying an id.
    pub fn run<R: BufRead, W: Write>(&self, mut input: R, mut output: W) -> McpResult<ServeSummary> {
        let _enter = self.span.enter();
        tracing::info!(server = %self.config.server_name, version = %self.config.server_version, "mcp server started");

        let mut summary = ServeSummary::default();
        let mut pending: Vec<u8> = Vec::new();
        let mut line = Vec::new();

        loop {
            if self.shutdown.is_shutdown_requested() {
                tracing::info!("shutdown requested, no further requests read");
                break;
            }

            line.clear();
            let read = input.read_until(b'\n', &mut line).map_err(|e| {
                tracing::error!(error = %e, "failed to read input");
                McpError::Transport(e.to_string())
            })?;
            if read == 0 {
                if pending.iter().any(|b| !b.is_ascii_whitespace()) {
                    summary.decode_failures += 1;
                    tracing::warn!(bytes = pending.len(), "input ended inside a value");
                }
                tracing::info!("end of input");
                break;
            }

            pending.extend_from_slice(&line);
            let consumed = self.drain_values(&pending, &mut output, &mut summary)?;
            pending.drain(..consumed);

            if pending.len() > MAX_PENDING_BYTES {
                summary.decode_failures += 1;
                tracing::warn!(bytes = pending.len(), "discarding oversized incomplete value");
                pending.clear();
            }
        }

        tracing::info!(
            requests = summary.requests,
            responses = summary.responses,
            notifications = summary.notifications,
            decode_failures = summary.decode_failures,
            "mcp server stopped"
        );
        Ok(summary)
    }

    /// Handle every complete value in `buf`. Returns how many bytes were
    /// consumed; an incomplete trailing value is left for the next line.
    ///
    /// A syntax error drops the failing value through the end of the line
    /// it started on, then decoding resumes on the next line.
    fn drain_values<W: Write>(
        &self,
        buf: &[u8],
        output: &mut W,
        summary: &mut ServeSummary,
    ) -> McpResult<usize> {
        let mut start = 0;
        'resync: loop {
            let mut stream = serde_json::Deserializer::from_slice(&buf[start..]).into_iter::<Value>();
            loop {
                let offset = start + stream.byte_offset();
                match stream.next() {
                    None => return Ok(buf.len()),
                    Some(Ok(value)) => {
                        if !self.handle_value(value, output, summary)? {
                            return Ok(offset);
                        }
                    }
                    Some(Err(e)) if e.is_eof() => return Ok(offset),
                    Some(Err(e)) => {
                        summary.decode_failures += 1;
                        tracing::warn!(error = %e, "discarding undecodable input");
                        match next_line_after(buf, offset) {
                            Some(next) => {
                                start = next;
                                continue 'resync;
                            }
                            None => return Ok(buf.len()),
                        }
                    }
                }
            }
        }
    }

    /// Decode and handle one value. Returns `false` when shutdown stopped
    /// it from being handled.
    fn handle_value<W: Write>(
        &self,
        value: Value,
        output: &mut W,
        summary: &mut ServeSummary,
    ) -> McpResult<bool> {
        let id = value.get("id").filter(|id| !id.is_null()).cloned();
        match decode_request(value) {
            Ok(request) => self.process(&request, output, summary),
            Err(e) => {
                summary.decode_failures += 1;
                match id {
                    Some(id) => {
                        tracing::warn!(error = %e, id = %id, "rejecting invalid request");
                        write_response(output, &JsonRpcResponse::error(id, (&e).into()))?;
                        summary.responses += 1;
                    }
                    None => tracing::warn!(error = %e, "discarding value that is not a request"),
                }
                Ok(true)
            }
        }
    }

    fn process<W: Write>(
        &self,
        request: &JsonRpcRequest,
        output: &mut W,
        summary: &mut ServeSummary,
    ) -> McpResult<bool> {
        let Some(_in_flight) = self.shutdown.begin() else {
            tracing::info!(method = %request.method, "shutdown requested, request left unhandled");
            return Ok(false);
        };
        summary.requests += 1;
        tracing::debug!(method = %request.method, id = ?request.id, "request received");

        match self.handle_request(request) {
            Some(response) => {
                write_response(output, &response)?;
                summary.responses += 1;
                tracing::debug!(
                    id = %response.id,
                    is_error = response.error_object().is_some(),
                    "response written"
                );
            }
            None => {
                summary.notifications += 1;
                tracing::debug!(method = %request.method, "notification handled, no response");
            }
        }
        Ok(true)
    }
}

/// Start of the line after the one holding the first non-blank byte at or
/// after `from`, or `None` when that line is the last.
fn next_line_after(buf: &[u8], from: usize) -> Option<usize> {
    let value_start = buf[from..]
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map_or(buf.len(), |pos| from + pos);
    buf[value_start..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|pos| value_start + pos + 1)
}

/// Write one response as a single line and flush it.
fn write_response<W: Write>(output: &mut W, response: &JsonRpcResponse) -> McpResult<()> {
    let mut bytes = serde_json::to_vec(response).map_err(|e| McpError::Internal(e.to_string()))?;
    bytes.push(b'\n');
    output
        .write_all(&bytes)
        .and_then(|_| output.flush())
        .map_err(|e| {
            tracing::error!(error = %e, "failed to write response");
            McpError::Transport(e.to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use feishu_notify::{Deliver, NotifyResult, SecurityManager, SecurityMode, WebhookResponse};
    use serde_json::json;
    use std::io::Cursor;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        bodies: Mutex<Vec<Value>>,
    }

    impl Deliver for Recording {
        fn deliver(&self, body: &[u8]) -> NotifyResult<WebhookResponse> {
            self.bodies.lock().unwrap().push(serde_json::from_slice(body).unwrap());
            Ok(WebhookResponse::ok())
        }
    }

    fn make_server() -> (McpServer, Arc<Recording>) {
        let delivery = Arc::new(Recording::default());
        let dispatcher = MessageDispatcher::new(SecurityManager::none(), delivery.clone()).unwrap();
        (McpServer::new(McpServerConfig::default(), dispatcher).unwrap(), delivery)
    }

    fn serve(server: &McpServer, input: &str) -> (ServeSummary, Vec<Value>) {
        let mut output = Vec::new();
        let summary = server.run(Cursor::new(input.as_bytes()), &mut output).unwrap();
        let responses = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        (summary, responses)
    }

    #[test]
    fn test_new_rejects_empty_name() {
        let dispatcher = MessageDispatcher::new(SecurityManager::none(), Arc::new(Recording::default())).unwrap();
        let config = McpServerConfig {
            server_name: " ".into(),
            ..McpServerConfig::default()
        };
        assert!(matches!(McpServer::new(config, dispatcher), Err(McpError::Config(_))));
    }

    #[test]
    fn test_responses_in_request_order() {
        let (server, _) = make_server();
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#, "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#, "\n",
            r#"{"jsonrpc":"2.0","id":"two","method":"tools/list"}"#, "\n",
            r#"{"jsonrpc":"2.0","id":3,"method":"ping"}"#, "\n",
        );
        let (summary, responses) = serve(&server, input);
        let ids: Vec<Value> = responses.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!(1), json!("two"), json!(3)]);
        assert_eq!(
            summary,
            ServeSummary {
                requests: 4,
                responses: 3,
                notifications: 1,
                decode_failures: 0
            }
        );
    }

    #[test]
    fn test_every_response_has_result_xor_error() {
        let (server, _) = make_server();
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#, "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"bogus"}"#, "\n",
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{}}"#, "\n",
        );
        let (_, responses) = serve(&server, input);
        assert_eq!(responses.len(), 3);
        for response in &responses {
            assert_eq!(response["jsonrpc"], "2.0");
            assert!(response.get("result").is_some() != response.get("error").is_some());
        }
    }

    #[test]
    fn test_malformed_line_is_skipped() {
        let (server, _) = make_server();
        let input = concat!(
            "{this is not json\n",
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#, "\n",
            "[1, 2]\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#, "\n",
        );
        let (summary, responses) = serve(&server, input);
        assert_eq!(responses.len(), 2);
        assert_eq!(summary.decode_failures, 2);
    }

    #[test]
    fn test_values_sharing_a_line_or_spanning_lines() {
        let (server, _) = make_server();
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"} {"jsonrpc":"2.0","id":2,"method":"ping"}"#, "\n",
            "{\"jsonrpc\": \"2.0\",\n  \"id\": 3,\n  \"method\": \"ping\"\n}\n",
            "\n",
        );
        let (summary, responses) = serve(&server, input);
        let ids: Vec<Value> = responses.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(2), json!(3)]);
        assert_eq!(summary.decode_failures, 0);
    }

    #[test]
    fn test_truncated_value_does_not_swallow_next_request() {
        let (server, _) = make_server();
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"#, "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#, "\n",
            r#"{"jsonrpc":"2.0","id":3,"method":"ping"}"#, "\n",
        );
        let (summary, responses) = serve(&server, input);
        let ids: Vec<Value> = responses.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!(2), json!(3)]);
        assert_eq!(
            summary,
            ServeSummary {
                requests: 2,
                responses: 2,
                notifications: 0,
                decode_failures: 1
            }
        );
    }

    #[test]
    fn test_garbage_skips_only_its_own_line() {
        let (server, _) = make_server();
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#, "\n",
            "  not json at all\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#, "\n",
        );
        let (summary, responses) = serve(&server, input);
        assert_eq!(responses.len(), 2);
        assert_eq!(summary.decode_failures, 1);
    }

    #[test]
    fn test_object_with_id_but_no_valid_method_is_answered() {
        let (server, _) = make_server();
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":7}"#, "\n",
            r#"{"jsonrpc":"2.0","id":8,"method":5}"#, "\n",
            r#"{"jsonrpc":"2.0","id":null,"method":5}"#, "\n",
        );
        let (summary, responses) = serve(&server, input);
        let ids: Vec<Value> = responses.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!(7), json!(8)]);
        for response in &responses {
            assert_eq!(response["error"]["code"], -32600);
            assert!(response.get("result").is_none());
        }
        assert_eq!(summary.responses, 2);
        assert_eq!(summary.requests, 0);
        assert_eq!(summary.decode_failures, 3);
    }

    #[test]
    fn test_truncated_value_at_end_of_input() {
        let (server, _) = make_server();
        let (summary, responses) = serve(&server, r#"{"jsonrpc":"2.0","id":1,"#);
        assert!(responses.is_empty());
        assert_eq!(summary.decode_failures, 1);
    }

    #[test]
    fn test_empty_input_ends_cleanly() {
        let (server, _) = make_server();
        let (summary, responses) = serve(&server, "");
        assert!(responses.is_empty());
        assert_eq!(summary, ServeSummary::default());
    }

    #[test]
    fn test_shutdown_stops_before_next_read() {
        let (server, _) = make_server();
        server.shutdown_handle().request_shutdown();
        let (summary, responses) = serve(&server, "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n");
        assert!(responses.is_empty());
        assert_eq!(summary.requests, 0);
        assert!(server.shutdown_handle().wait_idle(Duration::from_millis(10)));
    }

    /// Delivery that requests shutdown while a send is running.
    #[derive(Default)]
    struct StopsDuringSend {
        handle: Mutex<Option<ShutdownHandle>>,
        in_flight_seen: Mutex<Vec<bool>>,
    }

    impl Deliver for StopsDuringSend {
        fn deliver(&self, _body: &[u8]) -> NotifyResult<WebhookResponse> {
            if let Some(handle) = self.handle.lock().unwrap().as_ref() {
                self.in_flight_seen.lock().unwrap().push(handle.is_in_flight());
                handle.request_shutdown();
            }
            Ok(WebhookResponse::ok())
        }
    }

    #[test]
    fn test_shutdown_during_send_stops_next_value_in_buffer() {
        let delivery = Arc::new(StopsDuringSend::default());
        let dispatcher = MessageDispatcher::new(SecurityManager::none(), delivery.clone()).unwrap();
        let server = McpServer::new(McpServerConfig::default(), dispatcher).unwrap();
        *delivery.handle.lock().unwrap() = Some(server.shutdown_handle());

        // Both calls share one line, so they land in one buffer.
        let call = |id: u32| {
            format!(
                r#"{{"jsonrpc":"2.0","id":{id},"method":"tools/call","params":{{"name":"send_text_message","arguments":{{"text":"hi"}}}}}}"#
            )
        };
        let input = format!("{} {}\n{}\n", call(1), call(2), call(3));
        let (summary, responses) = serve(&server, &input);

        // The running send finished and was answered; nothing after it started.
        assert_eq!(*delivery.in_flight_seen.lock().unwrap(), vec![true]);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(summary.requests, 1);
        assert!(!server.shutdown_handle().is_in_flight());
    }

    #[test]
    fn test_no_request_starts_after_shutdown() {
        let handle = ShutdownHandle::default();
        assert!(handle.begin().is_some());
        handle.request_shutdown();
        assert!(handle.begin().is_none());
        assert!(!handle.is_in_flight());
    }

    #[test]
    fn test_wait_idle_wakes_when_request_finishes() {
        let handle = ShutdownHandle::default();
        let worker = handle.clone();
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let thread = std::thread::spawn(move || {
            let _guard = worker.begin().unwrap();
            started_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(50));
        });

        started_rx.recv().unwrap();
        assert!(handle.is_in_flight());
        handle.request_shutdown();
        assert!(handle.wait_idle(Duration::from_secs(5)));
        assert!(!handle.is_in_flight());
        thread.join().unwrap();
    }

    #[test]
    fn test_wait_idle_times_out_while_busy() {
        let handle = ShutdownHandle::default();
        let _guard = handle.begin().unwrap();
        assert!(!handle.wait_idle(Duration::from_millis(10)));
    }

    #[test]
    fn test_in_flight_flag_cleared_after_request() {
        let (server, _) = make_server();
        let handle = server.shutdown_handle();
        serve(&server, "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n");
        assert!(!handle.is_in_flight());
    }

    #[test]
    fn test_update_dispatcher_applies_to_next_call() {
        let (server, first) = make_server();
        let call = r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"send_text_message","arguments":{"text":"hello"}}}"#;
        serve(&server, &format!("{call}\n"));
        assert_eq!(first.bodies.lock().unwrap().len(), 1);

        let second = Arc::new(Recording::default());
        let keyword = SecurityManager::new(SecurityMode::Keyword, None, vec!["维护".into()]);
        server.update_dispatcher(MessageDispatcher::new(keyword, second.clone()).unwrap());

        let (_, responses) = serve(&server, &format!("{call}\n"));
        assert_eq!(responses[0]["result"]["isError"], true);
        assert!(second.bodies.lock().unwrap().is_empty());
        assert_eq!(first.bodies.lock().unwrap().len(), 1);
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_failure_ends_loop_with_error() {
        let (server, _) = make_server();
        let input = "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n";
        let err = server.run(Cursor::new(input.as_bytes()), BrokenPipe).unwrap_err();
        assert!(matches!(err, McpError::Transport(_)));
    }
}
