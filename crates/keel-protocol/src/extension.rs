// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A component backed by an extension process.
//!
//! [`Extension`] owns one launched process and speaks the framed protocol
//! with it. Three background tasks run per extension:
//!
//! - the reader decodes stdout frames, settles pending requests and routes
//!   inbound calls into the host through a [`Dispatcher`];
//! - the stderr pump forwards diagnostics to the log;
//! - the watchdog sleeps until the earliest request deadline, rejects what
//!   has expired with `TimedOut` and sends `$/cancel` for each.
//!
//! When the process exits every pending request is rejected at once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use keel_core::{
    Caller, ComponentContext, ComponentId, ComponentImpl, Dispatcher, Emitter, EventSink,
    KeelError, RpcError, Subscription,
};
use keel_launcher::{
    ExitNotifier, ExitStatus, ProcessControl, ProcessHandle, Signal,
    process::{ProcessOutput, ProcessStdin},
};

use crate::codec::{FrameDecoder, encode_frame};
use crate::manifest::ExtensionManifest;
use crate::message::{Message, methods};
use crate::pending::PendingTable;
use crate::shutdown::{ShutdownLadder, ShutdownStage, Terminable, escalate};

/// Default per-request deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const READ_CHUNK: usize = 8 * 1024;

/// Tunables for one extension connection.
#[derive(Debug, Clone)]
pub struct ExtensionOptions {
    pub request_timeout: Duration,
    pub ladder: ShutdownLadder,
    /// Name and version the host introduces itself with in `$/initialize`.
    pub client_name: String,
    pub client_version: String,
}

impl Default for ExtensionOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            ladder: ShutdownLadder::DEFAULT,
            client_name: "keel".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// The wire side of an extension, shared with its background tasks.
struct Connection {
    id: ComponentId,
    writer: tokio::sync::Mutex<ProcessStdin>,
    pending: Mutex<PendingTable>,
    watchdog: Notify,
    alive: AtomicBool,
    exit: ExitNotifier,
    request_timeout: Duration,
    events: Mutex<Option<EventSink>>,
    dispatcher: Weak<dyn Dispatcher>,
    errors: Emitter<RpcError>,
}

impl Connection {
    fn exited_error(&self) -> KeelError {
        KeelError::ProcessExited {
            component: self.id.to_string(),
            status: self
                .exit
                .status()
                .map_or_else(|| "connection closed".to_string(), |status| status.to_string()),
        }
    }

    async fn send(&self, message: &Message) -> Result<(), KeelError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(self.exited_error());
        }
        let frame = encode_frame(&message.to_bytes()?);
        trace!(extension = %self.id, "====> {}", message.describe());

        let mut writer = self.writer.lock().await;
        let written = match writer.write_all(&frame).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        written.map_err(|e| KeelError::io(format!("writing to extension `{}`", self.id), e))
    }

    async fn request(
        &self,
        method: &str,
        params: Value,
        cancel: Option<&CancellationToken>,
    ) -> Result<Value, KeelError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(self.exited_error());
        }
        let (reply, mut response) = oneshot::channel();
        let deadline = Instant::now() + self.request_timeout;
        let id = self.pending_table().register(method, deadline, reply);

        // The exit hook clears `alive` before draining, so a request that
        // slipped in after the drain is caught here.
        if !self.alive.load(Ordering::SeqCst) {
            self.pending_table().take(id);
            return Err(self.exited_error());
        }
        self.watchdog.notify_one();

        if let Err(e) = self.send(&Message::request(id, method, params)).await {
            self.pending_table().take(id);
            return Err(e);
        }

        if let Some(cancel) = cancel {
            tokio::select! {
                biased;
                settled = &mut response => return self.settle(id, settled),
                () = cancel.cancelled() => {}
            }
            // The remote side decides how the request ends; keep waiting.
            debug!(extension = %self.id, request_id = id, "request cancelled by caller");
            self.cancel_remote(id).await;
        }
        let settled = response.await;
        self.settle(id, settled)
    }

    fn settle(
        &self,
        id: u64,
        settled: Result<Result<Value, KeelError>, oneshot::error::RecvError>,
    ) -> Result<Value, KeelError> {
        settled.unwrap_or_else(|_| {
            Err(KeelError::Cancelled(format!(
                "request {id} to `{}` was dropped",
                self.id
            )))
        })
    }

    async fn notify(&self, notification: &str, params: Value) -> Result<(), KeelError> {
        self.send(&Message::notification(notification, params)).await
    }

    async fn cancel_remote(&self, id: u64) {
        if let Err(e) = self.notify(methods::CANCEL, json!({ "id": id })).await {
            debug!(extension = %self.id, request_id = id, error = %e, "could not send $/cancel");
        }
    }

    fn pending_table(&self) -> std::sync::MutexGuard<'_, PendingTable> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rejects every expired request, then tells the peer about each.
    async fn sweep(&self) {
        let expired = self.pending_table().expire(Instant::now());
        for (id, request) in expired {
            warn!(
                extension = %self.id,
                request_id = id,
                method = %request.method,
                "request timed out"
            );
            let _ = request.reply.send(Err(KeelError::TimedOut { request_id: id }));
            self.cancel_remote(id).await;
        }
    }

    fn closed(&self, status: &ExitStatus) {
        self.alive.store(false, Ordering::SeqCst);
        let drained = self.pending_table().drain();
        info!(
            extension = %self.id,
            status = %status,
            pending = drained.len(),
            "extension process exited"
        );
        for (_, request) in drained {
            let _ = request.reply.send(Err(KeelError::ProcessExited {
                component: self.id.to_string(),
                status: status.to_string(),
            }));
        }
        self.watchdog.notify_one();
    }

    fn handle(self: &Arc<Self>, message: Message) {
        trace!(extension = %self.id, "<==== {}", message.describe());
        match message {
            Message::Response { id, result } => self.resolve(id, Ok(result)),
            Message::Error {
                id: Some(id),
                error,
            } => self.resolve(id, Err(KeelError::Remote(error))),
            Message::Error { id: None, error } => {
                warn!(extension = %self.id, error = %error, "extension reported an error");
                self.errors.emit(&error);
            }
            Message::Notification { method, params } if method == methods::EVENT => {
                self.emit_event(params);
            }
            Message::Notification { method, params } if method == methods::CANCEL => {
                debug!(extension = %self.id, params = %params, "ignoring $/cancel from extension");
            }
            Message::Notification { method, params } => {
                let connection = Arc::clone(self);
                tokio::spawn(async move {
                    let Err(e) = connection.route_notify(&method, params).await else {
                        return;
                    };
                    debug!(
                        extension = %connection.id,
                        method = %method,
                        error = %e,
                        "inbound notification failed"
                    );
                    // Notifications carry no id; the failure goes back id-less.
                    let report = Message::error(None, e.to_rpc_error());
                    if let Err(e) = connection.send(&report).await {
                        debug!(extension = %connection.id, error = %e, "error report not sent");
                    }
                });
            }
            Message::Request { id, method, params } => {
                let connection = Arc::clone(self);
                tokio::spawn(async move {
                    let reply = match connection.route_call(&method, params).await {
                        Ok(result) => Message::response(id, result),
                        Err(e) => {
                            debug!(
                                extension = %connection.id,
                                method = %method,
                                error = %e,
                                "inbound request failed"
                            );
                            Message::error(Some(id), e.to_rpc_error())
                        }
                    };
                    if let Err(e) = connection.send(&reply).await {
                        debug!(extension = %connection.id, request_id = id, error = %e, "reply not sent");
                    }
                });
            }
        }
    }

    fn resolve(&self, id: u64, outcome: Result<Value, KeelError>) {
        match self.pending_table().take(id) {
            Some(request) => {
                let _ = request.reply.send(outcome);
            }
            None => debug!(
                extension = %self.id,
                request_id = id,
                "ignoring reply to a request that is no longer pending"
            ),
        }
    }

    fn emit_event(&self, params: Value) {
        let Some(event) = params.get("event").and_then(Value::as_str) else {
            warn!(extension = %self.id, "$/event without an event name");
            return;
        };
        let payload = params.get("params").cloned().unwrap_or(Value::Null);
        let sink = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match sink {
            Some(sink) => sink(event, payload),
            None => debug!(extension = %self.id, event, "event before initialize dropped"),
        }
    }

    fn route(&self, address: &str) -> Result<(ComponentId, String, Arc<dyn Dispatcher>), KeelError> {
        let (target, name) = address
            .split_once('/')
            .filter(|(target, name)| !target.is_empty() && !name.is_empty())
            .ok_or_else(|| {
                KeelError::MethodNotFound(format!("'{address}' is not a <component>/<name> address"))
            })?;
        let dispatcher = self
            .dispatcher
            .upgrade()
            .ok_or_else(|| KeelError::Cancelled("host is shutting down".to_string()))?;
        Ok((ComponentId::from(target), name.to_string(), dispatcher))
    }

    async fn route_call(&self, address: &str, params: Value) -> Result<Value, KeelError> {
        let (target, method, dispatcher) = self.route(address)?;
        dispatcher
            .dispatch_call(&self.id, &target, &method, params)
            .await
    }

    async fn route_notify(&self, address: &str, params: Value) -> Result<(), KeelError> {
        let (target, notification, dispatcher) = self.route(address)?;
        dispatcher
            .dispatch_notify(&self.id, &target, &notification, params)
            .await
    }
}

async fn read_frames(connection: Arc<Connection>, mut stdout: ProcessOutput) {
    let mut decoder = FrameDecoder::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let read = match stdout.read(&mut chunk).await {
            Ok(0) => break,
            Ok(read) => read,
            Err(e) => {
                debug!(extension = %connection.id, error = %e, "stdout read failed");
                break;
            }
        };
        decoder.extend(&chunk[..read]);
        while let Some(body) = decoder.next_frame() {
            match Message::parse(&body) {
                Ok(message) => connection.handle(message),
                Err(e) => warn!(extension = %connection.id, error = %e, "dropping malformed message"),
            }
        }
    }
    debug!(extension = %connection.id, "stdout closed");
}

/// Forwards stderr to the log line by line. Bytes that are not UTF-8 are
/// logged lossily; only EOF or a read error stops the pump, so the extension
/// never writes into a closed pipe.
async fn pump_stderr(id: ComponentId, stderr: ProcessOutput) {
    let mut reader = BufReader::new(stderr);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => debug!(extension = %id, "{}", String::from_utf8_lossy(&line).trim_end()),
            Err(e) => {
                debug!(extension = %id, error = %e, "stderr read failed");
                break;
            }
        }
    }
}

async fn watchdog(connection: Arc<Connection>) {
    loop {
        let next = connection.pending_table().next_deadline();
        match next {
            Some(deadline) => {
                tokio::select! {
                    () = tokio::time::sleep_until(deadline) => connection.sweep().await,
                    () = connection.watchdog.notified() => {}
                }
            }
            None if connection.alive.load(Ordering::SeqCst) => {
                connection.watchdog.notified().await;
            }
            None => break,
        }
    }
}

/// Protocol proxy for one extension process.
pub struct Extension {
    manifest: ExtensionManifest,
    connection: Arc<Connection>,
    control: Arc<dyn ProcessControl>,
    ladder: ShutdownLadder,
    client: (String, String),
    tasks: Vec<JoinHandle<()>>,
    exit_hook: Subscription,
}

impl Extension {
    /// Takes ownership of a launched process and starts talking to it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        manifest: ExtensionManifest,
        process: ProcessHandle,
        dispatcher: Weak<dyn Dispatcher>,
        options: ExtensionOptions,
    ) -> Arc<Self> {
        let ProcessHandle {
            stdin,
            stdout,
            stderr,
            control,
            exit,
        } = process;
        let id = manifest.component.id();

        let connection = Arc::new(Connection {
            id: id.clone(),
            writer: tokio::sync::Mutex::new(stdin),
            pending: Mutex::new(PendingTable::new()),
            watchdog: Notify::new(),
            alive: AtomicBool::new(true),
            exit: exit.clone(),
            request_timeout: options.request_timeout,
            events: Mutex::new(None),
            dispatcher,
            errors: Emitter::new(),
        });

        let hook = Arc::downgrade(&connection);
        let exit_hook = exit.on_exit(move |status| {
            if let Some(connection) = hook.upgrade() {
                connection.closed(status);
            }
        });

        let tasks = vec![
            tokio::spawn(read_frames(Arc::clone(&connection), stdout)),
            tokio::spawn(pump_stderr(id.clone(), stderr)),
            tokio::spawn(watchdog(Arc::clone(&connection))),
        ];
        debug!(extension = %id, pid = ?control.pid(), "extension connected");

        Arc::new(Self {
            manifest,
            connection,
            control,
            ladder: options.ladder,
            client: (options.client_name, options.client_version),
            tasks,
            exit_hook,
        })
    }

    pub fn manifest(&self) -> &ExtensionManifest {
        &self.manifest
    }

    pub fn id(&self) -> &ComponentId {
        &self.connection.id
    }

    /// Sends a request and waits for its reply, the deadline, or process exit.
    ///
    /// Firing `cancel` sends `$/cancel` but leaves the outcome to the peer.
    pub async fn request(
        &self,
        method: &str,
        params: Value,
        cancel: Option<&CancellationToken>,
    ) -> Result<Value, KeelError> {
        self.connection.request(method, params, cancel).await
    }

    pub async fn send_notification(&self, notification: &str, params: Value) -> Result<(), KeelError> {
        self.connection.notify(notification, params).await
    }

    pub fn pending_requests(&self) -> usize {
        self.connection.pending_table().len()
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.connection.exit.status()
    }

    pub fn on_exit(&self, listener: impl Fn(&ExitStatus) + Send + Sync + 'static) -> Subscription {
        self.connection.exit.on_exit(listener)
    }

    /// Errors the extension reports without a request id.
    pub fn on_error(&self, listener: impl Fn(&RpcError) + Send + Sync + 'static) -> Subscription {
        self.connection.errors.subscribe(listener)
    }

    fn check_handshake(&self, reply: &Value) -> Result<(), KeelError> {
        let announced = reply.get("extension");
        let name = announced.and_then(|e| e.get("name")).and_then(Value::as_str);
        let version = announced
            .and_then(|e| e.get("version"))
            .and_then(Value::as_str);

        let expected = &self.manifest.component;
        if name != Some(expected.name.as_str()) {
            return Err(KeelError::InvalidRequest(format!(
                "extension announced itself as {:?}, manifest says '{}'",
                name.unwrap_or("<none>"),
                expected.name
            )));
        }
        if let Some(expected_version) = expected.version.as_deref()
            && version != Some(expected_version)
        {
            return Err(KeelError::InvalidRequest(format!(
                "extension '{}' announced version {:?}, manifest says '{expected_version}'",
                expected.name,
                version.unwrap_or("<none>")
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ComponentImpl for Extension {
    async fn initialize(&self, events: EventSink) -> Result<(), KeelError> {
        *self
            .connection
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(events);

        let (name, version) = &self.client;
        let params = json!({
            "client": {"name": name, "version": version, "capabilities": {}},
        });
        let reply = self.request(methods::INITIALIZE, params, None).await?;
        self.check_handshake(&reply)?;
        debug!(extension = %self.id(), "handshake complete");
        Ok(())
    }

    async fn activate(
        &self,
        _context: Arc<dyn ComponentContext>,
        settings: Value,
        cancel: CancellationToken,
    ) -> Result<(), KeelError> {
        self.request(methods::ACTIVATE, json!({ "settings": settings }), Some(&cancel))
            .await?;
        Ok(())
    }

    async fn deactivate(&self) -> Result<(), KeelError> {
        self.request(methods::DEACTIVATE, Value::Null, None).await?;
        Ok(())
    }

    async fn call(&self, _caller: Caller, method: &str, params: Value) -> Result<Value, KeelError> {
        self.request(method, params, None).await
    }

    async fn notify(
        &self,
        _caller: Caller,
        notification: &str,
        params: Value,
    ) -> Result<(), KeelError> {
        self.send_notification(notification, params).await
    }

    async fn dispose(&self) -> Result<(), KeelError> {
        match escalate(self, self.ladder, self.id().as_str()).await {
            ShutdownStage::Unresponsive => Err(KeelError::Internal(format!(
                "extension `{}` did not exit after SIGKILL",
                self.id()
            ))),
            _ => Ok(()),
        }
    }

    fn pid(&self) -> Option<u32> {
        self.control.pid()
    }
}

#[async_trait]
impl Terminable for Extension {
    fn request_shutdown(&self) {
        let connection = Arc::clone(&self.connection);
        tokio::spawn(async move {
            if let Err(e) = connection.request(methods::SHUTDOWN, Value::Null, None).await {
                debug!(extension = %connection.id, error = %e, "$/shutdown not acknowledged");
            }
        });
    }

    fn signal(&self, signal: Signal) -> Result<(), KeelError> {
        self.control.kill(signal)
    }

    fn has_exited(&self) -> bool {
        self.connection.exit.has_exited()
    }

    async fn exited(&self) {
        self.connection.exit.wait().await;
    }
}

impl Drop for Extension {
    fn drop(&mut self) {
        self.exit_hook.dispose();
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Extension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extension")
            .field("id", self.id())
            .field("pid", &self.control.pid())
            .field("exit", &self.exit_status())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stderr_pump_survives_invalid_utf8() {
        let (mut writer, reader) = tokio::io::duplex(16);
        let pump = tokio::spawn(pump_stderr(ComponentId::from("ext"), Box::new(reader)));

        writer.write_all(b"\xff\xfe bad\n").await.unwrap();
        // More than the pipe holds, so this only completes while the pump reads.
        for _ in 0..8 {
            writer.write_all(b"later line\n").await.unwrap();
        }
        drop(writer);

        tokio::time::timeout(Duration::from_secs(5), pump)
            .await
            .expect("pump did not stop at EOF")
            .unwrap();
    }
}
