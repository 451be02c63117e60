// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory extension peer for tests.
//!
//! [`pipe`] returns a [`ProcessHandle`] for the host side and a
//! [`ScriptedPeer`] that plays the extension: it reads what the host writes,
//! answers by hand, records signals and can exit on demand.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use keel_core::{KeelError, RpcError};
use keel_launcher::{ExitNotifier, ExitStatus, ProcessControl, ProcessHandle, Signal};

use crate::codec::{FrameDecoder, encode_frame};
use crate::message::{Message, methods};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Records signals and optionally exits when a given one arrives.
#[derive(Default)]
pub struct RecordingControl {
    signals: Mutex<Vec<Signal>>,
    exits_on: Mutex<Option<Signal>>,
    exit: ExitNotifier,
}

impl ProcessControl for RecordingControl {
    fn kill(&self, signal: Signal) -> Result<(), KeelError> {
        self.signals.lock().unwrap().push(signal);
        if *self.exits_on.lock().unwrap() == Some(signal) {
            self.exit.notify(ExitStatus::default());
        }
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        None
    }
}

/// The extension end of an in-memory process.
pub struct ScriptedPeer {
    from_host: DuplexStream,
    to_host: DuplexStream,
    stderr: DuplexStream,
    decoder: FrameDecoder,
    control: Arc<RecordingControl>,
}

/// Creates a connected host handle and scripted peer.
pub fn pipe() -> (ProcessHandle, ScriptedPeer) {
    let (host_stdin, from_host) = tokio::io::duplex(PIPE_CAPACITY);
    let (to_host, host_stdout) = tokio::io::duplex(PIPE_CAPACITY);
    let (stderr, host_stderr) = tokio::io::duplex(PIPE_CAPACITY);
    let control = Arc::new(RecordingControl::default());
    let handle = ProcessHandle {
        stdin: Box::new(host_stdin),
        stdout: Box::new(host_stdout),
        stderr: Box::new(host_stderr),
        control: control.clone(),
        exit: control.exit.clone(),
    };
    let peer = ScriptedPeer {
        from_host,
        to_host,
        stderr,
        decoder: FrameDecoder::new(),
        control,
    };
    (handle, peer)
}

impl ScriptedPeer {
    /// Waits for the next message the host sends.
    pub async fn next_message(&mut self) -> Message {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(body) = self.decoder.next_frame() {
                return Message::parse(&body).expect("host sent a malformed message");
            }
            let read = self
                .from_host
                .read(&mut chunk)
                .await
                .expect("reading host output");
            assert!(read > 0, "host closed its end of the pipe");
            self.decoder.extend(&chunk[..read]);
        }
    }

    /// Like [`ScriptedPeer::next_message`], but gives up after `wait`.
    pub async fn next_message_within(&mut self, wait: Duration) -> Option<Message> {
        tokio::time::timeout(wait, self.next_message()).await.ok()
    }

    /// Waits for a request and checks its method. Returns `(id, params)`.
    pub async fn expect_request(&mut self, method: &str) -> (u64, Value) {
        match self.next_message().await {
            Message::Request {
                id,
                method: got,
                params,
            } => {
                assert_eq!(got, method, "unexpected request");
                (id, params)
            }
            other => panic!("expected request {method}, got {other:?}"),
        }
    }

    /// Waits for a notification and checks its name. Returns its params.
    pub async fn expect_notification(&mut self, notification: &str) -> Value {
        match self.next_message().await {
            Message::Notification { method, params } => {
                assert_eq!(method, notification, "unexpected notification");
                params
            }
            other => panic!("expected notification {notification}, got {other:?}"),
        }
    }

    /// Waits for a response to a request this peer sent.
    pub async fn expect_response(&mut self, id: u64) -> Result<Value, RpcError> {
        match self.next_message().await {
            Message::Response { id: got, result } => {
                assert_eq!(got, id, "response id");
                Ok(result)
            }
            Message::Error {
                id: Some(got),
                error,
            } => {
                assert_eq!(got, id, "error id");
                Err(error)
            }
            other => panic!("expected response {id}, got {other:?}"),
        }
    }

    pub async fn send(&mut self, message: Message) {
        let body = message.to_bytes().expect("encoding message");
        self.send_raw(&encode_frame(&body)).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.to_host.write_all(bytes).await.expect("writing to host");
        self.to_host.flush().await.expect("flushing to host");
    }

    pub async fn respond(&mut self, id: u64, result: Value) {
        self.send(Message::response(id, result)).await;
    }

    pub async fn respond_error(&mut self, id: u64, error: RpcError) {
        self.send(Message::error(Some(id), error)).await;
    }

    pub async fn write_stderr(&mut self, line: &str) {
        self.stderr
            .write_all(format!("{line}\n").as_bytes())
            .await
            .expect("writing stderr");
    }

    /// Answers `$/initialize` as the named extension.
    pub async fn answer_initialize(&mut self, name: &str, version: Option<&str>) -> Value {
        let (id, params) = self.expect_request(methods::INITIALIZE).await;
        self.respond(id, json!({"extension": {"name": name, "version": version}}))
            .await;
        params
    }

    /// Answers the next lifecycle request (`$/activate`, `$/deactivate`) with null.
    pub async fn acknowledge(&mut self, method: &str) -> Value {
        let (id, params) = self.expect_request(method).await;
        self.respond(id, Value::Null).await;
        params
    }

    /// Exits as soon as `signal` is delivered.
    pub fn exit_on(&self, signal: Signal) {
        *self.control.exits_on.lock().unwrap() = Some(signal);
    }

    pub fn exit(&self, code: i32) {
        self.control.exit.notify(ExitStatus::from_code(code));
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.control.signals.lock().unwrap().clone()
    }
}
