//! Mock backends shared by the dispatcher, fallback and client tests, plus
//! a one-shot local HTTP server for the adapter transport tests

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::error::{ErrorCode, SdkError};
use crate::providers::Backend;
use crate::request::{BackendKind, EventStream, Output, RoutedRequest, StreamEvent};

#[derive(Debug, Clone, Copy)]
pub(crate) enum Behavior {
    Succeed,
    Fail(ErrorCode),
    Panic,
}

/// Calls seen by a mock: the routed request and the API key it was given
pub(crate) type CallLog = Arc<Mutex<Vec<(RoutedRequest, String)>>>;

pub(crate) struct MockBackend {
    kind: BackendKind,
    behavior: Behavior,
    streaming: bool,
    calls: CallLog,
}

impl MockBackend {
    pub fn ok(kind: BackendKind) -> Self {
        Self::with(kind, Behavior::Succeed)
    }

    pub fn failing(kind: BackendKind, code: ErrorCode) -> Self {
        Self::with(kind, Behavior::Fail(code))
    }

    pub fn with(kind: BackendKind, behavior: Behavior) -> Self {
        Self {
            kind,
            behavior,
            streaming: kind != BackendKind::Anthropic,
            calls: CallLog::default(),
        }
    }

    /// Report no streaming support while keeping a working `invoke_stream`
    pub fn without_streaming(mut self) -> Self {
        self.streaming = false;
        self
    }

    pub fn calls(&self) -> CallLog {
        self.calls.clone()
    }

    fn record(&self, request: &RoutedRequest, api_key: &str) -> Result<(), SdkError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((request.clone(), api_key.to_string()));
        }
        match self.behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Fail(code) => Err(SdkError::new(
                format!("{} mock failure", self.kind),
                self.kind.as_str(),
                code,
            )),
            Behavior::Panic => panic!("{} mock panicked", self.kind),
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn invoke(&self, request: &RoutedRequest, api_key: &str) -> Result<Output, SdkError> {
        self.record(request, api_key)?;
        Ok(Output::normalized(
            self.kind,
            &request.params,
            format!("from {}", self.kind),
            None,
            serde_json::json!({"mock": self.kind.as_str()}),
        ))
    }

    async fn invoke_stream(
        &self,
        request: &RoutedRequest,
        api_key: &str,
    ) -> Result<EventStream, SdkError> {
        self.record(request, api_key)?;
        let events = vec![
            Ok(StreamEvent {
                text: "chunk".to_string(),
                done: false,
                tokens: None,
                raw: serde_json::json!({"n": 1}),
                provider: self.kind,
            }),
            Ok(StreamEvent::terminal(self.kind)),
        ];
        Ok(Box::pin(futures::stream::iter(events)))
    }
}

pub(crate) fn call_count(calls: &CallLog) -> usize {
    calls.lock().map(|c| c.len()).unwrap_or(0)
}

/// HTTP client that ignores proxy settings from the environment
pub(crate) fn local_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Answer a single HTTP request on 127.0.0.1 with a canned response.
/// Returns the base URL to point an adapter at and a handle resolving to the
/// raw request the adapter sent.
pub(crate) async fn serve_once(
    status: &str,
    content_type: &str,
    body: &str,
) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    );

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;
        socket.write_all(response.as_bytes()).await.unwrap();
        let _ = socket.shutdown().await;
        request
    });

    (format!("http://{}", addr), handle)
}

/// Read headers plus a `Content-Length` body
async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
        let length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if buf.len() >= end + 4 + length {
            break;
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}
