use bytes::BytesMut;
use futures::{Stream, StreamExt};
use llama_core::chat::{ChatError, ChatHandler, ChatOptions};
use reqwest::{header, Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::llama::{config::LlamaConfig, geninfo, payload, CHAT_PATH, MODEL_INFO_PATH};

const UNAUTHORIZED_NOTE: &str = "unauthorized: please provide a valid access credential";

/// Caller-owned abort handle for one chat invocation. Created before the
/// request is dispatched; the dispatch timeout cancels through the same
/// token, so the two are indistinguishable to the caller.
#[derive(Clone, Debug, Default)]
pub struct ChatController {
    token: CancellationToken,
}

impl ChatController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// `Done` and `Errored` are terminal; every transition below checks for them
/// first, which is what makes the terminal callback fire exactly once even
/// when close/abort/error signals race.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Open,
    Streaming,
    NonStreaming,
    Done,
    Errored,
}

struct StreamState<'a> {
    phase: Phase,
    text: String,
    handler: &'a mut dyn ChatHandler,
}

impl<'a> StreamState<'a> {
    fn new(handler: &'a mut dyn ChatHandler) -> Self {
        Self {
            phase: Phase::Open,
            text: String::new(),
            handler,
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self.phase, Phase::Done | Phase::Errored)
    }

    fn begin_streaming(&mut self) {
        if self.phase == Phase::Open {
            self.phase = Phase::Streaming;
        }
    }

    fn begin_non_streaming(&mut self) {
        if self.phase == Phase::Open {
            self.phase = Phase::NonStreaming;
        }
    }

    fn on_delta(&mut self, delta: &str) {
        if self.is_terminal() || delta.is_empty() {
            return;
        }
        self.text.push_str(delta);
        self.handler.on_update(&self.text, delta);
    }

    fn finish(&mut self) {
        if self.is_terminal() {
            return;
        }
        self.phase = Phase::Done;
        self.handler.on_finish(&self.text);
    }

    fn finish_with(&mut self, text: String) {
        if self.is_terminal() {
            return;
        }
        self.text = text;
        self.phase = Phase::Done;
        self.handler.on_finish(&self.text);
    }

    fn fail(&mut self, error: ChatError) {
        if self.is_terminal() {
            return;
        }
        self.phase = Phase::Errored;
        self.handler.on_error(error);
    }
}

#[derive(Clone)]
pub struct LlamaClient {
    http: Client,
    cfg: LlamaConfig,
}

impl LlamaClient {
    pub fn new(cfg: LlamaConfig) -> anyhow::Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CACHE_CONTROL,
            header::HeaderValue::from_static("no-store"),
        );
        if let Some(token) = &cfg.auth_token {
            headers.insert(header::AUTHORIZATION, header::HeaderValue::from_str(token)?);
        }
        let http = Client::builder()
            .default_headers(headers)
            .use_rustls_tls()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(2)
            .build()?;
        Ok(Self { http, cfg })
    }

    pub fn config(&self) -> &LlamaConfig {
        &self.cfg
    }

    /// Run one chat turn. All outcomes are delivered through `handler`:
    /// zero or more `on_update` calls followed by exactly one
    /// `on_finish`/`on_error`.
    pub async fn chat(
        &self,
        options: &ChatOptions,
        controller: &ChatController,
        handler: &mut dyn ChatHandler,
    ) {
        let mut state = StreamState::new(handler);
        let body = match payload::build(options, &self.cfg) {
            Ok(p) => p,
            Err(e) => {
                state.fail(e);
                return;
            }
        };

        let url = format!("{}/{}", self.cfg.base_url.trim_end_matches('/'), CHAT_PATH);
        info!(target:"providers::llama", "start chat stream={} url={}", body.stream, url);

        let accept = if body.stream {
            "text/event-stream"
        } else {
            "application/json"
        };
        let send = self
            .http
            .post(&url)
            .header(header::ACCEPT, accept)
            .json(&body)
            .send();

        // The timeout only covers waiting for response headers; it is
        // disarmed as soon as they arrive.
        let resp = tokio::select! {
            resp = send => match resp {
                Ok(r) => r,
                Err(e) => {
                    state.fail(map_reqwest_err(e));
                    return;
                }
            },
            _ = controller.token.cancelled() => {
                state.fail(ChatError::Canceled);
                return;
            }
            _ = tokio::time::sleep(self.cfg.request_timeout) => {
                controller.cancel();
                state.fail(ChatError::Canceled);
                return;
            }
        };

        if body.stream {
            self.run_stream(resp, controller, &mut state).await;
        } else {
            read_json_answer(resp, &mut state).await;
        }
    }

    async fn run_stream(
        &self,
        resp: reqwest::Response,
        controller: &ChatController,
        state: &mut StreamState<'_>,
    ) {
        let status = resp.status();
        let content_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.starts_with("text/plain") {
            match resp.text().await {
                Ok(text) => state.finish_with(text),
                Err(e) => state.fail(map_reqwest_err(e)),
            }
            return;
        }

        if !status.is_success() || !content_type.contains("text/event-stream") {
            // The backend reports such failures as a finished answer carrying
            // the error text, not through the error callback.
            let body = resp.text().await.unwrap_or_default();
            error!(
                target:"providers::llama",
                "chat stream non-200 status={} content_type={} body={:?}", status, content_type, body
            );
            state.finish_with(error_text(status, &body));
            return;
        }

        state.begin_streaming();
        let mut events = Box::pin(event_stream(resp));
        loop {
            tokio::select! {
                event = events.next() => match event {
                    Some(Ok(event)) => {
                        if let Some(content) = event["content"].as_str() {
                            state.on_delta(content);
                        }
                        if event["stop"].as_bool().unwrap_or(false) {
                            for line in geninfo::extract(&event) {
                                debug!(target:"providers::llama", "generation {}", line);
                            }
                            state.finish();
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        state.fail(e);
                        return;
                    }
                    // Transport closed without an explicit stop event; the
                    // accumulated text is still the answer.
                    None => {
                        state.finish();
                        return;
                    }
                },
                _ = controller.token.cancelled() => {
                    state.fail(ChatError::Canceled);
                    return;
                }
            }
        }
    }

    pub async fn model_info(&self) -> Result<Value, ChatError> {
        let url = format!(
            "{}/{}",
            self.cfg.base_url.trim_end_matches('/'),
            MODEL_INFO_PATH
        );
        let resp = self.http.get(&url).send().await.map_err(map_reqwest_err)?;
        if !resp.status().is_success() {
            return Err(ChatError::Other(format!(
                "model info status {}",
                resp.status()
            )));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| ChatError::Decode(e.to_string()))
    }
}

async fn read_json_answer(resp: reqwest::Response, state: &mut StreamState<'_>) {
    state.begin_non_streaming();
    let status = resp.status();
    let body = match resp.text().await {
        Ok(t) => t,
        Err(e) => {
            state.fail(map_reqwest_err(e));
            return;
        }
    };
    if !status.is_success() {
        error!(target:"providers::llama", "chat non-200 status={} body={:?}", status, body);
        state.finish_with(error_text(status, &body));
        return;
    }
    match serde_json::from_str::<Value>(&body) {
        Ok(v) => {
            let message = v["content"].as_str().unwrap_or_default().to_string();
            state.finish_with(message);
        }
        Err(e) => state.fail(ChatError::Decode(e.to_string())),
    }
}

/// One JSON object per server-sent event. Malformed events are logged and
/// dropped without ending the stream; transport errors end it.
fn event_stream(resp: reqwest::Response) -> impl Stream<Item = Result<Value, ChatError>> {
    async_stream::stream! {
        let mut body = resp.bytes_stream();
        let mut buf = BytesMut::new();
        loop {
            match body.next().await {
                Some(Ok(chunk)) => {
                    buf.extend_from_slice(&chunk);
                    loop {
                        let Some(pos) = find_event_boundary(&buf) else { break };
                        let raw = buf.split_to(pos).freeze();
                        let _ = if buf.starts_with(b"\r\n\r\n") {
                            buf.split_to(4)
                        } else {
                            buf.split_to(2)
                        };
                        if let Some(event) = parse_stream_event(&raw) {
                            yield Ok(event);
                        }
                    }
                }
                Some(Err(e)) => {
                    yield Err(map_reqwest_err(e));
                    return;
                }
                None => return,
            }
        }
    }
}

fn find_event_boundary(buf: &BytesMut) -> Option<usize> {
    if let Some(p) = twoway::find_bytes(buf, b"\r\n\r\n") {
        return Some(p);
    }
    twoway::find_bytes(buf, b"\n\n")
}

fn parse_stream_event(raw: &bytes::Bytes) -> Option<Value> {
    let text = match std::str::from_utf8(raw) {
        Ok(t) => t,
        Err(e) => {
            warn!(target:"providers::llama", "skipping non-utf8 stream event: {}", e);
            return None;
        }
    };
    let mut data_lines = Vec::new();
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim_start());
        }
    }
    if data_lines.is_empty() {
        return None;
    }
    let json_text = data_lines.join("\n");
    match serde_json::from_str::<Value>(&json_text) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(
                target:"providers::llama",
                "skipping malformed stream event: {} data={:?}", e, json_text
            );
            None
        }
    }
}

/// Best-effort human-readable rendering of a failed response body: JSON is
/// pretty-printed, anything else passes through raw, and a 401 gets an
/// explicit note appended.
fn error_text(status: StatusCode, body: &str) -> String {
    let mut text = match serde_json::from_str::<Value>(body) {
        Ok(v) => serde_json::to_string_pretty(&v).unwrap_or_else(|_| body.to_string()),
        Err(_) => body.to_string(),
    };
    if status == StatusCode::UNAUTHORIZED {
        if !text.is_empty() {
            text.push_str("\n\n");
        }
        text.push_str(UNAUTHORIZED_NOTE);
    }
    text
}

fn map_reqwest_err(e: reqwest::Error) -> ChatError {
    if e.is_timeout() {
        ChatError::Timeout(e.to_string())
    } else if e.is_request() || e.is_connect() {
        ChatError::Network(e.to_string())
    } else {
        ChatError::Other(e.to_string())
    }
}
