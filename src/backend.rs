//! the answering service seam.
//!
//! - `AnswerBackend` is what the plugin dispatches to; swap it for tests or
//!   other transports.
//! - `HttpBackend` posts `{"query": ...}` to `{base}/chat` and reads
//!   `{"answer": ...}` back. native uses blocking `ureq` on tokio's blocking
//!   pool; wasm uses `gloo-net` (fetch) on the browser event loop.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ClientConfig;

/// why a call failed. stays on the developer side: the transcript only ever
/// shows fixed failure text.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected http status {0}")]
    Status(u16),
    #[error("could not encode request: {0}")]
    Encode(serde_json::Error),
    #[error("malformed response body: {0}")]
    Decode(serde_json::Error),
    #[error("request worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, Serialize)]
pub struct AskRequest<'a> {
    pub query: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct AskResponse {
    pub answer: String,
}

/// one question in, one answer (or error) out.
#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
pub trait AnswerBackend: Send + Sync {
    async fn ask(&self, query: &str) -> Result<String, BackendError>;
}

/// `POST {base}/chat` over http.
#[derive(Clone)]
pub struct HttpBackend {
    url: String,
    #[cfg(not(target_arch = "wasm32"))]
    agent: ureq::Agent,
}

impl HttpBackend {
    /// `url` is the full endpoint, e.g. `http://127.0.0.1:8000/chat`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            #[cfg(not(target_arch = "wasm32"))]
            agent: ureq::Agent::new_with_defaults(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.chat_url())
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn decode_answer(text: &str) -> Result<String, BackendError> {
    let resp: AskResponse = serde_json::from_str(text).map_err(BackendError::Decode)?;
    Ok(resp.answer)
}

#[cfg(not(target_arch = "wasm32"))]
fn post_blocking(agent: &ureq::Agent, url: &str, query: &str) -> Result<String, BackendError> {
    let payload = serde_json::to_vec(&AskRequest { query }).map_err(BackendError::Encode)?;
    let res = agent
        .post(url)
        .header("Content-Type", "application/json")
        .send(&payload[..])
        .map_err(|err| match err {
            ureq::Error::StatusCode(code) => BackendError::Status(code),
            other => BackendError::Transport(other.to_string()),
        })?;
    // ureq 3.1: read body via Body::read_to_string()
    let text = res
        .into_body()
        .read_to_string()
        .map_err(|e| BackendError::Transport(e.to_string()))?;
    decode_answer(&text)
}

#[cfg(not(target_arch = "wasm32"))]
#[async_trait::async_trait]
impl AnswerBackend for HttpBackend {
    async fn ask(&self, query: &str) -> Result<String, BackendError> {
        let agent = self.agent.clone();
        let url = self.url.clone();
        let query = query.to_string();
        // ureq is blocking; keep it off the async workers
        tokio::task::spawn_blocking(move || post_blocking(&agent, &url, &query))
            .await
            .map_err(|e| BackendError::Worker(e.to_string()))?
    }
}

#[cfg(target_arch = "wasm32")]
#[async_trait::async_trait(?Send)]
impl AnswerBackend for HttpBackend {
    async fn ask(&self, query: &str) -> Result<String, BackendError> {
        use gloo_net::http::Request;

        // `json()` also sets the content type
        let req = Request::post(&self.url)
            .json(&AskRequest { query })
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        let resp = req.send().await.map_err(|e| BackendError::Transport(e.to_string()))?;
        if !resp.ok() {
            return Err(BackendError::Status(resp.status()));
        }
        let text = resp.text().await.map_err(|e| BackendError::Transport(e.to_string()))?;
        decode_answer(&text)
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::mpsc;

    /// accept one connection, record the raw request, reply with `status`/`body`.
    fn serve_once(status: &'static str, body: &'static str) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let _ = tx.send(read_request(&mut stream));
            let resp = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(resp.as_bytes()).unwrap();
        });
        (format!("http://{addr}/chat"), rx)
    }

    fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).into_owned();
            if let Some(end) = text.find("\r\n\r\n") {
                let head = text[..end].to_ascii_lowercase();
                let len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + len {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn posts_query_and_reads_answer() {
        let (url, rx) = serve_once("200 OK", r#"{"answer":"X","sources":[]}"#);
        let backend = HttpBackend::new(url);

        let answer = backend.ask("hello").await.unwrap();
        assert_eq!(answer, "X");

        let request = rx.recv().unwrap();
        let lower = request.to_ascii_lowercase();
        assert!(request.starts_with("POST /chat HTTP/1.1"), "{request}");
        assert!(lower.contains("content-type: application/json"), "{request}");
        assert!(request.ends_with(r#"{"query":"hello"}"#), "{request}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_error_is_status() {
        let (url, _rx) = serve_once("500 Internal Server Error", r#"{"detail":"boom"}"#);
        let err = HttpBackend::new(url).ask("hello").await.unwrap_err();
        assert!(matches!(err, BackendError::Status(500)), "{err:?}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn malformed_body_is_decode_error() {
        let (url, _rx) = serve_once("200 OK", "not json");
        let err = HttpBackend::new(url).ask("hello").await.unwrap_err();
        assert!(matches!(err, BackendError::Decode(_)), "{err:?}");

        let (url, _rx) = serve_once("200 OK", r#"{"detail":"no answer here"}"#);
        let err = HttpBackend::new(url).ask("hello").await.unwrap_err();
        assert!(matches!(err, BackendError::Decode(_)), "{err:?}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn refused_connection_is_transport_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = HttpBackend::new(format!("http://127.0.0.1:{port}/chat"))
            .ask("hello")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Transport(_)), "{err:?}");
    }

    #[test]
    fn from_config_targets_chat_endpoint() {
        let backend = HttpBackend::from_config(&ClientConfig::new("http://10.0.0.2:9000/"));
        assert_eq!(backend.url(), "http://10.0.0.2:9000/chat");
    }

    #[test]
    fn stub_backend_can_be_driven_without_a_runtime() {
        struct Echo;
        #[async_trait::async_trait]
        impl AnswerBackend for Echo {
            async fn ask(&self, query: &str) -> Result<String, BackendError> {
                Ok(query.to_uppercase())
            }
        }
        assert_eq!(pollster::block_on(Echo.ask("hi")).unwrap(), "HI");
    }
}
