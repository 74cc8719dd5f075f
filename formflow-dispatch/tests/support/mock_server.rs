//! Mock HTTP endpoint for testing the real transport
//!
//! Accepts one request per connection, records it, and answers with the next
//! scripted status (or the fallback once the script runs out).

use std::{
    collections::{BTreeMap, VecDeque},
    net::SocketAddr,
    sync::Arc,
};

use parking_lot::Mutex;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedRequest {
    pub method: String,
    pub path: String,
    /// Header names are lowercased.
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl ReceivedRequest {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Default)]
struct State {
    script: VecDeque<u16>,
    received: Vec<ReceivedRequest>,
}

pub struct MockHttpServer {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
    accept_loop: JoinHandle<()>,
}

impl MockHttpServer {
    pub async fn start(script: impl IntoIterator<Item = u16>, fallback: u16) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(State {
            script: script.into_iter().collect(),
            received: Vec::new(),
        }));

        let accept_loop = {
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle(stream, state, fallback).await {
                            tracing::debug!("Mock server connection error: {e}");
                        }
                    });
                }
            })
        };

        Ok(Self {
            addr,
            state,
            accept_loop,
        })
    }

    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn received(&self) -> Vec<ReceivedRequest> {
        self.state.lock().received.clone()
    }

    async fn handle(
        mut stream: TcpStream,
        state: Arc<Mutex<State>>,
        fallback: u16,
    ) -> std::io::Result<()> {
        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader);

        let mut line = String::new();
        reader.read_line(&mut line).await?;
        let mut parts = line.split_whitespace();
        let method = parts.next().unwrap_or_default().to_string();
        let path = parts.next().unwrap_or_default().to_string();

        let mut headers = BTreeMap::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 || line.trim().is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }

        let length = headers
            .get("content-length")
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(0);
        let mut body = vec![0; length];
        reader.read_exact(&mut body).await?;

        let status = {
            let mut state = state.lock();
            state.received.push(ReceivedRequest {
                method,
                path,
                headers,
                body,
            });
            state.script.pop_front().unwrap_or(fallback)
        };

        let response = format!(
            "HTTP/1.1 {status} Mock\r\ncontent-type: text/plain\r\ncontent-length: 4\r\nconnection: close\r\n\r\nmock"
        );
        writer.write_all(response.as_bytes()).await?;
        writer.flush().await
    }
}

impl Drop for MockHttpServer {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}
