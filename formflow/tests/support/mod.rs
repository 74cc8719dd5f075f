//! A local HTTP listener standing in for downstream endpoints
#![allow(dead_code)] // Test utility module - not all helpers used in every test

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
    task::JoinHandle,
};

/// Answers every request with the same status and records its request line.
pub struct Endpoint {
    base_url: String,
    /// Request lines seen so far, as `METHOD PATH`.
    requests: Arc<Mutex<Vec<String>>>,
    accept_loop: JoinHandle<()>,
}

impl Endpoint {
    pub async fn start(status: u16) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let base_url = format!("http://{}", listener.local_addr()?);
        let requests = Arc::new(Mutex::new(Vec::new()));

        let accept_loop = {
            let requests = Arc::clone(&requests);
            tokio::spawn(async move {
                while let Ok((mut stream, _)) = listener.accept().await {
                    let requests = Arc::clone(&requests);
                    tokio::spawn(async move {
                        let (reader, mut writer) = stream.split();
                        let mut reader = BufReader::new(reader);

                        let mut request_line = String::new();
                        let mut length = 0;
                        let mut line = String::new();
                        if reader.read_line(&mut request_line).await.is_err() {
                            return;
                        }
                        while reader.read_line(&mut line).await.is_ok_and(|n| n > 0)
                            && !line.trim().is_empty()
                        {
                            if let Some((name, value)) = line.split_once(':')
                                && name.eq_ignore_ascii_case("content-length")
                            {
                                length = value.trim().parse().unwrap_or(0);
                            }
                            line.clear();
                        }
                        let mut body = vec![0; length];
                        if reader.read_exact(&mut body).await.is_err() {
                            return;
                        }

                        let mut parts = request_line.split_whitespace();
                        requests.lock().push(format!(
                            "{} {}",
                            parts.next().unwrap_or_default(),
                            parts.next().unwrap_or_default()
                        ));

                        let response = format!(
                            "HTTP/1.1 {status} Test\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                        );
                        let _ = writer.write_all(response.as_bytes()).await;
                    });
                }
            })
        };

        Ok(Self {
            base_url,
            requests,
            accept_loop,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

/// A configuration routing `CUST1` to two REST endpoints on `base_url`.
pub fn config(base_url: &str, max_retries: u32) -> String {
    format!(
        r#"(
            dispatch: (
                max_workers: 2,
                max_concurrent: 2,
                retry: (max_retries: {max_retries}, base_retry_delay_ms: 10),
                rate_limit: (requests_per_second: 0.0),
                status_interval_secs: 1,
                shutdown_timeout_secs: 5,
            ),
            transport: (base_url: "{base_url}"),
            endpoints: {{
                "audit": (
                    target: Rest(path: "/audit"),
                    required_fields: ["label"],
                ),
                "archive": (
                    target: Rest(path: "/archive"),
                    required_fields: ["label"],
                ),
            }},
            customers: {{
                "CUST1": (endpoints: ["audit", "archive"]),
            }},
        )"#
    )
}
