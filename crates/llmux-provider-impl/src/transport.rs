use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use llmux_common::{ProxyError, ProxyResult};

use crate::client::client_for_proxy;
use crate::headers::Headers;

#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: String,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
    pub stream: bool,
}

#[derive(Debug)]
pub enum TransportBody {
    Bytes(Bytes),
    Stream(mpsc::Receiver<Result<Bytes, ProxyError>>),
}

#[derive(Debug)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: TransportBody,
}

impl TransportResponse {
    /// Drains the body into one buffer (used on error statuses).
    pub async fn collect_body(self) -> Bytes {
        match self.body {
            TransportBody::Bytes(bytes) => bytes,
            TransportBody::Stream(mut rx) => {
                let mut buf = Vec::new();
                while let Some(Ok(chunk)) = rx.recv().await {
                    buf.extend_from_slice(&chunk);
                }
                Bytes::from(buf)
            }
        }
    }
}

/// One upstream HTTP round trip. The default implementation is wreq; the
/// electron shim and test doubles plug in here.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn round_trip(
        &self,
        proxy: Option<&str>,
        req: TransportRequest,
    ) -> ProxyResult<TransportResponse>;
}

pub type SharedTransport = Arc<dyn Transport>;

#[derive(Debug, Default)]
pub struct WreqTransport;

#[async_trait]
impl Transport for WreqTransport {
    async fn round_trip(
        &self,
        proxy: Option<&str>,
        req: TransportRequest,
    ) -> ProxyResult<TransportResponse> {
        let client = client_for_proxy(proxy)?;
        let method = wreq::Method::from_bytes(req.method.as_bytes())
            .map_err(|_| ProxyError::internal(format!("invalid method {}", req.method)))?;
        let mut builder = client.request(method, &req.url);
        for (name, value) in &req.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = req.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(map_wreq_error)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect::<Headers>();

        let success = (200..300).contains(&status);
        if !success || !req.stream {
            let body = response.bytes().await.map_err(map_wreq_error)?;
            return Ok(TransportResponse {
                status,
                headers,
                body: TransportBody::Bytes(body),
            });
        }

        let (tx, rx) = mpsc::channel::<Result<Bytes, ProxyError>>(16);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            while let Some(item) = stream.next().await {
                let message = match item {
                    Ok(chunk) => Ok(chunk),
                    Err(err) => Err(ProxyError::transient(format!("upstream read: {err}"))),
                };
                let is_err = message.is_err();
                if tx.send(message).await.is_err() || is_err {
                    break;
                }
            }
        });
        Ok(TransportResponse {
            status,
            headers,
            body: TransportBody::Stream(rx),
        })
    }
}

fn map_wreq_error(err: wreq::Error) -> ProxyError {
    ProxyError::transient(format!("upstream transport: {err}"))
}

/// Forwards outbound HTTPS through a child process speaking a line-JSON
/// protocol: one request object in, then `meta` / `chunk` / `end` / `error`
/// lines back. Used when the electron transport shim is configured; its
/// absence is non-fatal (the default wreq transport is used instead).
pub struct ElectronTransport {
    program: String,
    args: Vec<String>,
}

impl ElectronTransport {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl Transport for ElectronTransport {
    async fn round_trip(
        &self,
        _proxy: Option<&str>,
        req: TransportRequest,
    ) -> ProxyResult<TransportResponse> {
        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|err| ProxyError::transient(format!("transport child spawn: {err}")))?;

        let payload = json!({
            "method": req.method,
            "url": req.url,
            "headers": req.headers.iter().map(|(k, v)| json!([k, v])).collect::<Vec<_>>(),
            "body": req.body.as_ref().map(|body| base64::engine::general_purpose::STANDARD.encode(body)),
        });
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProxyError::internal("transport child has no stdin"))?;
        stdin
            .write_all(format!("{payload}\n").as_bytes())
            .await
            .map_err(|err| ProxyError::transient(format!("transport child write: {err}")))?;
        drop(stdin);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProxyError::internal("transport child has no stdout"))?;
        let mut lines = BufReader::new(stdout).lines();

        let meta = loop {
            let line = lines
                .next_line()
                .await
                .map_err(|err| ProxyError::transient(format!("transport child read: {err}")))?
                .ok_or_else(|| ProxyError::transient("transport child closed before meta"))?;
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(&line)
                .map_err(|err| ProxyError::transient(format!("transport child meta: {err}")))?;
            match value.get("type").and_then(Value::as_str) {
                Some("meta") => break value,
                Some("error") => {
                    return Err(ProxyError::transient(
                        value
                            .get("message")
                            .and_then(Value::as_str)
                            .unwrap_or("transport child error")
                            .to_string(),
                    ));
                }
                _ => continue,
            }
        };

        let status = meta.get("status").and_then(Value::as_u64).unwrap_or(502) as u16;
        let headers = meta
            .get("headers")
            .and_then(Value::as_array)
            .map(|pairs| {
                pairs
                    .iter()
                    .filter_map(|pair| {
                        let name = pair.get(0)?.as_str()?;
                        let value = pair.get(1)?.as_str()?;
                        Some((name.to_string(), value.to_string()))
                    })
                    .collect::<Headers>()
            })
            .unwrap_or_default();

        let (tx, rx) = mpsc::channel::<Result<Bytes, ProxyError>>(16);
        tokio::spawn(async move {
            let mut child = child;
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(err) => {
                        let _ = tx
                            .send(Err(ProxyError::transient(format!(
                                "transport child read: {err}"
                            ))))
                            .await;
                        break;
                    }
                };
                let Ok(value) = serde_json::from_str::<Value>(&line) else {
                    continue;
                };
                match value.get("type").and_then(Value::as_str) {
                    Some("chunk") => {
                        let Some(data) = value
                            .get("data")
                            .and_then(Value::as_str)
                            .and_then(|data| {
                                base64::engine::general_purpose::STANDARD.decode(data).ok()
                            })
                        else {
                            continue;
                        };
                        if tx.send(Ok(Bytes::from(data))).await.is_err() {
                            break;
                        }
                    }
                    Some("end") => break,
                    Some("error") => {
                        let message = value
                            .get("message")
                            .and_then(Value::as_str)
                            .unwrap_or("transport child error")
                            .to_string();
                        let _ = tx.send(Err(ProxyError::transient(message))).await;
                        break;
                    }
                    _ => {}
                }
            }
            let _ = child.kill().await;
        });

        Ok(TransportResponse {
            status,
            headers,
            body: TransportBody::Stream(rx),
        })
    }
}
