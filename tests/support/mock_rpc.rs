//! In-process mock of Bitcoin Core's header JSON-RPC surface
//! (`getblockcount`, `getblockhash`, `getblockheader`), served over real HTTP
//! so the production client is exercised end to end. The relay client issues
//! one call per POST, so the server answers exactly one call per request.

use std::{
    collections::HashMap,
    convert::Infallible,
    net::TcpListener,
    sync::{Arc, RwLock},
};

use anyhow::{Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::{body, Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use spvrelay::Header;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

#[derive(Clone)]
struct HeaderData {
    height: u64,
    hash: String,
    raw_hex: String,
}

struct MockNodeInner {
    by_height: HashMap<u64, HeaderData>,
    by_hash: HashMap<String, HeaderData>,
    tip: u64,
}

/// Scriptable header view backing the mock server.
#[derive(Clone)]
pub struct MockNode {
    inner: Arc<RwLock<MockNodeInner>>,
}

impl MockNode {
    pub fn with_canonical(headers: &[Header]) -> Self {
        let mut by_height = HashMap::new();
        let mut by_hash = HashMap::new();
        let mut tip = 0;

        for header in headers {
            let data = HeaderData {
                height: header.height(),
                hash: header.hash().to_string(),
                raw_hex: header.raw_hex(),
            };
            tip = tip.max(data.height);
            by_hash.insert(data.hash.clone(), data.clone());
            by_height.insert(data.height, data);
        }

        Self {
            inner: Arc::new(RwLock::new(MockNodeInner {
                by_height,
                by_hash,
                tip,
            })),
        }
    }

    pub fn tip(&self) -> u64 {
        self.inner.read().expect("mock node poisoned").tip
    }

    fn hash_for_height(&self, height: u64) -> Option<String> {
        let inner = self.inner.read().expect("mock node poisoned");
        if height > inner.tip {
            return None;
        }
        inner.by_height.get(&height).map(|data| data.hash.clone())
    }

    fn header_for_hash(&self, hash: &str) -> Option<HeaderData> {
        let inner = self.inner.read().expect("mock node poisoned");
        inner.by_hash.get(hash).cloned()
    }
}

pub struct MockRpcServer {
    url: String,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl MockRpcServer {
    pub fn start(node: MockNode) -> Result<Self> {
        let listener =
            TcpListener::bind("127.0.0.1:0").context("failed to bind mock RPC listener")?;
        listener
            .set_nonblocking(true)
            .context("failed to set mock listener non-blocking")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock listener address")?;

        let service = make_service_fn(move |_| {
            let node = node.clone();
            async move { Ok::<_, Infallible>(service_fn(move |req| handle_http(node.clone(), req))) }
        });

        let (stop, stopped) = oneshot::channel::<()>();
        let server = Server::from_tcp(listener)
            .context("failed to build mock HTTP server")?
            .serve(service)
            .with_graceful_shutdown(async {
                let _ = stopped.await;
            });

        let task = tokio::spawn(async move {
            if let Err(err) = server.await {
                eprintln!("mock RPC server stopped: {err}");
            }
        });

        Ok(Self {
            url: format!("http://{addr}"),
            stop,
            task,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn shutdown(self) {
        let _ = self.stop.send(());
        let _ = self.task.await;
    }
}

async fn handle_http(node: MockNode, request: Request<Body>) -> Result<Response<Body>, Infallible> {
    let response = match read_call(request).await {
        Ok(call) => {
            let reply = dispatch(&node, &call);
            Response::builder()
                .header(hyper::header::CONTENT_TYPE, "application/json")
                .body(Body::from(reply.to_string()))
                .expect("static response parts are valid")
        }
        Err((status, detail)) => Response::builder()
            .status(status)
            .body(Body::from(detail))
            .expect("static response parts are valid"),
    };
    Ok(response)
}

/// Extracts the single JSON-RPC call object carried by a POST body.
async fn read_call(request: Request<Body>) -> Result<Value, (StatusCode, String)> {
    if request.method() != Method::POST {
        return Err((
            StatusCode::METHOD_NOT_ALLOWED,
            "only POST is supported".to_string(),
        ));
    }

    let bytes = body::to_bytes(request.into_body())
        .await
        .map_err(|err| (StatusCode::BAD_REQUEST, format!("unreadable body: {err}")))?;

    serde_json::from_slice(&bytes)
        .map_err(|err| (StatusCode::BAD_REQUEST, format!("body is not JSON: {err}")))
}

fn dispatch(node: &MockNode, call: &Value) -> Value {
    let id = call.get("id").cloned().unwrap_or(Value::Null);
    let method = call.get("method").and_then(Value::as_str).unwrap_or_default();
    let params = call
        .get("params")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let outcome = match method {
        "getblockcount" => Ok(json!(node.tip())),
        "getblockhash" => params
            .first()
            .and_then(Value::as_u64)
            .and_then(|height| node.hash_for_height(height))
            .map(Value::String)
            .ok_or((-8, "Block height out of range".to_string())),
        "getblockheader" => {
            let verbose = params.get(1).and_then(Value::as_bool).unwrap_or(true);
            match params
                .first()
                .and_then(Value::as_str)
                .and_then(|hash| node.header_for_hash(hash))
            {
                Some(data) if verbose => Ok(json!({
                    "hash": data.hash,
                    "height": data.height,
                    "confirmations": node.tip().saturating_sub(data.height) + 1,
                })),
                Some(data) => Ok(Value::String(data.raw_hex)),
                None => Err((-5, "Block not found".to_string())),
            }
        }
        other => Err((-32601, format!("unknown method {other}"))),
    };

    match outcome {
        Ok(result) => json!({
            "jsonrpc": "2.0",
            "result": result,
            "id": id,
        }),
        Err((code, message)) => json!({
            "jsonrpc": "2.0",
            "error": {
                "code": code,
                "message": message,
            },
            "id": id,
        }),
    }
}
