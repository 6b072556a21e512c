//! aria2 JSON-RPC client
//!
//! Speaks the aria2 XML-RPC-over-JSON protocol: `aria2.addUri`,
//! `aria2.tellActive` / `tellWaiting` / `tellStopped` for listing, and
//! `aria2.pause` / `unpause` / `remove` for control. aria2 encodes all
//! numeric fields as decimal strings; conversion happens here so the rest of
//! the system only sees normalized [`EngineJobSnapshot`] values.

use super::{EngineClient, EngineError, EngineJobSnapshot};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const RPC_ID: &str = "downlink";
/// Page size for tellWaiting/tellStopped; aria2 requires explicit windows.
const LIST_WINDOW: u64 = 1_000;

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: &'static str,
    method: &'a str,
    params: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Raw aria2 download status entry (numeric fields are decimal strings).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Aria2Status {
    gid: String,
    status: String,
    #[serde(default)]
    total_length: String,
    #[serde(default)]
    completed_length: String,
    #[serde(default)]
    download_speed: String,
    #[serde(default)]
    files: Vec<Aria2File>,
}

#[derive(Debug, Deserialize)]
struct Aria2File {
    #[serde(default)]
    path: String,
}

pub struct Aria2Client {
    http: reqwest::Client,
    rpc_url: String,
    secret: Option<String>,
}

impl Aria2Client {
    pub fn new(rpc_url: String, secret: Option<String>, timeout: Duration) -> Result<Self, EngineError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Rpc(e.to_string()))?;

        Ok(Self {
            http,
            rpc_url,
            secret,
        })
    }

    /// Token parameter aria2 expects as the first positional param.
    fn token_params(&self) -> Vec<Value> {
        match &self.secret {
            Some(secret) => vec![json!(format!("token:{}", secret))],
            None => Vec::new(),
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        extra_params: Vec<Value>,
    ) -> Result<T, EngineError> {
        let mut params = self.token_params();
        params.extend(extra_params);

        let request = RpcRequest {
            jsonrpc: "2.0",
            id: RPC_ID,
            method,
            params,
        };

        let response = self
            .http
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EngineError::Timeout
                } else {
                    EngineError::Rpc(e.to_string())
                }
            })?;

        let body: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| EngineError::Protocol(e.to_string()))?;

        if let Some(err) = body.error {
            return Err(EngineError::Rpc(format!("{} (code {})", err.message, err.code)));
        }

        body.result
            .ok_or_else(|| EngineError::Protocol("missing result field".to_string()))
    }
}

#[async_trait]
impl EngineClient for Aria2Client {
    async fn list_all(&self) -> Result<Vec<EngineJobSnapshot>, EngineError> {
        let active: Vec<Aria2Status> = self.call("aria2.tellActive", vec![]).await?;
        let waiting: Vec<Aria2Status> = self
            .call("aria2.tellWaiting", vec![json!(0), json!(LIST_WINDOW)])
            .await?;
        let stopped: Vec<Aria2Status> = self
            .call("aria2.tellStopped", vec![json!(0), json!(LIST_WINDOW)])
            .await?;

        let snapshots = active
            .into_iter()
            .chain(waiting)
            .chain(stopped)
            .map(snapshot_from_status)
            .collect();

        Ok(snapshots)
    }

    async fn submit(&self, url: &str, dest_dir: &str) -> Result<String, EngineError> {
        let gid: String = self
            .call(
                "aria2.addUri",
                vec![json!([url]), json!({ "dir": dest_dir })],
            )
            .await?;

        debug!(gid, url, "Submitted download to engine");
        Ok(gid)
    }

    async fn pause(&self, gid: &str) -> Result<(), EngineError> {
        let _: String = self.call("aria2.pause", vec![json!(gid)]).await?;
        Ok(())
    }

    async fn resume(&self, gid: &str) -> Result<(), EngineError> {
        let _: String = self.call("aria2.unpause", vec![json!(gid)]).await?;
        Ok(())
    }

    async fn remove(&self, gid: &str) -> Result<(), EngineError> {
        let _: String = self.call("aria2.remove", vec![json!(gid)]).await?;
        Ok(())
    }
}

fn parse_u64(raw: &str) -> u64 {
    raw.parse().unwrap_or(0)
}

fn snapshot_from_status(status: Aria2Status) -> EngineJobSnapshot {
    let total_bytes = parse_u64(&status.total_length);
    let completed_bytes = parse_u64(&status.completed_length);
    let rate_bps = parse_u64(&status.download_speed);

    let file_path = status
        .files
        .first()
        .map(|f| f.path.clone())
        .unwrap_or_default();

    let name = Path::new(&file_path)
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_owned)
        .unwrap_or_else(|| "Unknown".to_string());

    // aria2 reports no ETA directly; derive it from rate and remaining bytes.
    let eta_seconds = if rate_bps > 0 && total_bytes > completed_bytes {
        Some((total_bytes - completed_bytes) / rate_bps)
    } else {
        None
    };

    EngineJobSnapshot {
        gid: status.gid,
        name,
        status: status.status,
        completed_bytes,
        total_bytes,
        rate_bps,
        eta_seconds,
        file_path,
    }
}
