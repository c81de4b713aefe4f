use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{anyhow, bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::metadata::PluginMetadata;

pub const RPC_FRAME_SCHEMA_VERSION: u32 = 1;
/// First argument the host passes when it launches a plugin executable.
pub const PLUGIN_BOOTSTRAP_ARG: &str = "TETHER-PLUGIN-BOOTSTRAP";
/// Command name sent to a plugin right before it is uninstalled.
pub const PLUGIN_UNINSTALL_COMMAND: &str = "TETHER-PLUGIN-UNINSTALL";

pub const RPC_ERROR_CODE_INVALID_PAYLOAD: &str = "invalid_payload";
pub const RPC_ERROR_CODE_UNSUPPORTED_KIND: &str = "unsupported_kind";
pub const RPC_ERROR_CODE_UNKNOWN_CALLBACK: &str = "unknown_callback";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcFrameKind {
    MetadataRequest,
    MetadataResponse,
    RunRequest,
    RunResponse,
    CallbackRequest,
    CallbackResponse,
    Output,
    ShutdownRequest,
    Error,
}

impl RpcFrameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MetadataRequest => "metadata.request",
            Self::MetadataResponse => "metadata.response",
            Self::RunRequest => "run.request",
            Self::RunResponse => "run.response",
            Self::CallbackRequest => "callback.request",
            Self::CallbackResponse => "callback.response",
            Self::Output => "output",
            Self::ShutdownRequest => "shutdown.request",
            Self::Error => "error",
        }
    }
}

impl FromStr for RpcFrameKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "metadata.request" => Ok(Self::MetadataRequest),
            "metadata.response" => Ok(Self::MetadataResponse),
            "run.request" => Ok(Self::RunRequest),
            "run.response" => Ok(Self::RunResponse),
            "callback.request" => Ok(Self::CallbackRequest),
            "callback.response" => Ok(Self::CallbackResponse),
            "output" => Ok(Self::Output),
            "shutdown.request" => Ok(Self::ShutdownRequest),
            "error" => Ok(Self::Error),
            other => bail!("unsupported rpc frame kind '{}'", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RpcFrame {
    pub request_id: String,
    pub kind: RpcFrameKind,
    pub payload: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawRpcFrame {
    schema_version: u32,
    request_id: String,
    kind: String,
    payload: Value,
}

impl RpcFrame {
    pub fn new(request_id: impl Into<String>, kind: RpcFrameKind) -> Self {
        Self {
            request_id: request_id.into(),
            kind,
            payload: Map::new(),
        }
    }

    /// Builds a frame whose payload is `payload` serialized as a JSON object.
    pub fn with_payload<T: Serialize>(
        request_id: impl Into<String>,
        kind: RpcFrameKind,
        payload: &T,
    ) -> Result<Self> {
        let value = serde_json::to_value(payload).context("failed to encode rpc payload")?;
        let Value::Object(payload) = value else {
            bail!("rpc payload for {} must encode as a JSON object", kind.as_str());
        };
        Ok(Self {
            request_id: request_id.into(),
            kind,
            payload,
        })
    }

    pub fn error(request_id: impl Into<String>, code: &str, message: impl Into<String>) -> Self {
        let mut payload = Map::new();
        payload.insert("code".to_string(), Value::String(code.to_string()));
        payload.insert("message".to_string(), Value::String(message.into()));
        Self {
            request_id: request_id.into(),
            kind: RpcFrameKind::Error,
            payload,
        }
    }

    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.payload.clone())).with_context(|| {
            format!("invalid payload for rpc frame kind '{}'", self.kind.as_str())
        })
    }

    /// Serializes the frame as one NDJSON line without the trailing newline.
    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(&RawRpcFrame {
            schema_version: RPC_FRAME_SCHEMA_VERSION,
            request_id: self.request_id.clone(),
            kind: self.kind.as_str().to_string(),
            payload: Value::Object(self.payload.clone()),
        })
        .context("failed to encode rpc frame")
    }
}

pub fn parse_rpc_frame(raw: &str) -> Result<RpcFrame> {
    let frame =
        serde_json::from_str::<RawRpcFrame>(raw).context("failed to parse rpc frame JSON")?;
    if frame.schema_version != RPC_FRAME_SCHEMA_VERSION {
        bail!(
            "unsupported rpc frame schema: expected {}, found {}",
            RPC_FRAME_SCHEMA_VERSION,
            frame.schema_version
        );
    }
    let request_id = frame.request_id.trim();
    if request_id.is_empty() {
        bail!("rpc frame request_id must be non-empty");
    }
    let kind = RpcFrameKind::from_str(frame.kind.trim())?;
    let payload = frame
        .payload
        .as_object()
        .ok_or_else(|| anyhow!("rpc frame payload must be a JSON object"))?
        .clone();
    Ok(RpcFrame {
        request_id: request_id.to_string(),
        kind,
        payload,
    })
}

/// Monotonic request ids, unique per generator.
#[derive(Debug)]
pub struct RequestIdGenerator {
    prefix: &'static str,
    next: AtomicU64,
}

impl RequestIdGenerator {
    pub const fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> String {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.prefix, id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetadataResponsePayload {
    pub metadata: PluginMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunRequestPayload {
    /// Command name first, then its arguments.
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunResponsePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallbackRequestPayload {
    pub method: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CallbackResponsePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputPayload {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpcErrorPayload {
    pub code: String,
    pub message: String,
}
