use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Result};
use serde_json::Value;
use tether_config::ConfigRepository;
use thiserror::Error;
use tracing::debug;

use crate::protocol::{
    CallbackRequestPayload, CallbackResponsePayload, RpcErrorPayload, RpcFrame, RpcFrameKind,
    RPC_ERROR_CODE_INVALID_PAYLOAD, RPC_ERROR_CODE_UNKNOWN_CALLBACK,
};

const CALLBACK_ERROR_CODE_NOT_TARGETED: &str = "not_targeted";
const CALLBACK_ERROR_CODE_NOT_LOGGED_IN: &str = "not_logged_in";

/// Host state a running plugin may query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackMethod {
    CurrentOrg,
    CurrentSpace,
    Username,
    IsLoggedIn,
}

impl CallbackMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CurrentOrg => "cli.current_org",
            Self::CurrentSpace => "cli.current_space",
            Self::Username => "cli.username",
            Self::IsLoggedIn => "cli.is_logged_in",
        }
    }
}

impl FromStr for CallbackMethod {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "cli.current_org" => Ok(Self::CurrentOrg),
            "cli.current_space" => Ok(Self::CurrentSpace),
            "cli.username" => Ok(Self::Username),
            "cli.is_logged_in" => Ok(Self::IsLoggedIn),
            other => bail!(
                "unknown callback method '{}'; supported methods are cli.current_org, cli.current_space, cli.username, cli.is_logged_in",
                other
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum CallbackError {
    #[error("no org or space targeted")]
    NotTargeted,
    #[error("not logged in")]
    NotLoggedIn,
}

impl CallbackError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotTargeted => CALLBACK_ERROR_CODE_NOT_TARGETED,
            Self::NotLoggedIn => CALLBACK_ERROR_CODE_NOT_LOGGED_IN,
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            CALLBACK_ERROR_CODE_NOT_TARGETED => Some(Self::NotTargeted),
            CALLBACK_ERROR_CODE_NOT_LOGGED_IN => Some(Self::NotLoggedIn),
            _ => None,
        }
    }
}

/// Read-only view of session state served to plugins during a run.
#[derive(Clone)]
pub struct CallbackService {
    config: Arc<dyn ConfigRepository>,
}

impl CallbackService {
    pub fn new(config: Arc<dyn ConfigRepository>) -> Self {
        Self { config }
    }

    pub fn current_org(&self) -> Result<String, CallbackError> {
        self.config.target().org.ok_or(CallbackError::NotTargeted)
    }

    pub fn current_space(&self) -> Result<String, CallbackError> {
        let target = self.config.target();
        match (target.org, target.space) {
            (Some(_), Some(space)) => Ok(space),
            _ => Err(CallbackError::NotTargeted),
        }
    }

    pub fn username(&self) -> Result<String, CallbackError> {
        let target = self.config.target();
        if !target.is_logged_in() {
            return Err(CallbackError::NotLoggedIn);
        }
        target.username.ok_or(CallbackError::NotLoggedIn)
    }

    pub fn is_logged_in(&self) -> bool {
        self.config.target().is_logged_in()
    }

    pub fn call(&self, method: CallbackMethod) -> Result<Value, CallbackError> {
        match method {
            CallbackMethod::CurrentOrg => self.current_org().map(Value::String),
            CallbackMethod::CurrentSpace => self.current_space().map(Value::String),
            CallbackMethod::Username => self.username().map(Value::String),
            CallbackMethod::IsLoggedIn => Ok(Value::Bool(self.is_logged_in())),
        }
    }

    /// Answers one `callback.request` frame with a response or error frame.
    pub fn respond(&self, request: &RpcFrame) -> RpcFrame {
        let payload = match request.payload_as::<CallbackRequestPayload>() {
            Ok(payload) => payload,
            Err(error) => {
                return RpcFrame::error(
                    request.request_id.clone(),
                    RPC_ERROR_CODE_INVALID_PAYLOAD,
                    format!("{error:#}"),
                )
            }
        };
        let method = match CallbackMethod::from_str(payload.method.trim()) {
            Ok(method) => method,
            Err(error) => {
                return RpcFrame::error(
                    request.request_id.clone(),
                    RPC_ERROR_CODE_UNKNOWN_CALLBACK,
                    error.to_string(),
                )
            }
        };
        debug!(method = method.as_str(), "serving plugin callback");
        let response = match self.call(method) {
            Ok(result) => CallbackResponsePayload {
                result: Some(result),
                error: None,
            },
            Err(error) => CallbackResponsePayload {
                result: None,
                error: Some(RpcErrorPayload {
                    code: error.code().to_string(),
                    message: error.to_string(),
                }),
            },
        };
        RpcFrame::with_payload(
            request.request_id.clone(),
            RpcFrameKind::CallbackResponse,
            &response,
        )
        .unwrap_or_else(|error| {
            RpcFrame::error(
                request.request_id.clone(),
                RPC_ERROR_CODE_INVALID_PAYLOAD,
                format!("{error:#}"),
            )
        })
    }
}
