//! Wire messages. Every line is a JSON object with a `type` field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::farm::{LandPlot, PublicFarmView, WisdomTree};

/// Messages the server sends.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionStatus {
        status: String,
    },
    Ping {
        timestamp: DateTime<Utc>,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request: Option<String>,
    },
    TextResponse {
        content: String,
    },
    LoginResponse {
        success: bool,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        player: Option<PublicFarmView>,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_new_player: Option<bool>,
    },
    LogoutResponse {
        success: bool,
        message: String,
    },
    VisitPlayerResponse {
        success: bool,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        target: Option<PublicFarmView>,
    },
    ReturnMyFarmResponse {
        success: bool,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        player: Option<PublicFarmView>,
    },
    ActionResponse {
        action: String,
        success: bool,
        message: String,
        lot_index: usize,
    },
    WisdomTreeOperationResponse {
        operation_type: String,
        success: bool,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        wisdom_tree: Option<WisdomTree>,
    },
    CropUpdate {
        farm_lots: Vec<LandPlot>,
        timestamp: DateTime<Utc>,
        is_visiting: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        visited_player: Option<String>,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            request: None,
        }
    }

    pub fn error_for(request: &str, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            request: Some(request.to_string()),
        }
    }

    pub fn connected() -> Self {
        ServerMessage::ConnectionStatus {
            status: "connected".to_string(),
        }
    }

    /// Encode as a single line without the trailing newline.
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                "{{\"type\":\"error\",\"message\":{}}}",
                Value::String(format!("encode failed: {}", e))
            )
        })
    }
}

/// A request after the `type` field has been pulled out.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub kind: String,
    pub body: Value,
}

impl Request {
    /// Split a decoded JSON frame into type and body.
    pub fn from_value(value: Value) -> Result<Self, &'static str> {
        let Value::Object(map) = &value else {
            return Err("message must be a JSON object");
        };
        let Some(kind) = map.get("type").and_then(Value::as_str) else {
            return Err("message is missing a string 'type' field");
        };
        Ok(Self {
            kind: kind.to_string(),
            body: value.clone(),
        })
    }

    pub fn parse<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.body.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    #[serde(alias = "username")]
    pub account_id: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VisitRequest {
    #[serde(alias = "target")]
    pub target_username: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LotRequest {
    pub lot_index: usize,
    #[serde(default)]
    pub crop_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WisdomTreeRequest {
    pub operation_type: String,
}
