//! JSON messages exchanged with scanning devices, tagged by `"type"`.

use crate::errors::{AppError, ErrorKind};
use crate::models::division::DivisionId;
use crate::models::guest_status::{GuestStatus, ScanDirection};
use serde::{Deserialize, Serialize};

/// Device → server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// `guid` is either a raw guest identifier or an issued token.
    Scan { guid: String },
    Status { guid: String },
    Ping,
}

/// Result status of a scan as seen by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    CheckedIn,
    CheckedOut,
    Error,
}

impl From<ScanDirection> for ScanStatus {
    fn from(dir: ScanDirection) -> Self {
        match dir {
            ScanDirection::CheckedIn => ScanStatus::CheckedIn,
            ScanDirection::CheckedOut => ScanStatus::CheckedOut,
        }
    }
}

/// Server → device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ScanResult {
        guid: String,
        status: ScanStatus,
        count: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorKind>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    CountUpdate {
        division: DivisionId,
        name: String,
        count: usize,
    },
    GuestStatus {
        guid: String,
        status: GuestStatus,
    },
    Pong,
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl ServerMessage {
    pub fn scan_failed(guid: String, count: usize, err: &AppError) -> Self {
        ServerMessage::ScanResult {
            guid,
            status: ScanStatus::Error,
            count,
            error: Some(err.kind()),
            message: Some(err.to_string()),
        }
    }

    pub fn error(err: &AppError) -> Self {
        ServerMessage::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_are_tagged_by_type() {
        let scan: ClientMessage = serde_json::from_str(r#"{"type":"scan","guid":"abc"}"#).unwrap();
        assert_eq!(scan, ClientMessage::Scan { guid: "abc".into() });

        let ping: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(ping, ClientMessage::Ping);

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"dance"}"#).is_err());
    }

    #[test]
    fn scan_result_omits_empty_error_fields() {
        let ok = ServerMessage::ScanResult {
            guid: "g".into(),
            status: ScanStatus::CheckedIn,
            count: 3,
            error: None,
            message: None,
        };
        let json: serde_json::Value = serde_json::from_str(&ok.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "scan_result");
        assert_eq!(json["status"], "checked_in");
        assert_eq!(json["count"], 3);
        assert!(json.get("error").is_none());

        let failed = ServerMessage::scan_failed("g".into(), 0, &AppError::InvalidToken);
        let json: serde_json::Value = serde_json::from_str(&failed.to_json().unwrap()).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"], "invalid_token");
    }
}
