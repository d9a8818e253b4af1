//! Remote control commands read from the control table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Action requested by a remote command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandAction {
    Start,
    Stop,
    Restart,
    UpdateSymbols,
    Status,
    #[serde(untagged)]
    Unknown(String),
}

impl CommandAction {
    /// Parse the stored action string. Unrecognized actions are kept verbatim.
    pub fn parse(action: &str) -> Self {
        match action.trim().to_uppercase().as_str() {
            "START" => CommandAction::Start,
            "STOP" => CommandAction::Stop,
            "RESTART" => CommandAction::Restart,
            "UPDATE_SYMBOLS" => CommandAction::UpdateSymbols,
            "STATUS" => CommandAction::Status,
            _ => CommandAction::Unknown(action.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            CommandAction::Start => "START",
            CommandAction::Stop => "STOP",
            CommandAction::Restart => "RESTART",
            CommandAction::UpdateSymbols => "UPDATE_SYMBOLS",
            CommandAction::Status => "STATUS",
            CommandAction::Unknown(s) => s,
        }
    }
}

impl fmt::Display for CommandAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An instruction from the control channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCommand {
    pub id: i64,
    pub action: CommandAction,
    pub payload: Option<serde_json::Value>,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

impl RemoteCommand {
    /// Symbols carried by an UPDATE_SYMBOLS payload.
    ///
    /// Accepts either `{"symbols": [...]}` or a bare array.
    pub fn symbols(&self) -> Option<Vec<String>> {
        let payload = self.payload.as_ref()?;
        let list = payload.get("symbols").unwrap_or(payload).as_array()?;
        Some(
            list.iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect(),
        )
    }
}
