use serde_json::Value;

use super::error::{ResolverError, ResolverResult};

/// Broadcast status as reported by the platform. Decides the capture
/// strategy downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    NotStarted,
    Running,
    Ended,
    TimedOut,
    Unknown,
}

impl LifecycleState {
    pub fn from_api(value: &str) -> Self {
        match value {
            "NotStarted" => LifecycleState::NotStarted,
            "Running" => LifecycleState::Running,
            "Ended" => LifecycleState::Ended,
            "TimedOut" => LifecycleState::TimedOut,
            _ => LifecycleState::Unknown,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, LifecycleState::Running)
    }
}

/// Immutable snapshot of one broadcast, fetched once per run. Only the
/// media key is mandatory; display fields degrade to empty values.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastMetadata {
    pub id: String,
    pub media_key: String,
    pub state: LifecycleState,
    pub title: String,
    pub creator_name: String,
    pub creator_screen_name: String,
    pub started_at_ms: Option<i64>,
    /// Full upstream response, retained for the metadata artifact.
    pub raw: Value,
}

impl BroadcastMetadata {
    pub fn from_response(space_id: &str, response: Value) -> ResolverResult<Self> {
        let root = &response["data"]["audioSpace"]["metadata"];
        let media_key = match root["media_key"].as_str() {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => {
                return Err(ResolverError::MissingMediaKey {
                    space_id: space_id.to_string(),
                    response: response.to_string(),
                })
            }
        };
        let legacy = &root["creator_results"]["result"]["legacy"];
        Ok(Self {
            id: str_field(root, "rest_id"),
            media_key,
            state: LifecycleState::from_api(root["state"].as_str().unwrap_or_default()),
            title: str_field(root, "title"),
            creator_name: str_field(legacy, "name"),
            creator_screen_name: str_field(legacy, "screen_name"),
            started_at_ms: epoch_millis(&root["started_at"]),
            raw: response,
        })
    }

    /// Snapshot for master-URL-only runs where no space id is known.
    /// Routes capture down the deterministic single-source branch.
    pub fn placeholder() -> Self {
        Self {
            id: "no_id".to_string(),
            media_key: String::new(),
            state: LifecycleState::Unknown,
            title: String::new(),
            creator_name: String::new(),
            creator_screen_name: String::new(),
            started_at_ms: None,
            raw: Value::Null,
        }
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value[key].as_str().unwrap_or_default().to_string()
}

// started_at arrives as a number or a numeric string depending on the
// API revision.
fn epoch_millis(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}
