//! Controller status envelope
//!
//! Wire types for `GET /api/endpoints/<id>/status`. Field names follow the
//! controller's JSON exactly; schedule payloads are kept opaque for the
//! scheduler.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Header carrying the edge identifier
pub const EDGE_ID_HEADER: &str = "X-PortainerAgent-EdgeID";

/// Header carrying the agent platform as an integer
pub const AGENT_PLATFORM_HEADER: &str = "Portainer-Agent-Platform";

/// Tunnel status requested by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    /// No tunnel is wanted
    Idle,
    /// A tunnel must be established
    Required,
    /// Any other value; no tunnel action is taken
    Other(String),
}

impl From<String> for PollStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "IDLE" => PollStatus::Idle,
            "REQUIRED" => PollStatus::Required,
            _ => PollStatus::Other(s),
        }
    }
}

impl Default for PollStatus {
    fn default() -> Self {
        PollStatus::Other(String::new())
    }
}

impl<'de> Deserialize<'de> for PollStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.map(PollStatus::from).unwrap_or_default())
    }
}

impl fmt::Display for PollStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollStatus::Idle => write!(f, "IDLE"),
            PollStatus::Required => write!(f, "REQUIRED"),
            PollStatus::Other(s) => write!(f, "{}", s),
        }
    }
}

/// A server-issued job definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    /// Job identifier
    #[serde(rename = "Id")]
    pub id: i64,

    /// Whether the controller wants the job's logs
    #[serde(rename = "CollectLogs", default)]
    pub collect_logs: bool,

    /// Remaining job definition, consumed by the scheduler
    #[serde(flatten)]
    pub definition: serde_json::Map<String, serde_json::Value>,
}

/// Target version for one stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackStatus {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "Version")]
    pub version: i64,
}

/// Decoded body of a status poll
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PollResponse {
    /// Tunnel status
    #[serde(default)]
    pub status: PollStatus,

    /// Remote port for the reverse tunnel, range-checked only when opening
    #[serde(default)]
    pub port: i64,

    /// Ordered schedule list
    #[serde(default, deserialize_with = "null_as_default")]
    pub schedules: Vec<Schedule>,

    /// Check-in interval in seconds
    #[serde(rename = "checkin", default)]
    pub checkin_interval: f64,

    /// Encrypted tunnel credentials, unpadded base64
    #[serde(default)]
    pub credentials: String,

    /// Stack target versions. `None` when the field is absent or null,
    /// which is different from an empty list.
    #[serde(default)]
    pub stacks: Option<Vec<StackStatus>>,
}

impl PollResponse {
    /// Identifiers of schedules that request log collection, in order
    pub fn log_requests(&self) -> Vec<i64> {
        self.schedules
            .iter()
            .filter(|schedule| schedule.collect_logs)
            .map(|schedule| schedule.id)
            .collect()
    }

    /// Fold the stack list into `{stack id -> version}`, if present
    pub fn stack_versions(&self) -> Option<HashMap<i64, i64>> {
        self.stacks.as_ref().map(|stacks| {
            stacks
                .iter()
                .map(|stack| (stack.id, stack.version))
                .collect()
        })
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_full_envelope() {
        let json = r#"{
            "status": "REQUIRED",
            "port": 50000,
            "schedules": [
                {"Id": 1, "CollectLogs": true, "CronExpression": "* * * * *", "Script": "ZWNobw=="},
                {"Id": 2, "CollectLogs": false}
            ],
            "checkin": 7.5,
            "credentials": "c2VjcmV0",
            "stacks": [{"ID": 3, "Version": 4}]
        }"#;

        let response: PollResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.status, PollStatus::Required);
        assert_eq!(response.port, 50000);
        assert_eq!(response.checkin_interval, 7.5);
        assert_eq!(response.credentials, "c2VjcmV0");
        assert_eq!(response.schedules.len(), 2);
        assert_eq!(
            response.schedules[0].definition.get("CronExpression"),
            Some(&serde_json::Value::from("* * * * *"))
        );
        assert_eq!(response.stacks, Some(vec![StackStatus { id: 3, version: 4 }]));
    }

    #[test]
    fn test_status_values() {
        assert_eq!(PollStatus::from("IDLE".to_string()), PollStatus::Idle);
        assert_eq!(PollStatus::from("REQUIRED".to_string()), PollStatus::Required);
        assert_eq!(
            PollStatus::from("ACTIVE".to_string()),
            PollStatus::Other("ACTIVE".to_string())
        );
    }

    #[test]
    fn test_log_requests_only_flagged_schedules() {
        let json = r#"{"schedules": [{"Id": 1, "CollectLogs": true}, {"Id": 2, "CollectLogs": false}]}"#;
        let response: PollResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.log_requests(), vec![1]);
    }

    #[test]
    fn test_absent_stacks_differ_from_empty() {
        let absent: PollResponse = serde_json::from_str(r#"{"status": "IDLE"}"#).unwrap();
        assert_eq!(absent.stack_versions(), None);

        let null: PollResponse = serde_json::from_str(r#"{"stacks": null}"#).unwrap();
        assert_eq!(null.stack_versions(), None);

        let empty: PollResponse = serde_json::from_str(r#"{"stacks": []}"#).unwrap();
        assert_eq!(empty.stack_versions(), Some(HashMap::new()));
    }

    #[test]
    fn test_stack_versions_fold() {
        let json = r#"{"stacks": [{"ID": 1, "Version": 2}, {"ID": 5, "Version": 9}]}"#;
        let response: PollResponse = serde_json::from_str(json).unwrap();
        let versions = response.stack_versions().unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[&1], 2);
        assert_eq!(versions[&5], 9);
    }

    #[test]
    fn test_out_of_range_port_keeps_envelope() {
        let json = r#"{
            "status": "IDLE",
            "port": 70000,
            "schedules": [{"Id": 4, "CollectLogs": true}],
            "stacks": [{"ID": 1, "Version": 2}]
        }"#;
        let response: PollResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.port, 70000);
        assert_eq!(response.log_requests(), vec![4]);
        assert_eq!(response.stack_versions(), Some(HashMap::from([(1, 2)])));
    }

    #[test]
    fn test_null_schedules_decode_as_empty() {
        let response: PollResponse =
            serde_json::from_str(r#"{"status": null, "schedules": null}"#).unwrap();
        assert!(response.schedules.is_empty());
        assert_eq!(response.status, PollStatus::default());
    }
}
