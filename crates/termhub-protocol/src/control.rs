//! Request/response shapes for the HTTP control plane.

use serde::Deserialize;
use serde::Serialize;

use crate::Orientation;
use crate::SessionStatus;
use crate::Size;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub kind: String,
    pub status: SessionStatus,
    pub size: Size,
    /// RFC 3339 creation time.
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiplexer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_id: Option<String>,
    #[serde(default)]
    pub owners: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitGroupDto {
    pub group_id: String,
    pub orientation: Orientation,
    /// Visual order, left-to-right or top-to-bottom.
    pub panes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backing_session: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameRequest {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsDto {
    pub resize_applied: u64,
    pub resize_superseded: u64,
    pub resize_unchanged: u64,
    pub resize_suppressed: u64,
    pub not_owner_rejections: u64,
    pub duplicate_spawns_suppressed: u64,
    pub spawn_timeouts: u64,
    pub poison_recoveries: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthDto {
    pub status: String,
    pub version: String,
    pub uptime_ms: u64,
    pub sessions: usize,
    pub connections: usize,
    pub multiplexer: bool,
    pub diagnostics: DiagnosticsDto,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_omits_absent_fields() {
        let summary = SessionSummary {
            session_id: "a1b2c3d4".into(),
            kind: "shell".into(),
            status: SessionStatus::Detached,
            size: Size::new(80, 24),
            created_at: "2024-01-01T00:00:00Z".into(),
            multiplexer_name: None,
            window_id: Some("w1".into()),
            owners: 0,
            pid: None,
            group_id: None,
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["status"], "detached");
        assert_eq!(json["windowId"], "w1");
        assert!(json.get("multiplexerName").is_none());
        assert!(json.get("pid").is_none());
    }

    #[test]
    fn test_group_dto_shape() {
        let group = SplitGroupDto {
            group_id: "grp-1".into(),
            orientation: Orientation::Horizontal,
            panes: vec!["s1".into(), "s2".into()],
            backing_session: None,
        };
        let json = serde_json::to_string(&group).unwrap();
        assert_eq!(
            json,
            r#"{"groupId":"grp-1","orientation":"horizontal","panes":["s1","s2"]}"#
        );
    }
}
