//! Conversions between domain values and wire shapes.

use termhub_protocol as proto;

use crate::debounce::ResizeReason;
use crate::domain::Orientation;
use crate::domain::RequestId;
use crate::domain::SessionInfo;
use crate::domain::SessionStatus;
use crate::domain::TerminalSize;
use crate::split::SplitDirection;
use crate::split::SplitGroup;

pub fn size_dto(size: TerminalSize) -> proto::Size {
    proto::Size::new(size.cols(), size.rows())
}

pub fn status_dto(status: SessionStatus) -> proto::SessionStatus {
    match status {
        SessionStatus::Spawning => proto::SessionStatus::Spawning,
        SessionStatus::Active => proto::SessionStatus::Active,
        SessionStatus::Detached => proto::SessionStatus::Detached,
        SessionStatus::Closed => proto::SessionStatus::Closed,
    }
}

pub fn orientation_dto(orientation: Orientation) -> proto::Orientation {
    match orientation {
        Orientation::Horizontal => proto::Orientation::Horizontal,
        Orientation::Vertical => proto::Orientation::Vertical,
    }
}

pub fn split_direction(direction: proto::SplitDirection) -> SplitDirection {
    match direction {
        proto::SplitDirection::Left => SplitDirection::Left,
        proto::SplitDirection::Right => SplitDirection::Right,
        proto::SplitDirection::Up => SplitDirection::Up,
        proto::SplitDirection::Down => SplitDirection::Down,
    }
}

pub fn resize_reason(reason: proto::ResizeReason) -> ResizeReason {
    match reason {
        proto::ResizeReason::Container => ResizeReason::Container,
        proto::ResizeReason::Focus => ResizeReason::Focus,
        proto::ResizeReason::Layout => ResizeReason::Layout,
        proto::ResizeReason::Window => ResizeReason::Window,
    }
}

pub fn group_dto(group: &SplitGroup) -> proto::SplitGroupDto {
    proto::SplitGroupDto {
        group_id: group.id.to_string(),
        orientation: orientation_dto(group.orientation),
        panes: group.panes.iter().map(ToString::to_string).collect(),
        backing_session: group.backing_session.as_ref().map(ToString::to_string),
    }
}

pub fn summary_dto(
    info: &SessionInfo,
    owners: usize,
    group: Option<&SplitGroup>,
) -> proto::SessionSummary {
    proto::SessionSummary {
        session_id: info.id.to_string(),
        kind: info.kind.to_string(),
        status: status_dto(info.status),
        size: size_dto(info.size),
        created_at: info.created_at.to_rfc3339(),
        multiplexer_name: info.multiplexer_name.clone(),
        window_id: info.window.as_ref().map(ToString::to_string),
        owners,
        pid: info.pid,
        group_id: group.map(|g| g.id.to_string()),
    }
}

pub fn spawned_message(
    info: &SessionInfo,
    request_id: Option<&RequestId>,
    attached: bool,
) -> proto::ServerMessage {
    proto::ServerMessage::Spawned {
        request_id: request_id.map(ToString::to_string),
        session_id: info.id.to_string(),
        kind: info.kind.to_string(),
        size: size_dto(info.size),
        attached,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::GroupId;
    use crate::domain::SessionId;
    use crate::domain::SessionKind;
    use chrono::Utc;

    #[test]
    fn test_summary_carries_group_and_window() {
        let info = SessionInfo {
            id: SessionId::new("s1"),
            kind: SessionKind::new("shell"),
            status: SessionStatus::Detached,
            size: TerminalSize::default(),
            created_at: Utc::now(),
            seq: 1,
            window: Some(crate::domain::WindowId::new("w1")),
            multiplexer_name: Some("termhub-s1".into()),
            pid: None,
        };
        let group = SplitGroup {
            id: GroupId::new("grp-1"),
            orientation: Orientation::Vertical,
            panes: vec![SessionId::new("s1"), SessionId::new("s2")],
            backing_session: None,
        };

        let summary = summary_dto(&info, 2, Some(&group));
        assert_eq!(summary.status, proto::SessionStatus::Detached);
        assert_eq!(summary.window_id.as_deref(), Some("w1"));
        assert_eq!(summary.group_id.as_deref(), Some("grp-1"));
        assert_eq!(summary.owners, 2);

        let dto = group_dto(&group);
        assert_eq!(dto.orientation, proto::Orientation::Vertical);
        assert_eq!(dto.panes, vec!["s1", "s2"]);
    }
}
