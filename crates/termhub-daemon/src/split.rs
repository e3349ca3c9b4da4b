//! Split-pane containment.
//!
//! Groups are one level deep: a session already in a group can be neither
//! the target nor the source of another split. A group never holds fewer
//! than two panes; removing the second-to-last pane dissolves it.

use std::collections::HashMap;
use std::collections::HashSet;

use tracing::debug;
use tracing::info;
use uuid::Uuid;

use crate::domain::GroupId;
use crate::domain::Orientation;
use crate::domain::SessionId;
use crate::error::SplitError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitDirection {
    Left,
    Right,
    Up,
    Down,
}

impl SplitDirection {
    pub fn orientation(&self) -> Orientation {
        match self {
            SplitDirection::Left | SplitDirection::Right => Orientation::Horizontal,
            SplitDirection::Up | SplitDirection::Down => Orientation::Vertical,
        }
    }

    /// Whether the new pane lands before the target in pane order.
    pub fn places_before(&self) -> bool {
        matches!(self, SplitDirection::Left | SplitDirection::Up)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitGroup {
    pub id: GroupId,
    pub orientation: Orientation,
    /// Left-to-right or top-to-bottom.
    pub panes: Vec<SessionId>,
    /// Session whose multiplexer session hosts the pane layout, if any.
    pub backing_session: Option<SessionId>,
}

impl SplitGroup {
    pub fn position_of(&self, id: &SessionId) -> Option<usize> {
        self.panes.iter().position(|pane| pane == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaneState {
    Ungrouped,
    Grouped { group: GroupId, position: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaneRemoval {
    NotGrouped,
    /// The group lives on with the remaining panes.
    Shrunk(SplitGroup),
    Dissolved {
        group: GroupId,
        survivor: Option<SessionId>,
    },
}

fn generate_group_id() -> GroupId {
    GroupId::new(format!("grp-{}", &Uuid::new_v4().simple().to_string()[..8]))
}

#[derive(Debug, Default)]
pub struct SplitPaneStateMachine {
    groups: HashMap<GroupId, SplitGroup>,
    membership: HashMap<SessionId, GroupId>,
}

impl SplitPaneStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_ungrouped(&self, id: &SessionId) -> Result<(), SplitError> {
        match self.membership.get(id) {
            Some(group) => Err(SplitError::AlreadyGrouped {
                session: id.clone(),
                group: group.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Checks that `target` can take a new pane before anything is spawned.
    pub fn check_split(&self, target: &SessionId) -> Result<(), SplitError> {
        self.ensure_ungrouped(target)
    }

    /// Groups `source` next to `target`.
    pub fn create_split(
        &mut self,
        target: &SessionId,
        source: &SessionId,
        direction: SplitDirection,
        multiplexer_layout: bool,
    ) -> Result<SplitGroup, SplitError> {
        if target == source {
            return Err(SplitError::SamePane(target.clone()));
        }
        self.ensure_ungrouped(target)?;
        self.ensure_ungrouped(source)?;

        let panes = if direction.places_before() {
            vec![source.clone(), target.clone()]
        } else {
            vec![target.clone(), source.clone()]
        };
        let group = SplitGroup {
            id: generate_group_id(),
            orientation: direction.orientation(),
            panes,
            backing_session: multiplexer_layout.then(|| target.clone()),
        };
        for pane in &group.panes {
            self.membership.insert(pane.clone(), group.id.clone());
        }
        self.groups.insert(group.id.clone(), group.clone());
        info!(group_id = %group.id, ?direction, panes = ?group.panes, "Split group created");
        Ok(group)
    }

    pub fn close_pane(&mut self, id: &SessionId) -> PaneRemoval {
        self.remove_pane(id)
    }

    /// The pane moves to another window; it leaves its group with no trace.
    pub fn detach_pane(&mut self, id: &SessionId) -> PaneRemoval {
        self.remove_pane(id)
    }

    pub fn process_exited(&mut self, id: &SessionId) -> PaneRemoval {
        self.remove_pane(id)
    }

    fn remove_pane(&mut self, id: &SessionId) -> PaneRemoval {
        let Some(group_id) = self.membership.remove(id) else {
            return PaneRemoval::NotGrouped;
        };
        let Some(group) = self.groups.get_mut(&group_id) else {
            return PaneRemoval::NotGrouped;
        };
        group.panes.retain(|pane| pane != id);
        if group.backing_session.as_ref() == Some(id) {
            group.backing_session = None;
        }
        if group.panes.len() >= 2 {
            debug!(group_id = %group_id, session_id = %id, "Pane removed from group");
            return PaneRemoval::Shrunk(group.clone());
        }

        let survivor = group.panes.first().cloned();
        self.groups.remove(&group_id);
        if let Some(survivor) = &survivor {
            self.membership.remove(survivor);
        }
        info!(group_id = %group_id, survivor = ?survivor, "Split group dissolved");
        PaneRemoval::Dissolved {
            group: group_id,
            survivor,
        }
    }

    pub fn state_of(&self, id: &SessionId) -> PaneState {
        self.group_of(id)
            .and_then(|group| {
                group.position_of(id).map(|position| PaneState::Grouped {
                    group: group.id.clone(),
                    position,
                })
            })
            .unwrap_or(PaneState::Ungrouped)
    }

    pub fn group_of(&self, id: &SessionId) -> Option<&SplitGroup> {
        self.membership
            .get(id)
            .and_then(|group| self.groups.get(group))
    }

    /// Panes whose layout the multiplexer owns ignore non-container resizes.
    pub fn is_layout_managed(&self, id: &SessionId) -> bool {
        self.group_of(id)
            .is_some_and(|group| group.backing_session.is_some())
    }

    pub fn groups(&self) -> Vec<SplitGroup> {
        let mut groups: Vec<SplitGroup> = self.groups.values().cloned().collect();
        groups.sort_by(|a, b| a.id.cmp(&b.id));
        groups
    }

    /// Describes every broken containment invariant. Empty when consistent.
    pub fn invariant_violations(&self) -> Vec<String> {
        let mut violations = Vec::new();
        for group in self.groups.values() {
            if group.panes.len() < 2 {
                violations.push(format!("{} has {} pane(s)", group.id, group.panes.len()));
            }
            let unique: HashSet<&SessionId> = group.panes.iter().collect();
            if unique.len() != group.panes.len() {
                violations.push(format!("{} lists a pane twice", group.id));
            }
            for pane in &group.panes {
                if self.membership.get(pane) != Some(&group.id) {
                    violations.push(format!("{pane} is in {} but not mapped to it", group.id));
                }
            }
            if let Some(backing) = &group.backing_session {
                if !group.panes.contains(backing) {
                    violations.push(format!("{} is backed by non-member {backing}", group.id));
                }
            }
        }
        for (session, group) in &self.membership {
            let listed = self
                .groups
                .get(group)
                .is_some_and(|g| g.panes.contains(session));
            if !listed {
                violations.push(format!("{session} maps to {group} which does not list it"));
            }
        }
        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> SessionId {
        SessionId::new(raw)
    }

    #[test]
    fn test_create_split_orders_by_direction() {
        let mut splits = SplitPaneStateMachine::new();
        let group = splits
            .create_split(&id("s1"), &id("s2"), SplitDirection::Right, false)
            .unwrap();
        assert_eq!(group.panes, vec![id("s1"), id("s2")]);
        assert_eq!(group.orientation, Orientation::Horizontal);
        assert!(group.id.starts_with("grp-"));
        assert_ne!(group.id.as_str(), "s1");

        let mut splits = SplitPaneStateMachine::new();
        let group = splits
            .create_split(&id("s1"), &id("s2"), SplitDirection::Up, false)
            .unwrap();
        assert_eq!(group.panes, vec![id("s2"), id("s1")]);
        assert_eq!(group.orientation, Orientation::Vertical);
    }

    #[test]
    fn test_grouped_sessions_cannot_split_again() {
        let mut splits = SplitPaneStateMachine::new();
        splits
            .create_split(&id("s1"), &id("s2"), SplitDirection::Right, false)
            .unwrap();

        let as_target = splits.create_split(&id("s1"), &id("s3"), SplitDirection::Right, false);
        assert!(matches!(as_target, Err(SplitError::AlreadyGrouped { .. })));
        let as_source = splits.create_split(&id("s3"), &id("s2"), SplitDirection::Down, false);
        assert!(matches!(as_source, Err(SplitError::AlreadyGrouped { .. })));
        assert!(splits.check_split(&id("s2")).is_err());
        assert!(splits.check_split(&id("s3")).is_ok());
        assert!(splits.invariant_violations().is_empty());
    }

    #[test]
    fn test_split_with_itself_is_rejected() {
        let mut splits = SplitPaneStateMachine::new();
        let err = splits
            .create_split(&id("s1"), &id("s1"), SplitDirection::Left, false)
            .unwrap_err();
        assert_eq!(err, SplitError::SamePane(id("s1")));
    }

    #[test]
    fn test_closing_to_one_pane_dissolves() {
        let mut splits = SplitPaneStateMachine::new();
        let group = splits
            .create_split(&id("s1"), &id("s2"), SplitDirection::Right, false)
            .unwrap();

        let removal = splits.close_pane(&id("s2"));
        assert_eq!(
            removal,
            PaneRemoval::Dissolved {
                group: group.id,
                survivor: Some(id("s1")),
            }
        );
        assert_eq!(splits.state_of(&id("s1")), PaneState::Ungrouped);
        assert!(splits.groups().is_empty());
        assert_eq!(splits.close_pane(&id("s1")), PaneRemoval::NotGrouped);
    }

    #[test]
    fn test_exit_and_detach_behave_like_close() {
        let mut splits = SplitPaneStateMachine::new();
        splits
            .create_split(&id("a"), &id("b"), SplitDirection::Right, false)
            .unwrap();
        assert!(matches!(
            splits.process_exited(&id("a")),
            PaneRemoval::Dissolved { .. }
        ));

        splits
            .create_split(&id("c"), &id("d"), SplitDirection::Down, false)
            .unwrap();
        assert!(matches!(
            splits.detach_pane(&id("d")),
            PaneRemoval::Dissolved { .. }
        ));
        assert_eq!(splits.state_of(&id("d")), PaneState::Ungrouped);
        assert!(splits.invariant_violations().is_empty());
    }

    #[test]
    fn test_state_reports_position() {
        let mut splits = SplitPaneStateMachine::new();
        let group = splits
            .create_split(&id("s1"), &id("s2"), SplitDirection::Left, false)
            .unwrap();
        assert_eq!(
            splits.state_of(&id("s1")),
            PaneState::Grouped {
                group: group.id.clone(),
                position: 1,
            }
        );
        assert_eq!(
            splits.state_of(&id("s2")),
            PaneState::Grouped {
                group: group.id,
                position: 0,
            }
        );
    }

    #[test]
    fn test_backing_session_is_explicit() {
        let mut splits = SplitPaneStateMachine::new();
        let group = splits
            .create_split(&id("s1"), &id("s2"), SplitDirection::Right, true)
            .unwrap();
        assert_eq!(group.backing_session, Some(id("s1")));
        assert!(splits.is_layout_managed(&id("s2")));
        assert!(!splits.is_layout_managed(&id("s3")));
    }
}
