//! # Document approval state machine
//!
//! ```text
//! draft ──submit──▶ pending_performer ──performer_approve──▶ pending_manager
//!   ▲                 │                                       │        │
//!   │          performer_reject                     manager_approve  manager_reject
//!   │                 ▼                                       ▼        ▼
//!   └──submit── rejected_performer            manager_approved   rejected_manager
//!                                                     │              │
//!                                                 finalize      submit (resume)
//!                                                     ▼              ▼
//!                                                   final      pending_manager
//! ```
//!
//! Transitions are validated at runtime against the current status. Every
//! accepted transition appends one timeline entry; a rejected one leaves the
//! record untouched.

mod workflow;

pub use workflow::{transition_approval, update_assignees, AssigneeChange};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Approval status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum ApprovalStatus {
    #[default]
    Draft,
    PendingPerformer,
    PendingManager,
    ManagerApproved,
    RejectedPerformer,
    RejectedManager,
    Final,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingPerformer => "pending_performer",
            Self::PendingManager => "pending_manager",
            Self::ManagerApproved => "manager_approved",
            Self::RejectedPerformer => "rejected_performer",
            Self::RejectedManager => "rejected_manager",
            Self::Final => "final",
        }
    }

    /// Lenient read of stored values. Legacy spellings map onto the
    /// canonical statuses; `performer_approved` means the document waits
    /// for the manager. Unknown values read as draft.
    pub fn parse_lenient(value: &str) -> Self {
        let normalized = value.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "pending_performer" | "pendingperformer" | "pending_performer_approval" => {
                Self::PendingPerformer
            }
            "pending_manager"
            | "pendingmanager"
            | "pending_manager_approval"
            | "performer_approved"
            | "performerapproved" => Self::PendingManager,
            "manager_approved" | "managerapproved" => Self::ManagerApproved,
            "rejected_performer" | "performer_rejected" => Self::RejectedPerformer,
            "rejected_manager" | "manager_rejected" => Self::RejectedManager,
            "final" | "finalized" | "completed" => Self::Final,
            _ => Self::Draft,
        }
    }
}

impl From<String> for ApprovalStatus {
    fn from(value: String) -> Self {
        Self::parse_lenient(&value)
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    Submit,
    PerformerApprove,
    PerformerReject,
    ManagerApprove,
    ManagerReject,
    Finalize,
}

impl ApprovalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::PerformerApprove => "performer_approve",
            Self::PerformerReject => "performer_reject",
            Self::ManagerApprove => "manager_approve",
            Self::ManagerReject => "manager_reject",
            Self::Finalize => "finalize",
        }
    }
}

impl std::fmt::Display for ApprovalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ApprovalAction {
    type Err = ApprovalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "submit" => Ok(Self::Submit),
            "performer_approve" => Ok(Self::PerformerApprove),
            "performer_reject" => Ok(Self::PerformerReject),
            "manager_approve" => Ok(Self::ManagerApprove),
            "manager_reject" => Ok(Self::ManagerReject),
            "finalize" => Ok(Self::Finalize),
            _ => Err(ApprovalError::UnknownAction(s.to_string())),
        }
    }
}

/// Caller role. Parsed from a closed set; anything else is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Accountant,
    Manager,
    Performer,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Accountant => "accountant",
            Self::Manager => "manager",
            Self::Performer => "performer",
            Self::Viewer => "viewer",
        }
    }

    /// May act in place of the assigned performer or manager. State
    /// guards still apply.
    pub fn can_override_assignee_guard(&self) -> bool {
        matches!(self, Self::Admin | Self::Accountant)
    }

    /// May submit and finalize documents.
    pub fn can_drive_workflow(&self) -> bool {
        matches!(self, Self::Admin | Self::Accountant | Self::Manager)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = ApprovalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "accountant" => Ok(Self::Accountant),
            "manager" => Ok(Self::Manager),
            "performer" => Ok(Self::Performer),
            "viewer" => Ok(Self::Viewer),
            _ => Err(ApprovalError::UnknownRole(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignee {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub status: ApprovalStatus,
    pub timestamp: DateTime<Utc>,
    pub author: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Who is performing a transition.
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

/// Approval sub-record embedded in a document's metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Approval {
    pub status: ApprovalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performer_assignee: Option<Assignee>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manager_assignee: Option<Assignee>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performer_approved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performer_approved_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manager_approved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manager_approved_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalized_by: Option<String>,
    pub timeline: Vec<TimelineEntry>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApprovalError {
    #[error("cannot {action} a document in status {from}")]
    InvalidTransition {
        action: ApprovalAction,
        from: ApprovalStatus,
    },

    #[error("role {role} may not {action}")]
    RoleNotAllowed { action: ApprovalAction, role: Role },

    #[error("document is assigned to another {stage}")]
    NotAssignee { stage: &'static str },

    #[error("assign a {stage} first")]
    MissingAssignee { stage: &'static str },

    #[error("a comment is required to {action}")]
    CommentRequired { action: ApprovalAction },

    #[error("the {stage} cannot be changed in status {status}")]
    ReassignForbidden {
        stage: &'static str,
        status: ApprovalStatus,
    },

    #[error("unknown role '{0}'")]
    UnknownRole(String),

    #[error("unknown approval action '{0}'")]
    UnknownAction(String),
}

impl ApprovalError {
    pub fn details(&self) -> Value {
        match self {
            Self::InvalidTransition { action, from } => {
                json!({ "action": action.as_str(), "status": from.as_str() })
            }
            Self::RoleNotAllowed { action, role } => {
                json!({ "action": action.as_str(), "role": role.as_str() })
            }
            Self::NotAssignee { stage } | Self::MissingAssignee { stage } => {
                json!({ "assignee": stage })
            }
            Self::CommentRequired { .. } => json!({ "note": "required" }),
            Self::ReassignForbidden { stage, status } => {
                json!({ "assignee": stage, "status": status.as_str() })
            }
            Self::UnknownRole(role) => json!({ "role": role }),
            Self::UnknownAction(action) => json!({ "action": action }),
        }
    }
}

fn allowed_from(action: ApprovalAction) -> &'static [ApprovalStatus] {
    use ApprovalStatus::*;
    match action {
        ApprovalAction::Submit => &[Draft, RejectedPerformer, RejectedManager],
        ApprovalAction::PerformerApprove | ApprovalAction::PerformerReject => &[PendingPerformer],
        ApprovalAction::ManagerApprove | ApprovalAction::ManagerReject => &[PendingManager],
        ApprovalAction::Finalize => &[ManagerApproved],
    }
}

impl Approval {
    /// Apply `action` on behalf of `actor`. All guards are checked before
    /// anything is written.
    pub fn apply(
        &mut self,
        action: ApprovalAction,
        actor: &Actor,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ApprovalStatus, ApprovalError> {
        let from = self.status;
        if !allowed_from(action).contains(&from) {
            return Err(ApprovalError::InvalidTransition { action, from });
        }
        let note = note.map(str::trim).filter(|n| !n.is_empty());

        let target = match action {
            ApprovalAction::Submit => {
                if !actor.role.can_drive_workflow() {
                    return Err(ApprovalError::RoleNotAllowed {
                        action,
                        role: actor.role,
                    });
                }
                if from == ApprovalStatus::RejectedManager {
                    if self.manager_assignee.is_none() {
                        return Err(ApprovalError::MissingAssignee { stage: "manager" });
                    }
                    ApprovalStatus::PendingManager
                } else {
                    if self.performer_assignee.is_none() {
                        return Err(ApprovalError::MissingAssignee { stage: "performer" });
                    }
                    ApprovalStatus::PendingPerformer
                }
            }
            ApprovalAction::PerformerApprove | ApprovalAction::PerformerReject => {
                self.guard_assignee(actor, self.performer_assignee.as_ref(), "performer")?;
                if action == ApprovalAction::PerformerReject {
                    if note.is_none() {
                        return Err(ApprovalError::CommentRequired { action });
                    }
                    ApprovalStatus::RejectedPerformer
                } else {
                    ApprovalStatus::PendingManager
                }
            }
            ApprovalAction::ManagerApprove | ApprovalAction::ManagerReject => {
                if self.manager_assignee.is_none() {
                    return Err(ApprovalError::MissingAssignee { stage: "manager" });
                }
                self.guard_assignee(actor, self.manager_assignee.as_ref(), "manager")?;
                if action == ApprovalAction::ManagerReject {
                    if note.is_none() {
                        return Err(ApprovalError::CommentRequired { action });
                    }
                    ApprovalStatus::RejectedManager
                } else {
                    ApprovalStatus::ManagerApproved
                }
            }
            ApprovalAction::Finalize => {
                if !actor.role.can_drive_workflow() {
                    return Err(ApprovalError::RoleNotAllowed {
                        action,
                        role: actor.role,
                    });
                }
                ApprovalStatus::Final
            }
        };

        match target {
            ApprovalStatus::PendingPerformer => {
                self.submitted_at = Some(now);
                self.clear_performer_approval();
                self.clear_manager_approval();
                self.clear_finalization();
            }
            ApprovalStatus::PendingManager if action == ApprovalAction::Submit => {
                self.submitted_at = Some(now);
                self.clear_manager_approval();
                self.clear_finalization();
            }
            ApprovalStatus::PendingManager => {
                self.performer_approved_at = Some(now);
                self.performer_approved_by = Some(actor.id.clone());
            }
            ApprovalStatus::RejectedPerformer => {
                self.clear_performer_approval();
                self.clear_manager_approval();
            }
            ApprovalStatus::ManagerApproved => {
                self.manager_approved_at = Some(now);
                self.manager_approved_by = Some(actor.id.clone());
            }
            ApprovalStatus::RejectedManager => {
                self.clear_manager_approval();
                self.clear_finalization();
            }
            ApprovalStatus::Final => {
                self.finalized_at = Some(now);
                self.finalized_by = Some(actor.id.clone());
            }
            ApprovalStatus::Draft => {}
        }

        self.status = target;
        self.push_timeline(target, actor, note, now);
        Ok(target)
    }

    fn guard_assignee(
        &self,
        actor: &Actor,
        assignee: Option<&Assignee>,
        stage: &'static str,
    ) -> Result<(), ApprovalError> {
        if actor.role.can_override_assignee_guard() {
            return Ok(());
        }
        match assignee {
            Some(assignee) if assignee.id == actor.id => Ok(()),
            _ => Err(ApprovalError::NotAssignee { stage }),
        }
    }

    /// Change the performer assignee. A change while the performer stage
    /// is open sends the document back to draft; after the performer has
    /// approved it is refused.
    pub fn reassign_performer(
        &mut self,
        assignee: Option<Assignee>,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<(), ApprovalError> {
        if assignee_id(&self.performer_assignee) == assignee_id(&assignee) {
            self.performer_assignee = assignee;
            return Ok(());
        }
        match self.status {
            ApprovalStatus::Draft => {}
            ApprovalStatus::PendingPerformer | ApprovalStatus::RejectedPerformer => {
                self.status = ApprovalStatus::Draft;
                self.submitted_at = None;
                self.push_timeline(ApprovalStatus::Draft, actor, Some("performer reassigned"), now);
            }
            status => {
                return Err(ApprovalError::ReassignForbidden {
                    stage: "performer",
                    status,
                })
            }
        }
        self.performer_assignee = assignee;
        Ok(())
    }

    /// Change the manager assignee. A change while the manager stage is
    /// open sends the document back to the performer; after the manager
    /// has approved it is refused.
    pub fn reassign_manager(
        &mut self,
        assignee: Option<Assignee>,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<(), ApprovalError> {
        if assignee_id(&self.manager_assignee) == assignee_id(&assignee) {
            self.manager_assignee = assignee;
            return Ok(());
        }
        match self.status {
            ApprovalStatus::ManagerApproved | ApprovalStatus::Final => {
                return Err(ApprovalError::ReassignForbidden {
                    stage: "manager",
                    status: self.status,
                })
            }
            ApprovalStatus::PendingManager => {
                self.status = ApprovalStatus::PendingPerformer;
                self.clear_performer_approval();
                self.clear_manager_approval();
                self.push_timeline(
                    ApprovalStatus::PendingPerformer,
                    actor,
                    Some("manager reassigned"),
                    now,
                );
            }
            _ => {}
        }
        self.manager_assignee = assignee;
        Ok(())
    }

    fn push_timeline(
        &mut self,
        status: ApprovalStatus,
        actor: &Actor,
        message: Option<&str>,
        now: DateTime<Utc>,
    ) {
        self.timeline.push(TimelineEntry {
            status,
            timestamp: now,
            author: actor.id.clone(),
            role: actor.role,
            message: message.map(str::to_string),
        });
    }

    fn clear_performer_approval(&mut self) {
        self.performer_approved_at = None;
        self.performer_approved_by = None;
    }

    fn clear_manager_approval(&mut self) {
        self.manager_approved_at = None;
        self.manager_approved_by = None;
    }

    fn clear_finalization(&mut self) {
        self.finalized_at = None;
        self.finalized_by = None;
    }
}

fn assignee_id(assignee: &Option<Assignee>) -> Option<&str> {
    assignee.as_ref().map(|a| a.id.as_str())
}
