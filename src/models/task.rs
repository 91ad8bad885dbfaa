use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Priority;
use crate::store::Entity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    PendingApproval,
    Completed,
    Rejected,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::PendingApproval => "pending-approval",
            TaskStatus::Completed => "completed",
            TaskStatus::Rejected => "rejected",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }

    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::PendingApproval,
        TaskStatus::Completed,
        TaskStatus::Rejected,
        TaskStatus::Cancelled,
    ];
}

/// How the acting user relates to the task.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskActor {
    pub is_assignee: bool,
    pub is_assigner: bool,
    pub is_admin: bool,
}

impl TaskActor {
    fn is_manager(self) -> bool {
        self.is_assigner || self.is_admin
    }
}

/// Who may perform a given transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Permission {
    Assignee,
    Manager,
    AdminOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("'{}' durumundan '{}' durumuna geçiş yapılamaz", .from.as_str(), .to.as_str())]
    NotAllowed { from: TaskStatus, to: TaskStatus },
    #[error("Bu durum değişikliği için yetkiniz yok")]
    Forbidden,
    #[error("Red nedeni zorunludur")]
    MissingReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Requested status equals the current one; nothing changes.
    Unchanged,
    Applied,
}

fn permission(from: TaskStatus, to: TaskStatus) -> Option<Permission> {
    use TaskStatus::*;
    match (from, to) {
        (Pending, InProgress) | (InProgress, PendingApproval) | (Rejected, InProgress) => {
            Some(Permission::Assignee)
        }
        (PendingApproval, Completed) | (PendingApproval, Rejected) => Some(Permission::Manager),
        (Pending | InProgress | PendingApproval, Cancelled) => Some(Permission::Manager),
        (Pending | InProgress, Completed) => Some(Permission::AdminOnly),
        _ => None,
    }
}

pub fn check_transition(
    from: TaskStatus,
    to: TaskStatus,
    actor: TaskActor,
) -> Result<Transition, TransitionError> {
    if from == to {
        return Ok(Transition::Unchanged);
    }
    let permitted = match permission(from, to) {
        None => return Err(TransitionError::NotAllowed { from, to }),
        Some(Permission::Assignee) => actor.is_assignee || actor.is_admin,
        Some(Permission::Manager) => actor.is_manager(),
        Some(Permission::AdminOnly) => actor.is_admin,
    };
    if permitted {
        Ok(Transition::Applied)
    } else {
        Err(TransitionError::Forbidden)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub assigned_to: String,
    pub assigned_by: String,
    pub customer_id: Option<String>,
    pub priority: Priority,
    #[serde(default, with = "crate::store::timestamp::option")]
    pub due_date: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    #[serde(default, with = "crate::store::timestamp::option")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, with = "crate::store::timestamp::option")]
    pub submitted_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    #[serde(default, with = "crate::store::timestamp::option")]
    pub approved_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    #[serde(default, with = "crate::store::timestamp::option")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, with = "crate::store::timestamp::option")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(with = "crate::store::timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "crate::store::timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl Entity for Task {
    const COLLECTION: &'static str = "tasks";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Task {
    pub fn actor(&self, user_id: &str, is_admin: bool) -> TaskActor {
        TaskActor {
            is_assignee: self.assigned_to == user_id,
            is_assigner: self.assigned_by == user_id,
            is_admin,
        }
    }

    /// Moves the task to `to`, stamping the workflow fields. Same-state
    /// requests leave the task untouched.
    pub fn transition(
        &mut self,
        to: TaskStatus,
        actor_id: &str,
        actor: TaskActor,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Transition, TransitionError> {
        let outcome = check_transition(self.status, to, actor)?;
        if outcome == Transition::Unchanged {
            return Ok(outcome);
        }

        match to {
            TaskStatus::InProgress => {
                self.started_at.get_or_insert(now);
                self.rejection_reason = None;
            }
            TaskStatus::PendingApproval => self.submitted_at = Some(now),
            TaskStatus::Completed => {
                self.completed_at.get_or_insert(now);
                self.approved_by = Some(actor_id.to_string());
                self.approved_at = Some(now);
            }
            TaskStatus::Rejected => {
                let reason = reason
                    .map(|r| r.trim().to_string())
                    .filter(|r| !r.is_empty())
                    .ok_or(TransitionError::MissingReason)?;
                self.rejection_reason = Some(reason);
            }
            TaskStatus::Cancelled => self.cancelled_at = Some(now),
            TaskStatus::Pending => {}
        }
        self.status = to;
        self.updated_at = now;
        Ok(Transition::Applied)
    }
}
