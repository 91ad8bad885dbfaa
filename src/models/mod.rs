pub mod chat;
pub mod task;
pub mod user;

use serde::{Deserialize, Serialize};

pub use chat::{Chat, ChatError, FileInfo, Message, MessageStatus, StatusDetails};
pub use task::{Task, TaskStatus, TransitionError};
pub use user::{PublicUser, Role, User};

/// Priority shared by tasks and tickets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

/// Fresh document id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
