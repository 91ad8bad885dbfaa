//! Outbound real-time events. Services push events through `Notifier`; the
//! websocket hub (`chat_server::ChatServer`) is the production implementation.

use serde::Serialize;
use serde_json::Value;

pub const NEW_MESSAGE: &str = "new_message";
pub const MESSAGE_DELETED: &str = "message_deleted";
pub const MESSAGES_READ: &str = "messages_read";
pub const TYPING_START: &str = "typing_start";
pub const TYPING_STOP: &str = "typing_stop";
pub const USER_STATUS_CHANGED: &str = "user_status_changed";
pub const NEW_TASK_ASSIGNED: &str = "new_task_assigned";
pub const TASK_NEEDS_APPROVAL: &str = "task_needs_approval";
pub const TASK_STATUS_UPDATED: &str = "task_status_updated";
pub const TASK_APPROVED: &str = "task_approved";
pub const TASK_REJECTED: &str = "task_rejected";
pub const NUDGE_NOTIFICATION: &str = "nudge_notification";
pub const NEW_ISSUE_ASSIGNED: &str = "new_issue_assigned";
pub const NOTIFICATION: &str = "notification";
pub const CALENDAR_INVITE: &str = "calendar_invite";

/// One frame delivered to a user's room: `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ServerEvent {
    pub event: String,
    pub data: Value,
}

impl ServerEvent {
    pub fn new(event: &str, data: Value) -> Self {
        ServerEvent { event: event.to_string(), data }
    }
}

pub trait Notifier: Send + Sync {
    /// Delivers to every open session of `user_id`. Offline users miss the event.
    fn emit(&self, user_id: &str, event: ServerEvent);
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use super::{Notifier, ServerEvent};

    /// Captures emitted events for assertions.
    #[derive(Default)]
    pub struct RecordingNotifier {
        sent: Mutex<Vec<(String, ServerEvent)>>,
    }

    impl RecordingNotifier {
        pub fn events_for(&self, user_id: &str) -> Vec<ServerEvent> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(to, _)| to == user_id)
                .map(|(_, e)| e.clone())
                .collect()
        }

        pub fn names_for(&self, user_id: &str) -> Vec<String> {
            self.events_for(user_id).into_iter().map(|e| e.event).collect()
        }
    }

    impl Notifier for RecordingNotifier {
        fn emit(&self, user_id: &str, event: ServerEvent) {
            self.sent.lock().unwrap().push((user_id.to_string(), event));
        }
    }
}
