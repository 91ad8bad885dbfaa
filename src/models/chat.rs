use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::Entity;

/// Delivery state of a message. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusDetails {
    #[serde(default, with = "crate::store::timestamp::option")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, with = "crate::store::timestamp::option")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default, with = "crate::store::timestamp::option")]
    pub read_at: Option<DateTime<Utc>>,
}

/// Metadata of an attachment already uploaded elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub name: String,
    pub url: String,
    pub size: Option<i64>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: String,
    pub sender_id: String,
    pub content: String,
    pub file: Option<FileInfo>,
    pub status: MessageStatus,
    #[serde(default)]
    pub status_details: StatusDetails,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default, with = "crate::store::timestamp::option")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(with = "crate::store::timestamp")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn preview(&self) -> String {
        match (&self.file, self.content.is_empty()) {
            (Some(file), true) => format!("📎 {}", file.name),
            _ => self.content.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error("Mesaj bulunamadı")]
    MessageNotFound,
    #[error("Sadece kendi mesajlarınızı silebilirsiniz")]
    NotSender,
}

/// A one-to-one conversation with its messages embedded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    #[serde(rename = "_id")]
    pub id: String,
    pub participants: Vec<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub last_message: Option<String>,
    #[serde(default, with = "crate::store::timestamp::option")]
    pub last_message_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unread_counts: HashMap<String, i64>,
    /// Bumped on every save; guards concurrent read-modify-write cycles.
    #[serde(default)]
    pub version: i64,
    #[serde(with = "crate::store::timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "crate::store::timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl Entity for Chat {
    const COLLECTION: &'static str = "chats";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Chat {
    pub fn new(id: String, first: &str, second: &str, now: DateTime<Utc>) -> Self {
        let participants = vec![first.to_string(), second.to_string()];
        let unread_counts = participants.iter().map(|p| (p.clone(), 0)).collect();
        Chat {
            id,
            participants,
            messages: Vec::new(),
            last_message: None,
            last_message_time: None,
            unread_counts,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }

    pub fn unread_for(&self, user_id: &str) -> i64 {
        self.unread_counts.get(user_id).copied().unwrap_or(0)
    }

    pub fn others<'a>(&'a self, user_id: &'a str) -> impl Iterator<Item = &'a String> + 'a {
        self.participants.iter().filter(move |p| p.as_str() != user_id)
    }

    pub fn visible_messages(&self) -> Vec<Message> {
        self.messages.iter().filter(|m| !m.is_deleted).cloned().collect()
    }

    /// Appends a message and bumps every other participant's unread counter by one.
    pub fn push_message(&mut self, message: Message) {
        let others: Vec<String> = self.others(&message.sender_id).cloned().collect();
        for other in others {
            *self.unread_counts.entry(other).or_insert(0) += 1;
        }
        self.last_message = Some(message.preview());
        self.last_message_time = Some(message.created_at);
        self.updated_at = message.created_at;
        self.messages.push(message);
    }

    /// Marks incoming `sent` messages as delivered. Returns how many changed.
    pub fn mark_delivered(&mut self, reader_id: &str, now: DateTime<Utc>) -> usize {
        let mut changed = 0;
        for m in self.messages.iter_mut() {
            if m.sender_id != reader_id && m.status < MessageStatus::Delivered {
                m.status = MessageStatus::Delivered;
                m.status_details.delivered_at.get_or_insert(now);
                changed += 1;
            }
        }
        changed
    }

    /// Marks every message not sent by `reader_id` as read and clears the
    /// reader's counter. Returns the ids that changed.
    pub fn mark_read(&mut self, reader_id: &str, now: DateTime<Utc>) -> Vec<String> {
        let mut changed = Vec::new();
        for m in self.messages.iter_mut() {
            if m.sender_id != reader_id && m.status < MessageStatus::Read {
                m.status = MessageStatus::Read;
                m.status_details.delivered_at.get_or_insert(now);
                m.status_details.read_at = Some(now);
                changed.push(m.id.clone());
            }
        }
        self.unread_counts.insert(reader_id.to_string(), 0);
        changed
    }

    /// Soft-deletes a message. Unread copies stop counting against the
    /// other participants.
    pub fn delete_message(
        &mut self,
        message_id: &str,
        requester_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ChatError> {
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or(ChatError::MessageNotFound)?;
        if message.sender_id != requester_id {
            return Err(ChatError::NotSender);
        }
        if message.is_deleted {
            return Ok(());
        }
        message.is_deleted = true;
        message.deleted_at = Some(now);
        let was_unread = message.status < MessageStatus::Read;

        if was_unread {
            let others: Vec<String> = self.others(requester_id).cloned().collect();
            for other in others {
                if let Some(count) = self.unread_counts.get_mut(&other) {
                    *count = (*count - 1).max(0);
                }
            }
        }

        let latest = self.messages.iter().rev().find(|m| !m.is_deleted);
        self.last_message = latest.map(Message::preview);
        self.last_message_time = latest.map(|m| m.created_at);
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, sender: &str, content: &str) -> Message {
        let now = Utc::now();
        Message {
            id: id.into(),
            sender_id: sender.into(),
            content: content.into(),
            file: None,
            status: MessageStatus::Sent,
            status_details: StatusDetails { sent_at: Some(now), ..Default::default() },
            is_deleted: false,
            deleted_at: None,
            created_at: now,
        }
    }

    #[test]
    fn push_increments_only_the_recipient() {
        let mut chat = Chat::new("c".into(), "ayse", "mehmet", Utc::now());
        chat.push_message(message("m1", "ayse", "Merhaba"));
        chat.push_message(message("m2", "ayse", "Servis raporu hazır mı?"));
        assert_eq!(chat.unread_for("mehmet"), 2);
        assert_eq!(chat.unread_for("ayse"), 0);
        assert_eq!(chat.last_message.as_deref(), Some("Servis raporu hazır mı?"));
    }

    #[test]
    fn read_receipts_skip_own_messages() {
        let mut chat = Chat::new("c".into(), "ayse", "mehmet", Utc::now());
        chat.push_message(message("m1", "ayse", "Merhaba"));
        chat.push_message(message("m2", "mehmet", "Selam"));
        let changed = chat.mark_read("mehmet", Utc::now());
        assert_eq!(changed, vec!["m1".to_string()]);
        assert_eq!(chat.messages[0].status, MessageStatus::Read);
        assert!(chat.messages[0].status_details.read_at.is_some());
        assert_eq!(chat.messages[1].status, MessageStatus::Sent);
        assert_eq!(chat.unread_for("mehmet"), 0);
        assert_eq!(chat.unread_for("ayse"), 1);
    }

    #[test]
    fn delivered_never_downgrades_read() {
        let mut chat = Chat::new("c".into(), "ayse", "mehmet", Utc::now());
        chat.push_message(message("m1", "ayse", "Merhaba"));
        chat.mark_read("mehmet", Utc::now());
        assert_eq!(chat.mark_delivered("mehmet", Utc::now()), 0);
        assert_eq!(chat.messages[0].status, MessageStatus::Read);
    }

    #[test]
    fn soft_delete_hides_message_and_fixes_counters() {
        let mut chat = Chat::new("c".into(), "ayse", "mehmet", Utc::now());
        chat.push_message(message("m1", "ayse", "İlk"));
        chat.push_message(message("m2", "ayse", "Yanlış mesaj"));
        assert_eq!(chat.delete_message("m2", "mehmet", Utc::now()), Err(ChatError::NotSender));
        chat.delete_message("m2", "ayse", Utc::now()).unwrap();
        assert_eq!(chat.messages.len(), 2);
        assert!(chat.messages[1].is_deleted);
        assert_eq!(chat.visible_messages().len(), 1);
        assert_eq!(chat.unread_for("mehmet"), 1);
        assert_eq!(chat.last_message.as_deref(), Some("İlk"));
        assert_eq!(chat.delete_message("zzz", "ayse", Utc::now()), Err(ChatError::MessageNotFound));
    }

    #[test]
    fn file_only_message_previews_file_name() {
        let mut chat = Chat::new("c".into(), "ayse", "mehmet", Utc::now());
        let mut m = message("m1", "ayse", "");
        m.file = Some(FileInfo {
            name: "fatura.pdf".into(),
            url: "/uploads/fatura.pdf".into(),
            size: Some(1024),
            mime_type: Some("application/pdf".into()),
        });
        chat.push_message(m);
        assert_eq!(chat.last_message.as_deref(), Some("📎 fatura.pdf"));
    }
}
