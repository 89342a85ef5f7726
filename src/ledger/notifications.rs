use super::Ledger;
use crate::error::{LedgerError, LedgerResult};
use crate::model::{ActivityEntry, ChatMessage, Collection, Notification, Priority, User};
use crate::records::{new_id, to_document, Records};
use chrono::Utc;
use serde_json::{json, Map};

pub(crate) fn append_notification(
    records: &mut Records,
    user_id: &str,
    kind: &str,
    title: &str,
    message: &str,
    priority: Priority,
) {
    let note = Notification {
        id: new_id(),
        user_id: user_id.to_string(),
        kind: kind.to_string(),
        title: title.to_string(),
        message: message.to_string(),
        priority,
        read: false,
        timestamp: Utc::now(),
        read_at: None,
    };
    let res = to_document(&note)
        .and_then(|doc| records.save_data(&Collection::Notifications.doc(&note.id), doc));
    if let Err(e) = res {
        tracing::warn!(user = user_id, kind, error = %e, "notification dropped");
    }
}

pub(crate) fn append_activity(records: &mut Records, user_id: &str, action: &str, description: &str) {
    let entry = ActivityEntry {
        id: new_id(),
        user_id: user_id.to_string(),
        action: action.to_string(),
        description: description.to_string(),
        timestamp: Utc::now(),
    };
    let res = to_document(&entry)
        .and_then(|doc| records.save_data(&Collection::UserActivity.doc(&entry.id), doc));
    if let Err(e) = res {
        tracing::warn!(user = user_id, action, error = %e, "activity entry dropped");
    }
}

impl Ledger {
    /// Newest first, with the number still unread.
    pub fn notifications_for(&mut self, user_id: &str) -> LedgerResult<(Vec<Notification>, usize)> {
        let mut notes: Vec<Notification> = self
            .records
            .list::<Notification>(Collection::Notifications)?
            .into_iter()
            .filter(|n| n.user_id == user_id)
            .collect();
        notes.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let unread = notes.iter().filter(|n| !n.read).count();
        Ok((notes, unread))
    }

    /// Flags a notification as read. With `owner` set, the notification must
    /// belong to that user.
    pub fn mark_notification_as_read(&mut self, id: &str, owner: Option<&str>) -> LedgerResult<()> {
        let note: Notification = self.records.require(Collection::Notifications, id)?;
        if let Some(owner) = owner {
            if note.user_id != owner {
                return Err(LedgerError::not_found(format!("notification {}", id)));
            }
        }
        if note.read {
            return Ok(());
        }
        let mut partial = Map::new();
        partial.insert("read".into(), json!(true));
        partial.insert("readAt".into(), json!(Utc::now()));
        self.records
            .update_in_array(Collection::Notifications, id, partial)
    }

    /// Sends an admin notification to the given users, or to every student
    /// when `user_ids` is empty. Returns the number of recipients.
    pub fn send_notification(
        &mut self,
        user_ids: &[String],
        title: &str,
        message: &str,
        priority: Priority,
    ) -> LedgerResult<usize> {
        if title.trim().is_empty() || message.trim().is_empty() {
            return Err(LedgerError::validation("title and message are required"));
        }
        let recipients: Vec<String> = if user_ids.is_empty() {
            self.list_students()?.into_iter().map(|u| u.id).collect()
        } else {
            for id in user_ids {
                self.load_user(id)?;
            }
            user_ids.to_vec()
        };
        for id in &recipients {
            self.notify(id, "admin", title, message, priority);
        }
        tracing::info!(recipients = recipients.len(), "admin notification sent");
        Ok(recipients.len())
    }

    pub fn activity_for(&mut self, user_id: Option<&str>) -> LedgerResult<Vec<ActivityEntry>> {
        let mut entries: Vec<ActivityEntry> = self
            .records
            .list::<ActivityEntry>(Collection::UserActivity)?
            .into_iter()
            .filter(|a| user_id.map_or(true, |u| a.user_id == u))
            .collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries)
    }

    pub fn send_chat_message(
        &mut self,
        sender: &User,
        text: &str,
        image_url: Option<&str>,
    ) -> LedgerResult<ChatMessage> {
        let text = text.trim();
        let image_url = image_url.map(str::trim).filter(|s| !s.is_empty());
        if text.is_empty() && image_url.is_none() {
            return Err(LedgerError::validation("message text or image is required"));
        }
        let msg = ChatMessage {
            id: new_id(),
            sender_id: sender.id.clone(),
            sender_name: sender.name.clone(),
            text: text.to_string(),
            image_url: image_url.map(str::to_string),
            timestamp: Utc::now(),
        };
        self.records
            .save_data(&Collection::ChatMessages.doc(&msg.id), to_document(&msg)?)?;
        Ok(msg)
    }

    /// Oldest first; `limit` keeps the most recent messages.
    pub fn chat_messages(&mut self, limit: Option<usize>) -> LedgerResult<Vec<ChatMessage>> {
        let mut msgs: Vec<ChatMessage> = self.records.list(Collection::ChatMessages)?;
        msgs.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        if let Some(n) = limit {
            let skip = msgs.len().saturating_sub(n);
            msgs.drain(..skip);
        }
        Ok(msgs)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;

    #[test]
    fn mark_read_respects_owner() {
        let mut l = ledger();
        let s = student(&mut l, "Aziza", 0);
        let other = student(&mut l, "Bek", 0);
        l.notify(&s, "info", "Hello", "World", Priority::Normal);
        let (notes, unread) = l.notifications_for(&s).expect("list");
        assert_eq!((notes.len(), unread), (1, 1));

        let id = notes[0].id.clone();
        assert!(matches!(
            l.mark_notification_as_read(&id, Some(&other)),
            Err(LedgerError::NotFound(_))
        ));
        l.mark_notification_as_read(&id, Some(&s)).expect("mark");
        let (notes, unread) = l.notifications_for(&s).expect("list");
        assert_eq!(unread, 0);
        assert!(notes[0].read_at.is_some());
    }

    #[test]
    fn broadcast_reaches_every_student() {
        let mut l = ledger();
        let a = student(&mut l, "Aziza", 0);
        let b = student(&mut l, "Bek", 0);
        assert_eq!(l.send_notification(&[], "Exam", "Friday", Priority::High).expect("send"), 2);
        assert_eq!(l.notifications_for(&a).expect("a").0.len(), 1);
        assert_eq!(l.notifications_for(&b).expect("b").0[0].priority, Priority::High);
        assert!(l
            .send_notification(&["ghost".to_string()], "x", "y", Priority::Low)
            .is_err());
    }

    #[test]
    fn notification_failure_is_swallowed() {
        let mut l = ledger();
        l.records().set_online(false);
        l.notify("u1", "info", "t", "m", Priority::Normal);
        l.log_activity("u1", "login", "x");
        l.records().set_online(true);
        assert!(l.notifications_for("u1").expect("list").0.is_empty());
    }

    #[test]
    fn chat_keeps_latest_messages() {
        let mut l = ledger();
        let s = student(&mut l, "Aziza", 0);
        let user = l.load_user(&s).expect("user");
        for text in ["one", "two", "three"] {
            l.send_chat_message(&user, text, None).expect("send");
        }
        assert!(l.send_chat_message(&user, "  ", None).is_err());
        let last_two = l.chat_messages(Some(2)).expect("list");
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[1].text, "three");
    }
}
