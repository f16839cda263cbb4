//! Notification entity model.
//!
//! Notifications are created as a side effect of reservation transitions and
//! afterwards only change their read flag, or get deleted by the recipient.
//!
//! # Legacy read flags
//!
//! Upstream storage has been observed to hold `isRead` as a JSON boolean, as
//! the strings `"true"`/`"false"`, or not at all. Reads accept all of them
//! (missing and null mean unread); writes always emit a boolean. The string
//! form is most likely drift between the write and read paths of the store
//! and should be cleaned up there.

use crate::types::{NotificationId, ReservationId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationType {
    /// A reservation was approved
    ReservationApproved,
    /// A reservation was rejected
    ReservationRejected,
    /// A user asked for an item (addressed to admins)
    ReservationRequest,
    /// An item came back damaged
    ItemDamaged,
    /// Anything else, including types this client does not know
    Other,
}

impl NotificationType {
    /// Wire name of the type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReservationApproved => "reservation_approved",
            Self::ReservationRejected => "reservation_rejected",
            Self::ReservationRequest => "reservation_request",
            Self::ItemDamaged => "item_damaged",
            Self::Other => "other",
        }
    }
}

impl From<String> for NotificationType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "reservation_approved" => Self::ReservationApproved,
            "reservation_rejected" => Self::ReservationRejected,
            "reservation_request" => Self::ReservationRequest,
            "item_damaged" => Self::ItemDamaged,
            _ => Self::Other,
        }
    }
}

impl From<NotificationType> for String {
    fn from(value: NotificationType) -> Self {
        value.as_str().to_owned()
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who a notification is addressed to.
///
/// Serialized as the user id, or as [`Recipient::ADMINS`] for the admin group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Recipient {
    /// A single user
    User(UserId),
    /// Every admin and developer
    Admins,
}

impl Recipient {
    /// Wire value of the admin group.
    pub const ADMINS: &'static str = "admins";
}

impl From<String> for Recipient {
    fn from(value: String) -> Self {
        if value == Self::ADMINS {
            Self::Admins
        } else {
            Self::User(UserId::new(value))
        }
    }
}

impl From<Recipient> for String {
    fn from(value: Recipient) -> Self {
        match value {
            Recipient::User(user) => user.as_str().to_owned(),
            Recipient::Admins => Recipient::ADMINS.to_owned(),
        }
    }
}

impl From<UserId> for Recipient {
    fn from(value: UserId) -> Self {
        Self::User(value)
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(user) => write!(f, "{user}"),
            Self::Admins => f.write_str(Self::ADMINS),
        }
    }
}

/// A recipient-addressed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Unique identifier
    pub id: NotificationId,
    /// What the notification is about
    #[serde(rename = "type")]
    pub kind: NotificationType,
    /// Short headline
    pub title: String,
    /// Body text
    pub message: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Read flag (tolerant on read, boolean on write)
    #[serde(default, deserialize_with = "read_flag::deserialize")]
    pub is_read: bool,
    /// Addressee
    pub recipient_id: Recipient,
    /// Reservation that caused this notification, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<ReservationId>,
}

/// A notification the engine wants created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDraft {
    /// What the notification is about
    #[serde(rename = "type")]
    pub kind: NotificationType,
    /// Short headline
    pub title: String,
    /// Body text
    pub message: String,
    /// Addressee
    pub recipient: Recipient,
    /// Reservation that caused it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<ReservationId>,
}

impl NotificationDraft {
    /// Materialize the draft once the store has assigned an id and timestamp.
    #[must_use]
    pub fn into_notification(self, id: NotificationId, created_at: DateTime<Utc>) -> Notification {
        Notification {
            id,
            kind: self.kind,
            title: self.title,
            message: self.message,
            created_at,
            is_read: false,
            recipient_id: self.recipient,
            reservation_id: self.reservation_id,
        }
    }
}

/// Count entries whose read flag is falsy.
#[must_use]
pub fn unread_count(entries: &[Notification]) -> usize {
    entries.iter().filter(|n| !n.is_read).count()
}

/// Tolerant decoding of `isRead`.
pub mod read_flag {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Encoded {
        Flag(bool),
        Number(f64),
        Text(String),
    }

    /// Decode a boolean, a number, a string, or null.
    ///
    /// Reads as read: `true`, any non-zero number, and the strings `"true"`
    /// (any case) or `"1"`. Everything else, including null, reads as unread.
    ///
    /// # Errors
    ///
    /// Fails when the value is neither a boolean, a number, a string nor null.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<Encoded>::deserialize(deserializer)? {
            Some(Encoded::Flag(flag)) => flag,
            Some(Encoded::Number(number)) => number.abs() > 0.0,
            Some(Encoded::Text(text)) => {
                let text = text.trim();
                text.eq_ignore_ascii_case("true") || text == "1"
            },
            None => false,
        })
    }
}
