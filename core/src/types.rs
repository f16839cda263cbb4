//! Identifier newtypes and caller roles.
//!
//! Identifiers are opaque strings issued by the backing store. The core never
//! parses them; it only compares, hashes and displays them.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an identifier issued by the backing store.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Generate a fresh random identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Borrow the raw identifier.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }
    };
}

opaque_id!(
    /// Identifier of a reservation.
    ReservationId
);

opaque_id!(
    /// Identifier of an inventory item (owned by the item registry).
    ItemId
);

opaque_id!(
    /// Identifier of a user account.
    UserId
);

opaque_id!(
    /// Identifier of a notification.
    NotificationId
);

/// Role of the calling user.
///
/// Declaration order is privilege order: `Developer` is a superset of
/// `Admin`, which is a superset of `User`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Standard user: browses and requests items.
    User,
    /// Administrator: processes reservation requests.
    Admin,
    /// Developer: everything an admin can do, plus diagnostics.
    Developer,
}

impl Role {
    /// Whether this role carries administrator privileges.
    #[must_use]
    pub const fn is_admin(self) -> bool {
        matches!(self, Self::Admin | Self::Developer)
    }

    /// Whether this role has at least the privileges of `minimum`.
    #[must_use]
    pub fn includes(self, minimum: Self) -> bool {
        self >= minimum
    }

    /// Wire name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
            Self::Developer => "developer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn developer_is_superset_of_admin() {
        assert!(Role::Developer.includes(Role::Admin));
        assert!(Role::Developer.includes(Role::User));
        assert!(Role::Admin.includes(Role::User));
        assert!(!Role::User.includes(Role::Admin));
        assert!(!Role::Admin.includes(Role::Developer));
    }

    #[test]
    fn only_admin_roles_are_admin() {
        assert!(!Role::User.is_admin());
        assert!(Role::Admin.is_admin());
        assert!(Role::Developer.is_admin());
    }

    #[test]
    fn generated_ids_are_distinct() {
        assert_ne!(ReservationId::generate(), ReservationId::generate());
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        #[allow(clippy::unwrap_used)]
        let json = serde_json::to_string(&UserId::new("u-42")).unwrap();
        assert_eq!(json, "\"u-42\"");
    }
}
