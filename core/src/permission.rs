//! Advisory permission gate.
//!
//! Everything here improves the client experience (hide buttons, fail fast)
//! but is not the security boundary; the backing store re-checks every write.
//!
//! Navigation entries are an explicit table of `(Capability, CapabilityDescriptor)`
//! pairs filtered by a pure predicate over the caller's role.

use crate::transition::TransitionKind;
use crate::types::Role;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Whether `role` may request a transition of `kind`.
///
/// Any role may request an item; only admins and developers may approve,
/// reject, hand over or complete.
#[must_use]
pub const fn can_transition(role: Role, kind: TransitionKind) -> bool {
    match kind {
        TransitionKind::Request => true,
        TransitionKind::Approve
        | TransitionKind::Reject
        | TransitionKind::Activate
        | TransitionKind::Complete => role.is_admin(),
    }
}

/// A feature area the client can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Browse equipment categories
    BrowseCatalog,
    /// Ask to borrow an item
    RequestReservation,
    /// Scan an item barcode
    ScanItems,
    /// Read the notification feed
    ViewNotifications,
    /// Approve, reject, hand over and complete reservations
    ManageReservations,
    /// Edit categories and items
    ManageInventory,
    /// Diagnostics
    DeveloperTools,
}

impl Capability {
    /// Capability that gates a transition.
    #[must_use]
    pub const fn for_transition(kind: TransitionKind) -> Self {
        match kind {
            TransitionKind::Request => Self::RequestReservation,
            TransitionKind::Approve
            | TransitionKind::Reject
            | TransitionKind::Activate
            | TransitionKind::Complete => Self::ManageReservations,
        }
    }
}

/// How a capability is presented, and who may see it by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityDescriptor {
    /// Translation key of the menu label
    pub label_key: &'static str,
    /// Client route
    pub route: &'static str,
    /// Lowest role that may use it
    pub minimum_role: Role,
}

/// Every capability with its descriptor, in menu order.
pub const CAPABILITIES: &[(Capability, CapabilityDescriptor)] = &[
    (
        Capability::BrowseCatalog,
        CapabilityDescriptor {
            label_key: "menu.catalog",
            route: "/categories",
            minimum_role: Role::User,
        },
    ),
    (
        Capability::RequestReservation,
        CapabilityDescriptor {
            label_key: "menu.my_reservations",
            route: "/reservations/mine",
            minimum_role: Role::User,
        },
    ),
    (
        Capability::ScanItems,
        CapabilityDescriptor {
            label_key: "menu.scan",
            route: "/scan",
            minimum_role: Role::User,
        },
    ),
    (
        Capability::ViewNotifications,
        CapabilityDescriptor {
            label_key: "menu.notifications",
            route: "/notifications",
            minimum_role: Role::User,
        },
    ),
    (
        Capability::ManageReservations,
        CapabilityDescriptor {
            label_key: "menu.requests",
            route: "/admin/reservations",
            minimum_role: Role::Admin,
        },
    ),
    (
        Capability::ManageInventory,
        CapabilityDescriptor {
            label_key: "menu.inventory",
            route: "/admin/inventory",
            minimum_role: Role::Admin,
        },
    ),
    (
        Capability::DeveloperTools,
        CapabilityDescriptor {
            label_key: "menu.developer",
            route: "/dev",
            minimum_role: Role::Developer,
        },
    ),
];

/// Descriptor of a capability.
#[must_use]
pub fn descriptor(capability: Capability) -> &'static CapabilityDescriptor {
    CAPABILITIES
        .iter()
        .find(|(candidate, _)| *candidate == capability)
        .map_or(&CAPABILITIES[0].1, |(_, descriptor)| descriptor)
}

/// Capabilities visible to `role` under the default policy.
#[must_use]
pub fn visible_capabilities(role: Role) -> Vec<(Capability, &'static CapabilityDescriptor)> {
    AccessPolicy::default().visible(role)
}

/// Process-wide permission configuration.
///
/// Built once at startup (fetched, or the default when fetching fails) and
/// passed explicitly to whoever needs it. Overrides can only raise the
/// minimum role of a capability above its built-in one, never lower it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccessPolicy {
    #[serde(default)]
    overrides: BTreeMap<Capability, Role>,
}

impl AccessPolicy {
    /// Require at least `role` for `capability`.
    #[must_use]
    pub fn with_minimum_role(mut self, capability: Capability, role: Role) -> Self {
        self.overrides.insert(capability, role);
        self
    }

    /// Effective minimum role for a capability.
    #[must_use]
    pub fn minimum_role(&self, capability: Capability) -> Role {
        let built_in = descriptor(capability).minimum_role;
        self.overrides
            .get(&capability)
            .map_or(built_in, |&configured| configured.max(built_in))
    }

    /// Whether `role` may use `capability`.
    #[must_use]
    pub fn permits(&self, role: Role, capability: Capability) -> bool {
        role.includes(self.minimum_role(capability))
    }

    /// Whether `role` may request a transition of `kind` under this policy.
    #[must_use]
    pub fn allows_transition(&self, role: Role, kind: TransitionKind) -> bool {
        can_transition(role, kind) && self.permits(role, Capability::for_transition(kind))
    }

    /// Menu entries visible to `role`.
    #[must_use]
    pub fn visible(&self, role: Role) -> Vec<(Capability, &'static CapabilityDescriptor)> {
        CAPABILITIES
            .iter()
            .filter(|(capability, _)| self.permits(role, *capability))
            .map(|(capability, descriptor)| (*capability, descriptor))
            .collect()
    }
}
