//! Gateway API condition types and reasons.

use chrono::{DateTime, Utc};
use gateway_controller_core::policy::AttachmentState;
use gateway_controller_k8s_api::{self as k8s, Time};

pub const ACCEPTED: &str = "Accepted";
pub const PROGRAMMED: &str = "Programmed";
pub const RESOLVED_REFS: &str = "ResolvedRefs";
pub const CONFLICTED: &str = "Conflicted";

/// Reported on a route parent when part of the route was dropped.
pub const PARTIALLY_INVALID: &str = "PartiallyInvalid";

/// Reported on policy ancestors alongside `Accepted`.
pub const ATTACHED: &str = "Attached";

pub mod reasons {
    pub const ACCEPTED: &str = "Accepted";
    pub const PROGRAMMED: &str = "Programmed";
    pub const RESOLVED_REFS: &str = "ResolvedRefs";
    pub const NO_CONFLICTS: &str = "NoConflicts";

    pub const INVALID: &str = "Invalid";
    pub const UNSUPPORTED_VALUE: &str = "UnsupportedValue";
    pub const UNSUPPORTED_PROTOCOL: &str = "UnsupportedProtocol";
    pub const INVALID_ROUTE_KINDS: &str = "InvalidRouteKinds";
    pub const HOSTNAME_CONFLICT: &str = "HostnameConflict";
    pub const PROTOCOL_CONFLICT: &str = "ProtocolConflict";

    pub const NOT_ALLOWED_BY_LISTENERS: &str = "NotAllowedByListeners";
    pub const NO_MATCHING_LISTENER_HOSTNAME: &str = "NoMatchingListenerHostname";
    pub const NO_MATCHING_PARENT: &str = "NoMatchingParent";
    pub const UNSUPPORTED_KIND: &str = "UnsupportedKind";

    /// Policy ancestor reasons.
    pub const VALID: &str = "Valid";
    pub const ATTACHED: &str = "Attached";
    pub const MERGED: &str = "Merged";
    pub const OVERRIDDEN: &str = "Overridden";
    pub const POLICY_INVALID: &str = "Invalid";
}

/// A condition as produced by translation, before it is stamped with a
/// generation and a transition time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Condition {
    pub type_: &'static str,
    pub status: bool,
    pub reason: &'static str,
    pub message: String,
}

// === impl Condition ===

impl Condition {
    pub fn new(
        type_: &'static str,
        status: bool,
        reason: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_,
            status,
            reason,
            message: message.into(),
        }
    }

    pub fn to_k8s(&self, observed_generation: Option<i64>, now: DateTime<Utc>) -> k8s::Condition {
        k8s::Condition {
            type_: self.type_.to_string(),
            status: if self.status { "True" } else { "False" }.to_string(),
            reason: self.reason.to_string(),
            message: self.message.clone(),
            observed_generation,
            last_transition_time: Time(now),
        }
    }
}

/// The `Attached` condition of a policy ancestor, after merging.
pub fn attachment(state: AttachmentState) -> Condition {
    match state {
        AttachmentState::Attached => {
            Condition::new(ATTACHED, true, reasons::ATTACHED, "Attached to all targets")
        }
        AttachmentState::Merged => Condition::new(
            ATTACHED,
            true,
            reasons::MERGED,
            "Merged with other policies in target(s) and partially attached",
        ),
        AttachmentState::Overridden => Condition::new(
            ATTACHED,
            false,
            reasons::OVERRIDDEN,
            "Overridden due to conflict with higher priority policy in target(s)",
        ),
    }
}

/// Conditions keyed by type. Setting a condition replaces any condition of
/// the same type; types keep their first-set order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Conditions(Vec<Condition>);

// === impl Conditions ===

impl Conditions {
    pub fn set(&mut self, condition: Condition) {
        match self.0.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(c) => *c = condition,
            None => self.0.push(condition),
        }
    }

    /// Sets `condition` unless a condition of its type is already present.
    pub fn set_default(&mut self, condition: Condition) {
        if self.get(condition.type_).is_none() {
            self.0.push(condition);
        }
    }

    pub fn get(&self, type_: &str) -> Option<&Condition> {
        self.0.iter().find(|c| c.type_ == type_)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_k8s(
        &self,
        observed_generation: Option<i64>,
        now: DateTime<Utc>,
    ) -> Vec<k8s::Condition> {
        self.0
            .iter()
            .map(|c| c.to_k8s(observed_generation, now))
            .collect()
    }
}
