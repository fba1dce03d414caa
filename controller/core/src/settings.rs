use crate::policy::InheritedPolicyPriority;

/// Configuration threaded through every translation pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranslatorSettings {
    /// The controller name written into status.
    pub controller_name: String,

    /// Bind listeners on `::` instead of `0.0.0.0`.
    pub listener_bind_ipv6: bool,

    /// Build TrafficPolicy transformations for the rust-based transformation
    /// filter instead of the classic one.
    pub use_rustformations: bool,

    /// Merge behavior for inherited policies when neither the Gateway nor a
    /// parent route carries the inherited-policy-priority annotation.
    pub default_inherited_policy_priority: InheritedPolicyPriority,
}

impl Default for TranslatorSettings {
    fn default() -> Self {
        Self {
            controller_name: crate::DEFAULT_CONTROLLER_NAME.to_string(),
            listener_bind_ipv6: false,
            use_rustformations: false,
            default_inherited_policy_priority: InheritedPolicyPriority::ShallowMergePreferChild,
        }
    }
}

impl TranslatorSettings {
    pub fn bind_address(&self) -> &'static str {
        if self.listener_bind_ipv6 {
            "::"
        } else {
            "0.0.0.0"
        }
    }
}
