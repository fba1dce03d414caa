use std::collections::BTreeMap;

/// Targets a named resource in the policy's namespace, optionally narrowed to
/// one section of it (a Gateway listener or a route rule).
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocalPolicyTargetReference {
    #[serde(default)]
    pub group: String,
    pub kind: String,
    pub name: String,
    pub section_name: Option<String>,
}

/// Targets every resource of a kind, in the policy's namespace, whose labels
/// match `matchLabels`.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocalPolicyTargetSelector {
    #[serde(default)]
    pub group: String,
    pub kind: String,
    pub match_labels: BTreeMap<String, String>,
    pub section_name: Option<String>,
}

impl LocalPolicyTargetReference {
    /// Returns the target ref kind, qualified by its group, if necessary.
    pub fn canonical_kind(&self) -> String {
        canonical_kind(&self.group, &self.kind)
    }

    /// Checks whether the target references the given resource type
    pub fn targets_kind<T>(&self) -> bool
    where
        T: kube::Resource,
        T::DynamicType: Default,
    {
        targets_kind::<T>(&self.group, &self.kind)
    }
}

impl LocalPolicyTargetSelector {
    pub fn canonical_kind(&self) -> String {
        canonical_kind(&self.group, &self.kind)
    }

    pub fn targets_kind<T>(&self) -> bool
    where
        T: kube::Resource,
        T::DynamicType: Default,
    {
        targets_kind::<T>(&self.group, &self.kind)
    }
}

fn canonical_kind(group: &str, kind: &str) -> String {
    if group.is_empty() || group == "core" {
        kind.to_string()
    } else {
        format!("{kind}.{group}")
    }
}

fn targets_kind<T>(group: &str, kind: &str) -> bool
where
    T: kube::Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    let mut t_group = &*T::group(&dt);
    if t_group.is_empty() {
        t_group = "core";
    }
    let group = if group.is_empty() { "core" } else { group };
    group.eq_ignore_ascii_case(t_group) && kind.eq_ignore_ascii_case(&T::kind(&dt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Gateway, HttpRoute, Service};

    #[test]
    fn targets_gateway_api_kinds() {
        let t = LocalPolicyTargetReference {
            group: "gateway.networking.k8s.io".to_string(),
            kind: "Gateway".to_string(),
            name: "gw".to_string(),
            section_name: Some("http".to_string()),
        };
        assert!(t.targets_kind::<Gateway>());
        assert!(!t.targets_kind::<HttpRoute>());
        assert_eq!(t.canonical_kind(), "Gateway.gateway.networking.k8s.io");
    }

    #[test]
    fn core_group_is_implicit() {
        for group in ["", "core"] {
            let t = LocalPolicyTargetSelector {
                group: group.to_string(),
                kind: "Service".to_string(),
                match_labels: Some(("app".to_string(), "web".to_string()))
                    .into_iter()
                    .collect(),
                section_name: None,
            };
            assert!(t.targets_kind::<Service>(), "group {group:?}");
            assert_eq!(t.canonical_kind(), "Service");
        }
    }
}
