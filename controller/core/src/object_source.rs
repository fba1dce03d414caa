use gateway_controller_k8s_api::{self as k8s, Resource, ResourceExt};
use std::fmt;

/// A Kubernetes API group and kind. The core group is always the empty string.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKind {
    pub group: String,
    pub kind: String,
}

/// Identifies any Kubernetes-like resource. Used as the lookup key across all
/// indexes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectSource {
    pub group: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

// === impl GroupKind ===

impl GroupKind {
    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        let mut group = group.into();
        if group == "core" {
            group.clear();
        }
        Self {
            group,
            kind: kind.into(),
        }
    }

    pub fn of<T>() -> Self
    where
        T: Resource,
        T::DynamicType: Default,
    {
        Self {
            group: k8s::group_of::<T>(),
            kind: k8s::kind_of::<T>(),
        }
    }

    /// Returns true if `group` and `kind` name this group kind. An empty or
    /// `core` group is the core group.
    pub fn matches(&self, group: &str, kind: &str) -> bool {
        let group = if group == "core" { "" } else { group };
        self.group == group && self.kind == kind
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            return f.write_str(&self.kind);
        }
        write!(f, "{}.{}", self.kind, self.group)
    }
}

// === impl ObjectSource ===

impl ObjectSource {
    pub fn new(gk: GroupKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: gk.group,
            kind: gk.kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Builds the source of a typed Kubernetes object.
    pub fn of<T>(obj: &T) -> Self
    where
        T: Resource,
        T::DynamicType: Default,
    {
        Self::new(
            GroupKind::of::<T>(),
            obj.namespace().unwrap_or_default(),
            obj.name_any(),
        )
    }

    pub fn group_kind(&self) -> GroupKind {
        GroupKind {
            group: self.group.clone(),
            kind: self.kind.clone(),
        }
    }

    pub fn is_kind<T>(&self) -> bool
    where
        T: Resource,
        T::DynamicType: Default,
    {
        self.group_kind() == GroupKind::of::<T>()
    }
}

impl fmt::Display for ObjectSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.group_kind(), self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_controller_k8s_api::{HttpRoute, ObjectMeta, Service};

    #[test]
    fn core_group_is_empty() {
        assert_eq!(GroupKind::of::<Service>(), GroupKind::new("core", "Service"));
        assert!(GroupKind::of::<Service>().matches("", "Service"));
        assert_eq!(GroupKind::of::<Service>().to_string(), "Service");
    }

    #[test]
    fn source_of_typed_object() {
        let route = HttpRoute {
            metadata: ObjectMeta {
                namespace: Some("default".to_string()),
                name: Some("foo".to_string()),
                ..Default::default()
            },
            spec: Default::default(),
            status: None,
        };
        let src = ObjectSource::of(&route);
        assert!(src.is_kind::<HttpRoute>());
        assert_eq!(
            src.to_string(),
            "HTTPRoute.gateway.networking.k8s.io default/foo"
        );
    }
}
