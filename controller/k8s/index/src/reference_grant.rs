use ahash::AHashMap as HashMap;
use gateway_controller_core::{GroupKind, ObjectSource, ReferenceError};
use gateway_controller_k8s_api::{ReferenceGrant, ResourceExt};
use std::sync::Arc;

/// The ReferenceGrants of every namespace, indexed by the namespace they
/// grant access into.
#[derive(Clone, Debug, Default)]
pub struct ReferenceGrants {
    by_namespace: HashMap<String, HashMap<String, Arc<Grant>>>,
}

#[derive(Debug, PartialEq, Eq)]
struct Grant {
    from: Vec<(GroupKind, String)>,
    to: Vec<(GroupKind, Option<String>)>,
}

// === impl ReferenceGrants ===

impl ReferenceGrants {
    pub(crate) fn apply(&mut self, grant: ReferenceGrant) {
        let namespace = grant.namespace().unwrap_or_default();
        let name = grant.name_unchecked();
        let grant = Grant {
            from: grant
                .spec
                .from
                .into_iter()
                .map(|f| (GroupKind::new(f.group, f.kind), f.namespace))
                .collect(),
            to: grant
                .spec
                .to
                .into_iter()
                .map(|t| (GroupKind::new(t.group, t.kind), t.name.filter(|n| !n.is_empty())))
                .collect(),
        };
        self.by_namespace
            .entry(namespace)
            .or_default()
            .insert(name, Arc::new(grant));
    }

    pub(crate) fn delete(&mut self, namespace: &str, name: &str) {
        if let Some(grants) = self.by_namespace.get_mut(namespace) {
            grants.remove(name);
            if grants.is_empty() {
                self.by_namespace.remove(namespace);
            }
        }
    }

    pub(crate) fn len(&self, namespace: &str) -> usize {
        self.by_namespace.get(namespace).map_or(0, |g| g.len())
    }

    /// Returns true if `from` may reference `to`. References within a
    /// namespace are always permitted; references across namespaces require a
    /// grant in the target's namespace naming the source's kind and
    /// namespace and either the target's kind or the target itself.
    pub fn permits(&self, from: &ObjectSource, to: &ObjectSource) -> bool {
        if from.namespace == to.namespace {
            return true;
        }
        let Some(grants) = self.by_namespace.get(&to.namespace) else {
            return false;
        };
        let from_gk = from.group_kind();
        let to_gk = to.group_kind();
        grants.values().any(|grant| {
            let from_ok = grant
                .from
                .iter()
                .any(|(gk, ns)| *gk == from_gk && *ns == from.namespace);
            let to_ok = grant.to.iter().any(|(gk, name)| {
                *gk == to_gk && name.as_deref().map_or(true, |n| n == to.name)
            });
            from_ok && to_ok
        })
    }

    pub fn check(&self, from: &ObjectSource, to: &ObjectSource) -> Result<(), ReferenceError> {
        if self.permits(from, to) {
            return Ok(());
        }
        Err(ReferenceError::MissingReferenceGrant(to.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_controller_k8s_api::{
        reference_grant::{ReferenceGrantFrom, ReferenceGrantSpec, ReferenceGrantTo},
        HttpRoute, ObjectMeta, Secret, Service,
    };

    fn grant(ns: &str, name: &str, from_ns: &str, to: Option<&str>) -> ReferenceGrant {
        ReferenceGrant {
            metadata: ObjectMeta {
                namespace: Some(ns.to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: ReferenceGrantSpec {
                from: vec![ReferenceGrantFrom {
                    group: "gateway.networking.k8s.io".to_string(),
                    kind: "HTTPRoute".to_string(),
                    namespace: from_ns.to_string(),
                }],
                to: vec![ReferenceGrantTo {
                    group: "".to_string(),
                    kind: "Service".to_string(),
                    name: to.map(str::to_string),
                }],
            },
        }
    }

    fn route(ns: &str) -> ObjectSource {
        ObjectSource::new(GroupKind::of::<HttpRoute>(), ns, "route")
    }

    fn svc(ns: &str, name: &str) -> ObjectSource {
        ObjectSource::new(GroupKind::of::<Service>(), ns, name)
    }

    #[test]
    fn same_namespace_is_always_permitted() {
        let grants = ReferenceGrants::default();
        assert!(grants.permits(&route("a"), &svc("a", "web")));
        assert!(!grants.permits(&route("a"), &svc("b", "web")));
        assert_eq!(
            grants.check(&route("a"), &svc("b", "web")),
            Err(ReferenceError::MissingReferenceGrant(svc("b", "web")))
        );
    }

    #[test]
    fn grants_match_kind_namespace_and_name() {
        let mut grants = ReferenceGrants::default();
        grants.apply(grant("b", "any-service", "a", None));
        grants.apply(grant("c", "one-service", "a", Some("web")));

        assert!(grants.permits(&route("a"), &svc("b", "anything")));
        assert!(grants.permits(&route("a"), &svc("c", "web")));
        assert!(!grants.permits(&route("a"), &svc("c", "other")));
        assert!(!grants.permits(&route("z"), &svc("b", "web")));
        assert!(!grants.permits(
            &route("a"),
            &ObjectSource::new(GroupKind::of::<Secret>(), "b", "tls")
        ));

        grants.delete("b", "any-service");
        assert!(!grants.permits(&route("a"), &svc("b", "anything")));
        assert_eq!(grants.len("b"), 0);
        assert_eq!(grants.len("c"), 1);
    }
}
