use crate::Index;
use kube::ResourceExt;
use kubert::index::NamespacedRemoved;
use parking_lot::RwLock;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};
use std::sync::Arc;

/// Wraps a shared index to count the watch events applied to it and track
/// the number of indexed objects per namespace and kind.
pub struct IndexMetrics<T> {
    inner: T,

    index_size: Family<NamespacedIndexLabels, Gauge>,
    index_applies: Family<NamespacedIndexLabels, Counter>,
    index_deletes: Family<NamespacedIndexLabels, Counter>,
    index_resets: Family<IndexLabels, Counter>,
    index_revision: Gauge,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct NamespacedIndexLabels {
    namespace: String,
    kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct IndexLabels {
    kind: String,
}

pub trait SizedIndex<R> {
    fn size(&self, namespace: &str) -> usize;

    fn revision(&self) -> u64;
}

impl<R> SizedIndex<R> for Index
where
    R: ResourceExt<DynamicType = ()>,
{
    fn size(&self, namespace: &str) -> usize {
        self.len_of(&R::kind(&()), namespace)
    }

    fn revision(&self) -> u64 {
        Index::revision(self)
    }
}

impl<T, R> SizedIndex<R> for Arc<RwLock<T>>
where
    T: SizedIndex<R>,
{
    fn size(&self, namespace: &str) -> usize {
        self.read().size(namespace)
    }

    fn revision(&self) -> u64 {
        self.read().revision()
    }
}

// === impl IndexMetrics ===

impl<T> IndexMetrics<T> {
    pub fn register(inner: T, prom: &mut Registry) -> Self {
        let index_size = Family::default();
        prom.register(
            "index_size",
            "Gauge of the number of resources in the index",
            index_size.clone(),
        );

        let index_applies = Family::default();
        prom.register(
            "index_applies",
            "Count of applies to the index",
            index_applies.clone(),
        );

        let index_deletes = Family::default();
        prom.register(
            "index_deletes",
            "Count of deletes to the index",
            index_deletes.clone(),
        );

        let index_resets = Family::default();
        prom.register(
            "index_resets",
            "Count of resets to the index",
            index_resets.clone(),
        );

        let index_revision = Gauge::default();
        prom.register(
            "index_revision",
            "The index revision, incremented by every change",
            index_revision.clone(),
        );

        Self {
            inner,
            index_size,
            index_applies,
            index_deletes,
            index_resets,
            index_revision,
        }
    }

    pub fn shared(self) -> Arc<RwLock<Self>> {
        Arc::new(RwLock::new(self))
    }

    fn observe<R>(&self, kind: &str, namespace: String)
    where
        T: SizedIndex<R>,
    {
        let size = SizedIndex::<R>::size(&self.inner, &namespace);
        self.index_size
            .get_or_create(&NamespacedIndexLabels {
                namespace,
                kind: kind.to_string(),
            })
            .set(size as i64);
        self.index_revision
            .set(SizedIndex::<R>::revision(&self.inner) as i64);
    }
}

impl<R, T> kubert::index::IndexNamespacedResource<R> for IndexMetrics<Arc<RwLock<T>>>
where
    T: SizedIndex<R>,
    T: kubert::index::IndexNamespacedResource<R>,
    R: ResourceExt<DynamicType = ()>,
{
    fn apply(&mut self, resource: R) {
        let kind = R::kind(&());
        let namespace = resource.namespace().unwrap_or_default();
        self.index_applies
            .get_or_create(&NamespacedIndexLabels {
                namespace: namespace.clone(),
                kind: kind.to_string(),
            })
            .inc();
        self.inner.write().apply(resource);
        self.observe::<R>(&kind, namespace);
    }

    fn delete(&mut self, namespace: String, name: String) {
        let kind = R::kind(&());
        self.index_deletes
            .get_or_create(&NamespacedIndexLabels {
                namespace: namespace.clone(),
                kind: kind.to_string(),
            })
            .inc();
        self.inner.write().delete(namespace.clone(), name);
        self.observe::<R>(&kind, namespace);
    }

    fn reset(&mut self, resources: Vec<R>, removed: NamespacedRemoved) {
        let kind = R::kind(&());
        let mut namespaces = resources
            .iter()
            .flat_map(|r| r.namespace())
            .chain(removed.keys().cloned())
            .collect::<Vec<_>>();
        namespaces.sort();
        namespaces.dedup();
        self.index_resets
            .get_or_create(&IndexLabels {
                kind: kind.to_string(),
            })
            .inc();
        self.inner.write().reset(resources, removed);
        for ns in namespaces {
            self.observe::<R>(&kind, ns);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_controller_k8s_api::{ObjectMeta, Secret};
    use kubert::index::IndexNamespacedResource;
    use prometheus_client::encoding::text::encode;

    #[test]
    fn tracks_sizes_and_revision() {
        let index = Index::shared("kgateway.dev/kgateway");
        let mut prom = Registry::default();
        let mut metrics = IndexMetrics::register(index.clone(), &mut prom);

        let secret = |name: &str| Secret {
            metadata: ObjectMeta {
                namespace: Some("default".to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        metrics.apply(secret("a"));
        metrics.apply(secret("b"));
        IndexNamespacedResource::<Secret>::delete(
            &mut metrics,
            "default".to_string(),
            "a".to_string(),
        );
        assert_eq!(index.read().len_of("Secret", "default"), 1);
        assert_eq!(index.read().revision(), 3);

        let mut out = String::new();
        encode(&mut out, &prom).expect("encodes");
        assert!(
            out.contains(r#"index_size{namespace="default",kind="Secret"} 1"#),
            "{out}"
        );
        assert!(out.contains("index_revision 3"), "{out}");
    }
}
