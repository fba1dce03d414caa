use crate::{
    backend::BackendIndex,
    gateway,
    policy::{PolicyCtx, PolicyIndex, RawPolicy},
    routes,
    secrets::SecretData,
    ReferenceGrants, Snapshot,
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use gateway_controller_core::{
    oidc::OidcProviders,
    source::{sort_routes, GatewaySource, RouteSource},
    GroupKind, ObjectSource, TranslatorSettings,
};
use gateway_controller_k8s_api::{
    policy::PolicyStatus, Backend, BackendConfigPolicy, ConfigMap, Gateway, GatewayExtension,
    GrpcRoute, HttpRoute, InferencePool, Labels, ListenerPolicy, Namespace, ReferenceGrant,
    Resource, ResourceExt, Secret, Service, TcpRoute, TlsRoute, TrafficPolicy,
};
use parking_lot::RwLock;
use std::{collections::BTreeMap, sync::Arc};

pub type SharedIndex = Arc<RwLock<Index>>;

/// Holds every watched resource the translator consumes.
///
/// Each watch event bumps [`Index::revision`], so that callers can skip
/// translation passes when nothing changed.
#[derive(Debug)]
pub struct Index {
    controller_name: String,
    revision: u64,

    gateways: HashMap<ObjectSource, (Arc<GatewaySource>, Labels)>,
    routes: HashMap<ObjectSource, Arc<RouteSource>>,
    grants: ReferenceGrants,
    backends: BackendIndex,
    secrets: HashMap<ObjectSource, Arc<SecretData>>,
    config_maps: HashMap<ObjectSource, Arc<BTreeMap<String, String>>>,
    policies: HashMap<ObjectSource, RawPolicy>,
    extensions: HashMap<ObjectSource, Arc<GatewayExtension>>,
    namespaces: HashMap<String, Labels>,

    /// Policies whose status holds an ancestor written by this controller.
    reported_policies: HashSet<ObjectSource>,
}

// === impl Index ===

impl Index {
    pub fn new(controller_name: impl Into<String>) -> Self {
        Self {
            controller_name: controller_name.into(),
            revision: 0,
            gateways: HashMap::default(),
            routes: HashMap::default(),
            grants: ReferenceGrants::default(),
            backends: BackendIndex::default(),
            secrets: HashMap::default(),
            config_maps: HashMap::default(),
            policies: HashMap::default(),
            extensions: HashMap::default(),
            namespaces: HashMap::default(),
            reported_policies: HashSet::default(),
        }
    }

    pub fn shared(controller_name: impl Into<String>) -> SharedIndex {
        Arc::new(RwLock::new(Self::new(controller_name)))
    }

    /// A counter incremented by every applied or deleted resource.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// The issuer URIs of every OAuth2 GatewayExtension, for OIDC discovery.
    pub fn oauth2_issuers(&self) -> Vec<String> {
        let mut issuers = self
            .extensions
            .values()
            .filter_map(|ext| ext.spec.oauth2.as_ref())
            .map(|p| p.issuer_uri.clone())
            .collect::<Vec<_>>();
        issuers.sort();
        issuers.dedup();
        issuers
    }

    /// Builds an immutable snapshot, translating every policy against the
    /// current GatewayExtensions, Secrets and backends.
    pub fn snapshot(&self, settings: &TranslatorSettings, oidc: &dyn OidcProviders) -> Snapshot {
        let ctx = PolicyCtx {
            settings,
            extensions: &self.extensions,
            secrets: &self.secrets,
            backends: &self.backends,
            grants: &self.grants,
            oidc,
        };
        let policies = PolicyIndex::new(self.policies.values().map(|p| p.translate(&ctx)));

        let mut gateways = self
            .gateways
            .values()
            .map(|(gw, _)| gw.clone())
            .collect::<Vec<_>>();
        gateways.sort_by(|a, b| a.source.cmp(&b.source));

        let mut routes = self.routes.values().cloned().collect::<Vec<_>>();
        sort_routes(&mut routes);

        let mut reported_policies = self.reported_policies.iter().cloned().collect::<Vec<_>>();
        reported_policies.sort();

        Snapshot {
            settings: settings.clone(),
            gateways,
            gateway_labels: self
                .gateways
                .iter()
                .map(|(src, (_, labels))| (src.clone(), labels.clone()))
                .collect(),
            routes,
            namespaces: self.namespaces.clone(),
            grants: self.grants.clone(),
            backends: self.backends.clone(),
            secrets: self.secrets.clone(),
            config_maps: self.config_maps.clone(),
            policies,
            reported_policies,
        }
    }

    /// Returns the number of indexed objects of `kind` in `namespace`.
    pub fn len_of(&self, kind: &str, namespace: &str) -> usize {
        let count = |sources: &mut dyn Iterator<Item = &ObjectSource>| {
            sources
                .filter(|s| s.kind == kind && s.namespace == namespace)
                .count()
        };
        match kind {
            "Gateway" => count(&mut self.gateways.keys()),
            "HTTPRoute" | "GRPCRoute" | "TCPRoute" | "TLSRoute" => count(&mut self.routes.keys()),
            "TrafficPolicy" | "ListenerPolicy" | "BackendConfigPolicy" => {
                count(&mut self.policies.keys())
            }
            "GatewayExtension" => count(&mut self.extensions.keys()),
            "Secret" => count(&mut self.secrets.keys()),
            "ConfigMap" => count(&mut self.config_maps.keys()),
            "Service" | "Backend" | "InferencePool" => self.backends.len(kind, namespace),
            "ReferenceGrant" => self.grants.len(namespace),
            _ => 0,
        }
    }

    fn bump(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    fn apply_route(&mut self, route: RouteSource) {
        tracing::debug!(route = %route.source, "indexing route");
        if let Err(error) = &route.spec {
            tracing::info!(route = %route.source, %error, "route has invalid rules");
        }
        self.routes.insert(route.source.clone(), Arc::new(route));
        self.bump();
    }

    fn delete_route<T>(&mut self, namespace: String, name: String)
    where
        T: Resource,
        T::DynamicType: Default,
    {
        let source = ObjectSource::new(GroupKind::of::<T>(), namespace, name);
        tracing::debug!(route = %source, "deleting route");
        self.routes.remove(&source);
        self.bump();
    }

    fn apply_policy(
        &mut self,
        source: ObjectSource,
        status: Option<&PolicyStatus>,
        policy: RawPolicy,
    ) {
        tracing::debug!(policy = %source, "indexing policy");
        let reported = status
            .map(|s| s.ancestors.iter().any(|a| a.controller_name == self.controller_name))
            .unwrap_or(false);
        if reported {
            self.reported_policies.insert(source.clone());
        } else {
            self.reported_policies.remove(&source);
        }
        self.policies.insert(source, policy);
        self.bump();
    }

    fn delete_policy<T>(&mut self, namespace: String, name: String)
    where
        T: Resource,
        T::DynamicType: Default,
    {
        let source = ObjectSource::new(GroupKind::of::<T>(), namespace, name);
        tracing::debug!(policy = %source, "deleting policy");
        self.policies.remove(&source);
        self.reported_policies.remove(&source);
        self.bump();
    }
}

impl kubert::index::IndexNamespacedResource<Gateway> for Index {
    fn apply(&mut self, gateway: Gateway) {
        let labels = Labels::from(gateway.metadata.labels.clone());
        let gateway = gateway::convert(gateway);
        tracing::debug!(
            gateway = %gateway.source,
            listeners = gateway.listeners.len(),
            "indexing gateway"
        );
        self.gateways
            .insert(gateway.source.clone(), (Arc::new(gateway), labels));
        self.bump();
    }

    fn delete(&mut self, namespace: String, name: String) {
        let source = ObjectSource::new(GroupKind::of::<Gateway>(), namespace, name);
        tracing::debug!(gateway = %source, "deleting gateway");
        self.gateways.remove(&source);
        self.bump();
    }
}

impl kubert::index::IndexNamespacedResource<HttpRoute> for Index {
    fn apply(&mut self, route: HttpRoute) {
        self.apply_route(routes::convert_http(route))
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.delete_route::<HttpRoute>(namespace, name)
    }
}

impl kubert::index::IndexNamespacedResource<GrpcRoute> for Index {
    fn apply(&mut self, route: GrpcRoute) {
        self.apply_route(routes::convert_grpc(route))
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.delete_route::<GrpcRoute>(namespace, name)
    }
}

impl kubert::index::IndexNamespacedResource<TcpRoute> for Index {
    fn apply(&mut self, route: TcpRoute) {
        self.apply_route(routes::convert_tcp(route))
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.delete_route::<TcpRoute>(namespace, name)
    }
}

impl kubert::index::IndexNamespacedResource<TlsRoute> for Index {
    fn apply(&mut self, route: TlsRoute) {
        self.apply_route(routes::convert_tls(route))
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.delete_route::<TlsRoute>(namespace, name)
    }
}

impl kubert::index::IndexNamespacedResource<ReferenceGrant> for Index {
    fn apply(&mut self, grant: ReferenceGrant) {
        tracing::debug!(
            namespace = ?grant.namespace(),
            name = %grant.name_any(),
            "indexing ReferenceGrant"
        );
        self.grants.apply(grant);
        self.bump();
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.grants.delete(&namespace, &name);
        self.bump();
    }
}

impl kubert::index::IndexNamespacedResource<Secret> for Index {
    fn apply(&mut self, secret: Secret) {
        let source = ObjectSource::of(&secret);
        let data = SecretData {
            type_: secret.type_,
            data: secret
                .data
                .unwrap_or_default()
                .into_iter()
                .map(|(k, v)| (k, v.0))
                .collect(),
        };
        self.secrets.insert(source, Arc::new(data));
        self.bump();
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.secrets
            .remove(&ObjectSource::new(GroupKind::of::<Secret>(), namespace, name));
        self.bump();
    }
}

impl kubert::index::IndexNamespacedResource<ConfigMap> for Index {
    fn apply(&mut self, cm: ConfigMap) {
        let source = ObjectSource::of(&cm);
        self.config_maps
            .insert(source, Arc::new(cm.data.unwrap_or_default()));
        self.bump();
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.config_maps
            .remove(&ObjectSource::new(GroupKind::of::<ConfigMap>(), namespace, name));
        self.bump();
    }
}

impl kubert::index::IndexNamespacedResource<Service> for Index {
    fn apply(&mut self, service: Service) {
        self.backends.apply_service(service);
        self.bump();
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.backends.delete_service(&namespace, &name);
        self.bump();
    }

    fn reset(&mut self, services: Vec<Service>, _: kubert::index::NamespacedRemoved) {
        self.backends.reset_services(services);
        self.bump();
    }
}

impl kubert::index::IndexNamespacedResource<Backend> for Index {
    fn apply(&mut self, backend: Backend) {
        self.backends.apply_backend(backend);
        self.bump();
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.backends.delete_backend(&namespace, &name);
        self.bump();
    }

    fn reset(&mut self, backends: Vec<Backend>, _: kubert::index::NamespacedRemoved) {
        self.backends.reset_backends(backends);
        self.bump();
    }
}

impl kubert::index::IndexNamespacedResource<InferencePool> for Index {
    fn apply(&mut self, pool: InferencePool) {
        self.backends.apply_inference_pool(pool);
        self.bump();
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.backends.delete_inference_pool(&namespace, &name);
        self.bump();
    }

    fn reset(&mut self, pools: Vec<InferencePool>, _: kubert::index::NamespacedRemoved) {
        self.backends.reset_inference_pools(pools);
        self.bump();
    }
}

impl kubert::index::IndexNamespacedResource<TrafficPolicy> for Index {
    fn apply(&mut self, policy: TrafficPolicy) {
        let source = ObjectSource::of(&policy);
        let status = policy.status.clone();
        self.apply_policy(source, status.as_ref(), RawPolicy::Traffic(Arc::new(policy)))
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.delete_policy::<TrafficPolicy>(namespace, name)
    }
}

impl kubert::index::IndexNamespacedResource<ListenerPolicy> for Index {
    fn apply(&mut self, policy: ListenerPolicy) {
        let source = ObjectSource::of(&policy);
        let status = policy.status.clone();
        self.apply_policy(source, status.as_ref(), RawPolicy::Listener(Arc::new(policy)))
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.delete_policy::<ListenerPolicy>(namespace, name)
    }
}

impl kubert::index::IndexNamespacedResource<BackendConfigPolicy> for Index {
    fn apply(&mut self, policy: BackendConfigPolicy) {
        let source = ObjectSource::of(&policy);
        let status = policy.status.clone();
        self.apply_policy(
            source,
            status.as_ref(),
            RawPolicy::BackendConfig(Arc::new(policy)),
        )
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.delete_policy::<BackendConfigPolicy>(namespace, name)
    }
}

impl kubert::index::IndexNamespacedResource<GatewayExtension> for Index {
    fn apply(&mut self, ext: GatewayExtension) {
        let source = ObjectSource::of(&ext);
        tracing::debug!(extension = %source, "indexing GatewayExtension");
        self.extensions.insert(source, Arc::new(ext));
        self.bump();
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.extensions.remove(&ObjectSource::new(
            GroupKind::of::<GatewayExtension>(),
            namespace,
            name,
        ));
        self.bump();
    }
}

impl kubert::index::IndexClusterResource<Namespace> for Index {
    fn apply(&mut self, ns: Namespace) {
        let name = ns.name_any();
        self.namespaces.insert(name, Labels::from(ns.metadata.labels));
        self.bump();
    }

    fn delete(&mut self, name: String) {
        self.namespaces.remove(&name);
        self.bump();
    }
}
