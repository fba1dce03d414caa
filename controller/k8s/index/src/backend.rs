use crate::ReferenceGrants;
use ahash::AHashMap as HashMap;
use gateway_controller_core::{
    annotations,
    ir::{BackendKind, BackendObjectIr},
    source::ObjectRef,
    GroupKind, ObjectSource, ReferenceError,
};
use gateway_controller_k8s_api::{Backend, InferencePool, Labels, Service};
use std::{collections::BTreeMap, sync::Arc};

/// The Services, Backends and InferencePools that routes and extensions
/// forward to.
#[derive(Clone, Debug, Default)]
pub struct BackendIndex {
    services: HashMap<ObjectSource, Arc<ServiceSource>>,
    backends: HashMap<ObjectSource, Arc<BackendSource>>,
    pools: HashMap<ObjectSource, Arc<PoolSource>>,
}

/// A backend reference resolved to an object and port. Policies are attached
/// by the snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedBackend {
    pub source: ObjectSource,
    pub labels: Labels,
    pub port: u16,
    pub kind: BackendKind,
    pub app_protocol: Option<String>,
    pub disable_istio_auto_mtls: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, PartialEq)]
struct ServiceSource {
    labels: Labels,
    annotations: BTreeMap<String, String>,
    ports: Vec<(u16, Option<String>)>,
    external_name: bool,
}

#[derive(Debug, PartialEq)]
struct BackendSource {
    labels: Labels,
    annotations: BTreeMap<String, String>,
    kind: Result<BackendKind, String>,
    app_protocol: Option<String>,
}

#[derive(Debug, PartialEq)]
struct PoolSource {
    labels: Labels,
    annotations: BTreeMap<String, String>,
    selector: BTreeMap<String, String>,
    target_ports: Vec<u16>,
    picker: EndpointPicker,
}

#[derive(Debug, PartialEq)]
struct EndpointPicker {
    group: String,
    kind: String,
    name: String,
    port: Option<u16>,
}

// === impl BackendIndex ===

impl BackendIndex {
    pub(crate) fn apply_service(&mut self, service: Service) {
        let source = ObjectSource::of(&service);
        let ports = service
            .spec
            .iter()
            .flat_map(|spec| spec.ports.iter().flatten())
            .filter_map(|p| {
                let port = u16::try_from(p.port).ok()?;
                Some((port, p.app_protocol.clone()))
            })
            .collect();
        let external_name = service
            .spec
            .as_ref()
            .and_then(|spec| spec.type_.as_deref())
            == Some("ExternalName");
        let labels = Labels::from(service.metadata.labels);
        let annotations = service.metadata.annotations.unwrap_or_default();
        self.services.insert(
            source,
            Arc::new(ServiceSource {
                labels,
                annotations,
                ports,
                external_name,
            }),
        );
    }

    pub(crate) fn apply_backend(&mut self, backend: Backend) {
        let source = ObjectSource::of(&backend);
        let spec = &backend.spec;
        let (kind, app_protocol) = match (&spec.static_, &spec.dynamic_forward_proxy) {
            (Some(st), None) => (
                Ok(BackendKind::Static {
                    hosts: st.hosts.iter().map(|h| (h.host.clone(), h.port)).collect(),
                }),
                st.app_protocol.clone(),
            ),
            (None, Some(dfp)) => (
                Ok(BackendKind::DynamicForwardProxy {
                    enable_tls: dfp.enable_tls.unwrap_or(false),
                }),
                None,
            ),
            _ => (
                Err("exactly one of static or dynamicForwardProxy must be set".to_string()),
                None,
            ),
        };
        if let Err(error) = &kind {
            tracing::info!(%source, %error, "invalid Backend");
        }
        self.backends.insert(
            source,
            Arc::new(BackendSource {
                labels: Labels::from(backend.metadata.labels),
                annotations: backend.metadata.annotations.unwrap_or_default(),
                kind,
                app_protocol,
            }),
        );
    }

    pub(crate) fn apply_inference_pool(&mut self, pool: InferencePool) {
        let source = ObjectSource::of(&pool);
        let spec = pool.spec;
        let picker = spec.endpoint_picker_ref;
        self.pools.insert(
            source,
            Arc::new(PoolSource {
                labels: Labels::from(pool.metadata.labels),
                annotations: pool.metadata.annotations.unwrap_or_default(),
                selector: spec.selector.match_labels,
                target_ports: spec.target_ports.iter().map(|p| p.number).collect(),
                picker: EndpointPicker {
                    group: picker.group.unwrap_or_default(),
                    kind: picker.kind,
                    name: picker.name,
                    port: picker.port.map(|p| p.number),
                },
            }),
        );
    }

    pub(crate) fn delete_service(&mut self, namespace: &str, name: &str) {
        let source = ObjectSource::new(GroupKind::of::<Service>(), namespace, name);
        self.services.remove(&source);
    }

    pub(crate) fn delete_backend(&mut self, namespace: &str, name: &str) {
        let source = ObjectSource::new(GroupKind::of::<Backend>(), namespace, name);
        self.backends.remove(&source);
    }

    pub(crate) fn delete_inference_pool(&mut self, namespace: &str, name: &str) {
        let source = ObjectSource::new(GroupKind::of::<InferencePool>(), namespace, name);
        self.pools.remove(&source);
    }

    pub(crate) fn reset_services(&mut self, services: Vec<Service>) {
        self.services.clear();
        for svc in services {
            self.apply_service(svc);
        }
    }

    pub(crate) fn reset_backends(&mut self, backends: Vec<Backend>) {
        self.backends.clear();
        for backend in backends {
            self.apply_backend(backend);
        }
    }

    pub(crate) fn reset_inference_pools(&mut self, pools: Vec<InferencePool>) {
        self.pools.clear();
        for pool in pools {
            self.apply_inference_pool(pool);
        }
    }

    pub(crate) fn len(&self, kind: &str, namespace: &str) -> usize {
        self.services
            .keys()
            .chain(self.backends.keys())
            .chain(self.pools.keys())
            .filter(|s| s.kind == kind && s.namespace == namespace)
            .count()
    }

    /// Returns the labels of a Service, Backend or InferencePool.
    pub fn labels(&self, source: &ObjectSource) -> Option<Labels> {
        if let Some(svc) = self.services.get(source) {
            return Some(svc.labels.clone());
        }
        if let Some(pool) = self.pools.get(source) {
            return Some(pool.labels.clone());
        }
        self.backends.get(source).map(|b| b.labels.clone())
    }

    /// Resolves a reference from `from` to a Service or Backend.
    ///
    /// Cross-namespace references are checked against `grants` before the
    /// target is looked up. Services require a port; Backends and
    /// InferencePools forbid one.
    pub fn resolve(
        &self,
        from: &ObjectSource,
        target: &ObjectRef,
        port: Option<u16>,
        grants: &ReferenceGrants,
    ) -> Result<ResolvedBackend, ReferenceError> {
        let gk = target.group_kind();
        let source = target.to_source();
        if gk == GroupKind::of::<Service>() {
            grants.check(from, &source)?;
            let svc = self
                .services
                .get(&source)
                .ok_or_else(|| ReferenceError::NotFound(source.clone()))?;
            let port = port.ok_or(ReferenceError::UnresolvedReference)?;
            let (_, app_protocol) = svc
                .ports
                .iter()
                .find(|(p, _)| *p == port)
                .ok_or_else(|| ReferenceError::NotFound(source.clone()))?;
            return Ok(ResolvedBackend {
                labels: svc.labels.clone(),
                port,
                kind: BackendKind::Service,
                app_protocol: app_protocol.clone(),
                disable_istio_auto_mtls: annotations::is_istio_auto_mtls_disabled(&svc.annotations),
                errors: vec![],
                source,
            });
        }

        if gk == GroupKind::of::<Backend>() {
            grants.check(from, &source)?;
            let backend = self
                .backends
                .get(&source)
                .ok_or_else(|| ReferenceError::NotFound(source.clone()))?;
            if port.is_some() {
                return Err(ReferenceError::BackendPortNotAllowed(source));
            }
            let (kind, errors) = match &backend.kind {
                Ok(kind) => (kind.clone(), vec![]),
                Err(e) => (BackendKind::Static { hosts: vec![] }, vec![e.clone()]),
            };
            return Ok(ResolvedBackend {
                labels: backend.labels.clone(),
                port: 0,
                kind,
                app_protocol: backend.app_protocol.clone(),
                disable_istio_auto_mtls: annotations::is_istio_auto_mtls_disabled(
                    &backend.annotations,
                ),
                errors,
                source,
            });
        }

        if gk == GroupKind::of::<InferencePool>() {
            grants.check(from, &source)?;
            let pool = self
                .pools
                .get(&source)
                .ok_or_else(|| ReferenceError::NotFound(source.clone()))?;
            if port.is_some() {
                return Err(ReferenceError::BackendPortNotAllowed(source));
            }
            let errors = self.validate_pool(&source.namespace, pool);
            if !errors.is_empty() {
                tracing::info!(pool = %source, errors = ?errors, "invalid InferencePool");
            }
            let endpoint_picker = ObjectSource::new(
                GroupKind::new(pool.picker.group.clone(), pool.picker.kind.clone()),
                &source.namespace,
                &pool.picker.name,
            );
            return Ok(ResolvedBackend {
                labels: pool.labels.clone(),
                port: pool.target_ports.first().copied().unwrap_or_default(),
                kind: BackendKind::InferencePool {
                    selector: pool.selector.clone(),
                    endpoint_picker,
                },
                app_protocol: None,
                disable_istio_auto_mtls: annotations::is_istio_auto_mtls_disabled(
                    &pool.annotations,
                ),
                errors,
                source,
            });
        }

        tracing::error!(%from, backend = %source, "unknown backend kind");
        Err(ReferenceError::UnknownBackendKind(gk))
    }

    /// Every problem with a pool's target ports and endpoint picker Service.
    fn validate_pool(&self, namespace: &str, pool: &PoolSource) -> Vec<String> {
        let picker = &pool.picker;
        let mut errors = Vec::new();
        if !picker.group.is_empty() && picker.group != "core" {
            errors.push(format!(
                "invalid endpointPickerRef: only the core API group is supported, got {:?}",
                picker.group
            ));
        }
        if picker.kind != "Service" {
            errors.push(format!(
                "invalid endpointPickerRef: kind {:?} is not supported (only Service)",
                picker.kind
            ));
        }
        if pool.target_ports.len() != 1 {
            errors.push("invalid InferencePool: must have exactly one target port".to_string());
        }
        let Some(port) = picker.port else {
            errors.push("invalid endpointPickerRef: port must be specified".to_string());
            return errors;
        };
        let svc = ObjectSource::new(GroupKind::of::<Service>(), namespace, &picker.name);
        let Some(svc) = self.services.get(&svc) else {
            errors.push(format!(
                "invalid endpointPickerRef: Service {namespace}/{} not found",
                picker.name
            ));
            return errors;
        };
        if svc.external_name {
            errors.push(
                "invalid endpointPickerRef: ExternalName Services are not supported".to_string(),
            );
        }
        if !svc.ports.iter().any(|(p, _)| *p == port) {
            errors.push(format!(
                "port {port} not found on Service {namespace}/{}",
                picker.name
            ));
        }
        errors
    }

    /// Resolves a backend reference and returns its cluster name.
    pub fn cluster_name(
        &self,
        from: &ObjectSource,
        target: &ObjectRef,
        port: Option<u16>,
        grants: &ReferenceGrants,
    ) -> Result<String, ReferenceError> {
        let resolved = self.resolve(from, target, port, grants)?;
        Ok(resolved.cluster_name())
    }
}

// === impl ResolvedBackend ===

impl ResolvedBackend {
    pub fn cluster_name(&self) -> String {
        BackendObjectIr::cluster_name_for(
            &self.kind,
            &self.source.namespace,
            &self.source.name,
            self.port,
        )
    }
}
