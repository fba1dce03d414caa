use crate::{
    backend::BackendIndex,
    policy::PolicyIndex,
    secrets::{self, SecretData},
    ReferenceGrants,
};
use ahash::AHashMap as HashMap;
use gateway_controller_core::{
    ir::{BackendObjectIr, BackendRefIr},
    policy::AttachedPolicies,
    source::{BackendRefSource, GatewaySource, ObjectRef, RouteSource},
    tls::{
        CaCertificateError, CaCertificateErrors, ClientCertificateValidationIr, ListenerTlsError,
        TlsCertificate,
    },
    GroupKind, ObjectSource, ReferenceError, TranslatorSettings,
};
use gateway_controller_k8s_api::{ConfigMap, HttpRoute, Labels, Secret};
use std::{collections::BTreeMap, sync::Arc};

/// An immutable view of the index, taken for one translation pass.
///
/// Policies are translated when the snapshot is taken, so every lookup
/// reflects the same generation of GatewayExtensions, Secrets, backends and
/// discovered OIDC providers.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub(crate) settings: TranslatorSettings,
    pub(crate) gateways: Vec<Arc<GatewaySource>>,
    pub(crate) gateway_labels: HashMap<ObjectSource, Labels>,
    pub(crate) routes: Vec<Arc<RouteSource>>,
    pub(crate) namespaces: HashMap<String, Labels>,
    pub(crate) grants: ReferenceGrants,
    pub(crate) backends: BackendIndex,
    pub(crate) secrets: HashMap<ObjectSource, Arc<SecretData>>,
    pub(crate) config_maps: HashMap<ObjectSource, Arc<BTreeMap<String, String>>>,
    pub(crate) policies: PolicyIndex,
    pub(crate) reported_policies: Vec<ObjectSource>,
}

// === impl Snapshot ===

impl Snapshot {
    pub fn settings(&self) -> &TranslatorSettings {
        &self.settings
    }

    /// Every Gateway, ordered by namespace and name.
    pub fn gateways(&self) -> &[Arc<GatewaySource>] {
        &self.gateways
    }

    pub fn gateway(&self, source: &ObjectSource) -> Option<&Arc<GatewaySource>> {
        self.gateways.iter().find(|gw| gw.source == *source)
    }

    /// Every route of every kind, oldest first.
    pub fn routes(&self) -> &[Arc<RouteSource>] {
        &self.routes
    }

    pub fn route(&self, source: &ObjectSource) -> Option<&Arc<RouteSource>> {
        self.routes.iter().find(|r| r.source == *source)
    }

    /// Routes with at least one parent reference naming `gateway`, oldest
    /// first.
    pub fn routes_for_gateway(&self, gateway: &ObjectSource) -> Vec<Arc<RouteSource>> {
        self.routes
            .iter()
            .filter(|r| {
                r.parent_refs
                    .iter()
                    .any(|p| RouteSource::references_gateway(p, gateway))
            })
            .cloned()
            .collect()
    }

    /// HTTPRoutes in `namespace`, oldest first. Used to resolve delegation.
    pub fn http_routes_in<'a>(
        &'a self,
        namespace: &'a str,
    ) -> impl Iterator<Item = &'a Arc<RouteSource>> + 'a {
        self.routes
            .iter()
            .filter(move |r| r.source.namespace == namespace && r.source.is_kind::<HttpRoute>())
    }

    pub fn namespace_labels(&self, namespace: &str) -> Option<&Labels> {
        self.namespaces.get(namespace)
    }

    pub fn grants(&self) -> &ReferenceGrants {
        &self.grants
    }

    pub fn policies(&self) -> &PolicyIndex {
        &self.policies
    }

    /// Policies whose status reports an ancestor for this controller. Their
    /// status is cleared when they no longer attach to anything.
    pub fn previously_reported_policies(&self) -> &[ObjectSource] {
        &self.reported_policies
    }

    /// Returns the policies attached to `target` (a Gateway, route, Service or
    /// Backend), or to its section `section`.
    pub fn policies_for(&self, target: &ObjectSource, section: Option<&str>) -> AttachedPolicies {
        let labels = self.labels_of(target).unwrap_or_default();
        self.policies.attached_to(target, &labels, section)
    }

    fn labels_of(&self, target: &ObjectSource) -> Option<Labels> {
        if let Some(labels) = self.gateway_labels.get(target) {
            return Some(labels.clone());
        }
        if let Some(route) = self.route(target) {
            return Some(route.labels.clone());
        }
        self.backends.labels(target)
    }

    /// Resolves a route or listener backend reference, attaching the
    /// BackendConfigPolicies that target the backend.
    pub fn resolve_backend(&self, from: &ObjectSource, backend: &BackendRefSource) -> BackendRefIr {
        let resolved = self
            .backends
            .resolve(from, &backend.target, backend.port, &self.grants)
            .map(|resolved| {
                let cluster_name = resolved.cluster_name();
                let attached_policies = self.policies_for(&resolved.source, None);
                Arc::new(BackendObjectIr {
                    source: resolved.source,
                    port: resolved.port,
                    cluster_name,
                    kind: resolved.kind,
                    app_protocol: resolved.app_protocol,
                    disable_istio_auto_mtls: resolved.disable_istio_auto_mtls,
                    attached_policies,
                    errors: resolved.errors,
                })
            });
        if let Err(error) = &resolved {
            tracing::debug!(
                %from,
                backend = ?backend.target,
                %error,
                "backend reference unresolved"
            );
        }
        BackendRefIr {
            weight: backend.weight,
            backend: resolved,
        }
    }

    /// Fetches and validates the certificate Secret a listener references.
    pub fn tls_certificate(
        &self,
        gateway: &ObjectSource,
        cert_ref: &ObjectRef,
    ) -> Result<TlsCertificate, ListenerTlsError> {
        let source = cert_ref.to_source();
        if source.group_kind() != GroupKind::of::<Secret>() {
            return Err(ListenerTlsError::CertificateRef(
                ReferenceError::UnresolvedReference,
            ));
        }
        self.grants
            .check(gateway, &source)
            .map_err(ListenerTlsError::CertificateRef)?;
        let secret = self
            .secrets
            .get(&source)
            .ok_or_else(|| {
                ListenerTlsError::CertificateRef(ReferenceError::NotFound(source.clone()))
            })?;
        let cert = secrets::validate_tls_secret(&source.namespace, &source.name, &secret.data)?;
        Ok(cert)
    }

    /// Fetches the CA bundles named by a client certificate validation.
    ///
    /// Returns every bundle that resolved along with an error for each that
    /// did not.
    pub fn ca_certificates(
        &self,
        gateway: &ObjectSource,
        validation: &ClientCertificateValidationIr,
    ) -> (Vec<String>, CaCertificateErrors) {
        let mut bundles = Vec::new();
        let mut errors = Vec::new();
        for r in &validation.ca_certificate_refs {
            let namespace = r.namespace.clone().unwrap_or_else(|| gateway.namespace.clone());
            match self.ca_certificate(gateway, &r.group, &r.kind, &namespace, &r.name) {
                Ok(pem) => bundles.push(pem),
                Err(e) => errors.push(e),
            }
        }
        (bundles, CaCertificateErrors(errors))
    }

    fn ca_certificate(
        &self,
        gateway: &ObjectSource,
        group: &str,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<String, CaCertificateError> {
        let gk = GroupKind::new(group, kind);
        let source = ObjectSource::new(gk.clone(), namespace, name);

        let pem: Vec<u8> = if gk == GroupKind::of::<ConfigMap>() {
            if !self.grants.permits(gateway, &source) {
                return Err(CaCertificateError::RefNotPermitted {
                    kind: kind.to_string(),
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                });
            }
            let data = self
                .config_maps
                .get(&source)
                .ok_or_else(|| CaCertificateError::InvalidRef {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                })?;
            data.get(secrets::CA_CERT_KEY)
                .map(|v| v.as_bytes().to_vec())
                .unwrap_or_default()
        } else if gk == GroupKind::of::<Secret>() {
            self.grants
                .check(gateway, &source)
                .map_err(CaCertificateError::Secret)?;
            let secret = self
                .secrets
                .get(&source)
                .ok_or_else(|| {
                    CaCertificateError::Secret(ReferenceError::NotFound(source.clone()))
                })?;
            secret
                .data
                .get(secrets::CA_CERT_KEY)
                .cloned()
                .unwrap_or_default()
        } else {
            return Err(CaCertificateError::InvalidKind {
                kind: kind.to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        };

        if pem.is_empty() {
            return Err(CaCertificateError::MissingKey {
                kind: kind.to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }
        secrets::validate_ca_bundle(&pem).map_err(|e| CaCertificateError::InvalidCertificate {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            message: e.to_string(),
        })
    }
}
