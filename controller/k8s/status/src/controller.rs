use crate::patch::{merge_entries, StatusUpdate, Update};
use gateway_controller_core::ObjectSource;
use gateway_controller_k8s_api::{
    self as k8s, policy::PolicyAncestorStatus, routes::RouteParentStatus, BackendConfigPolicy,
    Gateway, GrpcRoute, HttpRoute, ListenerPolicy, TcpRoute, TlsRoute, TrafficPolicy,
};
use k8s_openapi::NamespaceResourceScope;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{fmt, time::Duration};
use tokio::{sync::mpsc::UnboundedReceiver, time};

const FIELD_MANAGER: &str = "gateway-controller";

/// Applies status updates through the Kubernetes API, one at a time.
pub struct Controller {
    client: k8s::Client,
    controller_name: String,
    updates: UnboundedReceiver<Update>,
    patch_timeout: Duration,
    metrics: ControllerMetrics,
}

#[derive(Clone, Debug)]
pub struct ControllerMetrics {
    patch_succeeded: Family<PatchLabels, Counter>,
    patch_failed: Family<PatchLabels, Counter>,
    patch_timeout: Family<PatchLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct PatchLabels {
    kind: String,
}

#[derive(Debug, thiserror::Error)]
enum PatchError {
    #[error(transparent)]
    Api(#[from] kube::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("unsupported kind {0}")]
    UnsupportedKind(String),
}

/// Resources whose status is a list of entries written by several
/// controllers, such as route parents and policy ancestors.
trait SharedStatus:
    kube::Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + DeserializeOwned
    + fmt::Debug
{
    type Entry: Serialize;

    const FIELD: &'static str;

    fn entries(self) -> Vec<Self::Entry>;

    fn owner(entry: &Self::Entry) -> &str;
}

macro_rules! route_status {
    ($($ty:ty),+) => {
        $(
            impl SharedStatus for $ty {
                type Entry = RouteParentStatus;
                const FIELD: &'static str = "parents";

                fn entries(self) -> Vec<RouteParentStatus> {
                    self.status.map(|s| s.parents).unwrap_or_default()
                }

                fn owner(entry: &RouteParentStatus) -> &str {
                    &entry.controller_name
                }
            }
        )+
    };
}

macro_rules! policy_status {
    ($($ty:ty),+) => {
        $(
            impl SharedStatus for $ty {
                type Entry = PolicyAncestorStatus;
                const FIELD: &'static str = "ancestors";

                fn entries(self) -> Vec<PolicyAncestorStatus> {
                    self.status.map(|s| s.ancestors).unwrap_or_default()
                }

                fn owner(entry: &PolicyAncestorStatus) -> &str {
                    &entry.controller_name
                }
            }
        )+
    };
}

route_status!(HttpRoute, GrpcRoute, TcpRoute, TlsRoute);
policy_status!(TrafficPolicy, ListenerPolicy, BackendConfigPolicy);

// === impl Controller ===

impl Controller {
    pub fn new(
        client: k8s::Client,
        controller_name: impl Into<String>,
        updates: UnboundedReceiver<Update>,
        patch_timeout: Duration,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            client,
            controller_name: controller_name.into(),
            updates,
            patch_timeout,
            metrics,
        }
    }

    /// Runs until every update sender has been dropped.
    pub async fn process_updates(mut self) {
        while let Some(update) = self.updates.recv().await {
            let Update { target, status } = update;
            let labels = PatchLabels {
                kind: target.kind.clone(),
            };
            match time::timeout(self.patch_timeout, self.apply(&target, status)).await {
                Ok(Ok(())) => {
                    tracing::debug!(%target, "Patched status");
                    self.metrics.patch_succeeded.get_or_create(&labels).inc();
                }
                Ok(Err(error)) => {
                    tracing::error!(%target, %error, "Failed to patch status");
                    self.metrics.patch_failed.get_or_create(&labels).inc();
                }
                Err(_) => {
                    tracing::error!(
                        %target,
                        timeout = ?self.patch_timeout,
                        "Status patch timed out"
                    );
                    self.metrics.patch_timeout.get_or_create(&labels).inc();
                }
            }
        }
        tracing::debug!("Status updates closed");
    }

    async fn apply(&self, target: &ObjectSource, status: StatusUpdate) -> Result<(), PatchError> {
        match status {
            StatusUpdate::Gateway(status) => {
                let api = k8s::Api::<Gateway>::namespaced(self.client.clone(), &target.namespace);
                let patch = k8s::Patch::Merge(serde_json::json!({ "status": status }));
                api.patch_status(&target.name, &k8s::PatchParams::apply(FIELD_MANAGER), &patch)
                    .await?;
                Ok(())
            }
            StatusUpdate::RouteParents(ours) => match target.kind.as_str() {
                "HTTPRoute" => self.patch_shared::<HttpRoute>(target, ours).await,
                "GRPCRoute" => self.patch_shared::<GrpcRoute>(target, ours).await,
                "TCPRoute" => self.patch_shared::<TcpRoute>(target, ours).await,
                "TLSRoute" => self.patch_shared::<TlsRoute>(target, ours).await,
                kind => Err(PatchError::UnsupportedKind(kind.to_string())),
            },
            StatusUpdate::PolicyAncestors(ours) => match target.kind.as_str() {
                "TrafficPolicy" => self.patch_shared::<TrafficPolicy>(target, ours).await,
                "ListenerPolicy" => self.patch_shared::<ListenerPolicy>(target, ours).await,
                "BackendConfigPolicy" => {
                    self.patch_shared::<BackendConfigPolicy>(target, ours).await
                }
                kind => Err(PatchError::UnsupportedKind(kind.to_string())),
            },
        }
    }

    /// Replaces this controller's entries in a shared status list, reading
    /// the current list so that other controllers' entries are kept.
    async fn patch_shared<T: SharedStatus>(
        &self,
        target: &ObjectSource,
        ours: Vec<T::Entry>,
    ) -> Result<(), PatchError> {
        let api = k8s::Api::<T>::namespaced(self.client.clone(), &target.namespace);
        let current = api.get_status(&target.name).await?.entries();
        let entries = merge_entries(current, ours, &self.controller_name, T::owner);
        let mut status = serde_json::Map::new();
        status.insert(T::FIELD.to_string(), serde_json::to_value(entries)?);
        let patch = k8s::Patch::Merge(serde_json::json!({ "status": status }));
        api.patch_status(&target.name, &k8s::PatchParams::apply(FIELD_MANAGER), &patch)
            .await?;
        Ok(())
    }
}

// === impl ControllerMetrics ===

impl ControllerMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let patch_succeeded = Family::default();
        prom.register(
            "patch_succeeded",
            "Count of successful status patches",
            patch_succeeded.clone(),
        );

        let patch_failed = Family::default();
        prom.register(
            "patch_failed",
            "Count of failed status patches",
            patch_failed.clone(),
        );

        let patch_timeout = Family::default();
        prom.register(
            "patch_timeout",
            "Count of status patches that timed out",
            patch_timeout.clone(),
        );

        Self {
            patch_succeeded,
            patch_failed,
            patch_timeout,
        }
    }
}
