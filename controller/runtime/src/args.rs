use crate::{
    core::{
        ir::GatewayIr, policy::InheritedPolicyPriority, TranslatorSettings,
        DEFAULT_CONTROLLER_NAME,
    },
    index::{metrics::IndexMetrics, Index},
    k8s::{self, Client, Resource},
    oidc::{self, Discoverer, OidcCache},
    status, TranslationMetrics, Translator,
};
use anyhow::{bail, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::{
    sync::{mpsc, watch},
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "gateway", about = "A Gateway API controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "gateway=info,warn",
        env = "GATEWAY_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The controller name written into Gateway, route and policy status.
    #[clap(long, default_value = DEFAULT_CONTROLLER_NAME)]
    controller_name: String,

    /// Bind listeners on `::` instead of `0.0.0.0`.
    #[clap(long)]
    enable_ipv6: bool,

    /// Use the rust-based transformation filter for TrafficPolicy
    /// transformations.
    #[clap(long)]
    use_rustformations: bool,

    /// Merge behavior for inherited policies on objects without an
    /// inherited-policy-priority annotation.
    #[clap(long, default_value = "ShallowMergePreferChild")]
    default_inherited_policy_priority: InheritedPolicyPriority,

    /// How often the index is checked for changes to translate.
    #[clap(long, default_value = "1")]
    translation_interval_secs: u64,

    /// How long discovered OpenID provider configurations are cached.
    #[clap(long, default_value = "300")]
    oidc_cache_refresh_secs: u64,

    #[clap(long, default_value = "5000")]
    patch_timeout_ms: u64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            controller_name,
            enable_ipv6,
            use_rustformations,
            default_inherited_policy_priority,
            translation_interval_secs,
            oidc_cache_refresh_secs,
            patch_timeout_ms,
        } = self;

        let settings = TranslatorSettings {
            controller_name: controller_name.clone(),
            listener_bind_ipv6: enable_ipv6,
            use_rustformations,
            default_inherited_policy_priority,
        };
        let translation_interval = Duration::from_secs(translation_interval_secs.max(1));

        let index = Index::shared(controller_name.clone());

        let mut prom = <Registry>::default();
        let indexed = IndexMetrics::register(index.clone(), prom.sub_registry_with_prefix("index"))
            .shared();
        let translation_metrics =
            TranslationMetrics::register(prom.sub_registry_with_prefix("translation"));
        let status_metrics =
            status::ControllerMetrics::register(prom.sub_registry_with_prefix("resource_status"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        // Spawn resource watches.

        macro_rules! watch_namespaced {
            ($kind:ty, $span:literal) => {{
                let events = runtime.watch_all::<$kind>(watcher::Config::default());
                tokio::spawn(
                    kubert::index::namespaced(indexed.clone(), events)
                        .instrument(info_span!($span)),
                );
            }};
        }

        macro_rules! watch_optional {
            ($kind:ty, $span:literal) => {
                if api_resource_exists::<$kind>(&runtime.client()).await {
                    watch_namespaced!($kind, $span);
                } else {
                    tracing::warn!(kind = $span, "Resource kind not found, skipping watches");
                }
            };
        }

        watch_namespaced!(k8s::Gateway, "gateways");
        watch_namespaced!(k8s::HttpRoute, "httproutes");
        watch_namespaced!(k8s::ReferenceGrant, "referencegrants");
        watch_namespaced!(k8s::Secret, "secrets");
        watch_namespaced!(k8s::ConfigMap, "configmaps");
        watch_namespaced!(k8s::Service, "services");
        watch_optional!(k8s::GrpcRoute, "grpcroutes");
        watch_optional!(k8s::TcpRoute, "tcproutes");
        watch_optional!(k8s::TlsRoute, "tlsroutes");
        watch_optional!(k8s::Backend, "backends");
        watch_optional!(k8s::InferencePool, "inferencepools");
        watch_optional!(k8s::TrafficPolicy, "trafficpolicies");
        watch_optional!(k8s::ListenerPolicy, "listenerpolicies");
        watch_optional!(k8s::BackendConfigPolicy, "backendconfigpolicies");
        watch_optional!(k8s::GatewayExtension, "gatewayextensions");

        let namespaces = runtime.watch_all::<k8s::Namespace>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(index.clone(), namespaces).instrument(info_span!("namespaces")),
        );

        let shutdown = CancellationToken::new();

        // Spawn OIDC discovery. The cache is cleared periodically so that
        // each issuer is re-discovered.
        let oidc_cache = OidcCache::shared();
        let discoverer = Discoverer::new(oidc_cache.clone(), shutdown.clone())?;
        tokio::spawn(
            oidc::discover_issuers(
                discoverer,
                index.clone(),
                translation_interval,
                shutdown.clone(),
            )
            .instrument(info_span!("oidc_discovery")),
        );
        tokio::spawn(
            oidc::refresh(
                oidc_cache.clone(),
                Duration::from_secs(oidc_cache_refresh_secs),
                shutdown.clone(),
            )
            .instrument(info_span!("oidc_refresh")),
        );

        // Spawn the translation loop, which publishes status updates to the
        // status controller.
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let publisher = status::Publisher::new(controller_name.clone(), updates_tx);
        let (translator, gateways) = Translator::new(
            index,
            oidc_cache,
            settings,
            publisher,
            translation_metrics,
        );
        tokio::spawn(
            translator
                .run(translation_interval, shutdown.clone())
                .instrument(info_span!("translator")),
        );
        tokio::spawn(log_gateways(gateways).instrument(info_span!("gateways")));

        let status_controller = status::Controller::new(
            runtime.client(),
            controller_name,
            updates_rx,
            Duration::from_millis(patch_timeout_ms),
            status_metrics,
        );
        tokio::spawn(
            status_controller
                .process_updates()
                .instrument(info_span!("status_controller")),
        );

        // Block the main thread on the shutdown signal. Once it fires, stop
        // the background tasks before exiting.
        let result = runtime.run().await;
        shutdown.cancel();
        if result.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

/// Logs each configuration the translator publishes.
async fn log_gateways(mut gateways: watch::Receiver<Arc<Vec<GatewayIr>>>) {
    while gateways.changed().await.is_ok() {
        let gateways = gateways.borrow_and_update().clone();
        for gw in gateways.iter() {
            tracing::debug!(
                gateway = %gw.source,
                listeners = gw.listeners.len(),
                clusters = gw.clusters.len(),
                "Gateway configuration updated"
            );
        }
    }
}

async fn api_resource_exists<T>(client: &Client) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    client
        .list_api_group_resources(&T::api_version(&dt))
        .await
        .ok()
        .iter()
        .flat_map(|r| r.resources.iter())
        .any(|r| r.kind == T::kind(&dt))
}
