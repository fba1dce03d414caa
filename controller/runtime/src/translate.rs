use crate::oidc::OidcCache;
use chrono::Utc;
use gateway_controller_core::{ir::GatewayIr, TranslatorSettings};
use gateway_controller_k8s_index::SharedIndex;
use gateway_controller_k8s_status::{conditions, Publisher, ReportMap};
use gateway_controller_translator::Translation;
use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};
use std::{sync::Arc, time::Duration};
use tokio::{sync::watch, time};
use tokio_util::sync::CancellationToken;

/// Re-translates every Gateway whenever the index or the OIDC cache changes,
/// publishing the resulting configuration and status.
pub struct Translator {
    index: SharedIndex,
    oidc: Arc<OidcCache>,
    settings: TranslatorSettings,
    publisher: Publisher,
    gateways: watch::Sender<Arc<Vec<GatewayIr>>>,
    metrics: TranslationMetrics,
    last: Option<(u64, u64)>,
}

#[derive(Clone, Debug, Default)]
pub struct TranslationMetrics {
    passes: Counter,
    gateways: Gauge,
    dropped_listeners: Counter,
    status_updates: Counter,
}

// === impl Translator ===

impl Translator {
    pub fn new(
        index: SharedIndex,
        oidc: Arc<OidcCache>,
        settings: TranslatorSettings,
        publisher: Publisher,
        metrics: TranslationMetrics,
    ) -> (Self, watch::Receiver<Arc<Vec<GatewayIr>>>) {
        let (gateways, rx) = watch::channel(Arc::new(Vec::new()));
        let translator = Self {
            index,
            oidc,
            settings,
            publisher,
            gateways,
            metrics,
            last: None,
        };
        (translator, rx)
    }

    /// Checks for changes every `interval` until `shutdown` is cancelled.
    pub async fn run(mut self, interval: Duration, shutdown: CancellationToken) {
        let mut ticks = time::interval(interval);
        ticks.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::debug!("Translation stopped");
                    return;
                }
                _ = ticks.tick() => {
                    self.translate_if_changed();
                }
            }
        }
    }

    /// Runs a translation pass unless neither the index nor the OIDC cache
    /// changed since the last one. Returns whether a pass ran.
    pub fn translate_if_changed(&mut self) -> bool {
        let revisions = (self.index.read().revision(), self.oidc.revision());
        if self.last == Some(revisions) {
            return false;
        }
        self.last = Some(revisions);
        self.translate();
        true
    }

    pub fn translate(&mut self) -> Translation {
        // The snapshot is built under the read lock; translation runs without
        // it so that watches are never blocked on a pass.
        let snapshot = self.index.read().snapshot(&self.settings, &*self.oidc);
        let translation = gateway_controller_translator::translate(&snapshot);

        let updates = self.publisher.publish(&translation.reports, Utc::now());
        let dropped = dropped_listeners(&translation.reports);
        tracing::info!(
            gateways = translation.gateways.len(),
            dropped_listeners = dropped,
            status_updates = updates,
            "Translated"
        );
        self.metrics.passes.inc();
        self.metrics.gateways.set(translation.gateways.len() as i64);
        self.metrics.dropped_listeners.inc_by(dropped as u64);
        self.metrics.status_updates.inc_by(updates as u64);

        self.gateways
            .send_replace(Arc::new(translation.gateways.clone()));
        translation
    }
}

fn dropped_listeners(reports: &ReportMap) -> usize {
    reports
        .gateways()
        .flat_map(|(_, gw)| gw.listeners())
        .filter(|(_, l)| {
            l.conditions
                .get(conditions::PROGRAMMED)
                .is_some_and(|c| !c.status)
        })
        .count()
}

// === impl TranslationMetrics ===

impl TranslationMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let metrics = Self::default();
        prom.register(
            "passes",
            "Count of translation passes",
            metrics.passes.clone(),
        );
        prom.register(
            "gateways",
            "Gauge of the number of Gateways translated by the last pass",
            metrics.gateways.clone(),
        );
        prom.register(
            "dropped_listeners",
            "Count of listeners left unprogrammed by a translation pass",
            metrics.dropped_listeners.clone(),
        );
        prom.register(
            "status_updates",
            "Count of status updates published",
            metrics.status_updates.clone(),
        );
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_controller_k8s_api::{
        gateway::{GatewaySpec, Listener},
        Gateway, ObjectMeta,
    };
    use gateway_controller_k8s_index::Index;
    use gateway_controller_k8s_status::Update;
    use kubert::index::IndexNamespacedResource;
    use tokio::sync::mpsc;

    fn gateway(protocol: &str) -> Gateway {
        Gateway {
            metadata: ObjectMeta {
                namespace: Some("default".to_string()),
                name: Some("gw".to_string()),
                generation: Some(1),
                ..Default::default()
            },
            spec: GatewaySpec {
                gateway_class_name: "kgateway".to_string(),
                listeners: vec![Listener {
                    name: "l".to_string(),
                    hostname: None,
                    port: 80,
                    protocol: protocol.to_string(),
                    tls: None,
                    allowed_routes: None,
                }],
                tls: None,
            },
            status: None,
        }
    }

    fn translator(
        index: &SharedIndex,
    ) -> (
        Translator,
        watch::Receiver<Arc<Vec<GatewayIr>>>,
        mpsc::UnboundedReceiver<Update>,
    ) {
        let settings = TranslatorSettings::default();
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let publisher = Publisher::new(settings.controller_name.clone(), updates_tx);
        let (translator, gateways) = Translator::new(
            index.clone(),
            OidcCache::shared(),
            settings,
            publisher,
            TranslationMetrics::default(),
        );
        (translator, gateways, updates_rx)
    }

    #[test]
    fn translates_only_on_change() {
        let index = Index::shared(gateway_controller_core::DEFAULT_CONTROLLER_NAME);
        let (mut translator, gateways, mut updates) = translator(&index);

        index.write().apply(gateway("HTTP"));
        assert!(translator.translate_if_changed());
        assert_eq!(gateways.borrow().len(), 1);
        assert_eq!(gateways.borrow()[0].listeners.len(), 1);
        let update = updates.try_recv().expect("gateway status must be published");
        assert_eq!(update.target.name, "gw");

        assert!(!translator.translate_if_changed());
        assert!(updates.try_recv().is_err());

        index.write().apply(gateway("UDP"));
        assert!(translator.translate_if_changed());
        assert!(updates.try_recv().is_ok());
    }

    #[test]
    fn counts_dropped_listeners() {
        let index = Index::shared(gateway_controller_core::DEFAULT_CONTROLLER_NAME);
        let (mut translator, _gateways, _updates) = translator(&index);

        index.write().apply(gateway("UDP"));
        let translation = translator.translate();
        assert_eq!(dropped_listeners(&translation.reports), 1);
        assert_eq!(translator.metrics.passes.get(), 1);
        assert_eq!(translator.metrics.dropped_listeners.get(), 1);
    }
}
