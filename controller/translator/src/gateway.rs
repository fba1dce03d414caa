use crate::{
    http,
    listener::{self, PortClass, ValidListener},
    policy::{self, PolicyTracker},
    tcp, TranslateError,
};
use gateway_controller_core::{
    annotations::{self, PER_CONNECTION_BUFFER_LIMIT},
    ir::{BackendObjectIr, BackendRefIr, ClusterIr, GatewayIr, ListenerIr, RouteAction},
    policy::{
        listener::ListenerSettings, AttachedPolicies, BackendConfigPolicyIr, ListenerPolicyIr,
        MergeSettings, MergedPolicy, TrafficPolicyIr,
    },
    source::{GatewaySource, ListenerProtocol, ParentRef, RouteSource},
    units, GroupKind,
};
use gateway_controller_k8s_api::{BackendConfigPolicy, ListenerPolicy, TrafficPolicy};
use gateway_controller_k8s_index::Snapshot;
use gateway_controller_k8s_status::{
    conditions::{self, reasons},
    Condition, ReportMap,
};
use std::{collections::BTreeMap, sync::Arc};

/// State shared by every step of one Gateway's translation.
pub(crate) struct Ctx<'a> {
    pub(crate) snapshot: &'a Snapshot,
    pub(crate) gateway: &'a GatewaySource,

    /// Ancestor reference for policies attached through the Gateway.
    pub(crate) ancestor: ParentRef,

    /// Merge behavior for policies inherited from the Gateway.
    pub(crate) merge: MergeSettings,
    pub(crate) reports: ReportMap,
    pub(crate) policies: PolicyTracker,
}

/// Translates one Gateway into its per-port proxy configuration.
///
/// Returns the configuration along with the status of the Gateway, its
/// listeners, every route that references it and every policy that attached
/// through it.
pub fn translate_gateway(snapshot: &Snapshot, gateway: &GatewaySource) -> (GatewayIr, ReportMap) {
    let mut reports = ReportMap::default();
    reports.gateway(gateway);

    let default_merge = MergeSettings::from(snapshot.settings().default_inherited_policy_priority);
    let merge = match merge_settings(&gateway.annotations, default_merge) {
        Ok(merge) => merge,
        Err(error) => {
            gateway_note(&mut reports, gateway, &error);
            default_merge
        }
    };
    let per_connection_buffer_limit_bytes = match buffer_limit(gateway) {
        Ok(limit) => limit,
        Err(error) => {
            gateway_note(&mut reports, gateway, &error);
            None
        }
    };

    let mut listeners = listener::validate(gateway, &mut reports);
    listener::attach_routes(snapshot, gateway, &mut listeners, &mut reports);

    let mut ctx = Ctx {
        snapshot,
        gateway,
        ancestor: policy::ancestor_ref(&gateway.source),
        merge,
        reports,
        policies: PolicyTracker::default(),
    };

    let gateway_policies = snapshot.policies_for(&gateway.source, None);
    let listener_policy = ctx.policies.merge::<ListenerPolicyIr>(
        &gateway_policies,
        &GroupKind::of::<ListenerPolicy>(),
        ctx.merge,
        &ctx.ancestor,
    );

    let mut ports: Vec<(u16, Vec<&ValidListener<'_>>)> = Vec::new();
    for l in &listeners {
        match ports.iter_mut().find(|(port, _)| *port == l.source.port) {
            Some((_, ls)) => ls.push(l),
            None => ports.push((l.source.port, vec![l])),
        }
    }

    let mut irs = Vec::with_capacity(ports.len());
    for (port, ls) in ports {
        let settings = listener_policy.as_ref().and_then(|p| p.ir.for_port(port));
        irs.push(translate_port(&mut ctx, port, &ls, settings));
    }

    let clusters = clusters(&mut ctx, &irs);

    let Ctx {
        mut reports,
        policies,
        ..
    } = ctx;
    policies.report(&mut reports);

    tracing::debug!(
        gateway = %gateway.source,
        listeners = irs.len(),
        clusters = clusters.len(),
        "Translated gateway"
    );
    let ir = GatewayIr {
        source: gateway.source.clone(),
        listeners: irs,
        clusters,
        per_connection_buffer_limit_bytes,
    };
    (ir, reports)
}

fn translate_port(
    ctx: &mut Ctx<'_>,
    port: u16,
    listeners: &[&ValidListener<'_>],
    settings: Option<ListenerSettings>,
) -> ListenerIr {
    let name = ListenerIr::name_for_port(port);
    let mut http_filter_chains = Vec::new();
    let mut tcp_filter_chains = Vec::new();

    let plaintext = listeners
        .iter()
        .copied()
        .filter(|l| l.class == PortClass::Http)
        .collect::<Vec<_>>();
    if !plaintext.is_empty() {
        http_filter_chains.push(http::plaintext_chain(ctx, &name, &plaintext));
    }

    let mut tcp_listeners = Vec::new();
    for l in listeners {
        if l.source.protocol == ListenerProtocol::Https {
            if let Some(chain) = http::https_chain(ctx, l) {
                http_filter_chains.push(chain);
            }
        } else if l.class != PortClass::Http {
            tcp_listeners.push(*l);
            if let Some(chain) = tcp::chain(ctx, &name, l) {
                tcp_filter_chains.push(chain);
            }
        }
    }

    if !tcp_listeners.is_empty() && tcp_filter_chains.is_empty() {
        for l in tcp_listeners {
            ctx.reports
                .gateway(ctx.gateway)
                .listener(&l.source.name)
                .conditions
                .set(Condition::new(
                    conditions::PROGRAMMED,
                    false,
                    reasons::INVALID,
                    "TCP/TLS listener has no valid backends or routes",
                ));
        }
    }

    ListenerIr {
        name,
        bind_address: ctx.snapshot.settings().bind_address().to_string(),
        bind_port: port,
        http_filter_chains,
        tcp_filter_chains,
        settings,
    }
}

/// Builds one cluster per backend referenced by the Gateway's routes.
fn clusters(ctx: &mut Ctx<'_>, listeners: &[ListenerIr]) -> Vec<ClusterIr> {
    let mut backends = BTreeMap::<String, Arc<BackendObjectIr>>::new();
    let mut collect = |refs: &[BackendRefIr]| {
        for b in refs {
            if let Ok(backend) = &b.backend {
                backends
                    .entry(backend.cluster_name.clone())
                    .or_insert_with(|| backend.clone());
            }
        }
    };
    for l in listeners {
        for chain in &l.http_filter_chains {
            for route in chain.vhosts.iter().flat_map(|vh| &vh.routes) {
                if let RouteAction::Forward(refs) = &route.action {
                    collect(refs);
                }
            }
        }
        for chain in &l.tcp_filter_chains {
            collect(&chain.backends);
        }
    }

    let kind = GroupKind::of::<BackendConfigPolicy>();
    backends
        .into_values()
        .map(|b| {
            let backend_config = ctx
                .policies
                .merge::<BackendConfigPolicyIr>(
                    &b.attached_policies,
                    &kind,
                    ctx.merge,
                    &policy::ancestor_ref(&b.source),
                )
                .map(|m| m.ir);
            ClusterIr {
                name: b.cluster_name.clone(),
                backend: b.source.clone(),
                port: b.port,
                kind: b.kind.clone(),
                app_protocol: b.app_protocol.clone(),
                disable_istio_auto_mtls: b.disable_istio_auto_mtls,
                backend_config,
            }
        })
        .collect()
}

// === impl Ctx ===

impl Ctx<'_> {
    pub(crate) fn route_condition(
        &mut self,
        route: &RouteSource,
        parent: &ParentRef,
        condition: Condition,
    ) {
        tracing::debug!(
            route = %route.source,
            type_ = condition.type_,
            reason = condition.reason,
            message = %condition.message,
            "Route condition"
        );
        self.reports
            .route(route)
            .parent(parent)
            .conditions
            .set(condition);
    }

    pub(crate) fn listener_condition(&mut self, listener: &str, condition: Condition) {
        self.reports
            .gateway(self.gateway)
            .listener(listener)
            .conditions
            .set(condition);
    }

    /// Merges the TrafficPolicies attached at one point.
    pub(crate) fn traffic_policy(
        &mut self,
        attached: &AttachedPolicies,
        merge: MergeSettings,
    ) -> Option<MergedPolicy<TrafficPolicyIr>> {
        self.policies.merge::<TrafficPolicyIr>(
            attached,
            &GroupKind::of::<TrafficPolicy>(),
            merge,
            &self.ancestor,
        )
    }

    /// The TrafficPolicy attached to a listener or to the whole Gateway.
    pub(crate) fn listener_traffic_policy(&mut self, listener: &str) -> Option<TrafficPolicyIr> {
        let attached = self.listener_policies(listener);
        self.traffic_policy(&attached, self.merge).map(|m| m.ir)
    }

    /// Policies attached to a listener, along with those attached to the
    /// whole Gateway.
    pub(crate) fn listener_policies(&self, listener: &str) -> AttachedPolicies {
        self.snapshot
            .policies_for(&self.gateway.source, Some(listener))
    }
}

/// Resolves the merge behavior set by an inherited-policy-priority annotation.
pub(crate) fn merge_settings(
    annotations: &BTreeMap<String, String>,
    default: MergeSettings,
) -> Result<MergeSettings, TranslateError> {
    let priority = annotations::parse_inherited_policy_priority(annotations)?;
    Ok(priority.map_or(default, MergeSettings::from))
}

fn buffer_limit(gateway: &GatewaySource) -> Result<Option<u32>, TranslateError> {
    let Some(value) = gateway.annotations.get(PER_CONNECTION_BUFFER_LIMIT) else {
        return Ok(None);
    };
    units::parse_quantity_u32(value)
        .map(Some)
        .map_err(|source| TranslateError::Quantity {
            key: PER_CONNECTION_BUFFER_LIMIT,
            source,
        })
}

/// Invalid Gateway annotations are ignored; the Gateway stays accepted and
/// the message says why.
fn gateway_note(reports: &mut ReportMap, gateway: &GatewaySource, error: &TranslateError) {
    tracing::warn!(gateway = %gateway.source, %error, "Ignoring invalid gateway annotation");
    let report = reports.gateway(gateway);
    let message = match report.conditions.get(conditions::ACCEPTED) {
        Some(c) if !c.message.is_empty() => format!("{}; {error}", c.message),
        _ => error.to_string(),
    };
    report.conditions.set(Condition::new(
        conditions::ACCEPTED,
        true,
        reasons::ACCEPTED,
        message,
    ));
}
