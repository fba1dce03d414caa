//! Gateway controller status reporting
//!
//! Translation accumulates conditions in a [`ReportMap`]. A [`Publisher`]
//! turns each pass's reports into [`Update`]s, sending only the objects whose
//! status changed, and the [`Controller`] applies them as merge patches with a
//! per-patch timeout.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod conditions;
mod controller;
mod patch;
mod publisher;
mod report;

pub use self::{
    conditions::{Condition, Conditions},
    controller::{Controller, ControllerMetrics},
    patch::{gateway_status, policy_ancestors, route_parents, StatusUpdate, Update},
    publisher::Publisher,
    report::{
        AncestorReport, GatewayReport, ListenerReport, ParentReport, PolicyReport, ReportMap,
        RouteReport,
    },
};
