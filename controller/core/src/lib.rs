#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod annotations;
pub mod hostname;
pub mod http_route;
pub mod ir;
mod object_source;
pub mod oidc;
pub mod policy;
mod reference;
mod settings;
pub mod source;
pub mod tls;
pub mod units;

pub use self::{
    object_source::{GroupKind, ObjectSource},
    reference::ReferenceError,
    settings::TranslatorSettings,
};

/// The controller name written into Gateway, route and policy status.
pub const DEFAULT_CONTROLLER_NAME: &str = "kgateway.dev/kgateway";
