#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod args;
pub mod oidc;
mod translate;

pub use self::{
    args::Args,
    translate::{TranslationMetrics, Translator},
};
pub use gateway_controller_core as core;
pub use gateway_controller_k8s_api as k8s;
pub use gateway_controller_k8s_index as index;
pub use gateway_controller_k8s_status as status;
pub use gateway_controller_translator as translator;
