pub mod config;
pub mod kind;
pub mod naming;

pub use config::OpsConfig;
pub use kind::ErrorKind;
