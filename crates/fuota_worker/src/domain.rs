mod deployment_stepper;
mod downlink;
mod fuota_config;
mod polling;
mod remote_sync_service;

pub use deployment_stepper::*;
pub use downlink::*;
pub use fuota_config::*;
pub use polling::*;
pub use remote_sync_service::*;
