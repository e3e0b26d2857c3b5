mod access_validator;
mod application_repository;
mod client;
mod config;
pub(crate) mod conversions;
mod device_repository;
mod fuota_deployment_repository;
mod multicast_group_repository;
mod remote_session_repository;
mod transaction;

pub use access_validator::*;
pub use application_repository::*;
pub use client::*;
pub use config::*;
pub use device_repository::*;
pub use fuota_deployment_repository::*;
pub use multicast_group_repository::*;
pub use remote_session_repository::*;
pub use transaction::*;
