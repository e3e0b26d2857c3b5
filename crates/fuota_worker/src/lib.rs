pub mod domain;
pub mod fuota_worker;

pub use domain::*;
pub use fuota_worker::*;
