//! LoRaWAN building blocks shared by the downlink API and the FUOTA worker.

pub mod applayer;
pub mod band;
mod crypto;
mod error;
mod eui;
pub mod gps;

pub use band::{max_payload_size, MaxPayloadSize, Region};
pub use crypto::encrypt_frm_payload;
pub use error::*;
pub use eui::*;
