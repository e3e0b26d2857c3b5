mod device_queue_service;
mod fuota_deployment_service;
mod multicast_service;
mod uplink_service;

pub use device_queue_service::*;
pub use fuota_deployment_service::*;
pub use multicast_service::*;
pub use uplink_service::*;

use common::domain::{DomainError, DomainResult};

/// LoRaWAN application ports are 1..=255; port 0 carries MAC commands only.
pub(crate) fn validate_f_port(f_port: u32) -> DomainResult<u8> {
    if f_port == 0 {
        return Err(DomainError::InvalidArgument(
            "f_port must be > 0".to_string(),
        ));
    }
    u8::try_from(f_port)
        .map_err(|_| DomainError::InvalidArgument(format!("f_port must be <= 255, got {}", f_port)))
}

/// Local queue rows below the returned counter were delivered.
///
/// `counter` is the frame counter read before the network server was asked
/// for its pending items, so every row below it was already handed over.
/// Rows the network server still reports are kept.
pub(crate) fn delivered_before(counter: u32, pending: impl IntoIterator<Item = u32>) -> u32 {
    pending.into_iter().fold(counter, u32::min)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_f_port() {
        assert!(matches!(
            validate_f_port(0),
            Err(DomainError::InvalidArgument(_))
        ));
        assert!(matches!(
            validate_f_port(256),
            Err(DomainError::InvalidArgument(_))
        ));
        assert_eq!(validate_f_port(1).unwrap(), 1);
        assert_eq!(validate_f_port(255).unwrap(), 255);
    }

    #[test]
    fn test_delivered_before() {
        assert_eq!(delivered_before(12, []), 12);
        assert_eq!(delivered_before(12, [9, 10, 11]), 9);
        // An item enqueued after the counter was read is not a lower bound.
        assert_eq!(delivered_before(12, [12, 13]), 12);
    }
}
