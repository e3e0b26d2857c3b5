mod device_queue_handler;
mod fuota_deployment_handler;
mod multicast_group_handler;
mod server;
mod uplink_handler;

pub use device_queue_handler::*;
pub use fuota_deployment_handler::*;
pub use multicast_group_handler::*;
pub use server::*;
pub use uplink_handler::*;

use chrono::{DateTime, Utc};
use lorawan::Eui64;
use tonic::Status;
use uuid::Uuid;

pub(crate) fn parse_dev_eui(value: &str) -> Result<Eui64, Status> {
    value
        .parse()
        .map_err(|e: lorawan::LorawanError| Status::invalid_argument(e.to_string()))
}

pub(crate) fn parse_uuid(field: &str, value: &str) -> Result<Uuid, Status> {
    Uuid::parse_str(value)
        .map_err(|e| Status::invalid_argument(format!("invalid {}: {}", field, e)))
}

pub(crate) fn to_timestamp(dt: DateTime<Utc>) -> prost_types::Timestamp {
    prost_types::Timestamp {
        seconds: dt.timestamp(),
        nanos: dt.timestamp_subsec_nanos() as i32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dev_eui() {
        assert_eq!(
            parse_dev_eui("0102030405060708").unwrap(),
            Eui64([1, 2, 3, 4, 5, 6, 7, 8])
        );
        assert_eq!(
            parse_dev_eui("0102").unwrap_err().code(),
            tonic::Code::InvalidArgument
        );
    }

    #[test]
    fn test_parse_uuid() {
        let id = Uuid::new_v4();
        assert_eq!(parse_uuid("id", &id.to_string()).unwrap(), id);
        let err = parse_uuid("multicast_group_id", "nope").unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
        assert!(err.message().starts_with("invalid multicast_group_id"));
    }

    #[test]
    fn test_to_timestamp() {
        let dt = DateTime::from_timestamp(1_700_000_000, 5).unwrap();
        let ts = to_timestamp(dt);
        assert_eq!(ts.seconds, 1_700_000_000);
        assert_eq!(ts.nanos, 5);
    }
}
