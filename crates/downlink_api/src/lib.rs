pub mod domain;
pub mod downlink_api;
pub mod grpc;
