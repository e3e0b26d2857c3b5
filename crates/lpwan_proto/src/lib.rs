//! Generated protobuf types and gRPC stubs.

pub mod api {
    pub mod v1 {
        tonic::include_proto!("lpwan.api.v1");

        pub const FILE_DESCRIPTOR_SET: &[u8] =
            tonic::include_file_descriptor_set!("lpwan_api_v1_descriptor");
    }
}

/// Uplink ingress called by the network server (`lpwan.as.v1`).
pub mod application_server {
    pub mod v1 {
        tonic::include_proto!("lpwan.r#as.v1");

        pub const FILE_DESCRIPTOR_SET: &[u8] =
            tonic::include_file_descriptor_set!("lpwan_as_v1_descriptor");
    }
}

pub mod ns {
    pub mod v1 {
        tonic::include_proto!("lpwan.ns.v1");

        pub const FILE_DESCRIPTOR_SET: &[u8] =
            tonic::include_file_descriptor_set!("lpwan_ns_v1_descriptor");
    }
}
