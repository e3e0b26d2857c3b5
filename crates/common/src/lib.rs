//! Shared building blocks for the LPWAN services: domain model and repository
//! traits, PostgreSQL persistence, the network-server client pool, gRPC server
//! plumbing, auth and telemetry.

pub mod auth;
pub mod domain;
pub mod grpc;
pub mod network_server;
pub mod postgres;
pub mod telemetry;
