//! gRPC server module for the limits API.

mod convert;
mod server;
mod service;

pub use convert::ALLOWED_METADATA_KEY;
pub use server::GrpcServer;
pub use service::LimitsServiceImpl;

// Include the generated protobuf code
pub mod proto {
    pub mod v1 {
        tonic::include_proto!("ratelimiter.v1");
    }
}

// Re-export commonly used types
pub use proto::v1::{
    limits_service_client::LimitsServiceClient, limits_service_server::LimitsServiceServer,
};
