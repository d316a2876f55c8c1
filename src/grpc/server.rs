//! gRPC server implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use tonic::transport::Server;
use tracing::{error, info};

use super::proto::v1::limits_service_server::LimitsServiceServer;
use super::service::LimitsServiceImpl;
use crate::error::{LimiterError, Result};
use crate::ratelimit::LimitsBackend;

/// gRPC server for the limits service.
pub struct GrpcServer<B: LimitsBackend + 'static> {
    /// Address to bind to
    addr: SocketAddr,
    /// The backend serving requests
    backend: Arc<B>,
}

impl<B: LimitsBackend + 'static> GrpcServer<B> {
    /// Create a new gRPC server.
    pub fn new(addr: SocketAddr, backend: Arc<B>) -> Self {
        Self { addr, backend }
    }

    /// The address the server binds to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Start the gRPC server with graceful shutdown.
    ///
    /// Alongside the limits service the server exposes the standard
    /// `grpc.health.v1.Health` service, reporting `SERVING` for the server as
    /// a whole and for `ratelimiter.v1.LimitsService`. The server will shut
    /// down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send,
    {
        let service = LimitsServiceImpl::new(self.backend);

        let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_serving::<LimitsServiceServer<LimitsServiceImpl<B>>>()
            .await;

        info!(addr = %self.addr, "Starting gRPC server for LimitsService");

        Server::builder()
            .add_service(health_service)
            .add_service(LimitsServiceServer::new(service))
            .serve_with_shutdown(self.addr, signal)
            .await
            .map_err(|e| {
                error!(error = %e, "gRPC server failed");
                LimiterError::Grpc(e)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grpc::proto::v1::limits_service_client::LimitsServiceClient;
    use crate::grpc::proto::v1::{AdmissionRequest, CreateRateLimitRequest, RateLimitRule};
    use crate::ratelimit::{InMemoryRuleStore, LimitsService, RateLimitEngine, RuleStore};
    use std::time::Duration;
    use tonic::transport::{Channel, Endpoint};
    use tonic_health::pb::health_check_response::ServingStatus;
    use tonic_health::pb::health_client::HealthClient;
    use tonic_health::pb::HealthCheckRequest;

    fn backend() -> Arc<LimitsService> {
        let store: Arc<dyn RuleStore> = Arc::new(InMemoryRuleStore::new());
        Arc::new(LimitsService::new(store, Arc::new(RateLimitEngine::new())))
    }

    #[test]
    fn test_server_creation() {
        let addr: SocketAddr = "127.0.0.1:8081".parse().unwrap();
        let server = GrpcServer::new(addr, backend());
        assert_eq!(server.addr(), addr);
    }

    #[tokio::test]
    async fn test_serve_round_trip_and_shutdown() {
        // Reserve a free port, then hand it to the server
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let server = GrpcServer::new(addr, backend());
        let handle = tokio::spawn(server.serve_with_shutdown(async move {
            let _ = shutdown_rx.await;
        }));

        let endpoint = Endpoint::from_shared(format!("http://{}", addr)).unwrap();
        let mut channel: Option<Channel> = None;
        for _ in 0..50 {
            match endpoint.connect().await {
                Ok(c) => {
                    channel = Some(c);
                    break;
                }
                Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
        let channel = channel.expect("server did not start");

        let mut health = HealthClient::new(channel.clone());
        for service in ["", "ratelimiter.v1.LimitsService"] {
            let status = health
                .check(HealthCheckRequest {
                    service: service.to_string(),
                })
                .await
                .unwrap()
                .into_inner()
                .status;
            assert_eq!(status, ServingStatus::Serving as i32, "service {service:?}");
        }

        let mut client = LimitsServiceClient::new(channel);

        client
            .create_rate_limit(CreateRateLimitRequest {
                rule: Some(RateLimitRule {
                    id: "api-users".to_string(),
                    limit: 1,
                    window: "1m".to_string(),
                    algorithm: "sliding_window".to_string(),
                    key_pattern: "user:{{user_id}}".to_string(),
                }),
            })
            .await
            .unwrap();

        let request = AdmissionRequest {
            rule_id: "api-users".to_string(),
            caller_id: "u1".to_string(),
        };
        let first = client.attempt_rate_limit(request.clone()).await.unwrap();
        assert!(first.into_inner().allowed);
        let second = client.attempt_rate_limit(request).await.unwrap();
        assert!(!second.into_inner().allowed);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
