//! gRPC server implementation.

use std::net::SocketAddr;

use tokio::signal;
use tonic::transport::Server;
use tracing::{error, info};

use super::proto::FILE_DESCRIPTOR_SET;
use super::{AuthorizationServer, ExternalProcessorServer};
use crate::auth::AuthorizerService;
use crate::error::{BotgateError, Result};
use crate::store::LimitStore;
use crate::usage::AdjusterService;

/// gRPC server for the authorizer service.
pub struct AuthorizerServer<S: LimitStore + 'static> {
    /// Address to bind to
    addr: SocketAddr,
    /// The authorization service instance
    service: AuthorizerService<S>,
}

impl<S: LimitStore + 'static> AuthorizerServer<S> {
    /// Create a new gRPC server for the authorizer.
    pub fn new(addr: SocketAddr, service: AuthorizerService<S>) -> Self {
        Self { addr, service }
    }

    /// Start the gRPC server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send,
    {
        let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_serving::<AuthorizationServer<AuthorizerService<S>>>()
            .await;

        let reflection = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1()
            .map_err(|e| BotgateError::Setup(format!("failed to build reflection service: {e}")))?;

        info!(addr = %self.addr, "Starting gRPC server for ext_authz Authorization");

        Server::builder()
            .add_service(health_service)
            .add_service(reflection)
            .add_service(AuthorizationServer::new(self.service))
            .serve_with_shutdown(self.addr, signal)
            .await
            .map_err(|e| {
                error!(error = %e, "gRPC server failed");
                BotgateError::Grpc(e)
            })
    }
}

/// gRPC server for the usage adjuster service.
pub struct AdjusterServer<S: LimitStore + 'static> {
    /// Address to bind to
    addr: SocketAddr,
    /// The usage adjuster service instance
    service: AdjusterService<S>,
}

impl<S: LimitStore + 'static> AdjusterServer<S> {
    /// Create a new gRPC server for the usage adjuster.
    pub fn new(addr: SocketAddr, service: AdjusterService<S>) -> Self {
        Self { addr, service }
    }

    /// Start the gRPC server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send,
    {
        let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_serving::<ExternalProcessorServer<AdjusterService<S>>>()
            .await;

        let reflection = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1()
            .map_err(|e| BotgateError::Setup(format!("failed to build reflection service: {e}")))?;

        info!(addr = %self.addr, "Starting gRPC server for ext_proc ExternalProcessor");

        Server::builder()
            .add_service(health_service)
            .add_service(reflection)
            .add_service(ExternalProcessorServer::new(self.service))
            .serve_with_shutdown(self.addr, signal)
            .await
            .map_err(|e| {
                error!(error = %e, "gRPC server failed");
                BotgateError::Grpc(e)
            })
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
