//! gRPC wire contracts and server plumbing for the Envoy integration.

mod server;

pub use server::{shutdown_signal, AuthorizerServer, AdjusterServer};

// Include the generated protobuf code
pub mod proto {
    pub mod envoy {
        pub mod config {
            pub mod core {
                pub mod v3 {
                    tonic::include_proto!("envoy.config.core.v3");
                }
            }
        }
        pub mod r#type {
            pub mod v3 {
                tonic::include_proto!("envoy.type.v3");
            }
        }
        pub mod service {
            pub mod auth {
                pub mod v3 {
                    tonic::include_proto!("envoy.service.auth.v3");
                }
            }
            pub mod ext_proc {
                pub mod v3 {
                    tonic::include_proto!("envoy.service.ext_proc.v3");
                }
            }
        }
    }
    pub mod google {
        pub mod rpc {
            tonic::include_proto!("google.rpc");
        }
    }

    /// Descriptor set for server reflection, emitted by the build script.
    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("botgate_descriptor");
}

// Re-export commonly used types
pub use proto::envoy::config::core::v3::{HeaderValue, HeaderValueOption};
pub use proto::envoy::service::auth::v3::{
    authorization_server::AuthorizationServer, CheckRequest, CheckResponse,
};
pub use proto::envoy::service::ext_proc::v3::{
    external_processor_server::ExternalProcessorServer, ProcessingRequest, ProcessingResponse,
};
