//! Rust client for the Recordbase record-storage service.
//!
//! This SDK provides a high-level, ergonomic API for Rust applications to
//! talk to a Recordbase cluster. It wraps the gRPC services with cluster
//! discovery, load-balanced connectivity, automatic retry, and cancellable
//! streaming.
//!
//! # Features
//!
//! - **Cluster discovery**: bootstrap endpoints are probed for the
//!   authoritative member list before any record traffic flows
//! - **Resilient connectivity**: round-robin balancing over cluster
//!   members, exponential backoff retry with jitter
//! - **Cancellable calls**: every RPC is registered with a cancellation
//!   token; closing the client aborts all in-flight work
//! - **Streaming support**: server streams bridged to plain channels,
//!   chunked file upload and download
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use recordbase_client::RecordClient;
//! use recordbase_proto::proto;
//!
//! #[tokio::main]
//! async fn main() -> recordbase_client::Result<()> {
//!     let client = RecordClient::connect("n1:8500,n2:8500,n3:8500", "my-token").await?;
//!
//!     let record = client
//!         .get(proto::GetRequest { tenant: "acme".into(), primary_key: "42".into() })
//!         .await?;
//!     println!("version {}", record.version);
//!
//!     client.close();
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 RecordClient (Public API)                   │
//! │  .get() │ .create() │ .search() │ .upload_file() │ .close() │
//! ├─────────────────────────────────────────────────────────────┤
//! │                 Call Registry                                │
//! │   Cancellation tokens │ close() aborts in-flight calls      │
//! ├─────────────────────────────────────────────────────────────┤
//! │                 Resilience Layer (backon)                    │
//! │   Retry with backoff │ Jitter │ Cancellation races          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                 Discovery + Transport                        │
//! │   Cluster resolution │ Direct or balanced channels │ TLS    │
//! ├─────────────────────────────────────────────────────────────┤
//! │                 Tonic gRPC Clients                           │
//! │   RecordServiceClient │ ClusterServiceClient                │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod client;
mod config;
mod connection;
mod discovery;
mod error;
pub mod mock;
mod registry;
mod retry;
mod streaming;

// Public API exports
pub use auth::BearerAuth;
pub use client::{RecordClient, SERVICE_NAME};
pub use config::{
    CertificateData, ClientConfig, ClientConfigBuilder, RetryPolicy, RetryPolicyBuilder, TlsConfig,
};
pub use connection::Connection;
pub use discovery::{ClusterConfiguration, ClusterMember, resolve_cluster};
pub use error::{ClientError, Result};
pub use registry::{CallHandle, CallRegistry};
pub use retry::with_retry;
pub use streaming::{FileUpload, RecordStream, StreamEvent, StreamHandle};

// Re-export the wire types so callers need not depend on the proto crate.
pub use recordbase_proto::proto;
