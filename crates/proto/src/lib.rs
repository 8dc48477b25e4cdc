//! Protobuf types and gRPC service stubs for Recordbase.
//!
//! This crate carries the wire contract only, so consumers needing just the
//! message types and client stubs (e.g., the SDK) avoid any build-time
//! protoc dependency. The code under `src/generated/` is checked in;
//! regenerate it from `proto/recordbase/v1/recordbase.proto` when the
//! contract changes.

#![deny(unsafe_code)]
// gRPC services return tonic::Status (176 bytes) - standard practice for gRPC error handling
#![allow(clippy::result_large_err)]

/// Generated protobuf types and service traits.
pub mod proto {
    #![allow(clippy::all)]
    #![allow(missing_docs)]

    include!("generated/recordbase.v1.rs");
}
