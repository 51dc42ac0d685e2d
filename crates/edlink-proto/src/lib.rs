//! Protocol buffer definitions for the edlink RPC surface.
//!
//! This crate contains the generated protobuf types and the tonic client and
//! server stubs for `proto/edlink.proto`. The client stub is consumed by
//! `edlink-client`; the server stub exists so tests and tools can stand up an
//! in-process server speaking the same protocol.

#![allow(missing_docs)] // Generated code doesn't have docs

/// Generated edlink protocol buffer types.
pub mod v1 {
    tonic::include_proto!("edlink.v1");
}

// Re-export commonly used types at crate root
pub use v1::*;
