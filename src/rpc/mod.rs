//! JSON-RPC transport shared by the paymaster and bundler clients.

pub mod client;

pub use client::{JsonRpcClient, RpcError};
