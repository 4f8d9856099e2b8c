//! Blob-level sync: transport contract and the client driving it.

pub mod client;
pub mod types;

pub use client::{SyncClient, SyncOutcome};
pub use types::{PutOutcome, RemoteBlob, SyncTransport, TransportError};
