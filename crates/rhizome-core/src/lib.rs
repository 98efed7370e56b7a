//! rhizome-core — shared types, wire format, configuration, and the
//! external-collaborator traits for the bundle payload fetch engine.
//! All other rhizome crates depend on this one.

pub mod config;
pub mod manifest;
pub mod transport;
pub mod wire;

pub use manifest::{BundleImporter, Manifest, ManifestStore, ManifestVerifier, PeerAddr};
pub use transport::DatagramSink;
