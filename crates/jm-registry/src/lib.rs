//! Bridge registry, manifest bootstrap, and the optimistic-concurrency
//! bridge config / routing policy store (§4.3).

pub mod config_store;
pub mod manifest;
pub mod registry;

pub use config_store::ConfigStore;
pub use manifest::{
    bootstrap, AdapterFactory, BootstrapInput, BootstrapReport, CollisionPolicy, CollisionRecord,
};
pub use registry::{BridgeManifest, BridgeRegistry};
