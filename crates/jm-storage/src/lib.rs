//! Storage contract (§4.1) and its in-memory reference implementation.

pub mod memory;
pub mod traits;

pub use memory::InMemoryStorage;
pub use traits::{require_unique, DirectoryQuery, Storage};
