//! tagmark-store: versioned bookmark persistence.
//!
//! Free-form tags and notes attached to URLs, persisted as one JSON blob
//! through a host-supplied key-value primitive. Survives schema changes
//! via the migrator and concurrent access from multiple execution
//! contexts via change-notice driven cache rebuilds.

pub mod backend;
pub mod codec;
pub mod migration;
pub mod record;
pub mod settings;
pub mod store;

pub use backend::*;
pub use codec::*;
pub use migration::*;
pub use record::*;
pub use settings::*;
pub use store::*;
