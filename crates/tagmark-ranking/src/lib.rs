//! tagmark-ranking: derived "most used" / "recently added" tag lists.
//!
//! Consumes post-normalization tag deltas from the store layer and
//! maintains a time-weighted usage log plus two bounded derived lists,
//! serializing all updates through a FIFO queue.

pub mod queue;
pub mod ranking;

pub use queue::*;
pub use ranking::*;
