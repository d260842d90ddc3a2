//! Per-key serialized work queues.

mod keyed;

pub use keyed::*;
