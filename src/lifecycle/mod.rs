//! The single writer of tenant lifecycle state.

mod engine;

pub use engine::LifecycleEngine;
