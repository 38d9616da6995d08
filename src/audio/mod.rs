//! Audio types and the realtime voice session core.

pub mod realtime;
pub mod types;

pub use types::*;
