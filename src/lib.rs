//! Table extraction for irregular HTML tables
//!
//! Walks table rows through a `PageDriver`, applies a caller-supplied column
//! schema and emits schema-stable typed records:
//! - colspan-aware column alignment
//! - text / integer / float / date / link coercion with NULL degradation
//! - record sinks (memory, JSON lines)
//! - robots-aware page fetching
//! - JSON-speaking FFI entry point

pub mod error;
pub mod ffi;
pub mod fetch;
pub mod robots;
pub mod sink;
pub mod table;

pub use error::*;
pub use ffi::*;
pub use table::*;
