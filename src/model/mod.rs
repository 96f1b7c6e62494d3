//! Domain records and their joined views.
//!
//! Plain records mirror storage rows. The `*View` structs carry the related
//! records a resource needs for filtering and rendering, the way a joined
//! query would return them.

pub mod catalog;
pub mod environments;
mod fields;
pub mod library;

pub use fields::{Field, Lookup, Scalar};

/// Opaque record identifier.
pub type Id = i64;
