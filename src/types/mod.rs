// ABOUTME: Validated domain types shared across the crate.
// ABOUTME: Target ids are checked once at the configuration boundary.

mod target_id;

pub use target_id::{TargetId, TargetIdError};
