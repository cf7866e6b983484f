//! Small reusable types shared across the crate.

mod locked_cell;

pub use locked_cell::LockedCell;
