//! Terminal rendering of engine results

pub mod differ;

pub use differ::{display_drift, display_plan, print_summary};
