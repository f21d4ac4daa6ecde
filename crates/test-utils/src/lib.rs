//! Shared test utilities for the WIS2 node workspace.
//!
//! This crate provides common testing infrastructure including:
//! - A BUFR message builder for synthetic binary fixtures
//! - CSV, mapping and station registry fixtures
//! - Recording and scripted brokers
//! - Temporary directory helpers
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in integration tests under `tests/`:
//!
//! ```ignore
//! use test_utils::{BufrBuilder, fixtures};
//! ```

pub mod brokers;
pub mod bufr;
pub mod fixtures;
pub mod paths;

// Re-export commonly used items at the crate root
pub use brokers::*;
pub use bufr::*;
pub use paths::*;

/// Macro for approximate floating-point equality assertions.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(1.0001_f64, 1.0_f64, 0.001_f64); // passes
/// assert_approx_eq!(1.1_f32, 1.0_f32, 0.001_f32);    // fails
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if diff > epsilon {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                left, right, diff, epsilon
            );
        }
    }};
}
