//! Property-based invariant tests.
//!
//! Run with: `cargo test --test property`

mod channel;
mod report;
