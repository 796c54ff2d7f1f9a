//! Integration test entry point for meridian-node.
//!
//! Run with: cargo test --test integration

mod harness;
mod lifecycle;
