//! # MicroBus Test Suite
//!
//! Cross-crate tests that need more than one bus instance.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── local_routing.rs   # facade + channels, no network
//!     ├── network.rs         # two buses over loopback broadcast
//!     └── bridge.rs          # reliable delivery and the ACL
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p mbus-tests
//! cargo test -p mbus-tests integration::network::
//!
//! # Benchmarks
//! cargo bench -p mbus-tests
//! ```
//!
//! The network tests probe loopback broadcast first and return early on
//! hosts where it is unavailable.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

#[cfg(test)]
mod integration;
