//! Integration Tests for the Switcher
//!
//! This crate contains various test modules:
//!
//! - `instance_tests`: Response classification, blacklisting, cookie redirects and probes
//!   against mock mirrors
//! - `tracker_tests`: Check passes, readiness and remote directory ingestion
//! - `switcher_tests`: Failover, selection policies and cancellation through the dispatcher
//! - `mock_infrastructure`: Reusable mock mirrors and fixtures
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package tests
//! ```
//!
//! Every mirror is a local mockito server; no external network access is needed.


#[cfg(test)]
mod tracker_tests;

#[cfg(test)]
mod switcher_tests;
