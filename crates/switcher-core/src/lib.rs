//! # Switcher Core
//!
//! Client-side failover across interchangeable mirrors of a video metadata API.
//!
//! This crate provides:
//!
//! - **[`config`]**: Layered configuration (defaults, file, environment) with eager validation.
//!
//! - **[`upstream`]**: Instance model with rolling health windows, health probes, response
//!   classification and per-kind blacklisting, the instance tracker with its periodic checker,
//!   remote directory ingestion, and selection policies.
//!
//! - **[`switcher`]**: The dispatcher that retries tagged requests across instances until one
//!   succeeds.
//!
//! - **[`stats`]**: Mean and median helpers used by the health estimates.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Switcher                          │
//! │            (wait for ready, select, retry)               │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │                  InstanceTracker                   │  │
//! │  │  ┌──────────────┐ ┌──────────────┐ ┌────────────┐  │  │
//! │  │  │ LoadBalancer │ │ HealthChecker│ │ Remote feed│  │  │
//! │  │  └──────┬───────┘ └──────┬───────┘ └─────┬──────┘  │  │
//! │  │         └────────┬───────┴───────────────┘         │  │
//! │  │           ┌──────▼──────┐                          │  │
//! │  │           │  Instance   │──► RecordEvent channel   │  │
//! │  │           │ RecordWindow│                          │  │
//! │  │           └──────┬──────┘                          │  │
//! │  └──────────────────┼─────────────────────────────────┘  │
//! │              ┌──────▼──────┐                             │
//! │              │ HttpClient  │                             │
//! │              └─────────────┘                             │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod stats;
pub mod switcher;
pub mod upstream;

pub use config::{ConfigError, SwitcherConfig};
pub use switcher::{Switcher, SwitcherError};
pub use upstream::{ApiResponse, InstanceStatus, RecordEvent, RequestKind, UpstreamError};
