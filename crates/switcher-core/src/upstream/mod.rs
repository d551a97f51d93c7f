//! Instance management: health tracking, selection and remote discovery.
//!
//! This module handles communication with the mirrors of the service, including:
//! - A shared HTTP client with concurrency control and a per-request timeout race
//! - Per-instance rolling health windows fed by probes and real requests
//! - Classification of responses into "instance down" and "resource unavailable"
//! - Periodic check passes with a reentrancy guard
//! - Selection policies (prefer-same, fastest, random, round-robin)
//! - Ingestion of a remote instance directory with version filtering
//!
//! # Request Flow
//!
//! ```text
//! InstanceTracker::get_next_instance_for(kind)
//!     │
//!     ├─ [prefer same?] last selection still working → reuse it
//!     │
//!     └─ candidates (working only, or all) → fastest | random | roundrobin
//!              │
//!              └─ Instance::make_api_request(kind, path)
//!                     │
//!                     ├─ blacklisted kind → fail, nothing recorded
//!                     └─ send (+ one cookie redirect) → classify → record → notify
//! ```

pub mod builder;
pub mod errors;
pub mod health;
pub mod http_client;
pub mod instance;
pub mod load_balancer;
pub mod manager;
pub mod remote;
pub mod version;
pub mod window;

pub use builder::{BuilderError, InstanceTrackerBuilder};
pub use errors::UpstreamError;
pub use health::HealthChecker;
pub use http_client::{HttpClient, HttpClientConfig, HttpResponse};
pub use instance::{ApiResponse, Instance, InstanceStatus, RecordEvent, RequestKind};
pub use load_balancer::LoadBalancer;
pub use manager::InstanceTracker;
pub use window::{HealthRecord, RecordWindow, WINDOW_SIZE};
