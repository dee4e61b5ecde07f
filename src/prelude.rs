//! Prelude module - Commonly used types for quick imports
//!
//! This module re-exports the most commonly used types from Trafficgate,
//! allowing users to import them with a single `use trafficgate::prelude::*;`
//! statement instead of importing each type individually.

// Core types - always available
pub use crate::config::GovernanceConfig;
pub use crate::error::{GovernanceError, Permission};
pub use crate::governor::{Governor, GovernorBuilder};

// Endpoint model
pub use crate::endpoint::{
    Endpoint, EndpointGroup, Labeled, Locatable, ServiceInstance, SharedEndpoint, Stateful,
    Weighted,
};

// Requests and registry
pub use crate::invocation::ServiceRequest;
pub use crate::registry::{Registry, ServiceId};

// Policies and limiters
pub use crate::limiters::RateLimiter;
pub use crate::policy::{LimitAlgorithm, RateLimitPolicy, ServicePolicy};

// Filters
pub use crate::filter::{InboundFilter, RouteFilter};

// Feature-gated exports
#[cfg(feature = "telemetry")]
pub use crate::telemetry::{init_tracing, TelemetryConfig};
