//! Copyright (c) 2026, Kirky.X
//!
//! Apache License 2.0
//!
//! Trafficgate - Traffic Governance Pipeline
//!
//! Decides, per request, whether an inbound call is admitted and which endpoint an
//! outbound call is routed to.
//!
//! # API Layers
//!
//! ## Prelude (Quick Start)
//!
//! Use `use trafficgate::prelude::*;` to import all commonly used types.
//!
//! ## Core API
//!
//! - [`Governor`] - Wires registry, filter chains, limiters and circuit breakers together
//! - [`GovernanceConfig`] - Live topology, limiter defaults, watcher and service policies
//! - [`Permission`] - Admission verdict of the inbound chain
//! - [`GovernanceError`] - Error types
//!
//! ## Endpoint Model
//!
//! Endpoints carry labels (unit, cell, lane, ...), a state and warm-up weights, and are
//! grouped by unit and cell in an immutable [`EndpointGroup`].
//!
//! ## Filter Chains
//!
//! - Inbound: ready, concurrency limit, rate limit, unit and cell admission
//! - Route: circuit breaker, sticky, healthy, unit, cell, lane, load balance, instance
//!   circuit breaker. Consecutive constraint filters are composed into one pass.
//!
//! ## Registry Sync
//!
//! - [`registry::MemoryRegistry`] and the push-watch [`registry::WatchRegistry`]
//! - [`sync::HttpWatcher`] polling remote governance data
//!
//! # Examples
//!
//! ```rust
//! use trafficgate::prelude::*;
//!
//! #[tokio::main]
//! async fn main() {
//!     let governor = Governor::builder(GovernanceConfig::default()).build().unwrap();
//!     let service = ServiceId::new("orders");
//!     governor
//!         .register(&service, ServiceInstance::new("10.0.0.1", 8080))
//!         .await
//!         .unwrap();
//!
//!     let (permission, _invocation) = governor
//!         .inbound(ServiceRequest::new(service.clone()))
//!         .await
//!         .unwrap();
//!     assert!(permission.is_success());
//!
//!     let endpoint = governor.route(ServiceRequest::new(service)).await.unwrap();
//!     assert_eq!(endpoint.port(), 8080);
//! }
//! ```
//!
//! # Features
//!
//! - **http** (default): `reqwest` based fetcher for the HTTP watcher
//! - **redis**: distributed fixed-window rate limiting on Redis
//! - **telemetry**: `tracing-subscriber` initialization helpers

pub mod prelude;

pub mod circuit_breaker;
pub mod config;
pub mod constants;
pub mod cookie;
pub mod endpoint;
pub mod error;
pub mod factory;
pub mod filter;
pub mod governor;
pub mod invocation;
pub mod limiter_manager;
pub mod limiters;
pub mod loadbalance;
pub mod policy;
#[cfg(feature = "redis")]
pub mod redis_limiter;
pub mod registry;
pub mod sync;
#[cfg(feature = "telemetry")]
pub mod telemetry;
pub mod template;

// Re-export commonly used types
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState};
pub use config::{GovernanceConfig, LimiterSettings, LiveConfig, WatcherConfig};
pub use endpoint::{
    Endpoint, EndpointGroup, EndpointState, Labeled, Locatable, ServiceEndpoint, ServiceInstance,
    SharedEndpoint, Stateful, Weighted,
};
pub use error::{GovernanceError, Permission, RegistryError};
pub use factory::{LocalRateLimiterFactory, RateLimiterFactory};
pub use filter::{InboundFilter, InboundFilters, RouteFilter, RouteFilters};
pub use governor::{Governor, GovernorBuilder};
pub use invocation::{InboundInvocation, OutboundInvocation, RouteTarget, ServiceRequest};
pub use limiter_manager::LimiterManager;
pub use limiters::{ConcurrencyLimiter, RateLimiter};
pub use loadbalance::LoadBalancer;
pub use policy::{LimitAlgorithm, LoadBalancerKind, PolicyCondition, RateLimitPolicy, ServicePolicy};
#[cfg(feature = "redis")]
pub use redis_limiter::{RedisClientManager, RedisLimiterConfig, RedisRateLimiterFactory};
pub use registry::{Registry, ServiceEndpoints, ServiceId};
pub use sync::{HttpWatcher, SyncEvent, SyncEventKind, SyncStatus};
#[cfg(feature = "telemetry")]
pub use telemetry::{init_tracing, TelemetryConfig};
pub use template::Template;
