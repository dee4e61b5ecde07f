//! Copyright (c) 2026, Kirky.X
//!
//! Apache License 2.0
//!
//! Centralized configuration constants for trafficgate.
//!
//! Filter order values are public and spaced by 100 so that custom filters can
//! be registered between built-in stages without renumbering.

// ============================================================================
// Inbound Filter Order
// ============================================================================

/// Order of the readiness check.
pub const INBOUND_ORDER_READY: i32 = 0;

/// Order of authentication filters.
pub const INBOUND_ORDER_AUTH: i32 = 100;

/// Order of permission filters.
pub const INBOUND_ORDER_PERMISSION: i32 = 200;

/// Order of load (CPU/memory) limiters.
pub const INBOUND_ORDER_LOAD_LIMITER: i32 = 300;

/// Order of the concurrency limiter.
pub const INBOUND_ORDER_CONCURRENCY_LIMITER: i32 = 400;

/// Order of the rate limiter.
pub const INBOUND_ORDER_RATE_LIMITER: i32 = 500;

/// Order of the live unit check.
pub const INBOUND_ORDER_LIVE_UNIT: i32 = 600;

/// Order of the live cell check.
pub const INBOUND_ORDER_LIVE_CELL: i32 = 700;

/// Order of live failover handling.
pub const INBOUND_ORDER_LIVE_FAILOVER: i32 = 800;

// ============================================================================
// Route Filter Order
// ============================================================================

/// Order of the service circuit breaker filter.
pub const ROUTE_ORDER_CIRCUIT_BREAKER: i32 = 100;

/// Order of the sticky session filter.
pub const ROUTE_ORDER_STICKY: i32 = 200;

/// Order of the health filter.
pub const ROUTE_ORDER_HEALTH: i32 = 300;

/// Order of the live unit route filter.
pub const ROUTE_ORDER_LIVE_UNIT: i32 = 400;

/// Order of the live cell route filter.
pub const ROUTE_ORDER_LIVE_CELL: i32 = 500;

/// Order of the lane route filter.
pub const ROUTE_ORDER_LANE: i32 = 600;

/// Order of the load balance filter.
pub const ROUTE_ORDER_LOADBALANCE: i32 = 1000;

/// Order of the instance circuit breaker filter, after an endpoint was picked.
pub const ROUTE_ORDER_INSTANCE_CIRCUIT_BREAKER: i32 = 1100;

// ============================================================================
// Endpoint Labels
// ============================================================================

/// Label key carrying the unit of an endpoint.
pub const LABEL_UNIT: &str = "unit";

/// Label key carrying the cell of an endpoint.
pub const LABEL_CELL: &str = "cell";

/// Label key carrying the region of an endpoint.
pub const LABEL_REGION: &str = "region";

/// Label key carrying the zone of an endpoint.
pub const LABEL_ZONE: &str = "zone";

/// Label key carrying the lane of an endpoint.
pub const LABEL_LANE: &str = "lane";

/// Label key carrying the live space of an endpoint.
pub const LABEL_LIVE_SPACE_ID: &str = "live_space_id";

/// Group key used for endpoints without a unit label.
pub const DEFAULT_UNIT: &str = "";

/// Group key used for endpoints without a cell label.
pub const DEFAULT_CELL: &str = "";

// ============================================================================
// Request Headers
// ============================================================================

/// Header naming the unit a request is routed to.
pub const HEADER_LIVE_UNIT: &str = "x-live-unit";

/// Header naming the cell a request is routed to.
pub const HEADER_LIVE_CELL: &str = "x-live-cell";

/// Header naming the lane of a request.
pub const HEADER_LANE: &str = "x-lane";

/// Header carrying the sticky endpoint id.
pub const HEADER_STICKY_ID: &str = "x-sticky-id";

// ============================================================================
// Weight Constants
// ============================================================================

/// Default base weight of an endpoint.
pub const DEFAULT_WEIGHT: u32 = 100;

/// How long a computed warmup weight may be reused (milliseconds).
pub const REWEIGHT_CACHE_MILLIS: i64 = 50;

// ============================================================================
// Sync Constants
// ============================================================================

/// Default poll interval of the HTTP watcher (milliseconds).
pub const DEFAULT_WATCH_INTERVAL_MS: u64 = 5_000;

/// Default upper bound of the random jitter added to each poll cycle (milliseconds).
pub const DEFAULT_WATCH_JITTER_MS: u64 = 1_000;

/// Default request timeout of the HTTP watcher (milliseconds).
pub const DEFAULT_WATCH_TIMEOUT_MS: u64 = 5_000;

/// Template placeholder naming the subscribed space.
pub const TEMPLATE_SPACE_ID: &str = "space_id";

/// Template placeholder carrying the current version of the subscribed space.
pub const TEMPLATE_SPACE_VERSION: &str = "space_version";

// ============================================================================
// Registry Retry Constants
// ============================================================================

/// Initial delay of a registry retry task (milliseconds).
pub const DEFAULT_RETRY_INITIAL_DELAY_MS: u64 = 500;

/// Maximum delay of a registry retry task (milliseconds).
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;

/// Default root path of the push-watch registry.
pub const DEFAULT_REGISTRY_ROOT: &str = "/trafficgate";

/// Sync kind of remotely watched service policies.
pub const DEFAULT_POLICY_SYNC_KIND: &str = "policy";

// ============================================================================
// Limiter Constants
// ============================================================================

/// Realize type of the in-process limiter factory.
pub const LIMITER_TYPE_LOCAL: &str = "local";

/// Realize type of the Redis limiter factory.
pub const LIMITER_TYPE_REDIS: &str = "redis";

/// Maximum number of permits a single acquire may request.
pub const MAX_PERMITS: u64 = 1_000_000;
