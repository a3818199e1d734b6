//! Rate Limiting Middleware using GCRA Algorithm
//!
//! Limits `/data/*` requests per client IP using tower_governor. Uses the
//! Generic Cell Rate Algorithm (GCRA), which needs no background processes.

use governor::middleware::StateInformationMiddleware;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::PeerIpKeyExtractor;

use crate::error::StartupError;

/// Governor config with the peer-IP key and X-RateLimit-* headers
pub type DefaultGovernorConfig =
    tower_governor::governor::GovernorConfig<PeerIpKeyExtractor, StateInformationMiddleware>;

/// Rate limiting configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Disable to serve unlimited requests
    pub enabled: bool,
    /// Seconds to replenish one request
    pub per_second: u64,
    /// Burst size (max requests that can be made immediately)
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        // A dashboard polling every couple of seconds stays well inside this
        Self {
            enabled: true,
            per_second: 1,
            burst_size: 20,
        }
    }
}

/// Create a rate limiting governor config
///
/// Returns `None` when limiting is disabled. Requires the service to use
/// `into_make_service_with_connect_info::<SocketAddr>()` for IP extraction.
pub fn create_governor_config(
    config: &RateLimitConfig,
) -> Result<Option<Arc<DefaultGovernorConfig>>, StartupError> {
    if !config.enabled {
        return Ok(None);
    }

    GovernorConfigBuilder::default()
        .per_second(config.per_second)
        .burst_size(config.burst_size)
        .use_headers()
        .finish()
        .map(|governor| Some(Arc::new(governor)))
        .ok_or(StartupError::RateLimit)
}
