//! Named throttles built from configuration.

use std::collections::BTreeMap;

use dashmap::DashMap;
use tokio::runtime::Handle;
use tracing::{debug, info};

use super::queue::RequestThrottle;
use super::stats::ThrottleStats;
use crate::config::{PacerConfig, ThrottleConfig};
use crate::error::{PacerError, Result};

/// One [`RequestThrottle`] per lane.
///
/// Lanes are independent: each has its own queue, interval and drain loop,
/// so a slow upstream only delays callers of its own lane.
pub struct ThrottleRegistry {
    lanes: DashMap<String, RequestThrottle>,
    default_lane: String,
    handle: Handle,
}

impl ThrottleRegistry {
    /// Build every configured lane on the current Tokio runtime.
    pub fn from_config(config: &PacerConfig) -> Result<Self> {
        let handle = Handle::try_current().map_err(|_| PacerError::NoRuntime)?;
        Self::with_handle(config, handle)
    }

    /// Build every configured lane on the given runtime.
    ///
    /// The default lane is always present, using default throttle settings
    /// when it is not configured.
    pub fn with_handle(config: &PacerConfig, handle: Handle) -> Result<Self> {
        config.validate()?;

        let registry = Self {
            lanes: DashMap::new(),
            default_lane: config.default_lane.clone(),
            handle,
        };

        for (name, lane) in &config.lanes {
            registry.build_lane(name, *lane);
        }

        if !registry.lanes.contains_key(&registry.default_lane) {
            let name = registry.default_lane.clone();
            registry.build_lane(&name, ThrottleConfig::default());
        }

        info!(
            lanes = registry.lanes.len(),
            default_lane = %registry.default_lane,
            "Throttle registry initialized"
        );

        Ok(registry)
    }

    fn build_lane(&self, name: &str, config: ThrottleConfig) -> RequestThrottle {
        debug!(
            lane = %name,
            min_interval_ms = config.min_interval_ms,
            anchor = ?config.anchor,
            "Creating throttle lane"
        );

        let throttle = RequestThrottle::with_handle(name, config, self.handle.clone());
        self.lanes.insert(name.to_string(), throttle.clone());
        throttle
    }

    /// Look up a lane.
    pub fn get(&self, name: &str) -> Option<RequestThrottle> {
        self.lanes.get(name).map(|entry| entry.value().clone())
    }

    /// Look up a lane, failing if it is not registered.
    pub fn lane(&self, name: &str) -> Result<RequestThrottle> {
        self.get(name)
            .ok_or_else(|| PacerError::UnknownLane(name.to_string()))
    }

    /// Name of the default lane.
    pub fn default_lane_name(&self) -> &str {
        &self.default_lane
    }

    /// The default lane.
    pub fn default_lane(&self) -> Result<RequestThrottle> {
        self.lane(&self.default_lane)
    }

    /// Register or replace a lane.
    ///
    /// A replaced throttle keeps draining whatever was already queued on it;
    /// new submissions through the registry go to the new one.
    pub fn insert(&self, name: &str, config: ThrottleConfig) -> Result<RequestThrottle> {
        if name.trim().is_empty() {
            return Err(PacerError::Config("lane names must not be empty".to_string()));
        }
        config.validate()?;

        Ok(self.build_lane(name, config))
    }

    /// Names of all lanes, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lanes.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Stats for every lane, keyed by lane name.
    pub fn stats(&self) -> BTreeMap<String, ThrottleStats> {
        self.lanes
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().stats()))
            .collect()
    }
}

impl std::fmt::Debug for ThrottleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottleRegistry")
            .field("default_lane", &self.default_lane)
            .field("lanes", &self.names())
            .finish()
    }
}
