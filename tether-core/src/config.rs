//! Host Configuration
//!
//! A host is configured with the tick primitive that drives scheduler flushes
//! and a bound on follow-up render rounds.
//!
//! ```rust,ignore
//! let config = HostConfig::from_json(r#"{ "tick": "manual" }"#)?;
//! let host = Host::from_config(&config);
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::schedule::{ImmediateTick, ManualTick, Tick, TokioTick};

/// Which primitive decides when a scheduled flush runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickMode {
    /// Flush as a task on the current tokio runtime.
    #[default]
    Tokio,

    /// Queue flushes until the host drains them.
    Manual,

    /// Flush synchronously inside `enqueue`.
    Immediate,
}

/// Configuration for a [`Host`](crate::reactive::Host).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
    pub tick: TickMode,

    /// How many follow-up rounds a render pass may run for writes made while
    /// rendering before the remaining dirty components are dropped.
    pub max_render_rounds: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            tick: TickMode::default(),
            max_render_rounds: 16,
        }
    }
}

impl HostConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(input: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(input)?)
    }

    /// Build the tick primitive this configuration selects.
    pub fn build_tick(&self) -> Arc<dyn Tick> {
        match self.tick {
            TickMode::Tokio => Arc::new(TokioTick::new()),
            TickMode::Manual => Arc::new(ManualTick::new()),
            TickMode::Immediate => Arc::new(ImmediateTick),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_uses_defaults() {
        let config = HostConfig::from_json("{}").unwrap();
        assert_eq!(config, HostConfig::default());
        assert_eq!(config.tick, TickMode::Tokio);
        assert_eq!(config.max_render_rounds, 16);
    }

    #[test]
    fn parses_tick_mode() {
        let config = HostConfig::from_json(r#"{ "tick": "immediate", "max_render_rounds": 4 }"#).unwrap();
        assert_eq!(config.tick, TickMode::Immediate);
        assert_eq!(config.max_render_rounds, 4);
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = HostConfig::from_json(r#"{ "ticks": "manual" }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn manual_tick_queues_until_drained() {
        let config = HostConfig {
            tick: TickMode::Manual,
            ..HostConfig::default()
        };
        let tick = config.build_tick();
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran_clone = ran.clone();
        tick.schedule(Box::new(move || {
            ran_clone.store(true, std::sync::atomic::Ordering::SeqCst);
        }));
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(tick.drain(), 1);
        assert!(ran.load(std::sync::atomic::Ordering::SeqCst));
    }
}
