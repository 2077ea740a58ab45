use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::error::{AppError, Result};

pub const DEFAULT_WINDOW_SECS: u64 = 15 * 60;

/// Half-open range `[min_secs, max_secs)` a post-success cooldown is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CooldownRange {
    pub min_secs: f64,
    pub max_secs: f64,
}

impl CooldownRange {
    pub const DEFAULT: CooldownRange = CooldownRange { min_secs: 10.0, max_secs: 20.0 };
    pub const SENSITIVE: CooldownRange = CooldownRange { min_secs: 30.0, max_secs: 60.0 };

    pub fn new(min_secs: f64, max_secs: f64) -> Result<Self> {
        let range = Self { min_secs, max_secs };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.min_secs.is_finite() || !self.max_secs.is_finite() {
            return Err(invalid(format!("cooldown bounds must be finite: {:?}", self)));
        }
        if self.min_secs < 0.0 || self.min_secs >= self.max_secs {
            return Err(invalid(format!(
                "cooldown range must satisfy 0 <= min < max, got [{}, {})",
                self.min_secs, self.max_secs
            )));
        }
        Ok(())
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        Duration::from_secs_f64(rng.gen_range(self.min_secs..self.max_secs))
    }

    pub fn contains(&self, duration: Duration) -> bool {
        let secs = duration.as_secs_f64();
        secs >= self.min_secs && secs < self.max_secs
    }
}

/// Static admission settings as they appear in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionSettings {
    pub window_secs: u64,
    pub default_cooldown: CooldownRange,
    pub sensitive_cooldown: CooldownRange,
    pub sensitive_endpoints: Vec<String>,
    pub limits: BTreeMap<String, u32>,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        let limits = [
            ("search_tweet", 50),
            ("user_tweets", 100),
            ("home_timeline", 15),
            ("tweet", 10),
            ("delete_tweet", 10),
            ("dm_write", 10),
            ("dm_read", 50),
            ("user_search", 100),
            ("user_lookup", 100),
            ("follow", 5),
            ("unfollow", 3),
            ("favorite", 10),
            ("unfavorite", 10),
            ("retweet", 10),
            ("delete_retweet", 100),
            ("trends", 50),
            ("create_poll", 50),
            ("upload_media", 300),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            window_secs: DEFAULT_WINDOW_SECS,
            default_cooldown: CooldownRange::DEFAULT,
            sensitive_cooldown: CooldownRange::SENSITIVE,
            sensitive_endpoints: vec!["tweet".to_string(), "follow".to_string()],
            limits,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EndpointPolicy {
    pub max_calls_per_window: u32,
    pub window: Duration,
    pub cooldown: CooldownRange,
}

/// Per-endpoint limits plus the two cooldown tiers.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    window: Duration,
    limits: BTreeMap<String, u32>,
    sensitive: BTreeSet<String>,
    default_cooldown: CooldownRange,
    sensitive_cooldown: CooldownRange,
}

impl PolicyTable {
    /// Empty table: every endpoint is unknown until a limit is added.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            limits: BTreeMap::new(),
            sensitive: BTreeSet::new(),
            default_cooldown: CooldownRange::DEFAULT,
            sensitive_cooldown: CooldownRange::SENSITIVE,
        }
    }

    pub fn from_settings(settings: &AdmissionSettings) -> Result<Self> {
        if settings.window_secs == 0 {
            return Err(invalid("window_secs must be greater than zero".to_string()));
        }
        settings.default_cooldown.validate()?;
        settings.sensitive_cooldown.validate()?;

        Ok(Self {
            window: Duration::from_secs(settings.window_secs),
            limits: settings.limits.clone(),
            sensitive: settings.sensitive_endpoints.iter().cloned().collect(),
            default_cooldown: settings.default_cooldown,
            sensitive_cooldown: settings.sensitive_cooldown,
        })
    }

    pub fn with_limit(mut self, endpoint: &str, max_calls_per_window: u32) -> Self {
        self.limits.insert(endpoint.to_string(), max_calls_per_window);
        self
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// `None` means the endpoint has no configured limit and is admitted unconditionally.
    pub fn limit(&self, endpoint: &str) -> Option<u32> {
        self.limits.get(endpoint).copied()
    }

    pub fn is_sensitive(&self, endpoint: &str) -> bool {
        self.sensitive.contains(endpoint)
    }

    pub fn cooldown_for(&self, endpoint: &str) -> CooldownRange {
        if self.is_sensitive(endpoint) {
            self.sensitive_cooldown
        } else {
            self.default_cooldown
        }
    }

    pub fn policy(&self, endpoint: &str) -> Option<EndpointPolicy> {
        self.limit(endpoint).map(|max_calls_per_window| EndpointPolicy {
            max_calls_per_window,
            window: self.window,
            cooldown: self.cooldown_for(endpoint),
        })
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        let settings = AdmissionSettings::default();
        Self {
            window: Duration::from_secs(settings.window_secs),
            limits: settings.limits,
            sensitive: settings.sensitive_endpoints.into_iter().collect(),
            default_cooldown: settings.default_cooldown,
            sensitive_cooldown: settings.sensitive_cooldown,
        }
    }
}

fn invalid(message: String) -> AppError {
    AppError::Config(config::ConfigError::Message(message))
}
