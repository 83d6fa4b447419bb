//! # Run Configuration
//!
//! Typed configuration for a batch run: dispatch limits, polling policy,
//! session renewal policy, post-completion analysis toggles and the remote
//! endpoint. Out-of-range values are clamped or reset with a warning in
//! [`BatchConfig::validated`] instead of being rejected, so a long unattended
//! run is never refused over a tuning knob.

use std::fmt;
use std::time::Duration;

use tracing::warn;

use crate::errors::{AlphaBatchError, Result};

/// Default platform endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.worldquantbrain.com";

/// Environment variable overriding the platform endpoint.
pub const BASE_URL_ENV: &str = "BRAIN_API_URL";
/// Environment variable holding the account email.
pub const EMAIL_ENV: &str = "BRAIN_CREDENTIAL_EMAIL";
/// Environment variable holding the account password.
pub const PASSWORD_ENV: &str = "BRAIN_CREDENTIAL_PASSWORD";

pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 8;
pub const MIN_ALPHAS_PER_SLOT: usize = 2;
pub const MAX_ALPHAS_PER_SLOT: usize = 10;
pub const DEFAULT_ALPHAS_PER_SLOT: usize = 3;

/// Platform account credentials. Only ever sourced from flags or the environment.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    /// Reject empty credentials before any network call.
    pub fn validated(self) -> Result<Self> {
        if self.email.trim().is_empty() {
            return Err(AlphaBatchError::config_error("email must not be empty"));
        }
        if self.password.is_empty() {
            return Err(AlphaBatchError::config_error("password must not be empty"));
        }
        Ok(self)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Remote endpoint configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    /// Fixed client-side timeout applied to every call.
    pub request_timeout: Duration,
}

impl ApiConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Session renewal policy.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    /// Renew when fewer than this many seconds of token lifetime remain.
    pub low_water_secs: f64,
    /// Delay before the single retry of a failed re-authentication.
    pub renewal_retry_delay: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            low_water_secs: 2000.0,
            renewal_retry_delay: Duration::from_secs(100),
        }
    }
}

/// Polling policy for remote jobs.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Transport failures tolerated while polling one job; one more fails it.
    pub max_poll_failures: u32,
    /// Sleep after a failed poll before trying again.
    pub transport_retry_delay: Duration,
    /// Sleep when the server neither gives a wait nor a terminal status.
    pub idle_poll_interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_poll_failures: 2,
            transport_retry_delay: Duration::from_secs(30),
            idle_poll_interval: Duration::from_secs(5),
        }
    }
}

/// Which post-completion checks to run for each produced alpha.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub get_pnl: bool,
    pub get_stats: bool,
    pub check_submission: bool,
    pub check_self_corr: bool,
    pub check_prod_corr: bool,
    pub correlation_threshold: f64,
}

impl AnalysisConfig {
    /// Whether any analysis call is enabled at all.
    pub fn is_enabled(&self) -> bool {
        self.get_pnl
            || self.get_stats
            || self.check_submission
            || self.check_self_corr
            || self.check_prod_corr
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            get_pnl: false,
            get_stats: false,
            check_submission: false,
            check_self_corr: false,
            check_prod_corr: false,
            correlation_threshold: 0.7,
        }
    }
}

/// Configuration for a whole batch run.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Number of worker tasks per manifest.
    pub concurrency: usize,
    /// Pack requests into multi-job slots.
    pub multi_sim: bool,
    /// Fan-in K for multi-job slots.
    pub alphas_per_slot: usize,
    /// Below this many pending requests multi mode is skipped.
    pub min_multi_batch: usize,
    /// Suffix appended to a manifest path to locate its checkpoint.
    pub checkpoint_suffix: String,
    /// Tags applied to every produced alpha; empty disables tagging.
    pub alpha_tags: Vec<String>,
    /// Shuffle pending requests before packing.
    pub shuffle: bool,
    pub shuffle_seed: Option<u64>,
    pub session: SessionPolicy,
    pub poll: PollPolicy,
    pub analysis: AnalysisConfig,
}

impl BatchConfig {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            ..Self::default()
        }
    }

    pub fn with_multi_sim(mut self, alphas_per_slot: usize) -> Self {
        self.multi_sim = true;
        self.alphas_per_slot = alphas_per_slot;
        self
    }

    pub fn with_min_multi_batch(mut self, min_multi_batch: usize) -> Self {
        self.min_multi_batch = min_multi_batch;
        self
    }

    pub fn with_alpha_tags(mut self, tags: Vec<String>) -> Self {
        self.alpha_tags = tags;
        self
    }

    pub fn with_shuffle(mut self, seed: Option<u64>) -> Self {
        self.shuffle = true;
        self.shuffle_seed = seed;
        self
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_analysis(mut self, analysis: AnalysisConfig) -> Self {
        self.analysis = analysis;
        self
    }

    /// Fan-in to use when packing, `None` meaning single mode.
    pub fn fan_in(&self) -> Option<usize> {
        if self.multi_sim {
            Some(self.alphas_per_slot)
        } else {
            None
        }
    }

    /// Return a copy with every tunable forced into its supported range.
    pub fn validated(mut self) -> Self {
        if self.concurrency < MIN_CONCURRENCY || self.concurrency > MAX_CONCURRENCY {
            let clamped = self.concurrency.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY);
            warn!(
                "Concurrency should be {}..{}, got {}; using {}",
                MIN_CONCURRENCY, MAX_CONCURRENCY, self.concurrency, clamped
            );
            self.concurrency = clamped;
        }
        if self.multi_sim
            && (self.alphas_per_slot < MIN_ALPHAS_PER_SLOT
                || self.alphas_per_slot > MAX_ALPHAS_PER_SLOT)
        {
            warn!(
                "Alphas per slot should be {}..{}, got {}; using {}",
                MIN_ALPHAS_PER_SLOT,
                MAX_ALPHAS_PER_SLOT,
                self.alphas_per_slot,
                DEFAULT_ALPHAS_PER_SLOT
            );
            self.alphas_per_slot = DEFAULT_ALPHAS_PER_SLOT;
        }
        if self.checkpoint_suffix.is_empty() {
            warn!("Empty checkpoint suffix would overwrite manifests; using .checkpoint");
            self.checkpoint_suffix = ".checkpoint".to_string();
        }
        let threshold = self.analysis.correlation_threshold;
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            warn!("Correlation threshold {} is outside 0..1; using 0.7", threshold);
            self.analysis.correlation_threshold = 0.7;
        }
        self
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            multi_sim: false,
            alphas_per_slot: DEFAULT_ALPHAS_PER_SLOT,
            min_multi_batch: 0,
            checkpoint_suffix: ".checkpoint".to_string(),
            alpha_tags: Vec::new(),
            shuffle: false,
            shuffle_seed: None,
            session: SessionPolicy::default(),
            poll: PollPolicy::default(),
            analysis: AnalysisConfig::default(),
        }
    }
}
