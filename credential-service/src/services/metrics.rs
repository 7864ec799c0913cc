use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Counters for credential checks and for the failures this service swallows.
///
/// Each instance owns its registry, so stores built in tests never share state.
#[derive(Clone)]
pub struct CredentialMetrics {
    registry: Registry,
    validations: IntCounterVec,
    cache_errors: IntCounterVec,
    last_used_dropped: IntCounter,
    last_used_failed: IntCounter,
}

impl CredentialMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let validations = IntCounterVec::new(
            Opts::new(
                "credential_validations_total",
                "Credential validations by credential kind and outcome",
            ),
            &["credential", "outcome"],
        )?;
        let cache_errors = IntCounterVec::new(
            Opts::new(
                "credential_cache_errors_total",
                "Cache operations that failed and fell back to the repository",
            ),
            &["cache", "op"],
        )?;
        let last_used_dropped = IntCounter::new(
            "api_key_last_used_dropped_total",
            "Last-used touches dropped because the queue was full",
        )?;
        let last_used_failed = IntCounter::new(
            "api_key_last_used_failed_total",
            "Last-used touches that failed or timed out",
        )?;

        registry.register(Box::new(validations.clone()))?;
        registry.register(Box::new(cache_errors.clone()))?;
        registry.register(Box::new(last_used_dropped.clone()))?;
        registry.register(Box::new(last_used_failed.clone()))?;

        Ok(Self {
            registry,
            validations,
            cache_errors,
            last_used_dropped,
            last_used_failed,
        })
    }

    pub fn record_validation(&self, credential: &str, outcome: &str) {
        self.validations
            .with_label_values(&[credential, outcome])
            .inc();
    }

    pub fn record_cache_error(&self, cache: &str, op: &str) {
        self.cache_errors.with_label_values(&[cache, op]).inc();
    }

    pub fn record_last_used_dropped(&self) {
        self.last_used_dropped.inc();
    }

    pub fn record_last_used_failed(&self) {
        self.last_used_failed.inc();
    }

    pub fn validation_count(&self, credential: &str, outcome: &str) -> u64 {
        self.validations
            .with_label_values(&[credential, outcome])
            .get()
    }

    pub fn cache_error_count(&self, cache: &str, op: &str) -> u64 {
        self.cache_errors.with_label_values(&[cache, op]).get()
    }

    pub fn last_used_dropped_count(&self) -> u64 {
        self.last_used_dropped.get()
    }

    pub fn last_used_failed_count(&self) -> u64 {
        self.last_used_failed.get()
    }

    /// Render in the Prometheus text exposition format.
    pub fn encode(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();

        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
            return format!("# Failed to encode metrics: {}\n", e);
        }

        match String::from_utf8(buffer) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to convert metrics to UTF-8: {}", e);
                format!("# Failed to convert metrics to UTF-8: {}\n", e)
            }
        }
    }
}
