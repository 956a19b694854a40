//! Configuration validation.
//!
//! Serde handles syntax; this checks value ranges and endpoint specs.
//! All errors are returned, not just the first.

use crate::config::schema::TxConfig;
use crate::router::Endpoint;

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Check `config`, collecting every error.
pub fn validate_config(config: &TxConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let router = &config.router;
    if router.endpoints.is_empty() {
        errors.push(ValidationError::new("router.endpoints", "at least one endpoint is required"));
    }
    for (i, entry) in router.endpoints.iter().enumerate() {
        let (_, url) = Endpoint::parse_spec(entry.spec());
        match url::Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            Ok(parsed) => errors.push(ValidationError::new(
                format!("router.endpoints[{}]", i),
                format!("unsupported scheme '{}'", parsed.scheme()),
            )),
            Err(e) => errors.push(ValidationError::new(
                format!("router.endpoints[{}]", i),
                format!("invalid URL '{}': {}", url, e),
            )),
        }
        if entry.priority() == Some(0) {
            errors.push(ValidationError::new(
                format!("router.endpoints[{}].priority", i),
                "must be at least 1",
            ));
        }
    }
    if !router.endpoints.is_empty() && router.fixed_index >= router.endpoints.len() {
        errors.push(ValidationError::new(
            "router.fixed_index",
            format!("out of range for {} endpoints", router.endpoints.len()),
        ));
    }
    if router.request_timeout_secs == 0 {
        errors.push(ValidationError::new("router.request_timeout_secs", "must be greater than 0"));
    }

    let chain = &config.chain;
    for (field, value) in [
        ("chain.block_number_timeout_secs", chain.block_number_timeout_secs),
        ("chain.read_timeout_secs", chain.read_timeout_secs),
        ("chain.send_timeout_secs", chain.send_timeout_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }
    if chain.gas_limit_multiplier.is_nan() || chain.gas_limit_multiplier < 1.0 {
        errors.push(ValidationError::new("chain.gas_limit_multiplier", "must be at least 1.0"));
    }

    if config.nonce.max_in_flight == 0 {
        errors.push(ValidationError::new("nonce.max_in_flight", "must be greater than 0"));
    }
    if config.nonce.reservation_ttl_secs == 0 {
        errors.push(ValidationError::new("nonce.reservation_ttl_secs", "must be greater than 0"));
    }

    if config.queue.idle_poll_ms == 0 {
        errors.push(ValidationError::new("queue.idle_poll_ms", "must be greater than 0"));
    }
    if config.queue.max_retry_delay_ms < config.queue.retry_delay_ms {
        errors.push(ValidationError::new(
            "queue.max_retry_delay_ms",
            "must not be below queue.retry_delay_ms",
        ));
    }

    if config.confirm.poll_interval_ms == 0 {
        errors.push(ValidationError::new("confirm.poll_interval_ms", "must be greater than 0"));
    }
    if config.confirm.timeout_secs == 0 {
        errors.push(ValidationError::new("confirm.timeout_secs", "must be greater than 0"));
    }

    let obs = &config.observability;
    if obs.metrics_enabled && obs.metrics_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("invalid socket address '{}'", obs.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
