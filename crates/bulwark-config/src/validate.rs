//! Post-merge configuration validation.

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Validate a merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first [`ConfigError::ValidationError`] found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_risk_policy(config)?;
    validate_checkpoint(config)?;
    validate_isolation(config)?;
    validate_limits(config)?;
    validate_clock(config)?;
    validate_logging(config)?;
    Ok(())
}

const MAX_SPAWN_ATTEMPTS: u32 = 10;

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn risk_level(field: &str, value: Option<u8>) -> ConfigResult<()> {
    match value {
        Some(v) if !(1..=5).contains(&v) => Err(invalid(
            field,
            format!("risk level {v} is out of range; must be between 1 and 5"),
        )),
        _ => Ok(()),
    }
}

fn positive(field: &str, value: u64) -> ConfigResult<()> {
    if value == 0 {
        return Err(invalid(field, "must be greater than zero"));
    }
    Ok(())
}

fn validate_risk_policy(config: &Config) -> ConfigResult<()> {
    risk_level("approval.threshold", config.approval.threshold)?;
    if let Some(secs) = config.approval.timeout_secs {
        positive("approval.timeout_secs", secs)?;
    }
    Ok(())
}

fn validate_checkpoint(config: &Config) -> ConfigResult<()> {
    let c = &config.checkpoint;
    risk_level("checkpoint.floor", c.floor)?;
    positive("checkpoint.lock_timeout_secs", c.lock_timeout_secs)?;
    positive("checkpoint.max_snapshot_bytes", c.max_snapshot_bytes)?;
    Ok(())
}

fn validate_isolation(config: &Config) -> ConfigResult<()> {
    let i = &config.isolation;
    risk_level("isolation.container_at_risk", i.container_at_risk)?;
    positive("isolation.spawn_timeout_secs", i.spawn_timeout_secs)?;

    if i.spawn_attempts == 0 || i.spawn_attempts > MAX_SPAWN_ATTEMPTS {
        return Err(invalid(
            "isolation.spawn_attempts",
            format!("spawn_attempts must be between 1 and {MAX_SPAWN_ATTEMPTS}"),
        ));
    }

    if let Some(image) = &i.container_image
        && image.trim().is_empty()
    {
        return Err(invalid("isolation.container_image", "must not be empty"));
    }
    Ok(())
}

fn validate_limits(config: &Config) -> ConfigResult<()> {
    let l = &config.limits;
    positive("limits.max_timeout_secs", l.max_timeout_secs)?;
    positive("limits.max_memory_mb", l.max_memory_mb)?;
    positive("limits.max_cpu_secs", l.max_cpu_secs)?;
    Ok(())
}

fn validate_clock(config: &Config) -> ConfigResult<()> {
    if config.clock.node_id.trim().is_empty() {
        return Err(invalid("clock.node_id", "must not be empty"));
    }
    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let l = &config.logging;
    if !matches!(
        l.level.as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    ) {
        return Err(invalid(
            "logging.level",
            format!(
                "unsupported level '{}'; expected one of: trace, debug, info, warn, error",
                l.level
            ),
        ));
    }
    if !matches!(l.format.as_str(), "pretty" | "compact" | "json" | "full") {
        return Err(invalid(
            "logging.format",
            format!(
                "unsupported format '{}'; expected one of: pretty, compact, json, full",
                l.format
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_of(result: ConfigResult<()>) -> String {
        match result {
            Err(ConfigError::ValidationError { field, .. }) => field,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_risk_levels_bounded() {
        let mut config = Config::default();
        config.approval.threshold = Some(0);
        assert_eq!(field_of(validate(&config)), "approval.threshold");

        let mut config = Config::default();
        config.checkpoint.floor = Some(6);
        assert_eq!(field_of(validate(&config)), "checkpoint.floor");

        let mut config = Config::default();
        config.isolation.container_at_risk = Some(5);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_values_rejected() {
        let mut config = Config::default();
        config.limits.max_memory_mb = 0;
        assert_eq!(field_of(validate(&config)), "limits.max_memory_mb");

        let mut config = Config::default();
        config.approval.timeout_secs = Some(0);
        assert_eq!(field_of(validate(&config)), "approval.timeout_secs");
    }

    #[test]
    fn test_spawn_attempts_bounded() {
        let mut config = Config::default();
        config.isolation.spawn_attempts = 11;
        assert_eq!(field_of(validate(&config)), "isolation.spawn_attempts");
    }

    #[test]
    fn test_logging_values() {
        let mut config = Config::default();
        config.logging.level = "verbose".into();
        assert_eq!(field_of(validate(&config)), "logging.level");

        let mut config = Config::default();
        config.logging.format = "xml".into();
        assert_eq!(field_of(validate(&config)), "logging.format");
    }

    #[test]
    fn test_empty_node_id_rejected() {
        let mut config = Config::default();
        config.clock.node_id = "  ".into();
        assert_eq!(field_of(validate(&config)), "clock.node_id");
    }
}
