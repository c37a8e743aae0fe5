use clap::Parser;
use thiserror::Error;
use utilization_stream::DEFAULT_INTERVAL_MS;

// ─── Demo configuration ──────────────────────────────────────────

/// Drives simulated command traffic and prints the utilization stream.
#[derive(Debug, Clone, Parser)]
#[command(name = "utilization-demo", version, about)]
pub struct DemoConfig {
    /// Sampling interval of the shared stream (ms)
    #[arg(long, env = "UTILIZATION_INTERVAL_MS", default_value_t = DEFAULT_INTERVAL_MS)]
    pub interval_ms: u64,

    /// Number of simulated commands
    #[arg(long, default_value_t = 4)]
    pub commands: usize,

    /// Number of simulated thread pools the commands are spread over
    #[arg(long, default_value_t = 2)]
    pub pools: usize,

    /// Number of Tokio tasks generating command traffic
    #[arg(long, default_value_t = 8)]
    pub concurrency: u32,

    /// How long the load runs (seconds)
    #[arg(long, default_value_t = 5)]
    pub duration_secs: u64,

    /// Number of full-stream subscribers
    #[arg(long, default_value_t = 2)]
    pub subscribers: usize,

    /// Print every snapshot as a JSON line instead of a log summary
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: u64,
        max: u64,
        value: u64,
    },
}

impl DemoConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check("interval_ms", self.interval_ms, 1, 60_000)?;
        check("commands", self.commands as u64, 1, 64)?;
        check("pools", self.pools as u64, 1, 16)?;
        check("concurrency", u64::from(self.concurrency), 1, 500)?;
        check("duration_secs", self.duration_secs, 1, 300)?;
        check("subscribers", self.subscribers as u64, 1, 32)?;
        Ok(())
    }
}

fn check(field: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            min,
            max,
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = DemoConfig::try_parse_from(["utilization-demo", "--interval-ms", "500"]).unwrap();
        assert_eq!(config.commands, 4);
        assert_eq!(config.pools, 2);
        assert!(!config.json);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_out_of_range_values() {
        let config = DemoConfig::try_parse_from([
            "utilization-demo",
            "--interval-ms",
            "100",
            "--concurrency",
            "0",
        ])
        .unwrap();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().starts_with("concurrency must be between 1 and 500"));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let config = DemoConfig::try_parse_from(["utilization-demo", "--interval-ms", "0"]).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange {
                field: "interval_ms",
                ..
            })
        ));
    }
}
