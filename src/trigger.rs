//! Trigger kinds — declarative config only. Runtime firing (the
//! subscriber threads and the shared rate/cron timer worker) lives in
//! `crate::pipeline` and `crate::timer`, which turn these into trigger
//! firings consumed by a policy's state machine.

use std::str::FromStr;

use cron::Schedule;

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub enum TriggerKind {
    Pubsub { topic: String },
    Rate { hz: f64 },
    Cron { pattern: String, schedule: Schedule },
}

#[derive(Debug, Clone)]
pub struct TriggerSpec {
    pub kind: TriggerKind,
    /// Topic that gates this individual trigger on/off. Both this and
    /// the owning policy's/rule's `trigger_control_topic` must be enabled
    /// for a firing to propagate.
    pub control_topic: Option<String>,
}

impl TriggerKind {
    pub fn pubsub(topic: impl Into<String>) -> Self {
        TriggerKind::Pubsub { topic: topic.into() }
    }

    pub fn rate(hz: f64) -> Result<Self, ConfigError> {
        if !(hz > 0.0) {
            return Err(ConfigError::NonPositiveRate(hz));
        }
        Ok(TriggerKind::Rate { hz })
    }

    pub fn cron(pattern: impl Into<String>) -> Result<Self, ConfigError> {
        let pattern = pattern.into();
        let schedule = Schedule::from_str(&pattern).map_err(|source| ConfigError::InvalidCron {
            pattern: pattern.clone(),
            source,
        })?;
        Ok(TriggerKind::Cron { pattern, schedule })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_positive_rate() {
        assert!(TriggerKind::rate(0.0).is_err());
        assert!(TriggerKind::rate(-1.0).is_err());
        assert!(TriggerKind::rate(2.0).is_ok());
    }

    #[test]
    fn rejects_invalid_cron() {
        assert!(TriggerKind::cron("not a cron pattern").is_err());
        assert!(TriggerKind::cron("*/2 * * * * *").is_ok());
    }
}
