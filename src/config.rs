//! Config document parsing and validation.
//!
//! Deserializes the raw JSON document into `*Doc` structs (unknown keys
//! permitted, the serde default), then validates and materializes them into
//! the strongly-typed [`Config`] / [`crate::rule::Rule`] the daemon runs.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::ConfigError;
use crate::policy::PolicyKind;
use crate::rule::{PolicySpec, Rule};
use crate::trigger::{TriggerKind, TriggerSpec};

#[derive(Debug, Clone, Deserialize)]
struct ConfigDoc {
    savepath: Option<String>,
    default_max_logfile_size: Option<String>,
    default_max_logfile_duration: Option<String>,
    start_time_mono: Option<u64>,
    #[serde(default)]
    rules: Vec<RuleDoc>,
}

#[derive(Debug, Clone, Deserialize)]
struct RuleDoc {
    protocol: String,
    topic: String,
    #[serde(default)]
    policies: Vec<PolicyDoc>,
    max_logfile_size: Option<String>,
    max_logfile_duration: Option<String>,
    trigger_control_topic: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct PolicyDoc {
    #[serde(rename = "type")]
    policy_type: String,
    #[serde(default)]
    args: Value,
    #[serde(default)]
    triggers: Vec<TriggerDoc>,
    trigger_control_topic: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TriggerDoc {
    #[serde(rename = "type")]
    trigger_type: String,
    #[serde(default)]
    args: Value,
    control_topic: Option<String>,
}

/// The validated, materialized daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub savepath: PathBuf,
    pub default_max_logfile_size: Option<u64>,
    pub default_max_logfile_duration: Option<Duration>,
    pub start_time_mono: Option<u64>,
    pub rules: Vec<Rule>,
}

/// Parses and validates a config document. Unknown top-level keys are
/// silently ignored (serde's default behavior); missing `savepath` or an
/// unknown policy/trigger type fails with [`ConfigError`].
pub fn parse(json: &str) -> Result<Config, ConfigError> {
    let doc: ConfigDoc = serde_json::from_str(json)?;

    let savepath = doc.savepath.filter(|s| !s.is_empty()).ok_or(ConfigError::MissingKey("savepath"))?;
    let default_max_logfile_size = doc
        .default_max_logfile_size
        .as_deref()
        .map(parse_size)
        .transpose()?;
    let default_max_logfile_duration = doc
        .default_max_logfile_duration
        .as_deref()
        .map(parse_duration)
        .transpose()?;

    let mut rules = Vec::with_capacity(doc.rules.len());
    for rule_doc in doc.rules {
        rules.push(parse_rule(rule_doc)?);
    }

    Ok(Config {
        savepath: PathBuf::from(savepath),
        default_max_logfile_size,
        default_max_logfile_duration,
        start_time_mono: doc.start_time_mono,
        rules,
    })
}

fn parse_rule(doc: RuleDoc) -> Result<Rule, ConfigError> {
    let max_logfile_size = doc.max_logfile_size.as_deref().map(parse_size).transpose()?;
    let max_logfile_duration = doc
        .max_logfile_duration
        .as_deref()
        .map(parse_duration)
        .transpose()?;

    let mut policies = Vec::with_capacity(doc.policies.len());
    for policy_doc in doc.policies {
        policies.push(parse_policy(policy_doc)?);
    }

    match doc.protocol.as_str() {
        "pubsub" | "log" | "cfg" => {}
        other => return Err(ConfigError::UnknownProtocol(other.to_string())),
    }

    let topic = doc.topic.clone();
    Rule::new(
        doc.protocol,
        doc.topic,
        policies,
        max_logfile_size,
        max_logfile_duration,
        doc.trigger_control_topic,
    )
    .map_err(|source| ConfigError::InvalidGlob {
        glob: topic,
        source,
    })
}

fn parse_policy(doc: PolicyDoc) -> Result<PolicySpec, ConfigError> {
    let kind = match doc.policy_type.as_str() {
        "save_all" => PolicyKind::SaveAll,
        "drop_all" => PolicyKind::DropAll,
        "count" => {
            let save_prev = doc
                .args
                .get("save_prev")
                .and_then(Value::as_i64)
                .unwrap_or(0);
            let save_next = doc
                .args
                .get("save_next")
                .and_then(Value::as_i64)
                .unwrap_or(0);
            PolicyKind::count(save_prev, save_next)?
        }
        "time" => {
            let save_prev = doc
                .args
                .get("save_prev")
                .and_then(Value::as_str)
                .ok_or(ConfigError::MissingPolicyArg {
                    policy_type: "time",
                    arg: "save_prev",
                })?;
            let save_next = doc
                .args
                .get("save_next")
                .and_then(Value::as_str)
                .ok_or(ConfigError::MissingPolicyArg {
                    policy_type: "time",
                    arg: "save_next",
                })?;
            PolicyKind::Time {
                save_prev_ns: parse_duration(save_prev)?.as_nanos() as u64,
                save_next_ns: parse_duration(save_next)?.as_nanos() as u64,
            }
        }
        other => return Err(ConfigError::UnknownPolicyType(other.to_string())),
    };

    let mut triggers = Vec::with_capacity(doc.triggers.len());
    for trigger_doc in doc.triggers {
        triggers.push(parse_trigger(trigger_doc)?);
    }

    Ok(PolicySpec {
        kind,
        triggers,
        trigger_control_topic: doc.trigger_control_topic,
    })
}

fn parse_trigger(doc: TriggerDoc) -> Result<TriggerSpec, ConfigError> {
    let kind = match doc.trigger_type.as_str() {
        "pubsub" => {
            let topic = doc
                .args
                .get("topic")
                .and_then(Value::as_str)
                .ok_or(ConfigError::MissingPolicyArg {
                    policy_type: "pubsub trigger",
                    arg: "topic",
                })?;
            TriggerKind::pubsub(topic)
        }
        "rate" => {
            let hz = doc.args.get("hz").and_then(Value::as_f64).ok_or(
                ConfigError::MissingPolicyArg {
                    policy_type: "rate trigger",
                    arg: "hz",
                },
            )?;
            TriggerKind::rate(hz)?
        }
        "cron" => {
            let pattern = doc
                .args
                .get("pattern")
                .and_then(Value::as_str)
                .ok_or(ConfigError::MissingPolicyArg {
                    policy_type: "cron trigger",
                    arg: "pattern",
                })?;
            TriggerKind::cron(pattern)?
        }
        other => return Err(ConfigError::UnknownTriggerType(other.to_string())),
    };

    Ok(TriggerSpec {
        kind,
        control_topic: doc.control_topic,
    })
}

/// Parses a size string with 1024-based suffixes `B|KiB|MiB|GiB`.
pub fn parse_size(value: &str) -> Result<u64, ConfigError> {
    let trimmed = value.trim();
    let split_at = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (num, suffix) = trimmed.split_at(split_at);
    let multiplier: u64 = match suffix {
        "" | "B" => 1,
        "KiB" => 1024,
        "MiB" => 1024 * 1024,
        "GiB" => 1024 * 1024 * 1024,
        _ => {
            return Err(ConfigError::InvalidSize {
                value: value.to_string(),
                reason: "unknown size suffix (expected B, KiB, MiB, or GiB)",
            })
        }
    };
    let scalar: f64 = num.parse().map_err(|_| ConfigError::InvalidSize {
        value: value.to_string(),
        reason: "not a number",
    })?;
    Ok((scalar * multiplier as f64) as u64)
}

/// Parses a duration string with suffixes `ns|us|ms|s|m|h`.
pub fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    const SUFFIXES: [(&str, f64); 6] = [
        ("ns", 1.0),
        ("us", 1_000.0),
        ("ms", 1_000_000.0),
        ("h", 3_600_000_000_000.0),
        ("m", 60_000_000_000.0),
        ("s", 1_000_000_000.0),
    ];
    let trimmed = value.trim();
    for (suffix, ns_per_unit) in SUFFIXES {
        if let Some(num) = trimmed.strip_suffix(suffix) {
            let scalar: f64 = num.parse().map_err(|_| ConfigError::InvalidDuration {
                value: value.to_string(),
                reason: "not a number",
            })?;
            return Ok(Duration::from_nanos((scalar * ns_per_unit) as u64));
        }
    }
    Err(ConfigError::InvalidDuration {
        value: value.to_string(),
        reason: "unknown duration suffix (expected ns, us, ms, s, m, or h)",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sizes() {
        assert_eq!(parse_size("2MiB").unwrap(), 2 * 1024 * 1024);
        assert_eq!(parse_size("4GiB").unwrap(), 4 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("512B").unwrap(), 512);
        assert_eq!(parse_size("512").unwrap(), 512);
        assert!(parse_size("512XB").is_err());
    }

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("250us").unwrap(), Duration::from_micros(250));
        assert!(parse_duration("5x").is_err());
    }

    #[test]
    fn rejects_missing_savepath() {
        let err = parse(r#"{"rules": []}"#).unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey("savepath")));
    }

    #[test]
    fn permits_unknown_top_level_keys() {
        let cfg = parse(r#"{"savepath": "/tmp/out", "unknown_key": 42, "rules": []}"#).unwrap();
        assert_eq!(cfg.savepath, PathBuf::from("/tmp/out"));
    }

    #[test]
    fn parses_full_rule() {
        let json = r#"{
            "savepath": "/tmp/out",
            "default_max_logfile_size": "2MiB",
            "rules": [
                {
                    "protocol": "pubsub",
                    "topic": "foo",
                    "policies": [
                        {
                            "type": "count",
                            "args": {"save_prev": 2, "save_next": 1},
                            "triggers": [
                                {"type": "pubsub", "args": {"topic": "bar"}}
                            ]
                        }
                    ]
                }
            ]
        }"#;
        let cfg = parse(json).unwrap();
        assert_eq!(cfg.default_max_logfile_size, Some(2 * 1024 * 1024));
        assert_eq!(cfg.rules.len(), 1);
        assert_eq!(cfg.rules[0].policies.len(), 1);
        assert!(matches!(
            cfg.rules[0].policies[0].kind,
            PolicyKind::Count { save_prev: 2, save_next: 1 }
        ));
    }

    #[test]
    fn rejects_unknown_policy_type() {
        let json = r#"{"savepath": "/tmp/out", "rules": [{"protocol": "pubsub", "topic": "*", "policies": [{"type": "bogus"}]}]}"#;
        let err = parse(json).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPolicyType(_)));
    }

    #[test]
    fn rejects_unknown_protocol() {
        let json = r#"{"savepath": "/tmp/out", "rules": [{"protocol": "bogus", "topic": "*", "policies": [{"type": "save_all"}]}]}"#;
        let err = parse(json).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProtocol(_)));
    }
}
