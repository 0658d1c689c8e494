//! Rule declarations and first-match-wins source binding.

use std::time::Duration;

use glob::Pattern;

use crate::policy::PolicyKind;
use crate::trigger::TriggerSpec;

/// A policy entry within a rule: the policy kind plus the triggers that
/// drive it and the control topic gating all of them collectively.
#[derive(Debug, Clone)]
pub struct PolicySpec {
    pub kind: PolicyKind,
    pub triggers: Vec<TriggerSpec>,
    /// Gates every trigger of this policy collectively; ANDed with each
    /// trigger's own `control_topic` and the owning rule's.
    pub trigger_control_topic: Option<String>,
}

/// A declarative rule binding sources matching `(protocol, topic_glob)` to a
/// set of policies.
#[derive(Debug, Clone)]
pub struct Rule {
    pub protocol: String,
    pub topic_glob: String,
    pattern: Pattern,
    pub policies: Vec<PolicySpec>,
    pub max_logfile_size: Option<u64>,
    pub max_logfile_duration: Option<Duration>,
    /// Gates every trigger under every policy of this rule collectively.
    pub trigger_control_topic: Option<String>,
}

impl Rule {
    pub fn new(
        protocol: impl Into<String>,
        topic_glob: impl Into<String>,
        policies: Vec<PolicySpec>,
        max_logfile_size: Option<u64>,
        max_logfile_duration: Option<Duration>,
        trigger_control_topic: Option<String>,
    ) -> Result<Self, glob::PatternError> {
        let topic_glob = topic_glob.into();
        let pattern = Pattern::new(&topic_glob)?;
        Ok(Self {
            protocol: protocol.into(),
            topic_glob,
            pattern,
            policies,
            max_logfile_size,
            max_logfile_duration,
            trigger_control_topic,
        })
    }

    pub fn matches(&self, protocol: &str, topic: &str) -> bool {
        self.protocol == protocol && self.pattern.matches(topic)
    }
}

/// Binds a discovered source to the first rule matching it: at discovery
/// time, each source is bound to the *first* matching rule only. Rules are
/// independent — a `drop_all` rule never shadows a later rule on the same
/// source except through this first-match binding.
pub fn bind_first_match<'a>(
    rules: &'a [Rule],
    protocol: &str,
    topic: &str,
) -> Option<&'a Rule> {
    rules.iter().find(|rule| rule.matches(protocol, topic))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(protocol: &str, topic_glob: &str) -> Rule {
        Rule::new(protocol, topic_glob, Vec::new(), None, None, None).unwrap()
    }

    #[test]
    fn first_match_wins() {
        let rules = vec![rule("pubsub", "foo"), rule("pubsub", "*")];
        let bound = bind_first_match(&rules, "pubsub", "foo").unwrap();
        assert_eq!(bound.topic_glob, "foo");
        let bound = bind_first_match(&rules, "pubsub", "bar").unwrap();
        assert_eq!(bound.topic_glob, "*");
    }

    #[test]
    fn protocol_must_match() {
        let rules = vec![rule("log", "*")];
        assert!(bind_first_match(&rules, "pubsub", "foo").is_none());
    }
}
