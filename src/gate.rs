//! Control-topic gating: one control worker per distinct control topic.
//!
//! A [`ControlRegistry`] dedupes subscriptions: every rule-level, policy-
//! level, and trigger-level `control_topic` string maps to exactly one
//! background reader and one shared `AtomicBool`, however many triggers
//! reference it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::ipc::pubsub::Subscriber;

/// Shared enabled/disabled state for one control topic. Defaults enabled.
pub type ControlGate = Arc<AtomicBool>;

pub struct ControlRegistry {
    root: PathBuf,
    reader_name: String,
    gates: HashMap<String, ControlGate>,
    shutdown: Arc<AtomicBool>,
}

impl ControlRegistry {
    pub fn new(root: impl Into<PathBuf>, reader_name: impl Into<String>, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            root: root.into(),
            reader_name: reader_name.into(),
            gates: HashMap::new(),
            shutdown,
        }
    }

    /// Returns the shared gate for `topic`, spawning its control-worker
    /// thread on first reference.
    pub fn gate(&mut self, topic: &str) -> ControlGate {
        if let Some(gate) = self.gates.get(topic) {
            return Arc::clone(gate);
        }
        let gate: ControlGate = Arc::new(AtomicBool::new(true));
        spawn_control_worker(
            self.root.join(topic),
            format!("{}/{topic}", self.reader_name),
            Arc::clone(&gate),
            Arc::clone(&self.shutdown),
        );
        self.gates.insert(topic.to_string(), Arc::clone(&gate));
        gate
    }
}

fn spawn_control_worker(
    path: PathBuf,
    reader_name: String,
    gate: ControlGate,
    shutdown: Arc<AtomicBool>,
) {
    std::thread::spawn(move || {
        let mut sub = loop {
            if shutdown.load(Ordering::Acquire) {
                return;
            }
            match Subscriber::try_open(&path, &reader_name) {
                Ok(Some(sub)) => break sub,
                _ => std::thread::sleep(std::time::Duration::from_millis(100)),
            }
        };
        loop {
            if shutdown.load(Ordering::Acquire) {
                return;
            }
            match sub.recv() {
                Ok(Some(view)) => {
                    if let Some(enabled) = parse_toggle(view.payload) {
                        gate.store(enabled, Ordering::Release);
                    }
                    let _ = sub.commit();
                }
                Ok(None) => {
                    let _ = sub.wait(Some(std::time::Duration::from_millis(100)));
                }
                Err(_) => return,
            }
        }
    });
}

/// Parses a control payload: the last non-empty ASCII payload, matched
/// case-insensitively against `"on"` / `"off"`. Anything else is
/// ignored (does not change the gate's current state).
fn parse_toggle(payload: &[u8]) -> Option<bool> {
    if payload.is_empty() {
        return None;
    }
    let text = std::str::from_utf8(payload).ok()?.trim();
    if text.eq_ignore_ascii_case("on") {
        Some(true)
    } else if text.eq_ignore_ascii_case("off") {
        Some(false)
    } else {
        None
    }
}

/// Evaluates whether a firing gated by the given control topics (rule-level,
/// policy-level, trigger-level; any may be absent) should propagate. All
/// present gates must currently read enabled.
pub fn all_enabled(gates: &[&ControlGate]) -> bool {
    gates.iter().all(|gate| gate.load(Ordering::Acquire))
}

pub fn default_gate() -> ControlGate {
    Arc::new(AtomicBool::new(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_on_off_case_insensitive() {
        assert_eq!(parse_toggle(b"on"), Some(true));
        assert_eq!(parse_toggle(b"OFF"), Some(false));
        assert_eq!(parse_toggle(b"On"), Some(true));
        assert_eq!(parse_toggle(b""), None);
        assert_eq!(parse_toggle(b"garbage"), None);
    }

    #[test]
    fn all_enabled_requires_every_gate() {
        let a = default_gate();
        let b = default_gate();
        assert!(all_enabled(&[&a, &b]));
        b.store(false, Ordering::Release);
        assert!(!all_enabled(&[&a, &b]));
    }
}
