//! Policy kinds and their runtime state machines.
//!
//! A [`PolicyKind`] is the declarative, `Clone`-able config; [`PolicyState`]
//! is the per-(source, rule) mutable instance a pipeline drives with
//! `on_packet` / `on_trigger` / `evict`. Every non-stateless instance is
//! owned by exactly one pipeline worker — no locking needed.

use std::collections::VecDeque;

use crate::error::ConfigError;
use crate::packet::Packet;

#[derive(Debug, Clone)]
pub enum PolicyKind {
    SaveAll,
    DropAll,
    Count { save_prev: usize, save_next: u64 },
    Time { save_prev_ns: u64, save_next_ns: u64 },
}

impl PolicyKind {
    pub fn count(save_prev: i64, save_next: i64) -> Result<Self, ConfigError> {
        if save_prev < 0 {
            return Err(ConfigError::InvalidSize {
                value: save_prev.to_string(),
                reason: "save_prev must be >= 0",
            });
        }
        if save_next < 0 {
            return Err(ConfigError::InvalidSize {
                value: save_next.to_string(),
                reason: "save_next must be >= 0",
            });
        }
        Ok(PolicyKind::Count {
            save_prev: save_prev as usize,
            save_next: save_next as u64,
        })
    }

    pub fn instantiate(&self) -> PolicyState {
        match self {
            PolicyKind::SaveAll => PolicyState::SaveAll,
            PolicyKind::DropAll => PolicyState::DropAll,
            PolicyKind::Count {
                save_prev,
                save_next,
            } => PolicyState::Count(CountState {
                save_prev: *save_prev,
                save_next: *save_next,
                buf: VecDeque::new(),
                remaining_next: 0,
            }),
            PolicyKind::Time {
                save_prev_ns,
                save_next_ns,
            } => PolicyState::Time(TimeState {
                save_prev_ns: *save_prev_ns,
                save_next_ns: *save_next_ns,
                buf: VecDeque::new(),
                save_until: None,
            }),
        }
    }
}

#[derive(Debug)]
pub enum PolicyState {
    SaveAll,
    DropAll,
    Count(CountState),
    Time(TimeState),
}

impl PolicyState {
    /// Handles a packet from the policy's source. Returns the packets (0 or
    /// 1) the policy decides to emit as a direct consequence.
    pub fn on_packet(&mut self, packet: Packet) -> Vec<Packet> {
        match self {
            PolicyState::SaveAll => vec![packet],
            PolicyState::DropAll => Vec::new(),
            PolicyState::Count(state) => state.on_packet(packet),
            PolicyState::Time(state) => state.on_packet(packet),
        }
    }

    /// Handles a trigger firing at monotonic time `ts`, while the trigger
    /// (and its rule) are enabled. Returns the packets flushed as a result.
    pub fn on_trigger(&mut self, ts: u64) -> Vec<Packet> {
        match self {
            PolicyState::SaveAll | PolicyState::DropAll => Vec::new(),
            PolicyState::Count(state) => state.on_trigger(ts),
            PolicyState::Time(state) => state.on_trigger(ts),
        }
    }

    /// Bounds buffer memory during idle periods (no packets, no triggers).
    pub fn evict(&mut self, now_mono_ns: u64) {
        if let PolicyState::Time(state) = self {
            state.evict(now_mono_ns);
        }
    }
}

#[derive(Debug)]
pub struct CountState {
    save_prev: usize,
    save_next: u64,
    buf: VecDeque<Packet>,
    remaining_next: u64,
}

impl CountState {
    fn on_packet(&mut self, packet: Packet) -> Vec<Packet> {
        if self.remaining_next > 0 {
            self.remaining_next -= 1;
            return vec![packet];
        }
        self.buf.push_back(packet);
        if self.buf.len() > self.save_prev {
            self.buf.pop_front();
        }
        Vec::new()
    }

    fn on_trigger(&mut self, _ts: u64) -> Vec<Packet> {
        let out: Vec<Packet> = self.buf.drain(..).collect();
        self.remaining_next = self.remaining_next.max(self.save_next);
        out
    }
}

#[derive(Debug)]
pub struct TimeState {
    save_prev_ns: u64,
    save_next_ns: u64,
    buf: VecDeque<Packet>,
    save_until: Option<u64>,
}

impl TimeState {
    fn on_packet(&mut self, packet: Packet) -> Vec<Packet> {
        if self.save_until.is_some_and(|until| packet.mono_ts <= until) {
            return vec![packet];
        }
        self.buf.push_back(packet);
        let latest_ts = self.buf.back().expect("just pushed").mono_ts;
        self.evict(latest_ts);
        Vec::new()
    }

    fn on_trigger(&mut self, ts: u64) -> Vec<Packet> {
        let new_until = ts.saturating_add(self.save_next_ns);
        self.save_until = Some(self.save_until.map_or(new_until, |until| until.max(new_until)));

        let threshold = ts.saturating_sub(self.save_prev_ns);
        let mut emitted = Vec::new();
        let mut remaining = VecDeque::new();
        for packet in self.buf.drain(..) {
            if packet.mono_ts >= threshold {
                emitted.push(packet);
            } else {
                remaining.push_back(packet);
            }
        }
        self.buf = remaining;
        emitted
    }

    fn evict(&mut self, now_mono_ns: u64) {
        while let Some(front) = self.buf.front() {
            if now_mono_ns.saturating_sub(front.mono_ts) > self.save_prev_ns {
                self.buf.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(id: u64, mono_ts: u64) -> Packet {
        Packet {
            id,
            mono_ts,
            wall_ts_ns: mono_ts,
            payload: format!("p{id}").into_bytes(),
        }
    }

    fn ids(packets: &[Packet]) -> Vec<u64> {
        packets.iter().map(|p| p.id).collect()
    }

    #[test]
    fn count_policy_saves_window_around_each_trigger() {
        let kind = PolicyKind::count(2, 1).unwrap();
        let mut state = kind.instantiate();
        let mut saved = Vec::new();

        for i in 0..10u64 {
            saved.extend(state.on_packet(packet(i, i * 100)));
        }
        saved.extend(state.on_trigger(1_000));
        for i in 10..20u64 {
            saved.extend(state.on_packet(packet(i, i * 100)));
        }
        saved.extend(state.on_trigger(2_000));

        assert_eq!(ids(&saved), vec![8, 9, 10, 18, 19]);
    }

    #[test]
    fn count_multiple_triggers_between_packets_flush_once() {
        let kind = PolicyKind::count(2, 1).unwrap();
        let mut state = kind.instantiate();
        for i in 0..3u64 {
            state.on_packet(packet(i, i));
        }
        let first = state.on_trigger(10);
        assert_eq!(ids(&first), vec![1, 2]);
        // a second firing before any more packets arrive has nothing to
        // flush, and remaining_next is set (not incremented) to save_next.
        let second = state.on_trigger(11);
        assert!(second.is_empty());
        let out = state.on_packet(packet(5, 5));
        assert_eq!(ids(&out), vec![5]);
        let out2 = state.on_packet(packet(6, 6));
        assert!(out2.is_empty());
    }

    #[test]
    fn time_policy_saves_window_around_each_trigger() {
        let kind = PolicyKind::Time {
            save_prev_ns: 2_000_000_000,
            save_next_ns: 500_000_000,
        };
        let mut state = kind.instantiate();
        let mut saved = Vec::new();

        for i in 0..40u64 {
            let ts = i * 250_000_000;
            saved.extend(state.on_packet(packet(i, ts)));
            if i == 20 {
                // the trigger fires an instant after foo_20's timestamp
                saved.extend(state.on_trigger(ts + 1));
            }
        }

        assert_eq!(ids(&saved), (13..=22).collect::<Vec<_>>());
    }

    #[test]
    fn save_all_emits_everything() {
        let mut state = PolicyKind::SaveAll.instantiate();
        let out = state.on_packet(packet(0, 0));
        assert_eq!(ids(&out), vec![0]);
    }

    #[test]
    fn drop_all_emits_nothing() {
        let mut state = PolicyKind::DropAll.instantiate();
        assert!(state.on_packet(packet(0, 0)).is_empty());
    }
}
