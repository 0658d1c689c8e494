//! The shared rate/cron timer worker: one thread manages all `rate` and
//! `cron` triggers via a monotonic deadline queue.
//!
//! One [`TimerWorker`] backs every pipeline in the daemon; each `rate` or
//! `cron` trigger registers a callback and is fired on its own thread-free
//! schedule from this single background thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cron::Schedule;

use crate::core::{Clock, SystemClock};

/// A maximum idle wait so a freshly registered trigger is never kept
/// waiting longer than this before its deadline is first considered.
const MAX_IDLE_WAIT: Duration = Duration::from_millis(200);

enum TimerKind {
    Rate(Duration),
    Cron(Schedule),
}

struct Registration {
    kind: TimerKind,
    next_ns: u64,
    callback: Box<dyn Fn(u64) + Send>,
}

/// Handle to the background timer thread. Cloning is cheap; every clone
/// registers against the same worker.
#[derive(Clone)]
pub struct TimerWorker {
    register_tx: mpsc::Sender<Registration>,
}

impl TimerWorker {
    pub fn spawn(shutdown: Arc<AtomicBool>) -> Self {
        let (register_tx, register_rx) = mpsc::channel();
        std::thread::spawn(move || run(register_rx, shutdown));
        Self { register_tx }
    }

    /// Registers a `rate` trigger firing every `1/hz` seconds. `hz` is
    /// assumed positive (validated at config parse time).
    pub fn register_rate(&self, hz: f64, callback: impl Fn(u64) + Send + 'static) {
        let interval = Duration::from_nanos((1_000_000_000.0 / hz) as u64);
        let next_ns = SystemClock.now() + interval.as_nanos() as u64;
        let _ = self.register_tx.send(Registration {
            kind: TimerKind::Rate(interval),
            next_ns,
            callback: Box::new(callback),
        });
    }

    /// Registers a `cron` trigger firing at each of its schedule's upcoming
    /// wall-clock times.
    pub fn register_cron(&self, schedule: Schedule, callback: impl Fn(u64) + Send + 'static) {
        let next_ns = next_cron_fire_ns(&schedule).unwrap_or(u64::MAX);
        let _ = self.register_tx.send(Registration {
            kind: TimerKind::Cron(schedule),
            next_ns,
            callback: Box::new(callback),
        });
    }
}

fn run(register_rx: mpsc::Receiver<Registration>, shutdown: Arc<AtomicBool>) {
    let mut registrations: Vec<Registration> = Vec::new();
    loop {
        if shutdown.load(Ordering::Acquire) {
            return;
        }
        while let Ok(reg) = register_rx.try_recv() {
            registrations.push(reg);
        }

        let now = SystemClock.now();
        for reg in registrations.iter_mut() {
            if reg.next_ns <= now {
                (reg.callback)(reg.next_ns);
                reg.next_ns = match &reg.kind {
                    TimerKind::Rate(interval) => reg.next_ns + interval.as_nanos() as u64,
                    TimerKind::Cron(schedule) => next_cron_fire_ns(schedule).unwrap_or(u64::MAX),
                };
            }
        }

        let wait = registrations
            .iter()
            .map(|reg| reg.next_ns)
            .min()
            .map(|deadline| {
                let now = SystemClock.now();
                if deadline <= now {
                    Duration::from_millis(1)
                } else {
                    Duration::from_nanos(deadline - now).min(MAX_IDLE_WAIT)
                }
            })
            .unwrap_or(MAX_IDLE_WAIT);

        if let Ok(reg) = register_rx.recv_timeout(wait) {
            registrations.push(reg);
        }
    }
}

fn next_cron_fire_ns(schedule: &Schedule) -> Option<u64> {
    let now = Utc::now();
    schedule
        .after(&now)
        .next()
        .and_then(|dt| dt.timestamp_nanos_opt())
        .map(|ns| ns as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use std::sync::mpsc::channel;

    #[test]
    fn rate_trigger_fires_repeatedly() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker = TimerWorker::spawn(Arc::clone(&shutdown));
        let (tx, rx) = channel();
        worker.register_rate(1000.0, move |ts| {
            let _ = tx.send(ts);
        });
        rx.recv_timeout(Duration::from_secs(1))
            .expect("first firing");
        rx.recv_timeout(Duration::from_secs(1))
            .expect("second firing");
        shutdown.store(true, Ordering::Release);
    }

    #[test]
    fn cron_schedule_computes_next_fire() {
        let schedule = Schedule::from_str("* * * * * *").unwrap();
        assert!(next_cron_fire_ns(&schedule).is_some());
    }
}
