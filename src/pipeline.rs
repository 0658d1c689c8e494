//! Per-(source, rule) pipeline: merges a source's packets with its bound
//! rule's trigger firings, applies control gating, and forwards the result
//! to a rotating writer. One thread per discovered source.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::Duration;

use crate::core::{Clock, SystemClock};
use crate::gate::{all_enabled, ControlGate, ControlRegistry};
use crate::ipc::pubsub::Subscriber;
use crate::packet::Packet;
use crate::policy::PolicyState;
use crate::rule::Rule;
use crate::timer::TimerWorker;
use crate::trigger::TriggerKind;
use crate::writer_rotate::RotatingWriter;

/// Interval between retries while a trigger subscriber waits for its topic
/// to appear (mirrors [`crate::gate`]'s control-worker retry loop).
const OPEN_RETRY: Duration = Duration::from_millis(100);
/// How long a pipeline's packet loop blocks before re-checking shutdown and
/// draining pending trigger firings.
const RECV_WAIT: Duration = Duration::from_millis(100);

/// One trigger firing, merged into a pipeline's single consuming thread
/// ahead of the next packet it observes. Control state applies only to
/// events after it arrives; history already emitted is never rewritten.
struct TriggerFire {
    policy_index: usize,
    ts: u64,
    gates: Vec<ControlGate>,
}

struct BoundPolicy {
    state: PolicyState,
    /// Rule-level and policy-level control gates; ANDed with a given
    /// firing's own trigger-level gate in [`TriggerFire::gates`].
    gates: Vec<ControlGate>,
}

/// Spawns the worker thread for one discovered source bound to `rule`,
/// including its trigger subscriber/timer registrations. Returns
/// immediately; the thread runs until `shutdown` is observed.
pub fn spawn(
    root: PathBuf,
    reader_name: String,
    source_relpath: String,
    rule: Arc<Rule>,
    writer: RotatingWriter,
    control: &mut ControlRegistry,
    timers: &TimerWorker,
    shutdown: Arc<AtomicBool>,
    start_time_mono: u64,
) -> std::thread::JoinHandle<()> {
    let (fire_tx, fire_rx) = mpsc::channel::<TriggerFire>();
    let rule_gate = rule.trigger_control_topic.as_deref().map(|t| control.gate(t));

    let mut policies = Vec::with_capacity(rule.policies.len());
    for (policy_index, spec) in rule.policies.iter().enumerate() {
        let policy_gate = spec
            .trigger_control_topic
            .as_deref()
            .map(|t| control.gate(t));
        let mut base_gates = Vec::new();
        if let Some(gate) = &rule_gate {
            base_gates.push(Arc::clone(gate));
        }
        if let Some(gate) = &policy_gate {
            base_gates.push(Arc::clone(gate));
        }

        for trigger in &spec.triggers {
            let trigger_gate = trigger.control_topic.as_deref().map(|t| control.gate(t));
            let mut gates = base_gates.clone();
            if let Some(gate) = &trigger_gate {
                gates.push(Arc::clone(gate));
            }
            let tx = fire_tx.clone();

            match &trigger.kind {
                TriggerKind::Pubsub { topic } => {
                    spawn_pubsub_trigger(
                        root.join(topic),
                        format!("{reader_name}/trigger/{topic}"),
                        policy_index,
                        gates,
                        tx,
                        Arc::clone(&shutdown),
                    );
                }
                TriggerKind::Rate { hz } => {
                    timers.register_rate(*hz, move |ts| {
                        let _ = tx.send(TriggerFire {
                            policy_index,
                            ts,
                            gates: gates.clone(),
                        });
                    });
                }
                TriggerKind::Cron { schedule, .. } => {
                    timers.register_cron(schedule.clone(), move |ts| {
                        let _ = tx.send(TriggerFire {
                            policy_index,
                            ts,
                            gates: gates.clone(),
                        });
                    });
                }
            }
        }

        policies.push(BoundPolicy {
            state: spec.kind.instantiate(),
            gates: base_gates,
        });
    }
    drop(fire_tx);

    let source_path = root.join(&source_relpath);
    std::thread::spawn(move || {
        run(
            source_path,
            reader_name,
            source_relpath,
            policies,
            fire_rx,
            writer,
            shutdown,
            start_time_mono,
        )
    })
}

fn spawn_pubsub_trigger(
    path: PathBuf,
    reader_name: String,
    policy_index: usize,
    gates: Vec<ControlGate>,
    tx: mpsc::Sender<TriggerFire>,
    shutdown: Arc<AtomicBool>,
) {
    std::thread::spawn(move || {
        let mut sub = loop {
            if shutdown.load(Ordering::Acquire) {
                return;
            }
            match Subscriber::try_open(&path, &reader_name) {
                Ok(Some(sub)) => break sub,
                _ => std::thread::sleep(OPEN_RETRY),
            }
        };
        loop {
            if shutdown.load(Ordering::Acquire) {
                return;
            }
            match sub.recv() {
                Ok(Some(view)) => {
                    let ts = view.timestamp_ns;
                    drop(view);
                    let _ = sub.commit();
                    let _ = tx.send(TriggerFire {
                        policy_index,
                        ts,
                        gates: gates.clone(),
                    });
                }
                Ok(None) => {
                    let _ = sub.wait(Some(OPEN_RETRY));
                }
                Err(_) => return,
            }
        }
    });
}

fn run(
    source_path: PathBuf,
    reader_name: String,
    source_relpath: String,
    mut policies: Vec<BoundPolicy>,
    fires: Receiver<TriggerFire>,
    mut writer: RotatingWriter,
    shutdown: Arc<AtomicBool>,
    start_time_mono: u64,
) {
    let mut subscriber = loop {
        if shutdown.load(Ordering::Acquire) {
            writer.close();
            return;
        }
        match Subscriber::try_open(&source_path, &reader_name) {
            Ok(Some(sub)) => break sub,
            _ => std::thread::sleep(OPEN_RETRY),
        }
    };

    loop {
        if shutdown.load(Ordering::Acquire) {
            break;
        }

        while let Ok(fire) = fires.try_recv() {
            if fire.ts < start_time_mono {
                continue;
            }
            if !gates_enabled(&fire.gates) {
                continue;
            }
            if let Some(bound) = policies.get_mut(fire.policy_index) {
                if !gates_enabled(&bound.gates) {
                    continue;
                }
                let batch = bound.state.on_trigger(fire.ts);
                emit_batch(&mut writer, &source_relpath, batch);
            }
        }

        match subscriber.recv() {
            Ok(Some(view)) => {
                let wall_ts_ns = SystemClock.now();
                let packet = Packet::from_view(&view, wall_ts_ns);
                drop(view);
                if packet.mono_ts < start_time_mono {
                    let _ = subscriber.commit();
                    continue;
                }
                // A packet can be granted by more than one policy in the
                // same rule; the two grants are for the identical id, so
                // the batch is deduped before it reaches the writer rather
                // than tracked against history across later packets.
                let mut batch = Vec::new();
                for bound in policies.iter_mut() {
                    if !gates_enabled(&bound.gates) {
                        continue;
                    }
                    batch.extend(bound.state.on_packet(packet.clone()));
                }
                emit_batch(&mut writer, &source_relpath, batch);
                let _ = subscriber.commit();
            }
            Ok(None) => {
                let now = SystemClock.now();
                for bound in policies.iter_mut() {
                    bound.state.evict(now);
                }
                let _ = subscriber.wait(Some(RECV_WAIT));
            }
            Err(err) => {
                log::warn!("source {source_relpath} disconnected: {err}");
                break;
            }
        }
    }

    writer.close();
}

fn gates_enabled(gates: &[ControlGate]) -> bool {
    let refs: Vec<&ControlGate> = gates.iter().collect();
    all_enabled(&refs)
}

/// Writes each packet in `batch` to the output at most once, deduping by id
/// within the batch. `batch` holds the combined grants of every policy
/// reacting to a single incoming packet or trigger firing, which is the only
/// scope in which two policies can legitimately grant the same id.
fn emit_batch(writer: &mut RotatingWriter, source_relpath: &str, batch: Vec<Packet>) {
    let mut seen = HashSet::with_capacity(batch.len());
    for packet in batch {
        if !seen.insert(packet.id) {
            continue;
        }
        if let Err(err) = writer.append(&packet) {
            log::error!("writer error for {source_relpath}: {err}");
        }
    }
}
