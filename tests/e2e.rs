//! End-to-end scenarios wiring discovery-free pipelines (config → rule →
//! pipeline → rotating writer) against real arenas on disk, mirroring the
//! spec's save_all and count/trigger scenarios without needing a live
//! supervisor process.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arenalog::announce::AnnouncePublisher;
use arenalog::gate::ControlRegistry;
use arenalog::ipc::pubsub::{Publisher, Subscriber};
use arenalog::pipeline;
use arenalog::policy::PolicyKind;
use arenalog::rule::{PolicySpec, Rule};
use arenalog::timer::TimerWorker;
use arenalog::trigger::{TriggerKind, TriggerSpec};
use arenalog::writer_rotate::RotatingWriter;
use tempfile::TempDir;
use time::UtcOffset;

const SETTLE: Duration = Duration::from_millis(400);

fn publish_all(root: &Path, topic: &str, payloads: &[&str]) {
    let mut publisher = Publisher::open(root.join(topic)).unwrap();
    for payload in payloads {
        publisher.publish(0, payload.as_bytes()).unwrap();
    }
}

/// Finds the single rotated output directory for `source_relpath` under
/// `savepath` and reads back every packet payload as UTF-8, in order.
fn read_output(savepath: &Path, source_relpath: &str) -> Vec<String> {
    let prefix = format!("{source_relpath}@");
    let mut found: Vec<PathBuf> = Vec::new();
    fn walk(dir: &Path, prefix: &str, found: &mut Vec<PathBuf>) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(prefix) && name.ends_with(".a0") {
                found.push(path);
            } else {
                walk(&path, prefix, found);
            }
        }
    }
    walk(savepath, &prefix, &mut found);
    found.sort();

    let mut out = Vec::new();
    for dir in found {
        let mut sub = Subscriber::open(&dir, "e2e-reader").unwrap();
        while let Some(view) = sub.recv().unwrap() {
            out.push(String::from_utf8_lossy(view.payload).into_owned());
            drop(view);
            sub.commit().unwrap();
        }
    }
    out
}

struct Harness {
    root: TempDir,
    savepath: TempDir,
    shutdown: Arc<AtomicBool>,
    control: ControlRegistry,
    timers: TimerWorker,
    announce: Arc<AnnouncePublisher>,
    handles: Vec<std::thread::JoinHandle<()>>,
}

impl Harness {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        let savepath = TempDir::new().unwrap();
        let shutdown = Arc::new(AtomicBool::new(false));
        let control = ControlRegistry::new(root.path(), "e2e/control", Arc::clone(&shutdown));
        let timers = TimerWorker::spawn(Arc::clone(&shutdown));
        let announce = Arc::new(AnnouncePublisher::open(root.path(), "e2e").unwrap());
        Self {
            root,
            savepath,
            shutdown,
            control,
            timers,
            announce,
            handles: Vec::new(),
        }
    }

    /// Spawns a pipeline for `source_relpath` bound to `rule`, with no
    /// logfile size/duration caps.
    fn spawn(&mut self, source_relpath: &str, rule: Rule) {
        let writer = RotatingWriter::new(
            self.root.path().to_path_buf(),
            source_relpath.to_string(),
            self.savepath.path().to_path_buf(),
            None,
            None,
            Arc::clone(&self.announce),
            UtcOffset::UTC,
        );
        let handle = pipeline::spawn(
            self.root.path().to_path_buf(),
            "e2e".to_string(),
            source_relpath.to_string(),
            Arc::new(rule),
            writer,
            &mut self.control,
            &self.timers,
            Arc::clone(&self.shutdown),
            0,
        );
        self.handles.push(handle);
    }

    fn shutdown_and_join(mut self) {
        self.shutdown.store(true, Ordering::Release);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[test]
fn save_all_rule_saves_every_packet() {
    let mut harness = Harness::new();
    let payloads: Vec<String> = (0..10).map(|i| format!("foo_{i}")).collect();
    publish_all(
        harness.root.path(),
        "foo.pubsub.a0",
        &payloads.iter().map(String::as_str).collect::<Vec<_>>(),
    );

    let rule = Rule::new(
        "pubsub",
        "*",
        vec![PolicySpec {
            kind: PolicyKind::SaveAll,
            triggers: Vec::new(),
            trigger_control_topic: None,
        }],
        None,
        None,
        None,
    )
    .unwrap();
    harness.spawn("foo.pubsub.a0", rule);

    std::thread::sleep(SETTLE);
    let savepath = harness.savepath.path().to_path_buf();
    harness.shutdown_and_join();

    let saved = read_output(&savepath, "foo.pubsub.a0");
    assert_eq!(saved, payloads);
}

#[test]
fn drop_all_rule_saves_nothing() {
    let mut harness = Harness::new();
    publish_all(harness.root.path(), "foo.pubsub.a0", &["foo_0", "foo_1"]);

    let rule = Rule::new(
        "pubsub",
        "foo",
        vec![PolicySpec {
            kind: PolicyKind::DropAll,
            triggers: Vec::new(),
            trigger_control_topic: None,
        }],
        None,
        None,
        None,
    )
    .unwrap();
    harness.spawn("foo.pubsub.a0", rule);

    std::thread::sleep(SETTLE);
    let savepath = harness.savepath.path().to_path_buf();
    harness.shutdown_and_join();

    assert!(read_output(&savepath, "foo.pubsub.a0").is_empty());
}

#[test]
fn count_policy_saves_window_around_trigger_over_real_pipeline() {
    let mut harness = Harness::new();

    let rule = Rule::new(
        "pubsub",
        "foo",
        vec![PolicySpec {
            kind: PolicyKind::count(2, 1).unwrap(),
            triggers: vec![TriggerSpec {
                kind: TriggerKind::pubsub("bar.pubsub.a0"),
                control_topic: None,
            }],
            trigger_control_topic: None,
        }],
        None,
        None,
        None,
    )
    .unwrap();
    harness.spawn("foo.pubsub.a0", rule);
    // Let the pipeline's trigger subscriber attach to "bar" before anything
    // is published on it.
    std::thread::sleep(Duration::from_millis(200));

    let batch1: Vec<String> = (0..10).map(|i| format!("foo_{i}")).collect();
    publish_all(
        harness.root.path(),
        "foo.pubsub.a0",
        &batch1.iter().map(String::as_str).collect::<Vec<_>>(),
    );
    std::thread::sleep(SETTLE);

    publish_all(harness.root.path(), "bar.pubsub.a0", &["save_0"]);
    std::thread::sleep(SETTLE);

    let batch2: Vec<String> = (10..20).map(|i| format!("foo_{i}")).collect();
    publish_all(
        harness.root.path(),
        "foo.pubsub.a0",
        &batch2.iter().map(String::as_str).collect::<Vec<_>>(),
    );
    std::thread::sleep(SETTLE);

    publish_all(harness.root.path(), "bar.pubsub.a0", &["save_1"]);
    std::thread::sleep(SETTLE);

    let savepath = harness.savepath.path().to_path_buf();
    harness.shutdown_and_join();

    let saved = read_output(&savepath, "foo.pubsub.a0");
    let expected: Vec<String> = [8, 9, 10, 18, 19]
        .iter()
        .map(|i| format!("foo_{i}"))
        .collect();
    assert_eq!(saved, expected);
}

#[test]
fn trigger_control_topic_suppresses_firings_while_off() {
    let mut harness = Harness::new();

    let rule = Rule::new(
        "pubsub",
        "foo",
        vec![PolicySpec {
            kind: PolicyKind::count(1, 1).unwrap(),
            triggers: vec![TriggerSpec {
                kind: TriggerKind::pubsub("bar.pubsub.a0"),
                control_topic: Some("ctl.pubsub.a0".to_string()),
            }],
            trigger_control_topic: None,
        }],
        None,
        None,
        None,
    )
    .unwrap();
    harness.spawn("foo.pubsub.a0", rule);
    std::thread::sleep(Duration::from_millis(200));

    // Turn the trigger off before anything fires.
    publish_all(harness.root.path(), "ctl.pubsub.a0", &["off"]);
    std::thread::sleep(Duration::from_millis(200));

    publish_all(harness.root.path(), "foo.pubsub.a0", &["foo_0", "foo_1"]);
    std::thread::sleep(Duration::from_millis(200));
    // This firing must be suppressed: the control topic is off.
    publish_all(harness.root.path(), "bar.pubsub.a0", &["save_0"]);
    std::thread::sleep(SETTLE);

    let savepath = harness.savepath.path().to_path_buf();
    harness.shutdown_and_join();

    // With the trigger permanently off, count(1,1) never flushes its
    // pre-window and never grants a save_next packet.
    assert!(read_output(&savepath, "foo.pubsub.a0").is_empty());
}
