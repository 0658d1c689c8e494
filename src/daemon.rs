//! Daemon orchestration: config load, the deadman liveness beacon,
//! discovery→pipeline wiring, and SIGTERM/SIGINT-driven graceful shutdown.
//!
//! This is the one module that ties `bus::discovery`, `gate`, `timer`,
//! `pipeline`, and `writer_rotate` together into a running process; the
//! binary (`src/bin/arenalog_daemon.rs`) is a thin CLI wrapper around
//! [`run`].

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use time::UtcOffset;

use crate::announce::AnnouncePublisher;
use crate::bus::discovery::{Selector, Watcher};
use crate::bus::ready;
use crate::config::{self, Config};
use crate::core::SystemClock;
use crate::core::Clock;
use crate::error::DaemonError;
use crate::gate::ControlRegistry;
use crate::ipc::pubsub::Subscriber;
use crate::pipeline;
use crate::rule::{bind_first_match, Rule};
use crate::timer::TimerWorker;
use crate::writer_rotate::RotatingWriter;

const CONFIG_POLL_INTERVAL: Duration = Duration::from_millis(100);
const SIGNAL_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Process-level arguments the binary collects from flags/env.
pub struct DaemonArgs {
    /// `A0_ROOT`: root directory for source arenas.
    pub root: PathBuf,
    /// `A0_TOPIC`: this daemon's own topic, used for its announce channel
    /// and deadman beacon.
    pub topic: String,
    /// Topic the config document is read from.
    pub config_topic: String,
}

static SIGNAL_RECEIVED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_term_signal(_: libc::c_int) {
    SIGNAL_RECEIVED.store(true, Ordering::SeqCst);
}

/// Installs SIGTERM/SIGINT handlers that flip a process-wide static flag.
/// The flag is bridged onto the daemon's `shutdown` `Arc<AtomicBool>` by a
/// lightweight polling thread ([`spawn_signal_bridge`]), since a C signal
/// handler cannot safely close over an `Arc`.
fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGTERM, handle_term_signal as libc::sighandler_t);
        libc::signal(libc::SIGINT, handle_term_signal as libc::sighandler_t);
    }
}

fn spawn_signal_bridge(shutdown: Arc<AtomicBool>) -> JoinHandle<()> {
    std::thread::spawn(move || loop {
        if SIGNAL_RECEIVED.load(Ordering::Acquire) {
            shutdown.store(true, Ordering::Release);
            return;
        }
        if shutdown.load(Ordering::Acquire) {
            return;
        }
        std::thread::sleep(SIGNAL_POLL_INTERVAL);
    })
}

/// Reads the single JSON config document from `<root>/<config_topic>`.
/// The config channel is treated as a single blob rather than an append
/// log: the daemon waits for the topic to appear, reads the first (and
/// only) document, and never watches it again. There is no live
/// reconfiguration.
pub fn load_config(
    root: &std::path::Path,
    config_topic: &str,
    shutdown: &Arc<AtomicBool>,
) -> Result<Config, DaemonError> {
    let path = root.join(config_topic);
    let mut sub = loop {
        if shutdown.load(Ordering::Acquire) {
            return Err(DaemonError::ConfigChannelEmpty);
        }
        match Subscriber::try_open(&path, "arenalog-daemon/config") {
            Ok(Some(sub)) => break sub,
            _ => std::thread::sleep(CONFIG_POLL_INTERVAL),
        }
    };
    loop {
        if shutdown.load(Ordering::Acquire) {
            return Err(DaemonError::ConfigChannelEmpty);
        }
        match sub.recv() {
            Ok(Some(view)) => {
                let json = String::from_utf8_lossy(view.payload).into_owned();
                drop(view);
                let _ = sub.commit();
                return Ok(config::parse(&json)?);
            }
            Ok(None) => {
                let _ = sub.wait(Some(CONFIG_POLL_INTERVAL));
            }
            Err(err) => return Err(DaemonError::Arena(err)),
        }
    }
}

/// Runs the daemon to completion: loads config, attaches discovery, spawns
/// a pipeline per (source, first-matching-rule), and blocks until a
/// termination signal drains every pipeline and closes every writer.
/// Returns once the process is safe to exit.
pub fn run(args: DaemonArgs) -> Result<(), DaemonError> {
    let shutdown = Arc::new(AtomicBool::new(false));
    install_signal_handlers();
    let signal_bridge = spawn_signal_bridge(Arc::clone(&shutdown));

    let config = load_config(&args.root, &args.config_topic, &shutdown)?;
    // Default is the daemon's own startup monotonic time. Arena timestamps
    // are stamped from `Clock::now()` (wall-clock backed by default), so
    // "monotonic" here means this crate's `core::Clock` timeline, the same
    // basis every `mono_ts` is drawn from.
    let start_time_mono = config.start_time_mono.unwrap_or_else(|| SystemClock.now());

    // Computed once, before any other thread is spawned: `time`'s
    // local-offset lookup is only sound in a single-threaded process.
    let local_offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);

    let rules: Vec<Rule> = config.rules;
    let selectors: Vec<Selector> = rules
        .iter()
        .map(|rule| {
            Selector::new(rule.protocol.clone(), rule.topic_glob.clone())
                .expect("rule glob already validated at config parse time")
        })
        .collect();

    let announce = Arc::new(AnnouncePublisher::open(&args.root, &args.topic)?);
    let mut control = ControlRegistry::new(
        args.root.clone(),
        format!("{}/control", args.topic),
        Arc::clone(&shutdown),
    );
    let timers = TimerWorker::spawn(Arc::clone(&shutdown));

    let handles: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));

    // Only after the deadman is acquired does the daemon accept packets;
    // everything above this line is materialization, not consumption.
    let deadman_dir = args.root.join(&args.topic).join("deadman");
    ready::mark_ready(&deadman_dir)?;
    log::info!(
        "arenalog daemon ready: root={} topic={}",
        args.root.display(),
        args.topic
    );

    let mut watcher = Watcher::new(args.root.clone(), selectors);
    let root = args.root.clone();
    let reader_name = args.topic.clone();
    watcher.run(&shutdown, |event| {
        let protocol = event.protocol.as_str();
        let topic = event.topic.as_str();
        let Some(matched) = bind_first_match(&rules, protocol, topic) else {
            return;
        };
        let rule = Arc::new(matched.clone());

        let source_relpath = event
            .relpath
            .to_string_lossy()
            .replace(std::path::MAIN_SEPARATOR, "/");
        log::info!(
            "discovered source {source_relpath}, binding rule {protocol}/{}",
            rule.topic_glob
        );

        let max_size = rule.max_logfile_size.or(config.default_max_logfile_size);
        let max_duration = rule
            .max_logfile_duration
            .or(config.default_max_logfile_duration);

        let writer = RotatingWriter::new(
            root.clone(),
            source_relpath.clone(),
            config.savepath.clone(),
            max_size,
            max_duration,
            Arc::clone(&announce),
            local_offset,
        );

        let handle = pipeline::spawn(
            root.clone(),
            reader_name.clone(),
            source_relpath,
            rule,
            writer,
            &mut control,
            &timers,
            Arc::clone(&shutdown),
            start_time_mono,
        );
        handles.lock().expect("pipeline handle registry poisoned").push(handle);
    });

    // The watcher loop above only returns once `shutdown` is observed;
    // drain every spawned pipeline before returning so every rotating
    // writer's final `closed` announcement is flushed.
    for handle in handles.lock().expect("pipeline handle registry poisoned").drain(..) {
        let _ = handle.join();
    }
    let _ = signal_bridge.join();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::pubsub::Publisher;
    use tempfile::TempDir;

    #[test]
    fn load_config_reads_single_document() {
        let root = TempDir::new().unwrap();
        let mut publisher = Publisher::open(root.path().join("test")).unwrap();
        publisher
            .publish(0, br#"{"savepath": "/tmp/out", "rules": []}"#)
            .unwrap();

        let shutdown = Arc::new(AtomicBool::new(false));
        let config = load_config(root.path(), "test", &shutdown).unwrap();
        assert_eq!(config.savepath, PathBuf::from("/tmp/out"));
    }

    #[test]
    fn load_config_honors_shutdown_when_topic_never_appears() {
        let root = TempDir::new().unwrap();
        let shutdown = Arc::new(AtomicBool::new(true));
        let err = load_config(root.path(), "test", &shutdown).unwrap_err();
        assert!(matches!(err, DaemonError::ConfigChannelEmpty));
    }
}
