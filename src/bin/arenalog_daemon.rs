//! `arenalog-daemon`: the policy-driven message logger.
//!
//! Reads its config document off a pub/sub topic, discovers matching
//! source arenas under `A0_ROOT`, and writes selected packets into rotated
//! output files under the configured `savepath`.

use std::path::PathBuf;

use clap::Parser;

use arenalog::daemon::{self, DaemonArgs};

#[derive(Parser, Debug)]
#[command(name = "arenalog-daemon", author, version, about, long_about = None)]
struct Args {
    /// Root directory for source arenas. Overrides `A0_ROOT`.
    #[arg(long)]
    root: Option<PathBuf>,

    /// This daemon's own topic, used for its announce channel and deadman
    /// beacon. Overrides `A0_TOPIC`.
    #[arg(long)]
    topic: Option<String>,

    /// Topic the startup config document is read from. Defaults to the
    /// daemon's own topic when not set separately.
    #[arg(long)]
    config_topic: Option<String>,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let root = args
        .root
        .or_else(|| std::env::var_os("A0_ROOT").map(PathBuf::from))
        .unwrap_or_else(|| {
            eprintln!("arenalog-daemon: missing root (pass --root or set A0_ROOT)");
            std::process::exit(1);
        });
    let topic = args
        .topic
        .or_else(|| std::env::var("A0_TOPIC").ok())
        .unwrap_or_else(|| {
            eprintln!("arenalog-daemon: missing topic (pass --topic or set A0_TOPIC)");
            std::process::exit(1);
        });
    // Most deployments write the config document onto the daemon's own
    // topic, so the config channel defaults to the daemon's topic itself,
    // overridable for deployments that separate the two.
    let config_topic = args.config_topic.unwrap_or_else(|| topic.clone());

    let daemon_args = DaemonArgs {
        root,
        topic,
        config_topic,
    };

    if let Err(err) = daemon::run(daemon_args) {
        log::error!("arenalog-daemon: fatal: {err}");
        std::process::exit(1);
    }
}
