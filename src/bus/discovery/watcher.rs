//! Enumerates `A0_ROOT`, glob-matching rule selectors against discovered
//! arena paths, and emits each newly matching source exactly once.
//!
//! Source arenas are named `<topic>.<protocol>.a0` (optionally nested under
//! directories, e.g. `md/foo.pubsub.a0`); the topic glob matches the
//! `<topic>` portion with the `.<protocol>.a0` suffix stripped.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use glob::Pattern;

/// A small slice of polling interval between root scans.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A compiled `(protocol, topic-glob)` pair derived from a rule.
#[derive(Debug, Clone)]
pub struct Selector {
    pub protocol: String,
    pub topic_glob: String,
    pattern: Pattern,
}

impl Selector {
    pub fn new(protocol: impl Into<String>, topic_glob: impl Into<String>) -> Result<Self, glob::PatternError> {
        let protocol = protocol.into();
        let topic_glob = topic_glob.into();
        let pattern = Pattern::new(&topic_glob)?;
        Ok(Self {
            protocol,
            topic_glob,
            pattern,
        })
    }

    fn matches(&self, protocol: &str, topic: &str) -> bool {
        self.protocol == protocol && self.pattern.matches(topic)
    }
}

/// A newly discovered source arena.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiscoveryEvent {
    pub protocol: String,
    /// Topic portion of the relative path, with the `.<protocol>.a0` suffix
    /// stripped (e.g. `foo`, or `md/foo` for a nested topic).
    pub topic: String,
    /// Path relative to the root, including the `.<protocol>.a0` suffix.
    pub relpath: PathBuf,
}

/// Periodic root-directory scanner. One [`Watcher`] covers the union of all
/// rule selectors; each matching path is surfaced at most once across the
/// watcher's lifetime.
pub struct Watcher {
    root: PathBuf,
    selectors: Vec<Selector>,
    seen: HashSet<PathBuf>,
    poll_interval: Duration,
}

impl Watcher {
    pub fn new(root: impl Into<PathBuf>, selectors: Vec<Selector>) -> Self {
        Self {
            root: root.into(),
            selectors,
            seen: HashSet::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Scans the root once, returning discovery events for any match not
    /// already returned by a prior call. Missing roots are not an error —
    /// the caller is expected to retry on the next tick.
    pub fn poll_once(&mut self) -> Vec<DiscoveryEvent> {
        if self.selectors.is_empty() {
            return Vec::new();
        }
        let mut found = Vec::new();
        walk(&self.root, &self.root, &mut |relpath| {
            if let Some((protocol, topic)) = split_source_path(relpath) {
                for selector in &self.selectors {
                    if selector.matches(&protocol, &topic) {
                        if self.seen.insert(relpath.to_path_buf()) {
                            found.push(DiscoveryEvent {
                                protocol: protocol.clone(),
                                topic: topic.clone(),
                                relpath: relpath.to_path_buf(),
                            });
                        }
                        break;
                    }
                }
            }
        });
        found
    }

    /// Runs the scan loop until `shutdown` is observed true, delivering
    /// events to `on_discover` as they're found.
    pub fn run(&mut self, shutdown: &Arc<AtomicBool>, mut on_discover: impl FnMut(DiscoveryEvent)) {
        loop {
            if shutdown.load(Ordering::Acquire) {
                return;
            }
            for event in self.poll_once() {
                on_discover(event);
            }
            std::thread::sleep(self.poll_interval);
        }
    }
}

/// Splits `relpath` (e.g. `md/foo.pubsub.a0`) into `(protocol, topic)`
/// (`("pubsub", "md/foo")`), or `None` if it doesn't end in `.<protocol>.a0`.
fn split_source_path(relpath: &Path) -> Option<(String, String)> {
    let relpath_str = relpath.to_str()?;
    let stem = relpath_str.strip_suffix(".a0")?;
    let (topic, protocol) = stem.rsplit_once('.')?;
    if topic.is_empty() || protocol.is_empty() {
        return None;
    }
    Some((protocol.to_string(), topic.to_string()))
}

fn walk(root: &Path, dir: &Path, visit: &mut impl FnMut(&Path)) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(ft) => ft,
            Err(_) => continue,
        };
        if !file_type.is_dir() {
            continue;
        }
        // A source arena is itself a directory (control.meta + segment
        // files); a `.a0` name is a leaf, never a namespace to recurse into.
        if path.extension().is_some_and(|ext| ext == "a0") {
            if let Ok(relpath) = path.strip_prefix(root) {
                visit(relpath);
            }
        } else {
            walk(root, &path, visit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, relpath: &str) {
        let path = root.join(relpath);
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("control.meta"), b"").unwrap();
    }

    #[test]
    fn discovers_each_match_once() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "foo.pubsub.a0");
        touch(dir.path(), "bar.pubsub.a0");
        touch(dir.path(), "foo.log.a0");

        let selectors = vec![Selector::new("pubsub", "*").unwrap()];
        let mut watcher = Watcher::new(dir.path(), selectors);

        let mut first = watcher.poll_once();
        first.sort_by(|a, b| a.topic.cmp(&b.topic));
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].topic, "bar");
        assert_eq!(first[1].topic, "foo");

        assert!(watcher.poll_once().is_empty());

        touch(dir.path(), "baz.pubsub.a0");
        let second = watcher.poll_once();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].topic, "baz");
    }

    #[test]
    fn missing_root_is_not_fatal() {
        let selectors = vec![Selector::new("pubsub", "*").unwrap()];
        let mut watcher = Watcher::new("/nonexistent/a0-root-xyz", selectors);
        assert!(watcher.poll_once().is_empty());
    }

    #[test]
    fn nested_topics_match_double_star() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "md/trades/foo.pubsub.a0");

        let selectors = vec![Selector::new("pubsub", "md/**").unwrap()];
        let mut watcher = Watcher::new(dir.path(), selectors);
        let found = watcher.poll_once();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].topic, "md/trades/foo");
    }
}
