//! Announcement publishing.
//!
//! Published as JSON to `"<daemon_topic>/announce"`. `opened` precedes every
//! write to a destination file; `closed` follows the last one.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;

use crate::ipc::pubsub::Publisher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Opened,
    Closed,
}

#[derive(Debug, Clone, Serialize)]
pub struct Announcement {
    pub action: Action,
    pub read_relpath: String,
    pub read_abspath: String,
    pub write_relpath: String,
    pub write_abspath: String,
}

impl Announcement {
    pub fn new(
        action: Action,
        root: &Path,
        source_relpath: &str,
        savepath: &Path,
        output_relpath: &str,
    ) -> Self {
        Self {
            action,
            read_relpath: source_relpath.to_string(),
            read_abspath: root.join(source_relpath).to_string_lossy().into_owned(),
            write_relpath: output_relpath.to_string(),
            write_abspath: savepath.join(output_relpath).to_string_lossy().into_owned(),
        }
    }
}

/// A single shared publisher onto `"<daemon_topic>/announce"`. Announcements
/// are never used to signal errors.
pub struct AnnouncePublisher {
    publisher: Mutex<Publisher>,
}

impl AnnouncePublisher {
    pub fn open(root: &Path, daemon_topic: &str) -> crate::core::Result<Self> {
        let path: PathBuf = root.join(format!("{daemon_topic}/announce"));
        let publisher = Publisher::open(path)?;
        Ok(Self {
            publisher: Mutex::new(publisher),
        })
    }

    pub fn publish(&self, announcement: &Announcement) {
        let payload = match serde_json::to_vec(announcement) {
            Ok(payload) => payload,
            Err(err) => {
                log::error!("failed to serialize announcement: {err}");
                return;
            }
        };
        let mut publisher = self.publisher.lock().expect("announce publisher lock poisoned");
        if let Err(err) = publisher.publish(0, &payload) {
            log::error!("failed to publish announcement: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_expected_shape() {
        let announcement = Announcement::new(
            Action::Opened,
            Path::new("/root"),
            "foo.pubsub.a0",
            Path::new("/save"),
            "2026/01/05/foo.pubsub.a0@x.a0",
        );
        let json = serde_json::to_string(&announcement).unwrap();
        assert!(json.contains("\"action\":\"opened\""));
        assert!(json.contains("\"read_relpath\":\"foo.pubsub.a0\""));
        assert!(json.contains("\"read_abspath\":\"/root/foo.pubsub.a0\""));
    }
}
