//! The per-source rotating output writer.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use time::{OffsetDateTime, UtcOffset};

use crate::announce::{Action, AnnouncePublisher, Announcement};
use crate::core::header::{HEADER_SIZE, RECORD_ALIGN};
use crate::core::{Queue, QueueWriter, SystemClock, WriterConfig};
use crate::error::DaemonError;
use crate::layout;
use crate::packet::Packet;

/// Floor under which we never shrink an output arena's internal segment
/// size, regardless of how small a `max_logfile_size` cap is configured.
const MIN_SEGMENT_FLOOR: usize = 256 * 1024;
/// Default segment size used when no size cap is configured at all.
const DEFAULT_SEGMENT_SIZE: usize = crate::core::segment::DEFAULT_SEGMENT_SIZE;

struct OpenFile {
    writer: QueueWriter<SystemClock>,
    output_relpath: String,
    opened_at: Instant,
    bytes_written: u64,
}

/// Opens, rotates, and closes the output arena for one discovered source,
/// announcing `opened` / `closed` transitions.
pub struct RotatingWriter {
    root: PathBuf,
    source_relpath: String,
    savepath: PathBuf,
    max_size: Option<u64>,
    max_duration: Option<Duration>,
    announce: Arc<AnnouncePublisher>,
    local_offset: UtcOffset,
    current: Option<OpenFile>,
}

impl RotatingWriter {
    pub fn new(
        root: PathBuf,
        source_relpath: String,
        savepath: PathBuf,
        max_size: Option<u64>,
        max_duration: Option<Duration>,
        announce: Arc<AnnouncePublisher>,
        local_offset: UtcOffset,
    ) -> Self {
        Self {
            root,
            source_relpath,
            savepath,
            max_size,
            max_duration,
            announce,
            local_offset,
            current: None,
        }
    }

    /// Appends one packet, opening or rotating the destination file as
    /// needed. A writer error here is logged by the caller and retried on
    /// the next append; it is never fatal.
    pub fn append(&mut self, packet: &Packet) -> Result<(), DaemonError> {
        self.open_if_needed()?;
        if self.should_rotate(packet.payload.len()) {
            self.close();
            self.open_if_needed()?;
        }
        let file = self.current.as_mut().expect("just opened");
        file.writer
            .append_with_timestamp(0, packet.mono_ts, &packet.payload)?;
        file.bytes_written = file.writer.metrics().bytes_written;
        Ok(())
    }

    /// Flushes and closes the current file, emitting a final `closed`
    /// announcement. No-op if nothing is open.
    pub fn close(&mut self) {
        if let Some(mut file) = self.current.take() {
            if let Err(err) = file.writer.flush_sync() {
                log::error!(
                    "failed to flush output for {}: {err}",
                    self.source_relpath
                );
            }
            self.announce.publish(&Announcement::new(
                Action::Closed,
                &self.root,
                &self.source_relpath,
                &self.savepath,
                &file.output_relpath,
            ));
        }
    }

    fn should_rotate(&self, next_payload_len: usize) -> bool {
        let Some(file) = &self.current else {
            return false;
        };
        if let Some(max_size) = self.max_size {
            let next_len = estimate_record_len(next_payload_len) as u64;
            if file.bytes_written + next_len > max_size {
                return true;
            }
        }
        if let Some(max_duration) = self.max_duration {
            if file.opened_at.elapsed() >= max_duration {
                return true;
            }
        }
        false
    }

    fn open_if_needed(&mut self) -> Result<(), DaemonError> {
        if self.current.is_some() {
            return Ok(());
        }
        let now_wall = OffsetDateTime::now_utc().to_offset(self.local_offset);
        let output_path =
            layout::dated_output_path(&self.savepath, &self.source_relpath, now_wall)
                .map_err(|err| {
                    DaemonError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, err))
                })?;
        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let output_relpath = output_path
            .strip_prefix(&self.savepath)
            .unwrap_or(&output_path)
            .to_string_lossy()
            .replace(std::path::MAIN_SEPARATOR, "/");

        let segment_size = self
            .max_size
            .map(|size| ((size as usize) * 2).max(MIN_SEGMENT_FLOOR))
            .unwrap_or(DEFAULT_SEGMENT_SIZE);
        let writer = Queue::open_publisher_with_config(
            &output_path,
            WriterConfig {
                segment_size,
                ..WriterConfig::default()
            },
        )?;

        self.current = Some(OpenFile {
            writer,
            output_relpath: output_relpath.clone(),
            opened_at: Instant::now(),
            bytes_written: 0,
        });
        self.announce.publish(&Announcement::new(
            Action::Opened,
            &self.root,
            &self.source_relpath,
            &self.savepath,
            &output_relpath,
        ));
        Ok(())
    }
}

impl Drop for RotatingWriter {
    fn drop(&mut self) {
        self.close();
    }
}

fn estimate_record_len(payload_len: usize) -> usize {
    let raw = HEADER_SIZE + payload_len;
    (raw + RECORD_ALIGN - 1) / RECORD_ALIGN * RECORD_ALIGN
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn announce_fixture(root: &Path) -> Arc<AnnouncePublisher> {
        Arc::new(AnnouncePublisher::open(root, "test").unwrap())
    }

    #[test]
    fn opens_and_writes_and_closes() {
        let root = TempDir::new().unwrap();
        let savepath = TempDir::new().unwrap();
        let announce = announce_fixture(root.path());
        let mut writer = RotatingWriter::new(
            root.path().to_path_buf(),
            "foo.pubsub.a0".to_string(),
            savepath.path().to_path_buf(),
            None,
            None,
            announce,
            UtcOffset::UTC,
        );

        let packet = Packet {
            id: 0,
            mono_ts: 1,
            wall_ts_ns: 1,
            payload: b"hello".to_vec(),
        };
        writer.append(&packet).unwrap();
        writer.close();

        let mut found = 0;
        fn walk(dir: &Path, count: &mut usize) {
            for entry in fs::read_dir(dir).unwrap() {
                let entry = entry.unwrap();
                if entry.file_type().unwrap().is_dir() {
                    walk(&entry.path(), count);
                } else if entry.file_name() == "control.meta" {
                    *count += 1;
                }
            }
        }
        walk(savepath.path(), &mut found);
        assert_eq!(found, 1);
    }

    #[test]
    fn rotates_on_size_cap() {
        let root = TempDir::new().unwrap();
        let savepath = TempDir::new().unwrap();
        let announce = announce_fixture(root.path());
        let mut writer = RotatingWriter::new(
            root.path().to_path_buf(),
            "foo.pubsub.a0".to_string(),
            savepath.path().to_path_buf(),
            Some(128),
            None,
            announce,
            UtcOffset::UTC,
        );

        for i in 0..10u64 {
            let packet = Packet {
                id: i,
                mono_ts: i,
                wall_ts_ns: i,
                payload: vec![0u8; 32],
            };
            writer.append(&packet).unwrap();
        }
        writer.close();

        let mut dirs = 0;
        fn count_dirs(dir: &Path, count: &mut usize) {
            for entry in fs::read_dir(dir).unwrap() {
                let entry = entry.unwrap();
                if entry.file_type().unwrap().is_dir() {
                    if entry.file_name().to_string_lossy().ends_with(".a0") {
                        *count += 1;
                    } else {
                        count_dirs(&entry.path(), count);
                    }
                }
            }
        }
        count_dirs(savepath.path(), &mut dirs);
        assert!(dirs > 1, "expected multiple rotated output files, got {dirs}");
    }
}
