//! Single-writer coordination via an flock'd lock file.
//!
//! Arena queues allow exactly one live publisher per directory. Exclusivity
//! is enforced by the kernel through `flock`, not by racing reads of a PID
//! file: two processes calling `WriterLock::acquire` concurrently can never
//! both win, because `flock(LOCK_EX | LOCK_NB)` is atomic. The lock file
//! still carries an identity record (pid + process start time) so readers
//! can distinguish a crashed writer from a live one without holding the
//! flock themselves.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::core::{Error, Result};

fn try_lock(file: &File) -> Result<bool> {
    let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if ret == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.kind() == std::io::ErrorKind::WouldBlock {
        return Ok(false);
    }
    Err(err.into())
}

fn write_lock_record(file: &File) -> Result<()> {
    let (pid, start_time) = lock_identity()?;
    let record = format!("{pid} {start_time}\n");
    let mut handle = file.try_clone()?;
    handle.set_len(0)?;
    handle.seek(SeekFrom::Start(0))?;
    handle.write_all(record.as_bytes())?;
    handle.sync_all()?;
    Ok(())
}

fn read_lock_record(file: &File) -> Result<(u32, u64)> {
    let mut contents = String::new();
    let mut clone = file.try_clone()?;
    clone.seek(SeekFrom::Start(0))?;
    clone.read_to_string(&mut contents)?;
    let mut parts = contents.split_whitespace();
    let pid = parts.next().unwrap_or("0").parse::<u32>().unwrap_or(0);
    let start_time = parts.next().unwrap_or("0").parse::<u64>().unwrap_or(0);
    Ok((pid, start_time))
}

/// True if the lock file still belongs to a running process. Distinct from
/// just holding `flock`: a reader never holds the lock, so it cannot ask the
/// kernel directly and instead compares the recorded pid's `/proc` start
/// time against the identity stamped into the file, which is immune to pid
/// reuse.
pub fn writer_alive(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    let file = OpenOptions::new().read(true).open(path)?;
    lock_owner_alive(&file)
}

#[cfg(target_os = "linux")]
fn lock_owner_alive(file: &File) -> Result<bool> {
    let (pid, start_time) = read_lock_record(file)?;
    if pid == 0 {
        return Ok(false);
    }
    match proc_start_time(pid) {
        Ok(proc_start) => Ok(proc_start == start_time),
        Err(_) => Ok(false),
    }
}

#[cfg(target_os = "linux")]
fn lock_identity() -> Result<(u32, u64)> {
    let pid = std::process::id();
    let start_time = proc_start_time(pid)?;
    Ok((pid, start_time))
}

#[cfg(target_os = "linux")]
fn proc_start_time(pid: u32) -> Result<u64> {
    let path = format!("/proc/{pid}/stat");
    let mut contents = String::new();
    File::open(&path)?.read_to_string(&mut contents)?;
    let end = contents
        .rfind(')')
        .ok_or(Error::CorruptMetadata("stat parse"))?;
    let after = &contents[end + 1..];
    let mut fields = after.split_whitespace();
    for _ in 0..20 {
        fields.next();
    }
    let start = fields
        .next()
        .ok_or(Error::CorruptMetadata("stat missing starttime"))?;
    start
        .parse::<u64>()
        .map_err(|_| Error::CorruptMetadata("stat starttime invalid"))
}

#[cfg(not(target_os = "linux"))]
fn lock_owner_alive(_file: &File) -> Result<bool> {
    Ok(true)
}

#[cfg(not(target_os = "linux"))]
fn lock_identity() -> Result<(u32, u64)> {
    Ok((std::process::id(), 0))
}

/// Holds the `flock` exclusive lock on `writer.lock` for the lifetime of the
/// publisher. Acquisition is a single atomic kernel call: no window exists
/// in which two processes can both believe they hold the lock.
pub struct WriterLock {
    path: PathBuf,
    file: File,
}

impl WriterLock {
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join("writer.lock");
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;
        if !try_lock(&file)? {
            return Err(Error::WriterAlreadyActive);
        }
        write_lock_record(&file)?;
        Ok(Self { path, file })
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        let _ = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
        let _ = std::fs::remove_file(&self.path);
    }
}
