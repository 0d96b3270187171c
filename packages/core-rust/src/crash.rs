//! Crash marker persistence.
//!
//! The marker is a flag file under the data directory. It is armed shortly
//! after boot and disarmed on clean shutdown, so the *next* run finding it
//! armed knows the previous run terminated abnormally. Single writer, single
//! reader, across process generations; never touched concurrently within one
//! run.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

const MARKER_FILE: &str = "sidekick.crash";

/// Persisted flag indicating whether the previous run terminated abnormally.
#[derive(Debug, Clone)]
pub struct CrashMarker {
    path: PathBuf,
}

impl CrashMarker {
    /// Marker located under the given data directory.
    #[must_use]
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(MARKER_FILE),
        }
    }

    /// Reads the marker: `Ok(true)` if the previous run left it armed.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error for anything other than a missing
    /// file. Callers that want the fail-open policy use [`read_or_clear`].
    ///
    /// [`read_or_clear`]: CrashMarker::read_or_clear
    pub fn read(&self) -> io::Result<bool> {
        match fs::metadata(&self.path) {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Fail-open read: an unreadable marker counts as "no prior crash".
    ///
    /// Crash detection is observability, not correctness; a read failure must
    /// never abort startup, so the error maps to the same default as a
    /// missing marker.
    #[must_use]
    pub fn read_or_clear(&self) -> bool {
        match self.read() {
            Ok(armed) => armed,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "crash marker unreadable, assuming clean start");
                false
            }
        }
    }

    /// Arms the marker so an abnormal termination is visible to the next run.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be created or the marker
    /// file cannot be written.
    pub fn arm(&self) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, b"armed\n")
    }

    /// Disarms the marker on clean shutdown. Missing marker is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker exists but cannot be removed.
    pub fn disarm(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_marker_reads_false() {
        let dir = tempfile::tempdir().unwrap();
        let marker = CrashMarker::new(dir.path());
        assert!(!marker.read().unwrap());
        assert!(!marker.read_or_clear());
    }

    #[test]
    fn armed_marker_reads_true_until_disarmed() {
        let dir = tempfile::tempdir().unwrap();
        let marker = CrashMarker::new(dir.path());

        marker.arm().unwrap();
        assert!(marker.read().unwrap());

        marker.disarm().unwrap();
        assert!(!marker.read().unwrap());
    }

    #[test]
    fn arm_creates_missing_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let marker = CrashMarker::new(&dir.path().join("nested").join("state"));
        marker.arm().unwrap();
        assert!(marker.read().unwrap());
    }

    #[test]
    fn disarm_tolerates_missing_marker() {
        let dir = tempfile::tempdir().unwrap();
        let marker = CrashMarker::new(dir.path());
        marker.disarm().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_marker_fails_open() {
        // A regular file where the data dir should be makes metadata fail
        // with NotADirectory rather than NotFound.
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("state");
        fs::write(&blocker, b"not a directory").unwrap();

        let marker = CrashMarker::new(&blocker);
        assert!(marker.read().is_err());
        assert!(!marker.read_or_clear());
    }
}
