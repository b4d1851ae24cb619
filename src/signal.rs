//! File-presence signals between the controller and the worker.
//!
//! Creating a marker raises it, deleting it acknowledges it. Readers may see a
//! marker any time between the two, so handlers must tolerate seeing it more
//! than once. Every filesystem error here is logged and swallowed.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::log;
use crate::logging::Logger;
use crate::session::ExerciseKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// worker → controller: gate/calibration done, start timing
    Start,
    /// controller → worker: persist the count and exit
    Stop,
    /// controller → worker: zero the session without exiting
    Reset,
}

impl Marker {
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Start => ".start_signal",
            Self::Stop => ".stop_signal",
            Self::Reset => "reset.flag",
        }
    }

    fn payload(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Reset => "reset",
        }
    }
}

#[derive(Clone)]
pub struct SignalChannel {
    dir: PathBuf,
    logger: Logger,
}

impl SignalChannel {
    pub fn new(dir: impl Into<PathBuf>, logger: Logger) -> Self {
        let dir = dir.into();
        if let Err(e) = fs::create_dir_all(&dir) {
            log!(logger, "[signal] cannot create {}: {e}", dir.display());
        }
        Self { dir, logger }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn marker_path(&self, marker: Marker) -> PathBuf {
        self.dir.join(marker.file_name())
    }

    pub fn count_path(&self, kind: ExerciseKind) -> PathBuf {
        self.dir.join(kind.count_file_name())
    }

    pub fn raise(&self, marker: Marker) {
        let path = self.marker_path(marker);
        if let Err(e) = fs::write(&path, marker.payload()) {
            log!(self.logger, "[signal] failed to write {}: {e}", path.display());
        }
    }

    pub fn is_raised(&self, marker: Marker) -> bool {
        self.marker_path(marker).exists()
    }

    /// Delete the marker. A marker that is already gone is fine.
    pub fn acknowledge(&self, marker: Marker) {
        self.remove_quietly(&self.marker_path(marker));
    }

    /// Acknowledge the marker if it is raised. Returns whether it was.
    pub fn take(&self, marker: Marker) -> bool {
        if !self.is_raised(marker) {
            return false;
        }
        self.acknowledge(marker);
        true
    }

    /// Overwrite the persisted count for `kind`.
    pub fn write_count(&self, kind: ExerciseKind, count: u32) {
        let path = self.count_path(kind);
        if let Err(e) = fs::write(&path, count.to_string()) {
            log!(self.logger, "[signal] failed to save count to {}: {e}", path.display());
        }
    }

    /// Missing or unparseable count files read as 0.
    pub fn read_count(&self, kind: ExerciseKind) -> u32 {
        let path = self.count_path(kind);
        match fs::read_to_string(&path) {
            Ok(text) => text.trim().parse().unwrap_or_else(|_| {
                log!(self.logger, "[signal] unreadable count in {}: {:?}", path.display(), text);
                0
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => 0,
            Err(e) => {
                log!(self.logger, "[signal] failed to read {}: {e}", path.display());
                0
            }
        }
    }

    pub fn clear_count(&self, kind: ExerciseKind) {
        self.remove_quietly(&self.count_path(kind));
    }

    fn remove_quietly(&self, path: &Path) {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => log!(self.logger, "[signal] failed to remove {}: {e}", path.display()),
        }
    }
}
