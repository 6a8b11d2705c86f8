//! Log watcher
//!
//! Tails every file a client's discovery patterns match, keeping a byte
//! offset per file. Rotation and truncation are detected by inode change or
//! a size drop below the stored offset, which resets the offset to zero. A
//! trailing partial line (no newline yet) is left unconsumed so it is
//! re-read complete on a later tick; offsets only ever advance past whole
//! lines, and only after those lines were handed downstream. Delivery is
//! therefore at-least-once, in file order.
//!
//! The watcher knows nothing about line content; parsing happens downstream.

use crate::parser::ClientAdapter;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

/// Union of glob matches for a client's console/channels/queries patterns,
/// resolved against its log directory.
pub fn discover_client_files(config: &crate::config::ClientConfig) -> Vec<PathBuf> {
    let patterns = &config.discovery.patterns;
    let mut files = Vec::new();
    for pattern in [&patterns.console, &patterns.channels, &patterns.queries]
        .into_iter()
        .flatten()
    {
        let resolved = if Path::new(pattern).is_absolute() {
            pattern.clone()
        } else {
            match &config.log_directory {
                Some(dir) => dir.join(pattern).to_string_lossy().into_owned(),
                None => pattern.clone(),
            }
        };
        match glob::glob(&resolved) {
            Ok(matches) => {
                files.extend(matches.filter_map(|p| p.ok()).filter(|p| p.is_file()));
            }
            Err(error) => {
                warn!(client = %config.id, pattern = %resolved, %error, "invalid glob pattern");
            }
        }
    }
    files.sort();
    files.dedup();
    files
}

/// One raw line read from a watched file.
#[derive(Debug, Clone)]
pub struct WatchedLine {
    pub client_id: String,
    pub path: PathBuf,
    pub line: String,
}

#[derive(Debug, Clone)]
struct FileState {
    offset: u64,
    inode: u64,
}

/// Tails the log files of a single client.
pub struct LogWatcher {
    adapter: Arc<ClientAdapter>,
    poll_interval: Duration,
    rescan_on_startup: bool,
    states: HashMap<PathBuf, FileState>,
    initialized: bool,
}

impl LogWatcher {
    pub fn new(adapter: Arc<ClientAdapter>, poll_interval: Duration, rescan_on_startup: bool) -> Self {
        Self {
            adapter,
            poll_interval,
            rescan_on_startup,
            states: HashMap::new(),
            initialized: false,
        }
    }

    /// Union of glob matches for the client's console/channels/queries
    /// patterns, resolved against its log directory.
    pub fn discover_files(&self) -> Vec<PathBuf> {
        discover_client_files(self.adapter.config())
    }

    /// Poll until shutdown, forwarding complete lines in file order.
    pub async fn run(
        mut self,
        sender: mpsc::Sender<WatchedLine>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut interval = time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let client_id = self.adapter.config().id.clone();

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!(client = %client_id, "watcher stopping");
                        return Ok(());
                    }
                }
                _ = interval.tick() => {
                    self.scan_for_files();
                    let paths: Vec<PathBuf> = {
                        let mut paths: Vec<_> = self.states.keys().cloned().collect();
                        paths.sort();
                        paths
                    };
                    for path in paths {
                        let (lines, new_offset) = match self.read_new_lines(&path) {
                            Ok(Some(read)) => read,
                            Ok(None) => continue,
                            Err(error) => {
                                warn!(client = %client_id, path = %path.display(), %error,
                                    "failed to read log file");
                                continue;
                            }
                        };
                        for line in lines {
                            let watched = WatchedLine {
                                client_id: client_id.clone(),
                                path: path.clone(),
                                line,
                            };
                            if sender.send(watched).await.is_err() {
                                // Receiver closed, pipeline is going away
                                return Ok(());
                            }
                        }
                        // Only commit once every line was handed off
                        self.commit(&path, new_offset);
                    }
                }
            }
        }
    }

    /// Register newly appeared files. Files present at startup begin at EOF
    /// unless `rescanLogsOnStartup` asks for a full replay; files appearing
    /// later are read from the start.
    fn scan_for_files(&mut self) {
        let first_scan = !self.initialized;
        for path in self.discover_files() {
            if self.states.contains_key(&path) {
                continue;
            }
            let Ok(metadata) = fs::metadata(&path) else {
                continue;
            };
            let offset = if first_scan && !self.rescan_on_startup {
                metadata.len()
            } else {
                0
            };
            debug!(path = %path.display(), offset, "watching log file");
            self.states.insert(
                path,
                FileState {
                    offset,
                    inode: metadata.ino(),
                },
            );
        }
        self.initialized = true;
    }

    /// Read any complete new lines past the stored offset. Returns the
    /// lines with the offset to commit after hand-off, or `None` when the
    /// file is gone or has nothing new.
    pub(crate) fn read_new_lines(&mut self, path: &Path) -> Result<Option<(Vec<String>, u64)>> {
        let Some(state) = self.states.get_mut(path) else {
            return Ok(None);
        };
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(_) => return Ok(None),
        };

        let inode = metadata.ino();
        let size = metadata.len();
        if inode != state.inode || size < state.offset {
            debug!(path = %path.display(), "rotation or truncation detected, rereading");
            state.offset = 0;
            state.inode = inode;
        }
        if size <= state.offset {
            return Ok(None);
        }

        let mut file = fs::File::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        file.seek(SeekFrom::Start(state.offset))?;
        let mut buffer = Vec::with_capacity((size - state.offset) as usize);
        file.take(size - state.offset).read_to_end(&mut buffer)?;

        // Consume only through the last newline; a trailing partial line
        // stays on disk until it is completed.
        let Some(last_newline) = buffer.iter().rposition(|&b| b == b'\n') else {
            return Ok(None);
        };
        let consumed = last_newline + 1;
        let text = String::from_utf8_lossy(&buffer[..consumed]);
        let lines = text
            .split('\n')
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Some((lines, state.offset + consumed as u64)))
    }

    pub(crate) fn commit(&mut self, path: &Path, offset: u64) {
        if let Some(state) = self.states.get_mut(path) {
            state.offset = offset;
        }
    }

    #[cfg(test)]
    fn force_state(&mut self, path: &Path, offset: u64) {
        let inode = fs::metadata(path).map(|m| m.ino()).unwrap_or(0);
        self.states
            .insert(path.to_path_buf(), FileState { offset, inode });
        self.initialized = true;
    }
}
