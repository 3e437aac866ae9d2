//! Log pipeline: ring buffers, rotating file sinks, and live subscribers.
//!
//! Every service output line takes three paths: an in-memory ring buffer
//! (bounded recent history, authoritative for `logs` queries), an
//! asynchronous rotating file writer (complete history up to rotation
//! limits), and a bounded fan-out to live subscribers. Producers never
//! block: the file queue drops silently when full, and slow subscribers
//! lose lines and later receive a single synthetic notice about it.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, VecDeque},
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
        mpsc::{Receiver, SyncSender, TrySendError, sync_channel},
    },
    thread::{self, JoinHandle},
    time::{Duration, SystemTime},
};
use tracing::{debug, warn};

use crate::config::LogRotationSpec;
use crate::runtime;

/// Prefix marking supervisor-injected log lines.
pub const NOTE_PREFIX: &str = "[hun]";

/// Number of lines each service ring buffer retains.
pub const RING_CAPACITY: usize = 10_000;

/// Depth of the bounded queue feeding each file writer.
pub const WRITER_QUEUE_DEPTH: usize = 2048;

/// Depth of each subscriber's bounded channel.
pub const SUBSCRIBER_QUEUE_DEPTH: usize = 256;

/// One captured output line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    /// Capture timestamp.
    pub ts: DateTime<Utc>,
    /// Owning project.
    pub project: String,
    /// Owning service.
    pub service: String,
    /// Line text without the trailing newline.
    pub text: String,
    /// Whether the line came from stderr.
    pub is_err: bool,
}

impl LogLine {
    /// Creates a line captured from a service stream.
    pub fn new(project: &str, service: &str, text: String, is_err: bool) -> Self {
        Self {
            ts: Utc::now(),
            project: project.to_string(),
            service: service.to_string(),
            text,
            is_err,
        }
    }

    /// Creates a supervisor-injected note line.
    pub fn note(project: &str, service: &str, message: &str) -> Self {
        Self::new(project, service, format!("{NOTE_PREFIX} {message}"), false)
    }

    /// Whether this line was injected by the supervisor.
    pub fn is_note(&self) -> bool {
        self.text.starts_with(NOTE_PREFIX)
    }
}

/// Fixed-size circular store of the most recent lines for one service.
pub struct RingBuffer {
    lines: VecDeque<LogLine>,
    capacity: usize,
}

impl RingBuffer {
    /// Creates a buffer with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(RING_CAPACITY)
    }

    /// Creates a buffer with an explicit capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    /// Appends a line, evicting the oldest when full.
    pub fn push(&mut self, line: LogLine) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// Returns the last `n` lines in arrival order; 0 (or more than the
    /// current count) returns everything.
    pub fn tail(&self, n: usize) -> Vec<LogLine> {
        let skip = if n == 0 || n >= self.lines.len() {
            0
        } else {
            self.lines.len() - n
        };
        self.lines.iter().skip(skip).cloned().collect()
    }

    /// Number of lines currently buffered.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Removes all buffered lines.
    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolved rotation settings for a project's log files.
#[derive(Debug, Clone, Copy)]
pub struct RotationSettings {
    /// Rotate when the active file exceeds this many bytes.
    pub max_size_bytes: u64,
    /// Number of rotated backups to keep.
    pub max_files: usize,
    /// Purge backups older than this.
    pub retention: Duration,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            max_size_bytes: 10 * 1024 * 1024,
            max_files: 3,
            retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl RotationSettings {
    /// Resolves manifest rotation config, applying defaults for gaps.
    pub fn from_spec(spec: Option<&LogRotationSpec>) -> Self {
        let defaults = Self::default();
        match spec {
            Some(spec) => Self {
                max_size_bytes: spec
                    .max_size_mb
                    .map(|mb| mb.max(1) * 1024 * 1024)
                    .unwrap_or(defaults.max_size_bytes),
                max_files: spec.max_files.unwrap_or(defaults.max_files).max(1),
                retention: spec
                    .retention_days
                    .map(|days| Duration::from_secs(days * 24 * 60 * 60))
                    .unwrap_or(defaults.retention),
            },
            None => defaults,
        }
    }
}

/// Background consumer appending formatted lines to one rotating file.
struct FileWriter {
    tx: Option<SyncSender<LogLine>>,
    handle: Option<JoinHandle<()>>,
}

impl FileWriter {
    /// Spawns the consumer thread bound to `path`.
    fn spawn(path: PathBuf, rotation: RotationSettings) -> Self {
        let (tx, rx) = sync_channel::<LogLine>(WRITER_QUEUE_DEPTH);
        let handle = thread::spawn(move || Self::run(path, rotation, rx));
        Self {
            tx: Some(tx),
            handle: Some(handle),
        }
    }

    /// Enqueues a line; drops it silently when the queue is full.
    fn write(&self, line: &LogLine) {
        if let Some(tx) = &self.tx {
            let _ = tx.try_send(line.clone());
        }
    }

    fn run(path: PathBuf, rotation: RotationSettings, rx: Receiver<LogLine>) {
        if let Some(parent) = path.parent()
            && let Err(err) = fs::create_dir_all(parent)
        {
            warn!("Unable to create log directory {:?}: {err}", parent);
            return;
        }

        let mut file = match Self::open_append(&path) {
            Ok(file) => file,
            Err(err) => {
                warn!("Unable to open log file {:?}: {err}", path);
                return;
            }
        };
        let mut size = file.metadata().map(|meta| meta.len()).unwrap_or(0);

        while let Ok(line) = rx.recv() {
            let stamp = line.ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S");
            let stream = if line.is_err { "err" } else { "out" };
            let rendered = format!("[{stamp}] [{stream}] {}\n", line.text);
            if let Err(err) = file.write_all(rendered.as_bytes()) {
                warn!("Failed to write log file {:?}: {err}", path);
                continue;
            }
            size += rendered.len() as u64;

            if size > rotation.max_size_bytes {
                match Self::rotate(&path, &rotation, file) {
                    Ok(reopened) => {
                        file = reopened;
                        size = 0;
                    }
                    Err(err) => {
                        warn!("Log rotation failed for {:?}: {err}", path);
                        match Self::open_append(&path) {
                            Ok(reopened) => file = reopened,
                            Err(err) => {
                                warn!("Unable to reopen log file {:?}: {err}", path);
                                return;
                            }
                        }
                    }
                }
            }
        }
        // Producer closed the channel; queue is drained, close the file.
    }

    fn open_append(path: &Path) -> std::io::Result<File> {
        OpenOptions::new().create(true).append(true).open(path)
    }

    /// Shifts backups up by one slot, moves the active file to `.1`, purges
    /// expired backups, and reopens a fresh active file.
    fn rotate(
        path: &Path,
        rotation: &RotationSettings,
        file: File,
    ) -> std::io::Result<File> {
        drop(file);

        let oldest = Self::backup_path(path, rotation.max_files);
        if oldest.exists() {
            let _ = fs::remove_file(&oldest);
        }
        for slot in (1..rotation.max_files).rev() {
            let from = Self::backup_path(path, slot);
            if from.exists() {
                let _ = fs::rename(&from, Self::backup_path(path, slot + 1));
            }
        }
        if path.exists() {
            fs::rename(path, Self::backup_path(path, 1))?;
        }

        Self::purge_expired(path, rotation);
        Self::open_append(path)
    }

    fn backup_path(path: &Path, slot: usize) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(format!(".{slot}"));
        PathBuf::from(name)
    }

    fn purge_expired(path: &Path, rotation: &RotationSettings) {
        let Some(parent) = path.parent() else {
            return;
        };
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            return;
        };
        let prefix = format!("{file_name}.");
        let now = SystemTime::now();

        let Ok(entries) = fs::read_dir(parent) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(suffix) = name.strip_prefix(&prefix) else {
                continue;
            };
            if suffix.parse::<usize>().is_err() {
                continue;
            }
            if let Ok(meta) = entry.metadata()
                && let Ok(modified) = meta.modified()
                && let Ok(age) = now.duration_since(modified)
                && age > rotation.retention
            {
                debug!("Purging expired log backup {:?}", entry.path());
                let _ = fs::remove_file(entry.path());
            }
        }
    }
}

impl Drop for FileWriter {
    fn drop(&mut self) {
        // Cooperative close: dropping the sender lets the consumer drain
        // the queue and close the file before we join it.
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct SubscriberEntry {
    project: String,
    service: String,
    tx: SyncSender<LogLine>,
    dropped: u64,
}

impl SubscriberEntry {
    fn matches(&self, line: &LogLine) -> bool {
        self.project == line.project
            && (self.service.is_empty() || self.service == line.service)
    }
}

/// Bounded fan-out of log lines to live subscribers.
///
/// Each subscriber owns a bounded channel. When the channel saturates,
/// lines are counted as dropped; once the subscriber frees capacity it
/// receives a single synthetic notice before the stream resumes.
pub struct SubscriberHub {
    entries: Mutex<HashMap<u64, SubscriberEntry>>,
    next_id: AtomicU64,
}

impl SubscriberHub {
    /// Creates an empty hub.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a subscriber for `(project, service)`; an empty service
    /// subscribes to every service of the project.
    pub fn subscribe(&self, project: &str, service: &str) -> (u64, Receiver<LogLine>) {
        let (tx, rx) = sync_channel(SUBSCRIBER_QUEUE_DEPTH);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            id,
            SubscriberEntry {
                project: project.to_string(),
                service: service.to_string(),
                tx,
                dropped: 0,
            },
        );
        (id, rx)
    }

    /// Removes a subscriber, closing its channel.
    pub fn unsubscribe(&self, id: u64) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(&id);
    }

    /// Delivers `line` to every matching subscriber without blocking.
    pub fn broadcast(&self, line: &LogLine) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut disconnected = Vec::new();

        for (id, entry) in entries.iter_mut() {
            if !entry.matches(line) {
                continue;
            }

            if entry.dropped > 0 {
                let notice = LogLine::note(
                    &line.project,
                    &line.service,
                    &format!(
                        "dropped {} log lines due to slow subscriber",
                        entry.dropped
                    ),
                );
                match entry.tx.try_send(notice) {
                    Ok(()) => entry.dropped = 0,
                    Err(TrySendError::Full(_)) => entry.dropped += 1,
                    Err(TrySendError::Disconnected(_)) => {
                        disconnected.push(*id);
                        continue;
                    }
                }
            }

            match entry.tx.try_send(line.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => entry.dropped += 1,
                Err(TrySendError::Disconnected(_)) => disconnected.push(*id),
            }
        }

        for id in disconnected {
            entries.remove(&id);
        }
    }

    /// Closes every subscriber channel.
    pub fn close_all(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.clear();
    }
}

impl Default for SubscriberHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Facade owning every per-service buffer and writer plus the subscriber hub.
pub struct LogPipeline {
    buffers: Mutex<HashMap<String, HashMap<String, RingBuffer>>>,
    writers: Mutex<HashMap<String, HashMap<String, FileWriter>>>,
    rotation: Mutex<HashMap<String, RotationSettings>>,
    hub: SubscriberHub,
}

impl LogPipeline {
    /// Creates an empty pipeline.
    pub fn new() -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
            writers: Mutex::new(HashMap::new()),
            rotation: Mutex::new(HashMap::new()),
            hub: SubscriberHub::new(),
        }
    }

    /// Records the rotation settings used for a project's writers.
    pub fn configure_rotation(&self, project: &str, settings: RotationSettings) {
        let mut rotation = self.rotation.lock().unwrap_or_else(|e| e.into_inner());
        rotation.insert(project.to_string(), settings);
    }

    /// Fans one line out to the ring buffer, the file writer, and subscribers.
    pub fn write(&self, line: LogLine) {
        {
            let mut buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
            buffers
                .entry(line.project.clone())
                .or_default()
                .entry(line.service.clone())
                .or_default()
                .push(line.clone());
        }

        {
            let mut writers = self.writers.lock().unwrap_or_else(|e| e.into_inner());
            let project_writers = writers.entry(line.project.clone()).or_default();
            let writer = project_writers
                .entry(line.service.clone())
                .or_insert_with(|| {
                    let settings = {
                        let rotation =
                            self.rotation.lock().unwrap_or_else(|e| e.into_inner());
                        rotation
                            .get(&line.project)
                            .copied()
                            .unwrap_or_default()
                    };
                    FileWriter::spawn(
                        runtime::service_log_path(&line.project, &line.service),
                        settings,
                    )
                });
            writer.write(&line);
        }

        self.hub.broadcast(&line);
    }

    /// Returns the last `n` buffered lines for one service.
    pub fn tail(&self, project: &str, service: &str, n: usize) -> Vec<LogLine> {
        let buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
        buffers
            .get(project)
            .and_then(|services| services.get(service))
            .map(|ring| ring.tail(n))
            .unwrap_or_default()
    }

    /// Clears one service's ring buffer.
    pub fn reset_service(&self, project: &str, service: &str) {
        let mut buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(services) = buffers.get_mut(project)
            && let Some(ring) = services.get_mut(service)
        {
            ring.clear();
        }
    }

    /// Evicts all buffers and writers for a project.
    pub fn clean_project(&self, project: &str) {
        {
            let mut buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
            buffers.remove(project);
        }
        {
            let mut writers = self.writers.lock().unwrap_or_else(|e| e.into_inner());
            writers.remove(project);
        }
        {
            let mut rotation = self.rotation.lock().unwrap_or_else(|e| e.into_inner());
            rotation.remove(project);
        }
    }

    /// Registers a live subscriber.
    pub fn subscribe(&self, project: &str, service: &str) -> (u64, Receiver<LogLine>) {
        self.hub.subscribe(project, service)
    }

    /// Removes a live subscriber.
    pub fn unsubscribe(&self, id: u64) {
        self.hub.unsubscribe(id);
    }

    /// Drains and closes every writer, then closes all subscriber channels.
    pub fn close(&self) {
        {
            let mut writers = self.writers.lock().unwrap_or_else(|e| e.into_inner());
            writers.clear();
        }
        self.hub.close_all();
    }
}

impl Default for LogPipeline {
    fn default() -> Self {
        Self::new()
    }
}
