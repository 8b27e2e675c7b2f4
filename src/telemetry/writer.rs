//! Background log writer
//!
//! The event loop never touches the log files. It pushes onto two queues
//! and a dedicated thread appends them to disk: the raw byte stream of the
//! primary link and the tagged per-frame stream.

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info};

use super::session::LogPaths;
use crate::error::Result;

/// How long the writer waits on the raw queue before checking the tagged
/// queue and the exit flag
pub const WRITER_WAKE_INTERVAL: Duration = Duration::from_millis(200);

/// Size of the timestamp header in front of every tagged record
pub const TAG_HEADER_LEN: usize = 8;

/// Timestamp header of a tagged record: microseconds with the low two bits
/// replaced by the link index
pub fn tag_header(timestamp_us: u64, link: usize) -> [u8; TAG_HEADER_LEN] {
    ((timestamp_us & !3) | (link as u64 & 3)).to_be_bytes()
}

/// One record of the tagged stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedRecord {
    pub timestamp_us: u64,
    pub link: usize,
    pub frame: Bytes,
}

impl TaggedRecord {
    /// Header followed by the frame bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(TAG_HEADER_LEN + self.frame.len());
        out.extend_from_slice(&tag_header(self.timestamp_us, self.link));
        out.extend_from_slice(&self.frame);
        out
    }
}

/// Producer side of the writer's queues; cheap to clone
#[derive(Debug, Clone)]
pub struct LogHandle {
    raw: Sender<Bytes>,
    tagged: Sender<TaggedRecord>,
}

impl LogHandle {
    /// Queue bytes for the raw stream
    pub fn log_raw(&self, bytes: Bytes) {
        if self.raw.send(bytes).is_err() {
            debug!("Log writer gone, raw bytes dropped");
        }
    }

    /// Queue a frame for the tagged stream
    pub fn log_frame(&self, link: usize, timestamp_us: u64, frame: Bytes) {
        let record = TaggedRecord {
            timestamp_us,
            link,
            frame,
        };
        if self.tagged.send(record).is_err() {
            debug!("Log writer gone, tagged record dropped");
        }
    }
}

/// Totals reported when the writer stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogSummary {
    pub raw_bytes: u64,
    pub tagged_records: u64,
}

/// Running log writer thread
pub struct LogWriter {
    handle: LogHandle,
    exit: Arc<AtomicBool>,
    flush_every_write: Arc<AtomicBool>,
    thread: Option<JoinHandle<LogSummary>>,
}

impl LogWriter {
    /// Open both files and start the writer thread
    ///
    /// Files are truncated unless `append` is set.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ProxyError::Io`] if either file cannot be
    /// opened or the thread cannot be spawned.
    pub fn start(paths: &LogPaths, append: bool) -> Result<Self> {
        let tlog = open_log(&paths.tlog, append)?;
        let raw = open_log(&paths.raw, append)?;

        let (raw_tx, raw_rx) = unbounded();
        let (tagged_tx, tagged_rx) = unbounded();
        let exit = Arc::new(AtomicBool::new(false));
        let flush_every_write = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            raw_rx,
            tagged_rx,
            raw: BufWriter::new(raw),
            tlog: BufWriter::new(tlog),
            exit: exit.clone(),
            flush_every_write: flush_every_write.clone(),
            summary: LogSummary::default(),
        };

        let thread = std::thread::Builder::new()
            .name("log-writer".to_string())
            .spawn(move || worker.run())?;

        info!(
            "Log writer started ({})",
            if append { "append" } else { "truncate" }
        );

        Ok(Self {
            handle: LogHandle {
                raw: raw_tx,
                tagged: tagged_tx,
            },
            exit,
            flush_every_write,
            thread: Some(thread),
        })
    }

    /// A new producer handle
    pub fn handle(&self) -> LogHandle {
        self.handle.clone()
    }

    /// Flush after every write (crash safety over throughput)
    pub fn set_flush_every_write(&self, enabled: bool) {
        self.flush_every_write.store(enabled, Ordering::Relaxed);
    }

    /// Drain both queues, flush, and stop the thread
    pub fn close(mut self) -> LogSummary {
        self.stop()
    }

    fn stop(&mut self) -> LogSummary {
        self.exit.store(true, Ordering::Relaxed);
        match self.thread.take() {
            Some(thread) => thread.join().unwrap_or_else(|_| {
                error!("Log writer thread panicked");
                LogSummary::default()
            }),
            None => LogSummary::default(),
        }
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_log(path: &Path, append: bool) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true);
    if append {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }
    options.open(path)
}

struct Worker {
    raw_rx: Receiver<Bytes>,
    tagged_rx: Receiver<TaggedRecord>,
    raw: BufWriter<File>,
    tlog: BufWriter<File>,
    exit: Arc<AtomicBool>,
    flush_every_write: Arc<AtomicBool>,
    summary: LogSummary,
}

impl Worker {
    fn run(mut self) -> LogSummary {
        while !self.exit.load(Ordering::Relaxed) {
            let mut wrote = false;
            match self.raw_rx.recv_timeout(WRITER_WAKE_INTERVAL) {
                Ok(bytes) => {
                    self.write_raw(&bytes);
                    wrote = true;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    // No more raw producers; keep serving the tagged queue
                    std::thread::sleep(WRITER_WAKE_INTERVAL);
                }
            }
            wrote |= self.drain_tagged();

            if !wrote || self.flush_every_write.load(Ordering::Relaxed) {
                self.flush();
            }
        }

        while let Ok(bytes) = self.raw_rx.try_recv() {
            self.write_raw(&bytes);
        }
        self.drain_tagged();
        self.flush();

        debug!(
            "Log writer stopped: {} raw bytes, {} tagged records",
            self.summary.raw_bytes, self.summary.tagged_records
        );
        self.summary
    }

    fn write_raw(&mut self, bytes: &[u8]) {
        match self.raw.write_all(bytes) {
            Ok(()) => self.summary.raw_bytes += bytes.len() as u64,
            Err(e) => error!("Raw log write failed: {}", e),
        }
    }

    fn drain_tagged(&mut self) -> bool {
        let mut wrote = false;
        while let Ok(record) = self.tagged_rx.try_recv() {
            match self.tlog.write_all(&record.to_bytes()) {
                Ok(()) => self.summary.tagged_records += 1,
                Err(e) => error!("Tagged log write failed: {}", e),
            }
            wrote = true;
        }
        wrote
    }

    fn flush(&mut self) {
        if let Err(e) = self.raw.flush().and_then(|_| self.tlog.flush()) {
            error!("Log flush failed: {}", e);
        }
    }
}
