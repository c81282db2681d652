//! Per-run operator log: gzip-compressed, one timestamped line per message.

use std::fmt;
use std::io::Write;
use std::sync::{Mutex, PoisonError};

use chrono::{SecondsFormat, Utc};
use flate2::{write::GzEncoder, Compression};
use tracing::{debug, warn};

pub struct RestoreLog<'a> {
    w: Mutex<Option<GzEncoder<&'a mut (dyn Write + Send)>>>,
}

impl<'a> RestoreLog<'a> {
    pub fn new(sink: &'a mut (dyn Write + Send)) -> Self {
        Self { w: Mutex::new(Some(GzEncoder::new(sink, Compression::default()))) }
    }

    pub fn log(&self, msg: impl fmt::Display) {
        let line = format!("{} {}\n", Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true), msg);
        debug!(target: "kvault::restore_log", "{}", line.trim_end());
        let mut guard = self.w.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(w) = guard.as_mut() {
            if let Err(e) = w.write_all(line.as_bytes()) {
                warn!(error = %e, "restore log write failed");
            }
        }
    }

    /// Flush the gzip trailer. Later `log` calls are dropped.
    pub fn finish(&self) {
        let taken = self.w.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(w) = taken {
            if let Err(e) = w.finish() {
                warn!(error = %e, "restore log finish failed");
            }
        }
    }
}
