// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Leveled, size-rotating file log.
//!
//! Files are named `<dir>/YYYYMMDD_<index>.txt`. A new date always starts at
//! index 1; when the current file reaches the size limit the index is bumped
//! and the next file opened. Files already at the limit (left by an earlier
//! run) are skipped when choosing where to append.
//!
//! Each line reads `[HH:MM:SS.uuuuuu] [LEVEL] [thread] message`.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::ops::{BitOr, BitOrAssign};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use thiserror::Error;

pub const MIN_LOG_FILE_SIZE: u64 = 1024 * 1024;
pub const MAX_LOG_FILE_SIZE: u64 = 1024 * 1024 * 1024;
pub const DEFAULT_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Upper bound on file slots probed for a single rotation.
pub const MAX_ROLL_ATTEMPTS: u32 = 1000;

/// Bitmask of log categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LogLevel(u32);

impl LogLevel {
    pub const NONE: LogLevel = LogLevel(0);
    pub const ERROR: LogLevel = LogLevel(0x01);
    pub const INFO: LogLevel = LogLevel(0x02);
    pub const DEBUG: LogLevel = LogLevel(0x04);
    pub const NETWORK: LogLevel = LogLevel(0x08);
    pub const SYSTEM: LogLevel = LogLevel(0x10);
    pub const SQL: LogLevel = LogLevel(0x20);

    /// Categories that can never be switched off.
    pub const ALWAYS: LogLevel = LogLevel(0x01 | 0x10);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        LogLevel(bits & 0x3f)
    }

    pub const fn contains(self, other: LogLevel) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    /// Label for a single category; combined masks print as `MIXED`.
    pub fn label(self) -> &'static str {
        match self {
            LogLevel::ERROR => "ERROR",
            LogLevel::INFO => "INFO",
            LogLevel::DEBUG => "DEBUG",
            LogLevel::NETWORK => "NETWORK",
            LogLevel::SYSTEM => "SYSTEM",
            LogLevel::SQL => "SQL",
            _ => "MIXED",
        }
    }
}

impl BitOr for LogLevel {
    type Output = LogLevel;

    fn bitor(self, rhs: LogLevel) -> LogLevel {
        LogLevel(self.0 | rhs.0)
    }
}

impl BitOrAssign for LogLevel {
    fn bitor_assign(&mut self, rhs: LogLevel) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("cannot create log directory {path}: {source}")]
    Directory { path: PathBuf, source: io::Error },
    #[error("cannot open log file {path}: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("no log file below the size limit after {0} attempts")]
    NoFreeSlot(u32),
    #[error("log write failed: {0}")]
    Write(#[from] io::Error),
}

struct SinkState {
    dir: PathBuf,
    level: LogLevel,
    max_size: u64,
    date: String,
    index: u32,
    size: u64,
    file: Option<File>,
}

impl SinkState {
    fn path(&self) -> PathBuf {
        self.dir.join(format!("{}_{}.txt", self.date, self.index))
    }

    /// Opens the first slot, starting at the current index, that is below the
    /// size limit.
    fn open_slot(&mut self) -> Result<(), LogError> {
        self.file = None;
        for _ in 0..MAX_ROLL_ATTEMPTS {
            let path = self.path();
            let existing = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            if existing >= self.max_size {
                self.index += 1;
                continue;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|source| LogError::Open {
                    path: path.clone(),
                    source,
                })?;
            self.file = Some(file);
            self.size = existing;
            return Ok(());
        }
        Err(LogError::NoFreeSlot(MAX_ROLL_ATTEMPTS))
    }
}

/// File log sink. All writers serialize on one mutex.
pub struct LogSink {
    state: Mutex<SinkState>,
}

impl LogSink {
    /// Creates the directory if needed. Nothing is opened until the first write.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, LogError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| LogError::Directory {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            state: Mutex::new(SinkState {
                dir,
                level: LogLevel::ALWAYS | LogLevel::INFO,
                max_size: DEFAULT_LOG_FILE_SIZE,
                date: String::new(),
                index: 1,
                size: 0,
                file: None,
            }),
        })
    }

    /// ERROR and SYSTEM are always kept on, whatever `level` says.
    pub fn set_level(&self, level: LogLevel) {
        self.state.lock().level = level | LogLevel::ALWAYS;
    }

    pub fn level(&self) -> LogLevel {
        self.state.lock().level
    }

    pub fn is_enabled(&self, level: LogLevel) -> bool {
        self.state.lock().level.contains(level)
    }

    /// Sets the rotation threshold, clamped to the supported range.
    pub fn set_max_size(&self, bytes: u64) {
        self.state.lock().max_size = bytes.clamp(MIN_LOG_FILE_SIZE, MAX_LOG_FILE_SIZE);
    }

    pub fn max_size(&self) -> u64 {
        self.state.lock().max_size
    }

    pub fn dir(&self) -> PathBuf {
        self.state.lock().dir.clone()
    }

    /// Path of the file currently appended to, if one is open.
    pub fn current_path(&self) -> Option<PathBuf> {
        let state = self.state.lock();
        state.file.as_ref().map(|_| state.path())
    }

    pub fn write(&self, level: LogLevel, thread: &str, message: &str) -> Result<(), LogError> {
        self.write_at(Local::now(), level, thread, message)
    }

    /// Writes one line stamped with `now`. Disabled categories are dropped.
    pub fn write_at(
        &self,
        now: DateTime<Local>,
        level: LogLevel,
        thread: &str,
        message: &str,
    ) -> Result<(), LogError> {
        let mut state = self.state.lock();
        if !state.level.contains(level) {
            return Ok(());
        }

        let date = now.format("%Y%m%d").to_string();
        if state.date != date {
            state.date = date;
            state.index = 1;
            state.open_slot()?;
        } else if state.file.is_none() {
            state.open_slot()?;
        } else if state.size >= state.max_size {
            state.index += 1;
            state.open_slot()?;
        }

        let line = format!(
            "[{}] [{}] [{}] {}\n",
            now.format("%H:%M:%S%.6f"),
            level.label(),
            thread,
            message
        );
        if let Some(file) = state.file.as_mut() {
            file.write_all(line.as_bytes())?;
        }
        state.size += line.len() as u64;
        Ok(())
    }

    /// Closes the current file; the next write reopens.
    pub fn close(&self) {
        self.state.lock().file = None;
    }
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LogSink")
            .field("dir", &state.dir)
            .field("level", &state.level)
            .field("max_size", &state.max_size)
            .field("index", &state.index)
            .finish()
    }
}

/// Lists the log files of `dir` for `date` (`YYYYMMDD`), ordered by index.
pub fn log_files_for(dir: &Path, date: &str) -> io::Result<Vec<PathBuf>> {
    let prefix = format!("{}_", date);
    let mut files: Vec<(u32, PathBuf)> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            let index = name.strip_prefix(&prefix)?.strip_suffix(".txt")?.parse().ok()?;
            Some((index, entry.path()))
        })
        .collect();
    files.sort_by_key(|(index, _)| *index);
    Ok(files.into_iter().map(|(_, path)| path).collect())
}
