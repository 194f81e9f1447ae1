//! Line-based command channel
//!
//! A host talks to the device over a serial transport, one command per
//! newline-terminated line. Every mutating command ends with exactly one `OK`
//! or `ERR:<CODE>` line; sync progress is streamed as `SYNC:<STEP>:...` lines
//! before it.

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;

use embedded_io::{Read, ReadReady, Write};
use serde::Serialize;

use crate::config::ConfigError;
use crate::sync::{StepOutcome, SyncError, SyncObserver, SyncStep};

/// Longest accepted line, excluding the terminator
pub const MAX_LINE: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    Ping,
    Restart,
    GoSleep,
    GetConfig,
    /// Partial JSON object to merge
    SetConfig(&'a str),
    WipeConfig,
    /// Wipe configuration and retained state, redraw the first-run screen
    FactoryReset,
    /// Run a full sync now
    Refresh,
    GetStatus,
}

impl<'a> Command<'a> {
    pub fn parse(line: &'a str) -> Result<Self, CommandError> {
        let line = line.trim();
        if let Some(json) = line.strip_prefix("SET_CONFIG:") {
            return Ok(Command::SetConfig(json));
        }
        Ok(match line {
            "PING" => Command::Ping,
            "RESTART" => Command::Restart,
            "GO_SLEEP" => Command::GoSleep,
            "GET_CONFIG" => Command::GetConfig,
            "WIPE_CONFIG" => Command::WipeConfig,
            "FACTORY_RESET" => Command::FactoryReset,
            "REFRESH" => Command::Refresh,
            "GET_STATUS" => Command::GetStatus,
            _ => return Err(CommandError::UnknownCommand),
        })
    }

    /// Command word without arguments, safe to log
    pub fn name(&self) -> &'static str {
        match self {
            Command::Ping => "PING",
            Command::Restart => "RESTART",
            Command::GoSleep => "GO_SLEEP",
            Command::GetConfig => "GET_CONFIG",
            Command::SetConfig(_) => "SET_CONFIG",
            Command::WipeConfig => "WIPE_CONFIG",
            Command::FactoryReset => "FACTORY_RESET",
            Command::Refresh => "REFRESH",
            Command::GetStatus => "GET_STATUS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command")]
    UnknownCommand,
    #[error("line longer than {} bytes", MAX_LINE)]
    LineTooLong,
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("sync: {0}")]
    Sync(#[from] SyncError),
}

impl CommandError {
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::UnknownCommand => "UNKNOWN_COMMAND",
            CommandError::LineTooLong => "LINE_TOO_LONG",
            CommandError::Config(e) => e.code(),
            CommandError::Sync(e) => e.code(),
        }
    }
}

/// Output of [`LineReader::push`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    Line(String),
    /// A line exceeded [`MAX_LINE`] and was discarded up to its terminator
    TooLong,
}

/// Splits a byte stream into lines
#[derive(Debug, Default)]
pub struct LineReader {
    buf: Vec<u8>,
    overflowed: bool,
}

impl LineReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, byte: u8) -> Option<LineEvent> {
        match byte {
            b'\n' => {
                let overflowed = core::mem::take(&mut self.overflowed);
                let raw = core::mem::take(&mut self.buf);
                if overflowed {
                    return Some(LineEvent::TooLong);
                }
                let text = String::from_utf8_lossy(&raw);
                let text = text.trim();
                (!text.is_empty()).then(|| LineEvent::Line(String::from(text)))
            }
            _ if self.overflowed => None,
            _ if self.buf.len() >= MAX_LINE => {
                self.buf.clear();
                self.overflowed = true;
                None
            }
            _ => {
                self.buf.push(byte);
                None
            }
        }
    }
}

/// Serial transport plus line framing
pub struct CommandChannel<P> {
    port: P,
    reader: LineReader,
    backlog: VecDeque<u8>,
}

impl<P> CommandChannel<P>
where
    P: Read + ReadReady + Write,
{
    pub fn new(port: P) -> Self {
        Self {
            port,
            reader: LineReader::new(),
            backlog: VecDeque::new(),
        }
    }

    pub fn port(&mut self) -> &mut P {
        &mut self.port
    }

    /// Return the next complete line without blocking
    pub fn poll(&mut self) -> Option<LineEvent> {
        loop {
            while let Some(byte) = self.backlog.pop_front() {
                if let Some(event) = self.reader.push(byte) {
                    return Some(event);
                }
            }
            match self.port.read_ready() {
                Ok(true) => {}
                _ => return None,
            }
            let mut chunk = [0u8; 64];
            match self.port.read(&mut chunk) {
                Ok(0) | Err(_) => return None,
                Ok(n) => self.backlog.extend(&chunk[..n]),
            }
        }
    }

    /// Write one response line
    pub fn send(&mut self, line: &str) {
        let written = self
            .port
            .write_all(line.as_bytes())
            .and_then(|_| self.port.write_all(b"\n"))
            .and_then(|_| self.port.flush());
        if written.is_err() {
            log::warn!("command port write failed");
        }
    }

    /// Terminal token of a command
    pub fn finish(&mut self, result: Result<(), CommandError>) {
        match result {
            Ok(()) => self.send("OK"),
            Err(e) => {
                log::warn!("command failed: {}", e);
                let mut line = String::from("ERR:");
                line.push_str(e.code());
                self.send(&line);
            }
        }
    }
}

impl<P> SyncObserver for CommandChannel<P>
where
    P: Read + ReadReady + Write,
{
    fn step(&mut self, step: SyncStep, outcome: StepOutcome) {
        let mut line = String::from("SYNC:");
        line.push_str(step.name());
        match outcome {
            StepOutcome::Ok => line.push_str(":OK"),
            StepOutcome::Skipped => line.push_str(":SKIP"),
            StepOutcome::Failed(code) => {
                line.push_str(":ERR:");
                line.push_str(code);
            }
        }
        self.send(&line);
    }
}

/// Body of the `STATUS:` line
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub variant: &'static str,
    pub configured: bool,
    pub boot_count: u32,
    pub rapid_boot_count: u32,
    pub last_sync_epoch: u64,
    pub last_clock_sync_epoch: u64,
    pub now: u64,
    pub battery_percent: Option<u8>,
    pub external_power: bool,
    pub credential_cached: bool,
    pub has_cached_result: bool,
}
