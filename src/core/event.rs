//! Purpose: Download identifiers and event kinds raised by the engine.
//! Exports: `Gid`, `DownloadEvent`.
//! Role: Shared vocabulary between backends, handlers and the C ABI.
//! Invariants: Event codes match aria2's `DownloadEvent` numbering (1..=6).
//! Invariants: Gid text form is exactly 16 lowercase hex digits.
use std::fmt;
use std::str::FromStr;

use crate::core::error::{Error, ErrorKind};

/// 64-bit download id assigned by the engine.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Gid(u64);

impl Gid {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// aria2 never hands out gid 0; it marks "no download".
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn to_hex(self) -> String {
        format!("{:016x}", self.0)
    }

    pub fn from_hex(hex: &str) -> Result<Self, Error> {
        if hex.len() != 16 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("invalid gid `{hex}`"))
                .with_hint("A gid is 16 hex digits."));
        }
        u64::from_str_radix(hex, 16).map(Self).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("invalid gid `{hex}`"))
                .with_source(err)
        })
    }
}

impl fmt::Display for Gid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for Gid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(i32)]
pub enum DownloadEvent {
    Start = 1,
    Pause = 2,
    Stop = 3,
    Complete = 4,
    Error = 5,
    BtComplete = 6,
}

impl DownloadEvent {
    pub const ALL: [DownloadEvent; 6] = [
        DownloadEvent::Start,
        DownloadEvent::Pause,
        DownloadEvent::Stop,
        DownloadEvent::Complete,
        DownloadEvent::Error,
        DownloadEvent::BtComplete,
    ];

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|event| event.code() == code)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DownloadEvent::Start => "start",
            DownloadEvent::Pause => "pause",
            DownloadEvent::Stop => "stop",
            DownloadEvent::Complete => "complete",
            DownloadEvent::Error => "error",
            DownloadEvent::BtComplete => "bt-complete",
        }
    }
}

impl fmt::Display for DownloadEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
