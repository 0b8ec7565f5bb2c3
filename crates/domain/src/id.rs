//! Prefixed, time-ordered identifiers.
//!
//! Every id has the shape `<prefix>_<timestamp>_<random>`: the prefix names
//! the domain (`run`, `sess`, ...), the timestamp is compacted UTC ISO-8601
//! reduced to digits so ids sort lexicographically by creation time, and the
//! suffix is 50 bits from the OS CRNG encoded as lowercase base32.
//!
//! A minter keeps the last-used millisecond and bumps forward on collision,
//! so ids minted through one minter sort strictly in creation order even
//! when minted faster than the clock ticks.

use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;

/// The id domains used across the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prefix {
    Run,
    Session,
    Turn,
    Message,
    Call,
    Step,
    Attachment,
}

impl Prefix {
    pub fn as_str(self) -> &'static str {
        match self {
            Prefix::Run => "run",
            Prefix::Session => "sess",
            Prefix::Turn => "turn",
            Prefix::Message => "msg",
            Prefix::Call => "call",
            Prefix::Step => "step",
            Prefix::Attachment => "att",
        }
    }
}

/// Mints prefixed ids with a monotonic millisecond clock.
pub struct IdMinter {
    last_ms: Mutex<i64>,
}

impl IdMinter {
    pub const fn new() -> Self {
        Self {
            last_ms: Mutex::new(0),
        }
    }

    /// Mint one id. Ids from the same minter sort in mint order.
    pub fn mint(&self, prefix: Prefix) -> String {
        let ms = {
            let mut last = self.last_ms.lock();
            let now = Utc::now().timestamp_millis();
            let ms = now.max(*last + 1);
            *last = ms;
            ms
        };
        format!("{}_{}_{}", prefix.as_str(), compact_timestamp(ms), random_suffix())
    }
}

impl Default for IdMinter {
    fn default() -> Self {
        Self::new()
    }
}

static MINTER: IdMinter = IdMinter::new();

/// Mint an id from the process-wide minter.
pub fn mint(prefix: Prefix) -> String {
    MINTER.mint(prefix)
}

/// `YYYYMMDDTHHMMSSmmmZ` — ISO-8601 with the separators stripped.
fn compact_timestamp(ms: i64) -> String {
    let dt = Utc
        .timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(Utc::now);
    dt.format("%Y%m%dT%H%M%S%3fZ").to_string()
}

const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

/// Ten base32 characters = 50 random bits.
fn random_suffix() -> String {
    let mut bits = OsRng.next_u64();
    let mut out = String::with_capacity(10);
    for _ in 0..10 {
        out.push(BASE32_ALPHABET[(bits & 0x1f) as usize] as char);
        bits >>= 5;
    }
    out
}
