//! Sortable compact identifiers.
//!
//! An id is the base-36 count of 100µs ticks since 2015-02-20 (plus a
//! process-wide sequence number), followed by three random base-36
//! characters.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use rand::Rng;

const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Tick count at the epoch, in 100µs units.
const EPOCH_TICKS: i64 = 14_244_454_700_000;

/// The epoch in Unix seconds.
const EPOCH_SECONDS: i64 = 1_424_445_470;

static SEQUENCE: AtomicI64 = AtomicI64::new(0);

/// Generates a new identifier.
#[must_use]
pub fn unique_id() -> String {
    let ticks = (Utc::now().timestamp_micros() + 50) / 100;
    let value = ticks - EPOCH_TICKS + SEQUENCE.fetch_add(1, Ordering::Relaxed);

    let mut id = to_base36(value.max(0).unsigned_abs());
    let mut rng = rand::thread_rng();
    for _ in 0..3 {
        id.push(char::from(ALPHABET[rng.gen_range(0..36)]));
    }
    id
}

/// Unix timestamp (seconds) encoded in an identifier.
#[must_use]
pub fn unique_id_timestamp(id: &str) -> Option<i64> {
    let time_part = id.get(..id.len().checked_sub(3)?)?;
    if time_part.is_empty() {
        return None;
    }
    let ticks = i64::from_str_radix(time_part, 36).ok()?;
    Some(ticks.div_euclid(10_000) + EPOCH_SECONDS)
}

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(ALPHABET[(value % 36) as usize]);
        value /= 36;
    }
    digits.iter().rev().map(|&b| char::from(b)).collect()
}
