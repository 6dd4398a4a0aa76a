//! Process clock and purge-token service
//!
//! Two pieces of state are process-wide: the monotonic "now" used for TTL
//! arithmetic and the current purge token used by event invalidation. Both
//! live behind one mutex so a token reset clears them atomically. The first
//! call to [`now`] observes the wall clock; every later call inside the same
//! request returns that same instant until a new purge token is generated.

use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use uuid::Uuid;

struct ProcessClock {
    instant: Option<f64>,
    token: Option<String>,
}

static CLOCK: Lazy<Mutex<ProcessClock>> = Lazy::new(|| {
    Mutex::new(ProcessClock {
        instant: None,
        token: None,
    })
});

fn system_microtime() -> f64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs_f64(),
        Err(_) => 0.0,
    }
}

/// The request-stable high-resolution instant, in seconds since the epoch.
///
/// The first call observes the system clock; subsequent calls return the
/// cached instant until [`new_purge_token`] resets it.
pub fn now() -> f64 {
    let mut clock = CLOCK.lock();
    match clock.instant {
        Some(instant) => instant,
        None => {
            let instant = system_microtime();
            clock.instant = Some(instant);
            instant
        }
    }
}

/// [`now`] truncated to whole seconds, the precision TTL expiry works in.
pub fn now_secs() -> u64 {
    now() as u64
}

/// The current purge token, generating one if none exists yet.
pub fn purge_token() -> String {
    let mut clock = CLOCK.lock();
    if let Some(token) = &clock.token {
        return token.clone();
    }
    let token = generate_token(&mut clock);
    token
}

/// Reset the clock and generate a fresh purge token.
///
/// Clears both the cached instant and the current token, then builds
/// `<microtime>-<unique suffix>` from a newly observed instant.
pub fn new_purge_token() -> String {
    let mut clock = CLOCK.lock();
    clock.instant = None;
    clock.token = None;
    generate_token(&mut clock)
}

fn generate_token(clock: &mut ProcessClock) -> String {
    let instant = match clock.instant {
        Some(instant) => instant,
        None => {
            let instant = system_microtime();
            clock.instant = Some(instant);
            instant
        }
    };
    // The uuid suffix keeps tokens minted in the same second distinct.
    let token = format!("{:.6}-{}", instant, Uuid::new_v4().simple());
    clock.token = Some(token.clone());
    token
}

/// Compare two purge tokens.
///
/// Identical strings are `Equal`. Otherwise the microtime prefixes decide
/// the order; tokens with equal prefixes but different suffixes also compare
/// `Equal` -- they are distinct identities with no ordering between them,
/// and callers must not treat either as newer.
pub fn compare(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }
    let prefix_a = microtime_prefix(a);
    let prefix_b = microtime_prefix(b);
    prefix_a.partial_cmp(&prefix_b).unwrap_or(Ordering::Equal)
}

fn microtime_prefix(token: &str) -> f64 {
    token
        .split('-')
        .next()
        .and_then(|prefix| prefix.parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// Pin the process instant to a fixed value.
///
/// Intended for tests that drive TTL expiry deterministically; production
/// code never calls this.
#[doc(hidden)]
pub fn set_instant(instant: f64) {
    CLOCK.lock().instant = Some(instant);
}

/// Clear both the cached instant and the current token.
#[doc(hidden)]
pub fn reset() {
    let mut clock = CLOCK.lock();
    clock.instant = None;
    clock.token = None;
}

// Unit tests anywhere in the crate that pin or reset the process clock must
// hold this guard; the clock is process-global and tests run in parallel.
#[cfg(test)]
pub(crate) static TEST_CLOCK_GUARD: Mutex<()> = Mutex::new(());
