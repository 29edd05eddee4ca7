//! Correlation tokens and the live-token store.
//!
//! A token is a short base-36 id obtained by passing an increasing counter
//! through a salted, reversible 32-bit mixer.  Consecutive commands get
//! unrelated-looking tokens, and a token can be decoded back to its
//! counter value for log correlation.
//!
//! The store maps each live token to its countdown and outcome.  Two
//! writers share it under one lock:
//!
//! - the dispatcher clock is the only writer of `remaining_secs`;
//! - the inbound result handler is the only writer of `outcome`.
//!
//! Waiting senders park on a condition variable that both writers
//! signal, with a timed fallback wake.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::shutdown::StopSignal;

use super::CommandResult;

/// Fixed-capacity token string.  A `u32` needs at most 7 base-36 digits.
pub type Token = heapless::String<16>;

const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const MIN_LEN: usize = 5;
const MIX: u32 = 0x9E37_79B1;
const MIX_INV: u32 = mod_inverse(MIX);

/// Multiplicative inverse of an odd `a` modulo 2^32 (Newton iteration:
/// each round doubles the number of correct low bits, starting from 3).
const fn mod_inverse(a: u32) -> u32 {
    let mut x = a;
    let mut i = 0;
    while i < 4 {
        x = x.wrapping_mul(2u32.wrapping_sub(a.wrapping_mul(x)));
        i += 1;
    }
    x
}

// ── Codec ────────────────────────────────────────────────────

/// Salted reversible short-id encoder.
#[derive(Debug, Clone, Copy)]
pub struct TokenCodec {
    salt: u32,
}

impl TokenCodec {
    pub fn with_salt(salt: u32) -> Self {
        Self { salt }
    }

    /// Codec with a per-process random salt.
    pub fn random() -> Self {
        Self::with_salt(random_u32())
    }

    pub fn encode(&self, n: u32) -> Token {
        let mut x = (n ^ self.salt).wrapping_mul(MIX);
        x ^= x >> 16;
        x = x.wrapping_mul(MIX);

        let mut digits = [b'0'; 7];
        let mut len = 0;
        while x > 0 {
            digits[len] = ALPHABET[(x % 36) as usize];
            x /= 36;
            len += 1;
        }
        let len = len.max(MIN_LEN);

        let mut token = Token::new();
        for &d in digits[..len].iter().rev() {
            // Capacity (16) exceeds the 7 digits a u32 can produce.
            let _ = token.push(d as char);
        }
        token
    }

    pub fn decode(&self, token: &str) -> Option<u32> {
        if token.is_empty() || token.len() > 7 {
            return None;
        }
        let mut x: u64 = 0;
        for b in token.bytes() {
            let d = ALPHABET.iter().position(|&a| a == b)? as u64;
            x = x * 36 + d;
        }
        let mut x = u32::try_from(x).ok()?.wrapping_mul(MIX_INV);
        x ^= x >> 16;
        Some(x.wrapping_mul(MIX_INV) ^ self.salt)
    }
}

/// Simulation-grade entropy from `RandomState`; tokens only need to be
/// unpredictable across restarts, not secret.
pub(crate) fn random_u32() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    RandomState::new().build_hasher().finish() as u32
}

// ── Outcome ──────────────────────────────────────────────────

/// Delivery state of one token as reported by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Pending,
    Ack,
    Nack,
}

impl Outcome {
    /// Parse the `tx=` field of a result message.
    pub fn from_wire(tx: &str) -> Option<Self> {
        match tx {
            "" => Some(Self::Pending),
            "ack" => Some(Self::Ack),
            "nack" => Some(Self::Nack),
            _ => None,
        }
    }
}

// ── Store ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Slot {
    remaining_secs: f64,
    outcome: Outcome,
}

#[derive(Debug)]
struct Slots {
    counter: u32,
    live: HashMap<Token, Slot>,
}

/// Live tokens, guarded by one lock.
#[derive(Debug)]
pub(crate) struct TokenStore {
    slots: Mutex<Slots>,
    changed: Condvar,
}

impl TokenStore {
    pub fn new(counter_start: u32) -> Self {
        Self {
            slots: Mutex::new(Slots {
                counter: counter_start,
                live: HashMap::new(),
            }),
            changed: Condvar::new(),
        }
    }

    /// Register a fresh token with a full countdown.
    pub fn issue(&self, codec: &TokenCodec, timeout_secs: f64) -> Token {
        let mut slots = self.lock();
        loop {
            slots.counter = slots.counter.wrapping_add(1);
            let token = codec.encode(slots.counter);
            if !slots.live.contains_key(&token) {
                slots.live.insert(
                    token.clone(),
                    Slot {
                        remaining_secs: timeout_secs,
                        outcome: Outcome::Pending,
                    },
                );
                return token;
            }
        }
    }

    /// Advance every countdown by `delta_secs`.  Countdowns stop a little
    /// below zero so expired entries do not drift without bound.
    pub fn elapse(&self, delta_secs: f64) {
        {
            let mut slots = self.lock();
            for slot in slots.live.values_mut() {
                if slot.remaining_secs >= -1.0 {
                    slot.remaining_secs -= delta_secs;
                }
            }
        }
        self.changed.notify_all();
    }

    /// Record a node's result.  Returns `false` when the token is unknown
    /// (never issued, already timed out and removed, or malformed).
    pub fn resolve(&self, token: &str, outcome: Outcome) -> bool {
        let Ok(key) = Token::try_from(token) else {
            return false;
        };
        let known = match self.lock().live.get_mut(&key) {
            Some(slot) => {
                slot.outcome = outcome;
                true
            }
            None => false,
        };
        if known {
            self.changed.notify_all();
        }
        known
    }

    /// Block until the token reaches a terminal state, its countdown runs
    /// out, or stop is requested.
    pub fn wait_terminal(&self, token: &Token, wake: Duration, stop: &StopSignal) -> CommandResult {
        let mut slots = self.lock();
        loop {
            let Some(slot) = slots.live.get(token) else {
                return CommandResult::Timeout;
            };
            match slot.outcome {
                Outcome::Ack => return CommandResult::Ack,
                Outcome::Nack => return CommandResult::Nack,
                Outcome::Pending => {}
            }
            if slot.remaining_secs <= 0.0 || stop.is_triggered() {
                return CommandResult::Timeout;
            }
            slots = self
                .changed
                .wait_timeout(slots, wake)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    pub fn remove(&self, token: &Token) {
        self.lock().live.remove(token);
    }

    pub fn wake_all(&self) {
        self.changed.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().live.len()
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A live token that is removed from the store when dropped, whatever
/// way the attempt ends.
pub(crate) struct TokenLease<'a> {
    store: &'a TokenStore,
    token: Token,
}

impl<'a> TokenLease<'a> {
    pub fn issue(store: &'a TokenStore, codec: &TokenCodec, timeout_secs: f64) -> Self {
        let token = store.issue(codec, timeout_secs);
        Self { store, token }
    }

    pub fn token(&self) -> &Token {
        &self.token
    }
}

impl Drop for TokenLease<'_> {
    fn drop(&mut self) {
        self.store.remove(&self.token);
    }
}
