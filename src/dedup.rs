//! Content-fingerprint cache with TTL eviction.
//!
//! Two messages with the same normalized text are duplicates regardless of
//! their ids or source channels.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::filter::normalize;
use crate::store::SharedStore;

const STORE_PREFIX: &str = "fingerprint:";

/// SHA-256 digest of the normalized message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(text: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(normalize(text).as_bytes());
        Self(hasher.finalize().into())
    }

    pub fn to_hex(&self) -> String {
        use std::fmt::Write as _;
        let mut out = String::with_capacity(64);
        for b in self.0 {
            let _ = write!(&mut out, "{b:02x}");
        }
        out
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 64 || !s.is_ascii() {
            return None;
        }
        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(bytes))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough for logs.
        f.write_str(&self.to_hex()[..12])
    }
}

/// Capacity-bounded fingerprint → first-seen-at map.
///
/// Entries older than the TTL count as absent and are purged lazily.  The
/// check-then-remember step for one fingerprint runs under that key's shard
/// lock, so two concurrent flows carrying the same text cannot both pass.
pub struct Deduplicator {
    entries: DashMap<Fingerprint, DateTime<Utc>>,
    ttl: TimeDelta,
    capacity: usize,
    store: Option<SharedStore>,
}

impl Deduplicator {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
            capacity: capacity.max(1),
            store: None,
        }
    }

    pub fn with_store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    fn is_fresh(&self, remembered_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(remembered_at) < self.ttl
    }

    /// `true` when `fp` was remembered less than one TTL ago.  No side effects.
    #[cfg(test)]
    pub fn seen(&self, fp: &Fingerprint, now: DateTime<Utc>) -> bool {
        self.entries
            .get(fp)
            .is_some_and(|at| self.is_fresh(*at, now))
    }

    /// Insert or refresh `fp`.
    #[cfg(test)]
    pub fn remember(&self, fp: Fingerprint, now: DateTime<Utc>) {
        self.entries.insert(fp, now);
        self.after_insert(fp, now);
    }

    /// Atomic `seen` + `remember`.  Returns `true` for a duplicate, in which
    /// case the original timestamp is left untouched.
    pub fn check_and_remember(&self, fp: Fingerprint, now: DateTime<Utc>) -> bool {
        let duplicate = match self.entries.entry(fp) {
            Entry::Occupied(mut e) => {
                if self.is_fresh(*e.get(), now) {
                    true
                } else {
                    e.insert(now);
                    false
                }
            }
            Entry::Vacant(v) => {
                v.insert(now);
                false
            }
        };

        if duplicate {
            debug!("Dedup: fingerprint {fp} already seen");
        } else {
            self.after_insert(fp, now);
        }
        duplicate
    }

    fn after_insert(&self, fp: Fingerprint, now: DateTime<Utc>) {
        if let Some(store) = &self.store {
            let key = format!("{STORE_PREFIX}{}", fp.to_hex());
            if let Err(e) = store.put(&key, &now.to_rfc3339()) {
                warn!("Failed to persist fingerprint {fp}: {e}");
            }
        }
        self.enforce_capacity(now);
    }

    fn enforce_capacity(&self, now: DateTime<Utc>) {
        if self.entries.len() <= self.capacity {
            return;
        }
        self.sweep(now);
        while self.entries.len() > self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| *e.value())
                .map(|e| *e.key());
            let Some(oldest) = oldest else { break };
            debug!("Dedup: capacity reached, evicting {oldest}");
            self.forget(&oldest);
        }
    }

    fn forget(&self, fp: &Fingerprint) {
        self.entries.remove(fp);
        if let Some(store) = &self.store {
            if let Err(e) = store.remove(&format!("{STORE_PREFIX}{}", fp.to_hex())) {
                warn!("Failed to drop persisted fingerprint {fp}: {e}");
            }
        }
    }

    /// Drop every expired entry.  Returns how many were removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<Fingerprint> = self
            .entries
            .iter()
            .filter(|e| !self.is_fresh(*e.value(), now))
            .map(|e| *e.key())
            .collect();
        for fp in &expired {
            self.forget(fp);
        }
        expired.len()
    }

    /// Reload still-fresh fingerprints from the store.
    pub fn restore(&self, now: DateTime<Utc>) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };
        let rows = match store.scan_prefix(STORE_PREFIX) {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Failed to load persisted fingerprints: {e}");
                return 0;
            }
        };

        let mut restored = 0;
        for (key, value) in rows {
            let fp = Fingerprint::from_hex(&key[STORE_PREFIX.len()..]);
            let at = DateTime::parse_from_rfc3339(&value).map(|t| t.with_timezone(&Utc));
            match (fp, at) {
                (Some(fp), Ok(at)) if self.is_fresh(at, now) => {
                    self.entries.insert(fp, at);
                    restored += 1;
                }
                _ => {
                    let _ = store.remove(&key);
                }
            }
        }
        self.enforce_capacity(now);
        restored
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl fmt::Display for Deduplicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Deduplicator(ttl={}s, capacity={}, entries={}, durable={})",
            self.ttl.num_seconds(),
            self.capacity,
            self.len(),
            self.store.is_some(),
        )
    }
}
