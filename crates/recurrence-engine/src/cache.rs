//! Windowed reentry cache -- remembers sampled points of a rule's sequence so
//! later queries can resume near their window instead of at the series start.
//!
//! The cache is a fixed-capacity ring buffer of [`ReentryPoint`]s in strictly
//! increasing order. Consumers report every rule occurrence they pull; every
//! `stride`-th one beyond either end of the cached range is stored. Growing at
//! one end evicts from the other, so the cache follows a moving window.

use serde::{Deserialize, Serialize};

use crate::error::{RecurrenceError, Result};
use crate::rule::RecurrenceRule;
use crate::temporal::Temporal;

/// Sizing of a [`WindowCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of reentry points kept. `0` disables caching.
    pub capacity: usize,
    /// Record every `stride`-th occurrence past the cached range.
    pub stride: u32,
}

impl CacheConfig {
    pub const DEFAULT_CAPACITY: usize = 51;
    pub const DEFAULT_STRIDE: u32 = 21;

    /// # Errors
    /// Returns `RecurrenceError::Configuration` when `stride` is zero.
    pub fn new(capacity: usize, stride: u32) -> Result<Self> {
        let config = CacheConfig { capacity, stride };
        config.validate()?;
        Ok(config)
    }

    /// A configuration that never caches.
    pub fn disabled() -> Self {
        CacheConfig {
            capacity: 0,
            ..CacheConfig::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.stride == 0 {
            return Err(RecurrenceError::Configuration(
                "cache stride must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            capacity: Self::DEFAULT_CAPACITY,
            stride: Self::DEFAULT_STRIDE,
        }
    }
}

/// A known occurrence and its zero-based index in the full rule sequence.
///
/// The ordinal is counted from the series start, so COUNT-limited rules keep
/// their limit when expansion resumes here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReentryPoint {
    pub instant: Temporal,
    pub ordinal: u64,
}

impl ReentryPoint {
    pub fn new(instant: Temporal, ordinal: u64) -> Self {
        ReentryPoint { instant, ordinal }
    }
}

/// Ring buffer of reentry points for one (start, rule) snapshot.
#[derive(Debug, Clone)]
pub struct WindowCache {
    slots: Vec<Option<ReentryPoint>>,
    /// Physical index of the lowest entry.
    head: usize,
    len: usize,
    stride: u32,
    skipped_high: u32,
    skipped_low: u32,
    start: Temporal,
    rule: Option<RecurrenceRule>,
}

impl WindowCache {
    /// Create a cache seeded with `(start, 0)`.
    ///
    /// # Errors
    /// Returns `RecurrenceError::Configuration` for a zero stride or a
    /// disabled (zero-capacity) configuration.
    pub fn new(config: CacheConfig, start: Temporal, rule: Option<RecurrenceRule>) -> Result<Self> {
        config.validate()?;
        if !config.is_enabled() {
            return Err(RecurrenceError::Configuration(
                "cache capacity must be at least 1".to_string(),
            ));
        }
        let mut cache = WindowCache {
            slots: vec![None; config.capacity],
            head: 0,
            len: 0,
            stride: config.stride,
            skipped_high: 0,
            skipped_low: 0,
            start,
            rule,
        };
        cache.seed();
        Ok(cache)
    }

    fn seed(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.head = 0;
        self.len = 0;
        self.skipped_high = 0;
        self.skipped_low = 0;
        self.push_back(ReentryPoint::new(self.start, 0));
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True when this cache was built for exactly this start and rule.
    pub fn matches(&self, start: &Temporal, rule: Option<&RecurrenceRule>) -> bool {
        self.start == *start && self.rule.as_ref() == rule
    }

    /// Drop every entry and re-seed when the snapshot no longer matches.
    pub fn ensure_snapshot(&mut self, start: &Temporal, rule: Option<&RecurrenceRule>) {
        if self.matches(start, rule) {
            return;
        }
        tracing::debug!(
            old_start = %self.start,
            new_start = %start,
            entries = self.len,
            "recurrence changed, clearing reentry cache"
        );
        self.start = *start;
        self.rule = rule.cloned();
        self.seed();
    }

    /// Latest cached point at or before `query`.
    pub fn find_reentry_point(&self, query: &Temporal) -> Option<ReentryPoint> {
        let (mut lo, mut hi) = (0, self.len);
        // First logical index whose instant is after the query.
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.get(mid) {
                Some(point) if point.instant <= *query => lo = mid + 1,
                _ => hi = mid,
            }
        }
        let found = lo.checked_sub(1).and_then(|i| self.get(i));
        tracing::trace!(query = %query, found = ?found.map(|p| p.ordinal), "reentry lookup");
        found
    }

    /// Report a rule occurrence the caller consumed.
    pub fn record(&mut self, point: ReentryPoint) {
        let (Some(low), Some(high)) = (self.first(), self.last()) else {
            self.push_back(point);
            return;
        };
        if point.instant > high.instant {
            self.skipped_high += 1;
            if self.skipped_high >= self.stride {
                self.skipped_high = 0;
                tracing::trace!(instant = %point.instant, ordinal = point.ordinal, "cache grows high");
                self.push_back(point);
            }
        } else if point.instant < low.instant {
            self.skipped_low += 1;
            if self.skipped_low >= self.stride {
                self.skipped_low = 0;
                tracing::trace!(instant = %point.instant, ordinal = point.ordinal, "cache grows low");
                self.push_front(point);
            }
        }
    }

    /// Cached points, lowest first.
    pub fn entries(&self) -> Vec<ReentryPoint> {
        (0..self.len).filter_map(|i| self.get(i)).collect()
    }

    fn first(&self) -> Option<ReentryPoint> {
        self.get(0)
    }

    fn last(&self) -> Option<ReentryPoint> {
        self.len.checked_sub(1).and_then(|i| self.get(i))
    }

    fn get(&self, logical: usize) -> Option<ReentryPoint> {
        if logical >= self.len {
            return None;
        }
        self.slots[(self.head + logical) % self.slots.len()]
    }

    /// Append a new highest entry, evicting the lowest when full.
    fn push_back(&mut self, point: ReentryPoint) {
        let capacity = self.slots.len();
        if self.len == capacity {
            self.slots[self.head] = None;
            self.head = (self.head + 1) % capacity;
            self.len -= 1;
        }
        let tail = (self.head + self.len) % capacity;
        self.slots[tail] = Some(point);
        self.len += 1;
    }

    /// Prepend a new lowest entry, evicting the highest when full.
    fn push_front(&mut self, point: ReentryPoint) {
        let capacity = self.slots.len();
        if self.len == capacity {
            let tail = (self.head + self.len - 1) % capacity;
            self.slots[tail] = None;
            self.len -= 1;
        }
        self.head = (self.head + capacity - 1) % capacity;
        self.slots[self.head] = Some(point);
        self.len += 1;
    }
}
