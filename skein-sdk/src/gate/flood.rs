//! Flood detection over a small ring of recently seen senders.
//!
//! Each slot tracks one (masked sender, channel, level) tuple with a message
//! count and the start of its window. When the ring is full a slot is
//! recycled round-robin, skipping slots that are currently flooding so an
//! active flood is not forgotten because a few other people spoke.

use std::time::{Duration, Instant};

use crate::config::{FloodConfig, FloodMask};
use crate::level::Levels;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloodKey {
    pub source: String,
    pub channel: Option<String>,
    pub level: Levels,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FloodOutcome {
    /// Nothing unusual.
    Normal,
    /// This message tripped the alarm. The caller must report back through
    /// [`FloodTracker::resolve_alarm`].
    Alarm { slot: usize, count: u32, rate: f64 },
    /// The tuple is still flooding after an unclaimed alarm.
    Suppressed,
}

#[derive(Debug, Clone)]
struct Slot {
    key: FloodKey,
    count: u32,
    window_start: Instant,
    flooding: bool,
}

#[derive(Debug, Clone)]
pub struct FloodTracker {
    config: FloodConfig,
    slots: Vec<Option<Slot>>,
    cursor: usize,
}

impl FloodTracker {
    pub fn new(config: FloodConfig) -> Self {
        let n = config.slots.max(1);
        Self {
            config,
            slots: vec![None; n],
            cursor: 0,
        }
    }

    pub fn config(&self) -> &FloodConfig {
        &self.config
    }

    /// Build the tracking key for a sender according to the configured mask.
    pub fn key(&self, nick: &str, user_host: Option<&str>, channel: Option<&str>, level: Levels) -> FloodKey {
        let source = match (self.config.mask, user_host) {
            (FloodMask::Full, Some(uh)) => format!("{nick}!{uh}"),
            (FloodMask::UserHost, Some(uh)) => uh.to_string(),
            (FloodMask::Host, Some(uh)) => uh.rsplit_once('@').map_or(uh, |(_, h)| h).to_string(),
            (_, None) => nick.to_string(),
        };
        FloodKey {
            source: source.to_lowercase(),
            channel: channel.map(|c| c.to_lowercase()),
            level,
        }
    }

    /// Count one message for `key` at time `now`.
    pub fn record(&mut self, key: FloodKey, now: Instant) -> FloodOutcome {
        if !self.config.enabled || self.config.threshold == 0 || self.config.rate <= 0.0 {
            return FloodOutcome::Normal;
        }
        let idx = match self.find(&key) {
            Some(i) => {
                if let Some(slot) = self.slots[i].as_mut() {
                    slot.count += 1;
                }
                i
            }
            None => {
                let i = self.victim();
                self.slots[i] = Some(Slot {
                    key,
                    count: 1,
                    window_start: now,
                    flooding: false,
                });
                i
            }
        };

        let threshold = self.config.threshold;
        let rate_limit = self.config.rate;
        let stale_after = Duration::try_from_secs_f64(f64::from(threshold) / rate_limit).unwrap_or(Duration::MAX);
        let Some(slot) = self.slots[idx].as_mut() else {
            return FloodOutcome::Normal;
        };
        let elapsed = now.saturating_duration_since(slot.window_start);
        let rate = if elapsed.is_zero() {
            f64::INFINITY
        } else {
            f64::from(slot.count) / elapsed.as_secs_f64()
        };

        if slot.flooding {
            if rate >= rate_limit {
                return FloodOutcome::Suppressed;
            }
            slot.flooding = false;
            slot.count = 1;
            slot.window_start = now;
            return FloodOutcome::Normal;
        }

        if slot.count >= threshold && rate >= rate_limit {
            slot.flooding = true;
            tracing::debug!(source = %slot.key.source, count = slot.count, rate, "Flood alarm");
            return FloodOutcome::Alarm { slot: idx, count: slot.count, rate };
        }
        if rate < rate_limit && elapsed > stale_after {
            slot.count = 1;
            slot.window_start = now;
        }
        FloodOutcome::Normal
    }

    /// Report whether the alarm raised for `slot` was claimed by a hook.
    /// A claimed alarm starts a fresh window; an unclaimed one keeps the
    /// slot flooding for the rest of the burst.
    pub fn resolve_alarm(&mut self, slot: usize, claimed: bool, now: Instant) {
        if !claimed {
            return;
        }
        if let Some(Some(s)) = self.slots.get_mut(slot) {
            s.count = 0;
            s.window_start = now;
            s.flooding = false;
        }
    }

    /// Number of occupied slots.
    pub fn tracked(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Current count for `key`, if tracked.
    pub fn count_for(&self, key: &FloodKey) -> Option<u32> {
        self.find(key).and_then(|i| self.slots[i].as_ref()).map(|s| s.count)
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.cursor = 0;
    }

    fn find(&self, key: &FloodKey) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|s| s.key == *key))
    }

    fn victim(&mut self) -> usize {
        let n = self.slots.len();
        let pick = self
            .slots
            .iter()
            .position(|s| s.is_none())
            .or_else(|| {
                (0..n)
                    .map(|off| (self.cursor + off) % n)
                    .find(|&i| self.slots[i].as_ref().is_some_and(|s| !s.flooding))
            })
            .unwrap_or(self.cursor % n);
        self.cursor = (pick + 1) % n;
        pick
    }
}
