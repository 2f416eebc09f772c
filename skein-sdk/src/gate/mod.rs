//! The gate every user-originated message passes before it is displayed.
//!
//! Ignore rules are consulted first. A message matched by an ignore rule is
//! dropped without touching the flood ring, so ignoring someone also stops
//! them from tripping flood alarms.

pub mod flood;
pub mod ignore;

use std::time::Instant;

use crate::level::Levels;
use flood::{FloodOutcome, FloodTracker};
use ignore::IgnoreList;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Ignored,
    RateLimited,
}

/// Who sent the message being gated.
#[derive(Debug, Clone, Copy)]
pub struct Sender<'a> {
    pub nick: &'a str,
    pub user_host: Option<&'a str>,
}

impl Sender<'_> {
    pub fn hostmask(&self) -> String {
        match self.user_host {
            Some(uh) => format!("{}!{uh}", self.nick),
            None => self.nick.to_string(),
        }
    }
}

/// Details of a raised flood alarm, handed to the FLOOD hook.
#[derive(Debug, Clone)]
pub struct FloodAlarm {
    pub source: String,
    pub channel: Option<String>,
    pub level: Levels,
    pub count: u32,
    pub rate: f64,
}

/// Run one message through the ignore list and the flood tracker.
///
/// `on_alarm` is called when this message raises a flood alarm; it returns
/// whether the alarm was claimed. A claimed alarm lets the message through
/// and restarts the window; an unclaimed one rate-limits it.
pub fn check(
    ignores: &IgnoreList,
    flood: &mut FloodTracker,
    sender: Sender<'_>,
    channel: Option<&str>,
    level: Levels,
    now: Instant,
    on_alarm: impl FnOnce(&FloodAlarm) -> bool,
) -> Verdict {
    if ignores.is_ignored(&sender.hostmask(), channel, level) {
        return Verdict::Ignored;
    }
    let key = flood.key(sender.nick, sender.user_host, channel, level);
    match flood.record(key.clone(), now) {
        FloodOutcome::Normal => Verdict::Allow,
        FloodOutcome::Suppressed => Verdict::RateLimited,
        FloodOutcome::Alarm { slot, count, rate } => {
            let alarm = FloodAlarm {
                source: key.source,
                channel: key.channel,
                level,
                count,
                rate,
            };
            let claimed = on_alarm(&alarm);
            flood.resolve_alarm(slot, claimed, now);
            if claimed {
                Verdict::Allow
            } else {
                tracing::info!(source = %alarm.source, count, "Flood detected, suppressing");
                Verdict::RateLimited
            }
        }
    }
}
