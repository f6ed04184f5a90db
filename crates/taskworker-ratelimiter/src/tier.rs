//! The five independently-configured admission tiers (spec §4.2).

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tier {
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

impl Tier {
    pub const ALL: [Tier; 5] = [Tier::Minute, Tier::Hour, Tier::Day, Tier::Week, Tier::Month];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Minute => "minute",
            Tier::Hour => "hour",
            Tier::Day => "day",
            Tier::Week => "week",
            Tier::Month => "month",
        }
    }

    /// Minute and hour are tracked with in-memory counters; day/week/month
    /// persist through the durable store (spec §4.2 "Concurrency").
    pub fn is_in_memory(&self) -> bool {
        matches!(self, Tier::Minute | Tier::Hour)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selects how a tier's window boundaries are computed (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// The window is the trailing duration ending now.
    Rolling,
    /// The window is calendar-aligned; the counter resets on rollover.
    Fixed,
}

/// Per-tier configuration: a limit of `0` disables the tier entirely.
#[derive(Debug, Clone, Copy)]
pub struct TierLimits {
    pub minute: u64,
    pub hour: u64,
    pub day: u64,
    pub week: u64,
    pub month: u64,
}

impl TierLimits {
    pub fn get(&self, tier: Tier) -> u64 {
        match tier {
            Tier::Minute => self.minute,
            Tier::Hour => self.hour,
            Tier::Day => self.day,
            Tier::Week => self.week,
            Tier::Month => self.month,
        }
    }

    pub fn enabled_tiers(&self) -> impl Iterator<Item = Tier> + '_ {
        Tier::ALL.into_iter().filter(|t| self.get(*t) > 0)
    }
}
