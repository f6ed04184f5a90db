//! The result of an admission check (spec §4.2 "Operations").

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::tier::Tier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    pub current: u64,
    pub limit: u64,
    pub reset_at: DateTime<Utc>,
}

impl Usage {
    /// `remaining = max(0, limit - current)` (spec §8 invariant).
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.current)
    }
}

#[derive(Debug, Clone)]
pub enum Decision {
    Allowed {
        usage: HashMap<Tier, Usage>,
    },
    Denied {
        tier: Tier,
        usage: HashMap<Tier, Usage>,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    pub fn usage(&self) -> &HashMap<Tier, Usage> {
        match self {
            Decision::Allowed { usage } => usage,
            Decision::Denied { usage, .. } => usage,
        }
    }
}
