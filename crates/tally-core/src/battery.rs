//! Battery tier policy
//!
//! Maps state-of-charge onto a coarse power tier with hysteresis, and derives
//! the reporting backoff from the tier.
//!
//! | Tier       | Enter below | Recover above |
//! |------------|-------------|---------------|
//! | Healthy    | -           | > 75 %        |
//! | Conserving | <= 70 %     | > 55 %        |
//! | Critical   | <= 50 %     | > 35 %        |
//! | Survival   | < 30 %      | -             |

use serde::{Deserialize, Serialize};

/// Window either side of an interval boundary in which a connection may start.
pub const ALIGNMENT_TOLERANCE_SECS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum BatteryTier {
    #[default]
    Healthy,
    Conserving,
    Critical,
    Survival,
}

impl BatteryTier {
    /// Tier the charge level falls into when discharging.
    const fn entry_tier(soc: u8) -> Self {
        if soc < 30 {
            Self::Survival
        } else if soc <= 50 {
            Self::Critical
        } else if soc <= 70 {
            Self::Conserving
        } else {
            Self::Healthy
        }
    }

    /// One step toward Healthy if `soc` clears this tier's recovery threshold.
    const fn recovered(self, soc: u8) -> Option<Self> {
        match self {
            Self::Survival if soc > 35 => Some(Self::Critical),
            Self::Critical if soc > 55 => Some(Self::Conserving),
            Self::Conserving if soc > 75 => Some(Self::Healthy),
            _ => None,
        }
    }

    /// Next tier given the current one and a fresh state-of-charge reading.
    ///
    /// Drops happen as soon as an entry threshold is crossed, possibly across
    /// several tiers at once. Recovery only happens above the wider recovery
    /// threshold of each tier.
    pub fn next(self, soc: u8) -> Self {
        let soc = soc.min(100);
        let entered = Self::entry_tier(soc);
        if entered > self {
            return entered;
        }

        let mut tier = self;
        while let Some(up) = tier.recovered(soc) {
            tier = up;
        }
        tier
    }

    /// Reporting interval multiplier for this tier.
    pub const fn multiplier(self) -> u32 {
        match self {
            Self::Healthy => 1,
            Self::Conserving => 2,
            Self::Critical => 4,
            Self::Survival => 12,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Conserving => "conserving",
            Self::Critical => "critical",
            Self::Survival => "survival",
        }
    }
}

/// Base reporting interval stretched by the tier multiplier.
pub fn effective_interval(base_secs: u32, tier: BatteryTier) -> u32 {
    base_secs.saturating_mul(tier.multiplier()).max(1)
}

/// True when `now` sits within [`ALIGNMENT_TOLERANCE_SECS`] of a multiple of
/// `interval` measured from wall-clock zero.
pub fn is_boundary_aligned(now: u32, interval: u32) -> bool {
    if interval == 0 {
        return true;
    }
    let offset = now % interval;
    offset <= ALIGNMENT_TOLERANCE_SECS || offset >= interval.saturating_sub(ALIGNMENT_TOLERANCE_SECS)
}

/// State-of-charge used for tier computation: the test override when present.
pub fn tier_soc(measured: u8, test_override: Option<u8>) -> u8 {
    test_override.unwrap_or(measured).min(100)
}
