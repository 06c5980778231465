//! Tier selection: which stored resolution answers a query, how many records
//! it may return and how far raw results are thinned out.
//!
//! Decisions come from small lookup tables keyed by span bucket and client
//! profile so they can be tuned without touching the selection logic.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Error, Result};
use serde::{Deserialize, Serialize};

use crate::period::DAY_MS;
use crate::range::QueryRange;
use crate::EpochMillis;

// ---

/// Resolution level of stored data, finest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Raw,
    Hourly,
    Daily,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Raw => "raw",
            Tier::Hourly => "hourly",
            Tier::Daily => "daily",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Mobile,
    #[default]
    Desktop,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Slow,
    #[default]
    Fast,
}

impl FromStr for DeviceClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mobile" => Ok(DeviceClass::Mobile),
            "desktop" => Ok(DeviceClass::Desktop),
            other => Err(anyhow!("unknown device class: {}", other)),
        }
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "slow" => Ok(Network::Slow),
            "fast" => Ok(Network::Fast),
            other => Err(anyhow!("unknown network class: {}", other)),
        }
    }
}

/// Coarse estimate of what the client can render and download.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientProfile {
    pub device: DeviceClass,
    pub network: Network,
}

/// Row of the stride/cap tables a profile maps to. A slow network dominates
/// the device class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProfileClass {
    Constrained,
    Mobile,
    Desktop,
}

impl ClientProfile {
    // ---
    pub fn new(device: DeviceClass, network: Network) -> Self {
        Self { device, network }
    }

    pub fn is_constrained(&self) -> bool {
        self.network == Network::Slow
    }

    fn class(&self) -> ProfileClass {
        match (self.network, self.device) {
            (Network::Slow, _) => ProfileClass::Constrained,
            (Network::Fast, DeviceClass::Mobile) => ProfileClass::Mobile,
            (Network::Fast, DeviceClass::Desktop) => ProfileClass::Desktop,
        }
    }
}

/// `(span strictly greater than days, stride)` steps, largest span first,
/// followed by the stride for anything shorter.
struct StrideTable {
    steps: &'static [(i64, usize)],
    floor: usize,
}

const CONSTRAINED_STRIDES: StrideTable = StrideTable {
    steps: &[(365, 60), (180, 30), (30, 20)],
    floor: 10,
};

const MOBILE_STRIDES: StrideTable = StrideTable {
    steps: &[(365, 60), (180, 30), (60, 15), (30, 10)],
    floor: 5,
};

const DESKTOP_STRIDES: StrideTable = StrideTable {
    steps: &[(365, 30), (180, 15), (60, 10), (30, 5)],
    floor: 2,
};

/// Record caps for spans of at most 28 days, at most 180 days, and longer.
const CONSTRAINED_CAPS: [usize; 3] = [5_000, 10_000, 15_000];
const MOBILE_CAPS: [usize; 3] = [8_000, 20_000, 30_000];
const DESKTOP_CAPS: [usize; 3] = [15_000, 40_000, 60_000];

impl StrideTable {
    fn lookup(&self, span_days: i64) -> usize {
        self.steps
            .iter()
            .find(|(over, _)| span_days > *over)
            .map(|(_, stride)| *stride)
            .unwrap_or(self.floor)
    }
}

/// Thresholds for tier selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierPolicy {
    // ---
    /// Queries starting further back than this are served from dailies.
    pub long_horizon_days: u32,
    /// Spans longer than this are served from hourlies.
    pub medium_span_days: u32,
    /// Size of the most-recent-N view.
    pub latest_count: usize,
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self {
            long_horizon_days: 60,
            medium_span_days: 4,
            latest_count: 7,
        }
    }
}

impl TierPolicy {
    // ---
    /// Raw sampling stride for a span and profile; never below 1.
    pub fn raw_stride(&self, span_days: i64, profile: &ClientProfile) -> usize {
        // ---
        if span_days <= 1 {
            return 1;
        }
        let table = match profile.class() {
            ProfileClass::Constrained => &CONSTRAINED_STRIDES,
            ProfileClass::Mobile => &MOBILE_STRIDES,
            ProfileClass::Desktop => &DESKTOP_STRIDES,
        };
        table.lookup(span_days).max(1)
    }

    pub fn record_cap(&self, span_days: i64, profile: &ClientProfile) -> usize {
        // ---
        let caps = match profile.class() {
            ProfileClass::Constrained => CONSTRAINED_CAPS,
            ProfileClass::Mobile => MOBILE_CAPS,
            ProfileClass::Desktop => DESKTOP_CAPS,
        };
        match span_days {
            d if d <= 28 => caps[0],
            d if d <= 180 => caps[1],
            _ => caps[2],
        }
    }

    /// Stride when `tier` serves the range; aggregates are never thinned.
    pub fn stride_for(&self, tier: Tier, span_days: i64, profile: &ClientProfile) -> usize {
        match tier {
            Tier::Raw => self.raw_stride(span_days, profile),
            Tier::Hourly | Tier::Daily => 1,
        }
    }
}

/// The selector's answer for one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierPlan {
    // ---
    pub tier: Tier,
    pub record_cap: usize,
    pub sampling_stride: usize,
    /// Most-recent-N view, served by a live subscription.
    pub live: bool,
    /// Tiers to try, in order, if the preferred one returns nothing.
    pub fallbacks: Vec<Tier>,
}

#[derive(Debug, Clone, Default)]
pub struct TierSelector {
    policy: TierPolicy,
}

impl TierSelector {
    // ---
    pub fn new(policy: TierPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &TierPolicy {
        &self.policy
    }

    pub fn select(&self, range: &QueryRange, profile: &ClientProfile, now: EpochMillis) -> TierPlan {
        // ---
        let span_days = range.span_days();

        if span_days == 0 {
            return TierPlan {
                tier: Tier::Raw,
                record_cap: self.policy.latest_count,
                sampling_stride: 1,
                live: true,
                fallbacks: Vec::new(),
            };
        }

        let horizon = now - i64::from(self.policy.long_horizon_days) * DAY_MS;
        let (tier, fallbacks) = if range.start < horizon {
            (Tier::Daily, vec![Tier::Hourly, Tier::Raw])
        } else if span_days > i64::from(self.policy.medium_span_days) {
            (Tier::Hourly, vec![Tier::Raw])
        } else {
            (Tier::Raw, Vec::new())
        };

        TierPlan {
            tier,
            record_cap: self.policy.record_cap(span_days, profile),
            sampling_stride: self.policy.stride_for(tier, span_days, profile),
            live: false,
            fallbacks,
        }
    }
}
