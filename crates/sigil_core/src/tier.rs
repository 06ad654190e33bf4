//! Capability and quality tiers.
//!
//! A [`CapabilityTier`] is the hardware/API feature level a permutation is
//! built for; a [`QualityTier`] is the user-selected shading preset. Both are
//! small closed enums so per-tier state lives in fixed arrays ([`TierMap`]).

use std::fmt;
use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

/// Target hardware feature level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CapabilityTier {
    /// Tile-based mobile GPUs.
    Mobile,
    /// Baseline desktop feature level.
    Desktop,
    /// Desktop with ray tracing / mesh shading class features.
    HighEnd,
}

impl CapabilityTier {
    pub const COUNT: usize = 3;
    pub const ALL: [Self; Self::COUNT] = [Self::Mobile, Self::Desktop, Self::HighEnd];

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Mobile => "Mobile",
            Self::Desktop => "Desktop",
            Self::HighEnd => "HighEnd",
        }
    }
}

impl Default for CapabilityTier {
    #[inline]
    fn default() -> Self {
        Self::Desktop
    }
}

impl fmt::Display for CapabilityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// User-selectable shading quality preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QualityTier {
    Low,
    Medium,
    High,
    Epic,
}

impl QualityTier {
    pub const COUNT: usize = 4;
    pub const ALL: [Self; Self::COUNT] = [Self::Low, Self::Medium, Self::High, Self::Epic];

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::Epic => "Epic",
        }
    }
}

impl Default for QualityTier {
    #[inline]
    fn default() -> Self {
        Self::High
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed-size storage with one slot per [`CapabilityTier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierMap<T> {
    slots: [T; CapabilityTier::COUNT],
}

impl<T: Default> Default for TierMap<T> {
    fn default() -> Self {
        Self {
            slots: std::array::from_fn(|_| T::default()),
        }
    }
}

impl<T> TierMap<T> {
    /// Builds a map by calling `f` once per tier.
    pub fn from_fn(mut f: impl FnMut(CapabilityTier) -> T) -> Self {
        Self {
            slots: std::array::from_fn(|i| f(CapabilityTier::ALL[i])),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (CapabilityTier, &T)> {
        CapabilityTier::ALL.into_iter().zip(self.slots.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (CapabilityTier, &mut T)> {
        CapabilityTier::ALL.into_iter().zip(self.slots.iter_mut())
    }
}

impl<T> Index<CapabilityTier> for TierMap<T> {
    type Output = T;

    #[inline]
    fn index(&self, tier: CapabilityTier) -> &T {
        &self.slots[tier.index()]
    }
}

impl<T> IndexMut<CapabilityTier> for TierMap<T> {
    #[inline]
    fn index_mut(&mut self, tier: CapabilityTier) -> &mut T {
        &mut self.slots[tier.index()]
    }
}
