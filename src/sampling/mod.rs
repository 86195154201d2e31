//! Ingestion sampling and noise filtering.
//!
//! Sampling happens before a record is built: one per-mille draw for every
//! beacon, and for resource beacons a second, independent draw. The
//! effective resource rate is the product of both.

pub mod pattern;

pub use pattern::NoiseFilter;

use crate::core::config::CaptureConfig;
use crate::core::MetricKind;
use rand::Rng;

/// Sampling decision result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingDecision {
    /// Build and submit the record
    Keep,
    /// Acknowledge the beacon without capturing it
    Drop,
}

/// Per-mille head sampler
#[derive(Debug, Clone, Copy)]
pub struct Sampler {
    page_permille: u16,
    resource_permille: u16,
}

impl Sampler {
    pub fn new(page_permille: u16, resource_permille: u16) -> Self {
        Self {
            page_permille: page_permille.min(1000),
            resource_permille: resource_permille.min(1000),
        }
    }

    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(config.page_sample_permille, config.resource_sample_permille)
    }

    /// Decide using the thread-local RNG
    pub fn decide(&self, kind: MetricKind) -> SamplingDecision {
        self.decide_with(kind, &mut rand::thread_rng())
    }

    /// Decide using a caller-supplied RNG
    pub fn decide_with<R: Rng + ?Sized>(&self, kind: MetricKind, rng: &mut R) -> SamplingDecision {
        if !draw(self.page_permille, rng) {
            return SamplingDecision::Drop;
        }
        if kind.is_resource() && !draw(self.resource_permille, rng) {
            return SamplingDecision::Drop;
        }
        SamplingDecision::Keep
    }
}

#[inline]
fn draw<R: Rng + ?Sized>(permille: u16, rng: &mut R) -> bool {
    match permille {
        0 => false,
        1000..=u16::MAX => true,
        rate => rng.gen_range(0..1000) < rate,
    }
}
