//! Grouping of pending requests into submission slots.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::config::{MAX_ALPHAS_PER_SLOT, MIN_ALPHAS_PER_SLOT};
use crate::manifest::ManifestEntry;

/// One submission unit: a single job for one entry, a multi-job otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    /// Position of the slot in packing order, for logs.
    pub index: usize,
    pub entries: Vec<ManifestEntry>,
}

impl Slot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_multi(&self) -> bool {
        self.entries.len() > 1
    }

    pub fn fingerprints(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|entry| entry.fingerprint.clone())
            .collect()
    }
}

/// How a manifest ended up being packed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackMode {
    Single,
    Multi(usize),
}

/// Packing request: desired fan-in and the threshold below which multi mode is skipped.
#[derive(Debug, Clone, Copy)]
pub struct PackPlan {
    pub fan_in: Option<usize>,
    pub min_multi_batch: usize,
}

impl PackPlan {
    pub fn single() -> Self {
        Self {
            fan_in: None,
            min_multi_batch: 0,
        }
    }

    pub fn multi(fan_in: usize, min_multi_batch: usize) -> Self {
        Self {
            fan_in: Some(fan_in),
            min_multi_batch,
        }
    }
}

/// Decide the effective mode for a pending set.
pub fn effective_mode(pending: &[ManifestEntry], plan: PackPlan) -> PackMode {
    let fan_in = match plan.fan_in {
        None | Some(0) | Some(1) => return PackMode::Single,
        Some(k) => k,
    };
    if pending.iter().any(|entry| entry.request.is_super()) {
        warn!("Multi-simulation is not supported for SUPER alphas; using single simulations for the whole manifest");
        return PackMode::Single;
    }
    if pending.len() < plan.min_multi_batch {
        warn!(
            "Only {} pending alphas (< {}); single simulations will be used instead of multi-simulations",
            pending.len(),
            plan.min_multi_batch
        );
        return PackMode::Single;
    }
    PackMode::Multi(fan_in.clamp(MIN_ALPHAS_PER_SLOT, MAX_ALPHAS_PER_SLOT))
}

/// Split pending entries into slots, preserving input order.
pub fn pack(pending: Vec<ManifestEntry>, plan: PackPlan) -> (PackMode, Vec<Slot>) {
    let mode = effective_mode(&pending, plan);
    let size = match mode {
        PackMode::Single => 1,
        PackMode::Multi(k) => k,
    };

    let mut slots = Vec::with_capacity((pending.len() + size - 1) / size);
    let mut iter = pending.into_iter().peekable();
    while iter.peek().is_some() {
        let index = slots.len();
        let entries: Vec<ManifestEntry> = iter.by_ref().take(size).collect();
        slots.push(Slot { index, entries });
    }

    info!("Packed into {} slots ({:?})", slots.len(), mode);
    (mode, slots)
}

/// Shuffle pending entries before packing, reproducibly for a given seed.
pub fn shuffle_pending(pending: &mut [ManifestEntry], seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    pending.shuffle(&mut rng);
}
