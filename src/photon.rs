// Copyright 2026 The lumen authors
// Licensed under the MIT and Apache-2.0 licenses.

//! Peer sampling: pick `k` validators uniformly at random, without
//! replacement, for the next poll.

use crate::{Identifier, NodeId, ValidatorSet};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::trace;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SamplerKind {
    /// Every call samples `k` independently.
    Binary,
    /// Items that keep terminating polls early get sampled at `k/2`.
    Unary,
}

#[derive(Clone, Debug)]
enum Mode {
    Binary,
    Unary {
        threshold: u32,
        early_terminations: HashMap<Identifier, u32>,
    },
}

/// `Sampler` is the only randomized piece of the crate, and the randomness is
/// always injected: tests pass a fixed seed, production uses `from_time`.
#[derive(Clone, Debug)]
pub struct Sampler {
    k: usize,
    mode: Mode,
    rng: StdRng,
}

impl Sampler {
    pub fn new(kind: SamplerKind, k: usize, early_termination_threshold: u32, seed: u64) -> Self {
        let mode = match kind {
            SamplerKind::Binary => Mode::Binary,
            SamplerKind::Unary => Mode::Unary {
                threshold: early_termination_threshold,
                early_terminations: HashMap::new(),
            },
        };
        Sampler {
            k,
            mode,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Seeds from the wall clock.
    pub fn from_time(kind: SamplerKind, k: usize, early_termination_threshold: u32) -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        Sampler::new(kind, k, early_termination_threshold, seed)
    }

    pub fn kind(&self) -> SamplerKind {
        match self.mode {
            Mode::Binary => SamplerKind::Binary,
            Mode::Unary { .. } => SamplerKind::Unary,
        }
    }

    pub fn get_k(&self) -> usize {
        self.k
    }

    /// The sample size to use when polling about `item`. Always `k` for the
    /// binary sampler; for the unary one, `k/2` (at least 1) once the item
    /// has terminated more than the configured number of polls early.
    pub fn k_for(&self, item: &Identifier) -> usize {
        match &self.mode {
            Mode::Binary => self.k,
            Mode::Unary {
                threshold,
                early_terminations,
            } => {
                let seen = early_terminations.get(item).copied().unwrap_or(0);
                if seen > *threshold && self.k > 0 {
                    (self.k / 2).max(1)
                } else {
                    self.k
                }
            }
        }
    }

    /// Samples `min(k, |validators|)` distinct members.
    pub fn sample(&mut self, validators: &ValidatorSet) -> Vec<NodeId> {
        let k = self.k;
        self.sample_n(validators, k)
    }

    /// Like `sample`, but sized by `k_for(item)`.
    pub fn sample_for(&mut self, item: &Identifier, validators: &ValidatorSet) -> Vec<NodeId> {
        let k = self.k_for(item);
        self.sample_n(validators, k)
    }

    fn sample_n(&mut self, validators: &ValidatorSet, k: usize) -> Vec<NodeId> {
        let mut pool = validators.node_ids();
        let n = k.min(pool.len());
        if n == 0 {
            return Vec::new();
        }
        // partial_shuffle runs the first n steps of a Fisher-Yates shuffle.
        let (chosen, _) = pool.partial_shuffle(&mut self.rng, n);
        trace!("sampled {} of {} validators", n, validators.len());
        chosen.to_vec()
    }

    /// No-op for the binary sampler.
    pub fn record_early_termination(&mut self, item: &Identifier) {
        if let Mode::Unary {
            early_terminations, ..
        } = &mut self.mode
        {
            *early_terminations.entry(*item).or_insert(0) += 1;
        }
    }

    pub fn reset(&mut self) {
        if let Mode::Unary {
            early_terminations, ..
        } = &mut self.mode
        {
            early_terminations.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn sample_is_bounded_and_distinct() {
        let vs = ValidatorSet::uniform(10);
        let mut s = Sampler::new(SamplerKind::Binary, 4, 0, 7);
        let got = s.sample(&vs);
        assert_eq!(got.len(), 4);
        let uniq: BTreeSet<_> = got.iter().collect();
        assert_eq!(uniq.len(), 4);
        assert!(got.iter().all(|n| vs.contains(n)));

        let mut big = Sampler::new(SamplerKind::Binary, 50, 0, 7);
        assert_eq!(big.sample(&vs).len(), 10);
    }

    #[test]
    fn empty_inputs_give_empty_samples() {
        let mut s = Sampler::new(SamplerKind::Binary, 0, 0, 1);
        assert!(s.sample(&ValidatorSet::uniform(5)).is_empty());
        let mut s = Sampler::new(SamplerKind::Binary, 5, 0, 1);
        assert!(s.sample(&ValidatorSet::default()).is_empty());
    }

    #[test]
    fn same_seed_same_sample() {
        let vs = ValidatorSet::uniform(30);
        let mut a = Sampler::new(SamplerKind::Binary, 8, 0, 42);
        let mut b = Sampler::new(SamplerKind::Binary, 8, 0, 42);
        assert_eq!(a.sample(&vs), b.sample(&vs));
        assert_eq!(a.sample(&vs), b.sample(&vs));
    }

    #[test]
    fn unary_halves_k_after_threshold() {
        let item = Identifier::from_low_u64(1);
        let other = Identifier::from_low_u64(2);
        let mut s = Sampler::new(SamplerKind::Unary, 20, 2, 3);
        s.record_early_termination(&item);
        s.record_early_termination(&item);
        assert_eq!(s.k_for(&item), 20);
        s.record_early_termination(&item);
        assert_eq!(s.k_for(&item), 10);
        assert_eq!(s.k_for(&other), 20);
        assert_eq!(s.sample_for(&item, &ValidatorSet::uniform(30)).len(), 10);
        s.reset();
        assert_eq!(s.k_for(&item), 20);
    }

    #[test]
    fn unary_halving_never_reaches_zero() {
        let item = Identifier::from_low_u64(1);
        let mut s = Sampler::new(SamplerKind::Unary, 1, 0, 3);
        s.record_early_termination(&item);
        assert_eq!(s.k_for(&item), 1);
    }

    #[test]
    fn time_seeded_sampler_still_samples() {
        let mut s = Sampler::from_time(SamplerKind::Unary, 3, 1);
        assert_eq!(s.get_k(), 3);
        assert_eq!(s.kind(), SamplerKind::Unary);
        assert_eq!(s.sample(&ValidatorSet::uniform(8)).len(), 3);
    }

    #[test]
    fn binary_ignores_early_terminations() {
        let item = Identifier::from_low_u64(1);
        let mut s = Sampler::new(SamplerKind::Binary, 6, 0, 3);
        for _ in 0..10 {
            s.record_early_termination(&item);
        }
        assert_eq!(s.k_for(&item), 6);
        assert_eq!(s.kind(), SamplerKind::Binary);
    }
}
