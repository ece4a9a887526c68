// Copyright 2026 The lumen authors
// Licensed under the MIT and Apache-2.0 licenses.

use crate::{
    Confidence, ConfidenceKind, ConfigError, Sampler, SamplerKind, Threshold, ThresholdKind,
    ValidatorSet,
};
use serde::{Deserialize, Serialize};

/// Tunables shared by every engine. `k` validators are sampled per poll; a
/// choice with `alpha_preference` of their votes becomes preferred, one with
/// `alpha_confidence` counts as a successful round, and `beta` successful
/// rounds in a row finalize it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    pub k: u32,
    pub alpha_preference: u32,
    pub alpha_confidence: u32,
    pub beta: u32,
    pub sampler: SamplerKind,
    pub threshold: ThresholdKind,
    pub confidence: ConfidenceKind,
    /// Early terminations an item may accumulate before the unary sampler
    /// halves `k` for it.
    pub early_termination_threshold: u32,
    /// Fraction of validators whose finality notices make an item
    /// network-final.
    pub quorum_threshold: f64,
}

impl Default for Parameters {
    fn default() -> Self {
        Parameters {
            k: 21,
            alpha_preference: 13,
            alpha_confidence: 18,
            beta: 8,
            sampler: SamplerKind::Binary,
            threshold: ThresholdKind::Dynamic,
            confidence: ConfidenceKind::Binary,
            early_termination_threshold: 4,
            quorum_threshold: 0.67,
        }
    }
}

impl Parameters {
    pub fn mainnet() -> Self {
        Parameters::default()
    }

    /// For a handful of local nodes.
    pub fn local() -> Self {
        Parameters {
            k: 5,
            alpha_preference: 3,
            alpha_confidence: 4,
            beta: 3,
            ..Parameters::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.k == 0 {
            return Err(ConfigError::ZeroK);
        }
        if self.beta == 0 {
            return Err(ConfigError::ZeroBeta);
        }
        if self.alpha_preference == 0 {
            return Err(ConfigError::AlphaPreferenceZero);
        }
        if self.threshold == ThresholdKind::Dynamic
            && self.alpha_preference > self.alpha_confidence
        {
            return Err(ConfigError::AlphaOrder {
                preference: self.alpha_preference,
                confidence: self.alpha_confidence,
            });
        }
        let alpha = self.effective_alpha_confidence();
        if alpha > self.k {
            return Err(ConfigError::AlphaExceedsK { alpha, k: self.k });
        }
        if !(self.quorum_threshold > 0.0 && self.quorum_threshold <= 1.0) {
            return Err(ConfigError::InvalidQuorumThreshold(self.quorum_threshold));
        }
        Ok(())
    }

    /// `validate`, plus a check that the confidence bar is reachable with
    /// the validators actually present.
    pub fn validate_for(&self, validators: &ValidatorSet) -> Result<(), ConfigError> {
        self.validate()?;
        let alpha = self.effective_alpha_confidence();
        if alpha as usize > validators.len() {
            return Err(ConfigError::AlphaExceedsValidators {
                alpha,
                validators: validators.len(),
            });
        }
        Ok(())
    }

    // The static threshold has a single alpha; `alpha_preference` is it.
    fn effective_alpha_confidence(&self) -> u32 {
        match self.threshold {
            ThresholdKind::Static => self.alpha_preference,
            ThresholdKind::Dynamic => self.alpha_confidence,
        }
    }

    pub fn sampler(&self, seed: u64) -> Sampler {
        Sampler::new(
            self.sampler,
            self.k as usize,
            self.early_termination_threshold,
            seed,
        )
    }

    pub fn threshold(&self) -> Threshold {
        match self.threshold {
            ThresholdKind::Static => Threshold::new_static(self.alpha_preference),
            ThresholdKind::Dynamic => {
                Threshold::new_dynamic(self.alpha_preference, self.alpha_confidence)
            }
        }
    }

    pub fn confidence(&self) -> Confidence {
        Confidence::new(self.confidence, self.beta)
    }
}
