// Copyright 2026 The lumen authors
// Licensed under the MIT and Apache-2.0 licenses.

use crate::Identifier;

/// Everything a caller can get back from an engine. Apart from `Config`
/// (returned only by constructors) these are all recoverable: the call that
/// produced them had no effect.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("item {0} is already known")]
    DuplicateItem(Identifier),
    #[error("item {0} is already registered")]
    AlreadyRegistered(Identifier),
    #[error("item {0} not found")]
    ItemNotFound(Identifier),
    #[error("item {item} depends on {dependency}, which is not finalized")]
    DependencyNotFinalized {
        item: Identifier,
        dependency: Identifier,
    },
    #[error("verification failed: {0}")]
    VerificationFailed(String),
    #[error("item {0} is not locally finalized")]
    NotLocallyFinalized(Identifier),
    #[error("transport: {0}")]
    Transport(String),
    #[error("invalid parameters: {0}")]
    Config(#[from] ConfigError),
}

/// Parameter combinations an engine refuses to start with.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("k must be > 0")]
    ZeroK,
    #[error("beta must be > 0")]
    ZeroBeta,
    #[error("alpha_preference must be > 0")]
    AlphaPreferenceZero,
    #[error("alpha_preference ({preference}) exceeds alpha_confidence ({confidence})")]
    AlphaOrder { preference: u32, confidence: u32 },
    #[error("alpha ({alpha}) exceeds sample size k ({k})")]
    AlphaExceedsK { alpha: u32, k: u32 },
    #[error("alpha ({alpha}) exceeds validator count ({validators})")]
    AlphaExceedsValidators { alpha: u32, validators: usize },
    #[error("quorum_threshold must be in (0, 1], got {0}")]
    InvalidQuorumThreshold(f64),
}

pub type Result<T> = std::result::Result<T, Error>;
