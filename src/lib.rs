// Copyright 2026 The lumen authors
// Licensed under the MIT and Apache-2.0 licenses.

/*!
 * This crate implements the primitives of a family of "metastable" consensus
 * protocols (Avalanche, Snowball, Snowman and friends). Rather than electing a
 * leader or running global broadcast rounds, every node repeatedly asks a
 * small random sample of its peers what they prefer, and becomes more and more
 * confident in a choice each time a large enough fraction of the sample
 * agrees with it. After enough consecutive agreeing rounds the choice is
 * irreversible with overwhelming probability.
 *
 * The pieces are small and composable:
 *
 *   - `Sampler` (photon) picks the `k` peers to ask each round.
 *
 *   - `Threshold` (wave) tallies one round's answers against two bars: a
 *     lower `alpha_preference` that moves what we prefer, and a higher
 *     `alpha_confidence` that counts as a successful round.
 *
 *   - `Confidence` (focus) counts successful rounds on the same choice and
 *     reports when `beta` of them have accumulated.
 *
 *   - `Flare` drives those over a DAG of possibly-conflicting items, one
 *     confidence tracker per conflict set. At most one member of a conflict
 *     set is ever accepted.
 *
 *   - `Beam` drives them over a tree of blocks that must resolve to a single
 *     chain, finalizing strictly ancestor-first.
 *
 *   - `Nova` takes items a node finalized locally and tracks when a quorum of
 *     the network has witnessed the same, which is network finality.
 *
 * Everything here is an explicit state machine behind a lock. Nothing does
 * I/O, keeps timers, or spawns tasks: the embedding driver samples peers,
 * sends queries, collects answers (`Poll` helps with that) and feeds one
 * complete tally per round into `record_poll`. This keeps the core easy to
 * step, inspect and test deterministically, given a seeded `Sampler`.
 *
 * ## Reference
 *
 * Team Rocket, Maofan Yin, Kevin Sekniqi, Robbert van Renesse, Emin Gün
 * Sirer. Scalable and Probabilistic Leaderless BFT Consensus through
 * Metastability. 2019. arXiv:1906.08936
 *
 * https://arxiv.org/abs/1906.08936
 *
 * ## Name
 *
 * Wikipedia:
 *
 * > The lumen (symbol: lm) is the unit of luminous flux, a measure of the
 * > perceived power of visible light emitted by a source
 */

mod beam;
mod error;
mod flare;
mod focus;
mod health;
mod ids;
mod nova;
mod params;
mod photon;
mod poll;
mod validators;
mod wave;

pub use beam::{Beam, Block};
pub use error::{ConfigError, Error, Result};
pub use flare::{Flare, Vertex};
pub use focus::{BinaryConfidence, Confidence, ConfidenceKind, FocusState, UnaryConfidence};
pub use health::Health;
pub use ids::{Identifier, NodeId, Status, ID_LEN, NODE_ID_LEN};
pub use nova::{quorum_size, FinalityNotice, FinalityRecord, Nova, Sender};
pub use params::Parameters;
pub use photon::{Sampler, SamplerKind};
pub use poll::Poll;
pub use validators::ValidatorSet;
pub use wave::{Threshold, ThresholdKind};

#[cfg(test)]
mod testing;
