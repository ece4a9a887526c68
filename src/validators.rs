// Copyright 2026 The lumen authors
// Licensed under the MIT and Apache-2.0 licenses.

use crate::NodeId;
use im::OrdMap;
use serde::{Deserialize, Serialize};

/// A read-only snapshot of validator membership, `{NodeId -> weight}`.
///
/// Membership is owned by whatever tracks stake outside this crate; the
/// engines are handed a snapshot per polling round. Cloning is cheap (the map
/// is persistent and shares structure) so a driver can keep the last snapshot
/// around while building the next one.
///
/// Weight is carried along but not used for vote counting: every sampled
/// validator counts once.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSet {
    weights: OrdMap<NodeId, u64>,
}

impl ValidatorSet {
    /// Zero-weight entries are dropped; a repeated node keeps its last weight.
    pub fn new<I: IntoIterator<Item = (NodeId, u64)>>(validators: I) -> Self {
        let weights = validators
            .into_iter()
            .filter(|(_, weight)| *weight > 0)
            .collect();
        ValidatorSet { weights }
    }

    /// `n` validators of weight 1, with ids `1..=n`. Handy for simulations.
    pub fn uniform(n: usize) -> Self {
        ValidatorSet::new((1..=n as u64).map(|i| (NodeId::from_low_u64(i), 1)))
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.weights.contains_key(node)
    }

    pub fn weight_of(&self, node: &NodeId) -> u64 {
        self.weights.get(node).copied().unwrap_or(0)
    }

    pub fn total_weight(&self) -> u64 {
        self.weights.values().sum()
    }

    /// All members in ascending id order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.weights.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &u64)> {
        self.weights.iter()
    }
}
