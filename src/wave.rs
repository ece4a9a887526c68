// Copyright 2026 The lumen authors
// Licensed under the MIT and Apache-2.0 licenses.

//! Vote tallying for a single polling round.
//!
//! A `Threshold` counts votes per choice and answers two questions: did some
//! choice gather enough votes to become *preferred* (`alpha_preference`), and
//! did some choice gather enough to count as a *successful* poll for
//! confidence purposes (`alpha_confidence`)? The static variant uses one alpha
//! for both; the dynamic (decoupled) variant tunes them independently, with
//! `alpha_preference <= alpha_confidence`.
//!
//! Votes never carry over between rounds: the owner calls `reset` before
//! feeding each new poll.

use crate::{Identifier, NodeId};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThresholdKind {
    Static,
    Dynamic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Alphas {
    Static(u32),
    Dynamic { preference: u32, confidence: u32 },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
struct Tally {
    voters: BTreeSet<NodeId>,
    // Votes added by count rather than by voter; see `add_votes`.
    anonymous: u32,
}

impl Tally {
    fn count(&self) -> u32 {
        (self.voters.len() as u32).saturating_add(self.anonymous)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Threshold {
    alphas: Alphas,
    votes: BTreeMap<Identifier, Tally>,
    total_votes: u32,
}

impl Threshold {
    pub fn new_static(alpha: u32) -> Self {
        Threshold {
            alphas: Alphas::Static(alpha),
            votes: BTreeMap::new(),
            total_votes: 0,
        }
    }

    pub fn new_dynamic(alpha_preference: u32, alpha_confidence: u32) -> Self {
        Threshold {
            alphas: Alphas::Dynamic {
                preference: alpha_preference,
                confidence: alpha_confidence,
            },
            votes: BTreeMap::new(),
            total_votes: 0,
        }
    }

    pub fn kind(&self) -> ThresholdKind {
        match self.alphas {
            Alphas::Static(_) => ThresholdKind::Static,
            Alphas::Dynamic { .. } => ThresholdKind::Dynamic,
        }
    }

    pub fn alpha_preference(&self) -> u32 {
        match self.alphas {
            Alphas::Static(alpha) => alpha,
            Alphas::Dynamic { preference, .. } => preference,
        }
    }

    pub fn alpha_confidence(&self) -> u32 {
        match self.alphas {
            Alphas::Static(alpha) => alpha,
            Alphas::Dynamic { confidence, .. } => confidence,
        }
    }

    /// The bar `add_vote` reports against: the confidence alpha (which is
    /// just `alpha` for the static variant).
    pub fn get_threshold(&self) -> u32 {
        self.alpha_confidence()
    }

    /// Counts `node`'s vote for `choice`, at most once per choice per round,
    /// and returns whether `choice` now meets `get_threshold()`.
    pub fn add_vote(&mut self, node: NodeId, choice: Identifier) -> bool {
        let tally = self.votes.entry(choice).or_default();
        if tally.voters.insert(node) {
            self.total_votes = self.total_votes.saturating_add(1);
            trace!("vote {:?} -> {:?}", node, choice);
        }
        tally.count() >= self.get_threshold()
    }

    /// Adds `count` votes for `choice` that aren't attributed to any
    /// particular node. Drivers that already aggregated a poll into counts
    /// feed them in this way.
    pub fn add_votes(&mut self, choice: Identifier, count: u32) -> bool {
        let tally = self.votes.entry(choice).or_default();
        tally.anonymous = tally.anonymous.saturating_add(count);
        self.total_votes = self.total_votes.saturating_add(count);
        tally.count() >= self.get_threshold()
    }

    pub fn get_vote_count(&self, choice: &Identifier) -> u32 {
        self.votes.get(choice).map(Tally::count).unwrap_or(0)
    }

    /// Every choice voted for this round, in id order.
    pub fn choices(&self) -> impl Iterator<Item = Identifier> + '_ {
        self.votes.keys().copied()
    }

    pub fn total_votes(&self) -> u32 {
        self.total_votes
    }

    /// The choice with the most votes, or `None` if nothing was voted for.
    /// Ties go to the lowest `Identifier`, so the answer doesn't depend on
    /// the order votes arrived in.
    pub fn get_leader(&self) -> Option<(Identifier, u32)> {
        self.votes
            .iter()
            .map(|(choice, tally)| (*choice, tally.count()))
            .filter(|(_, count)| *count > 0)
            .min_by_key(|(choice, count)| (Reverse(*count), *choice))
    }

    fn best_meeting(&self, bar: u32) -> Option<(Identifier, u32)> {
        self.get_leader().filter(|(_, count)| *count >= bar)
    }

    /// Some choice (the leader, if any does) meeting `alpha_preference`.
    pub fn check_preference(&self) -> Option<(Identifier, u32)> {
        self.best_meeting(self.alpha_preference())
    }

    /// Some choice (the leader, if any does) meeting `alpha_confidence`.
    pub fn check_confidence(&self) -> Option<(Identifier, u32)> {
        self.best_meeting(self.alpha_confidence())
    }

    pub fn reset(&mut self) {
        self.votes.clear();
        self.total_votes = 0;
    }
}
