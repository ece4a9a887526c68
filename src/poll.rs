// Copyright 2026 The lumen authors
// Licensed under the MIT and Apache-2.0 licenses.

use crate::{Identifier, NodeId, Parameters, Threshold};
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

/// Collects the responses to one query round on behalf of a driver.
///
/// The driver samples peers, sends them a query, and feeds each response in
/// as it arrives. Responses from peers that weren't sampled, or that already
/// answered, are dropped. The poll is finished once everyone answered or
/// once more answers can't change the outcome: some choice already holds
/// `alpha_confidence` votes, or no choice could reach `alpha_preference` even
/// if every outstanding peer voted for it. A driver whose timer expires just
/// calls `finish` with whatever arrived.
#[derive(Clone, Debug)]
pub struct Poll {
    sampled: BTreeSet<NodeId>,
    responded: BTreeSet<NodeId>,
    threshold: Threshold,
}

impl Poll {
    pub fn new<I: IntoIterator<Item = NodeId>>(sampled: I, params: &Parameters) -> Self {
        Poll {
            sampled: sampled.into_iter().collect(),
            responded: BTreeSet::new(),
            threshold: params.threshold(),
        }
    }

    /// Returns false if the response was dropped.
    pub fn record_response(&mut self, node: NodeId, choice: Identifier) -> bool {
        if !self.sampled.contains(&node) || !self.responded.insert(node) {
            trace!("dropping response from {:?}", node);
            return false;
        }
        self.threshold.add_vote(node, choice);
        true
    }

    /// A peer answered without preferring anything we asked about.
    pub fn record_abstention(&mut self, node: NodeId) -> bool {
        self.sampled.contains(&node) && self.responded.insert(node)
    }

    pub fn outstanding(&self) -> usize {
        self.sampled.len() - self.responded.len()
    }

    pub fn is_finished(&self) -> bool {
        let outstanding = self.outstanding();
        if outstanding == 0 {
            return true;
        }
        if self.threshold.check_confidence().is_some() {
            return true;
        }
        let best = self.threshold.get_leader().map_or(0, |(_, count)| count);
        (best as usize + outstanding) < self.threshold.alpha_preference() as usize
    }

    /// Finished with answers still outstanding.
    pub fn early_terminated(&self) -> bool {
        self.outstanding() > 0 && self.is_finished()
    }

    /// The tally, ready for `record_poll`.
    pub fn finish(self) -> BTreeMap<Identifier, u32> {
        self.threshold
            .choices()
            .map(|choice| (choice, self.threshold.get_vote_count(&choice)))
            .collect()
    }
}
