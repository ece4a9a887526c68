// Copyright 2026 The lumen authors
// Licensed under the MIT and Apache-2.0 licenses.

use serde::{Deserialize, Serialize};

/// Diagnostic counters. Every engine returns one of these by value from
/// `health_check`; reading it has no effect on the engine. Counters that
/// don't apply to an engine (conflict sets, for the chain engine) stay zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Health {
    pub items_added: u64,
    pub items_accepted: u64,
    pub items_rejected: u64,
    pub polls_processed: u64,
    pub conflict_sets_formed: u64,
    pub conflict_sets_resolved: u64,
    /// Items still awaiting a decision.
    pub processing: u64,
}

impl Health {
    pub fn items_finalized(&self) -> u64 {
        self.items_accepted + self.items_rejected
    }
}
