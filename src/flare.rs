// Copyright 2026 The lumen authors
// Licensed under the MIT and Apache-2.0 licenses.

//! DAG consensus over items that may conflict with one another.
//!
//! Every processing item belongs to exactly one conflict set. An item with
//! no known conflicts is *virtuous* and sits alone in a trivial set whose id
//! is its own id. When a new item conflicts with existing ones their sets are
//! merged (membership only ever grows by merging) and everyone in the merged
//! set stops being virtuous.
//!
//! Each conflict set carries one confidence tracker. A poll is tallied per
//! set: the set's leader becomes preferred once it meets `alpha_preference`,
//! and the tracker advances when it meets `alpha_confidence`. When the
//! tracker focuses, the leader is accepted and every other member rejected,
//! which is the whole safety story: at most one member of a conflict set is
//! ever accepted.
//!
//! Rejection is contagious: anything built on a rejected item is rejected
//! too. A contended set that loses all but one pending member collapses and
//! that member is virtuous again. Acceptance waits for ancestry: a focused
//! choice whose parents aren't all accepted yet stays pending until they are.
//!
//! Decided items are kept for the engine's lifetime, since spotting a
//! conflict needs the other item's payload. Drivers bound memory by starting
//! a fresh engine, which leaves conflicts with long-accepted state to
//! `Vertex::verify`.

use crate::{Confidence, Error, Health, Identifier, Parameters, Result, Status, ValidatorSet};
use im::OrdSet;
use itertools::Itertools;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, info, trace, warn};

/// What the engine needs from a DAG item. The surrounding VM implements
/// `accept` and `reject` to persist decisions; each fires at most once per
/// item.
pub trait Vertex {
    fn id(&self) -> Identifier;
    fn parents(&self) -> Vec<Identifier>;
    /// Longest-path height; must exceed every parent's.
    fn height(&self) -> u64;
    /// Self-contained validity check.
    fn verify(&self) -> Result<()>;
    /// Whether the two items' payloads are mutually exclusive, eg. they
    /// spend a common input.
    fn conflicts_with(&self, other: &Self) -> bool;
    fn accept(&mut self) {}
    fn reject(&mut self) {}
}

struct Entry<V> {
    vertex: V,
    status: Status,
    queries: u64,
}

struct ConflictSet {
    members: BTreeSet<Identifier>,
    leader: Option<Identifier>,
    confidence: Confidence,
}

struct State<V> {
    params: Parameters,
    entries: HashMap<Identifier, Entry<V>>,
    children: HashMap<Identifier, BTreeSet<Identifier>>,
    missing: BTreeSet<Identifier>,
    // Conflict-set id of every processing item.
    set_of: HashMap<Identifier, Identifier>,
    sets: BTreeMap<Identifier, ConflictSet>,
    preferred: OrdSet<Identifier>,
    virtuous: OrdSet<Identifier>,
    health: Health,
}

fn as_verification_failure(e: Error) -> Error {
    match e {
        Error::VerificationFailed(_) => e,
        other => Error::VerificationFailed(other.to_string()),
    }
}

impl<V: Vertex> State<V> {
    fn status(&self, id: &Identifier) -> Option<Status> {
        self.entries.get(id).map(|e| e.status)
    }

    fn is_processing(&self, id: &Identifier) -> bool {
        self.status(id) == Some(Status::Processing)
    }

    fn add(&mut self, vertex: V) -> Result<()> {
        let id = vertex.id();
        if self.entries.contains_key(&id) {
            return Err(Error::DuplicateItem(id));
        }
        vertex.verify().map_err(as_verification_failure)?;
        let parents = vertex.parents();
        for p in parents.iter() {
            if let Some(parent) = self.entries.get(p) {
                if parent.vertex.height() >= vertex.height() {
                    return Err(Error::VerificationFailed(format!(
                        "height {} does not exceed parent {} at height {}",
                        vertex.height(),
                        p,
                        parent.vertex.height()
                    )));
                }
            }
        }

        let mut conflicting_sets = BTreeSet::new();
        let mut beaten_by = None;
        for (other_id, other) in self.entries.iter() {
            if other.status == Status::Rejected || !vertex.conflicts_with(&other.vertex) {
                continue;
            }
            if other.status == Status::Accepted {
                beaten_by = Some(*other_id);
            } else if let Some(set_id) = self.set_of.get(other_id) {
                conflicting_sets.insert(*set_id);
            }
        }
        let rejected_parent = parents
            .iter()
            .find(|p| self.status(p) == Some(Status::Rejected))
            .copied();

        for p in parents.iter() {
            self.children.entry(*p).or_default().insert(id);
            if !self.entries.contains_key(p) {
                self.missing.insert(*p);
            }
        }
        self.missing.remove(&id);
        self.entries.insert(
            id,
            Entry {
                vertex,
                status: Status::Processing,
                queries: 0,
            },
        );
        self.health.items_added += 1;
        trace!("added {:?} with {} parents", id, parents.len());

        if let Some(winner) = beaten_by {
            info!("{:?} conflicts with accepted {:?}, rejecting", id, winner);
            self.reject_cascade(id);
        } else if let Some(parent) = rejected_parent {
            info!("{:?} builds on rejected {:?}, rejecting", id, parent);
            self.reject_cascade(id);
        } else if conflicting_sets.is_empty() {
            self.sets.insert(
                id,
                ConflictSet {
                    members: std::iter::once(id).collect(),
                    leader: Some(id),
                    confidence: self.params.confidence(),
                },
            );
            self.set_of.insert(id, id);
            self.virtuous.insert(id);
            self.preferred.insert(id);
        } else {
            self.join_conflict(id, conflicting_sets);
        }
        Ok(())
    }

    // Merges every set in `set_ids` into the lowest-numbered one and adds
    // `id` to it. The surviving set keeps its tracker and its leader.
    fn join_conflict(&mut self, id: Identifier, set_ids: BTreeSet<Identifier>) {
        let mut ids = set_ids.into_iter();
        let survivor_id = match ids.next() {
            Some(s) => s,
            None => return,
        };
        let mut survivor = match self.sets.remove(&survivor_id) {
            Some(s) => s,
            None => return,
        };
        let mut was_contended = survivor.members.len() > 1;
        for other_id in ids {
            if let Some(other) = self.sets.remove(&other_id) {
                was_contended |= other.members.len() > 1;
                if let Some(leader) = other.leader {
                    self.preferred.remove(&leader);
                }
                for m in other.members {
                    self.set_of.insert(m, survivor_id);
                    survivor.members.insert(m);
                }
            }
        }
        survivor.members.insert(id);
        self.set_of.insert(id, survivor_id);
        for m in survivor.members.iter() {
            self.virtuous.remove(m);
        }
        if !was_contended {
            self.health.conflict_sets_formed += 1;
        }
        info!(
            "conflict set {:?} now {{{}}}",
            survivor_id,
            survivor.members.iter().map(|m| format!("{:?}", m)).join(", ")
        );
        self.sets.insert(survivor_id, survivor);
    }

    fn has_missing_ancestor(&self, item: &Identifier) -> bool {
        let mut stack = vec![*item];
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            match self.entries.get(&id) {
                None => return true,
                Some(e) if e.status == Status::Accepted => (),
                Some(e) => stack.extend(e.vertex.parents()),
            }
        }
        false
    }

    fn record_poll(&mut self, votes: &BTreeMap<Identifier, u32>) {
        self.health.polls_processed += 1;
        let mut by_set: BTreeMap<Identifier, Vec<(Identifier, u32)>> = BTreeMap::new();
        for (item, count) in votes.iter() {
            match self.status(item) {
                None => {
                    warn!("ignoring {} votes for unknown {:?}", count, item);
                    continue;
                }
                Some(Status::Processing) => (),
                Some(_) => {
                    trace!("ignoring votes for decided {:?}", item);
                    continue;
                }
            }
            if self.has_missing_ancestor(item) {
                debug!("ignoring votes for {:?}: ancestry incomplete", item);
                continue;
            }
            if let Some(set_id) = self.set_of.get(item) {
                by_set.entry(*set_id).or_default().push((*item, *count));
            }
        }
        for (set_id, tally) in by_set {
            self.poll_set(set_id, &tally);
        }
        self.finalize_ready();
    }

    fn poll_set(&mut self, set_id: Identifier, tally: &[(Identifier, u32)]) {
        // An earlier set in the same poll may have rejected some of these.
        let mut threshold = self.params.threshold();
        for (item, count) in tally.iter() {
            if self.set_of.get(item) == Some(&set_id) {
                threshold.add_votes(*item, *count);
            }
        }
        let set = match self.sets.get_mut(&set_id) {
            Some(set) => set,
            None => return,
        };
        let leader = match threshold.get_leader() {
            Some((leader, _)) => leader,
            None => {
                trace!("set {:?}: no votes, failed round", set_id);
                set.confidence.record_poll(false, Identifier::EMPTY);
                return;
            }
        };
        let successful = threshold.check_confidence().is_some();
        let preference = threshold.check_preference().map(|(choice, _)| choice);
        set.confidence.record_poll(successful, leader);
        if let Some(choice) = preference {
            if set.leader != Some(choice) {
                debug!("set {:?} now prefers {:?}", set_id, choice);
                for m in set.members.iter().filter(|m| **m != choice) {
                    self.preferred.remove(m);
                }
            }
            set.leader = Some(choice);
            self.preferred.insert(choice);
        }
        trace!(
            "set {:?}: leader {:?} successful={} confidence={}",
            set_id,
            leader,
            successful,
            set.confidence.get_confidence()
        );
    }

    fn parents_accepted(&self, id: &Identifier) -> bool {
        self.entries.get(id).map_or(false, |e| {
            e.vertex
                .parents()
                .iter()
                .all(|p| self.status(p) == Some(Status::Accepted))
        })
    }

    // Finalizes every focused set whose choice has accepted parents. Each
    // acceptance can unblock a child's set, so this repeats to a fixpoint.
    fn finalize_ready(&mut self) {
        loop {
            let ready = self.sets.iter().find_map(|(set_id, set)| {
                if !set.confidence.is_focused() {
                    return None;
                }
                let winner = set.confidence.get_choice()?;
                if !set.members.contains(&winner) || !self.is_processing(&winner) {
                    return None;
                }
                if !self.parents_accepted(&winner) {
                    trace!("{:?} focused, waiting on its parents", winner);
                    return None;
                }
                Some((*set_id, winner))
            });
            match ready {
                Some((set_id, winner)) => self.finalize(set_id, winner),
                None => break,
            }
        }
    }

    fn finalize(&mut self, set_id: Identifier, winner: Identifier) {
        let set = match self.sets.remove(&set_id) {
            Some(set) => set,
            None => return,
        };
        self.accept(winner);
        for loser in set.members.iter().filter(|m| **m != winner) {
            self.reject_cascade(*loser);
        }
        if set.members.len() > 1 {
            self.health.conflict_sets_resolved += 1;
        }
    }

    fn accept(&mut self, id: Identifier) {
        match self.entries.get_mut(&id) {
            Some(entry) if entry.status == Status::Processing => {
                entry.status = Status::Accepted;
                entry.vertex.accept();
            }
            _ => return,
        }
        self.health.items_accepted += 1;
        self.preferred.remove(&id);
        self.virtuous.remove(&id);
        self.set_of.remove(&id);
        info!("accepted {:?}", id);
    }

    fn reject_cascade(&mut self, root: Identifier) {
        let mut work = vec![root];
        while let Some(id) = work.pop() {
            match self.entries.get_mut(&id) {
                Some(entry) if entry.status == Status::Processing => {
                    entry.status = Status::Rejected;
                    entry.vertex.reject();
                }
                _ => continue,
            }
            self.health.items_rejected += 1;
            self.preferred.remove(&id);
            self.virtuous.remove(&id);
            if let Some(set_id) = self.set_of.remove(&id) {
                self.leave_set(set_id, id);
            }
            if let Some(kids) = self.children.get(&id) {
                work.extend(kids.iter().copied());
            }
            info!("rejected {:?}", id);
        }
    }

    fn leave_set(&mut self, set_id: Identifier, id: Identifier) {
        let remaining = match self.sets.get_mut(&set_id) {
            Some(set) => {
                set.members.remove(&id);
                if set.leader == Some(id) {
                    set.leader = set.members.iter().next().copied();
                    if let Some(next) = set.leader {
                        self.preferred.insert(next);
                    }
                }
                set.members.len()
            }
            None => return,
        };
        if remaining == 0 {
            self.sets.remove(&set_id);
        } else if remaining == 1 {
            // Collapse: the sole survivor is virtuous and owns the set now.
            if let Some(mut set) = self.sets.remove(&set_id) {
                if let Some(sole) = set.members.iter().next().copied() {
                    set.leader = Some(sole);
                    self.set_of.insert(sole, sole);
                    self.virtuous.insert(sole);
                    self.preferred.insert(sole);
                    self.sets.insert(sole, set);
                    self.health.conflict_sets_resolved += 1;
                    debug!("conflict set {:?} collapsed to {:?}", set_id, sole);
                }
            }
        }
    }

    fn conflicts(&self, id: &Identifier) -> OrdSet<Identifier> {
        self.set_of
            .get(id)
            .and_then(|set_id| self.sets.get(set_id))
            .map(|set| set.members.iter().filter(|m| *m != id).copied().collect())
            .unwrap_or_default()
    }

    fn health(&self) -> Health {
        let processing = self
            .entries
            .values()
            .filter(|e| e.status == Status::Processing)
            .count() as u64;
        Health {
            processing,
            ..self.health
        }
    }
}

/// The DAG consensus engine. All methods take `&self`; one lock guards all
/// state for the duration of each call.
pub struct Flare<V> {
    state: RwLock<State<V>>,
}

impl<V: Vertex> Flare<V> {
    /// Fails with `Config` if `params` are inconsistent or can't be met by
    /// `validators`.
    pub fn new(params: Parameters, validators: &ValidatorSet) -> Result<Self> {
        params.validate_for(validators)?;
        Ok(Flare {
            state: RwLock::new(State {
                params,
                entries: HashMap::new(),
                children: HashMap::new(),
                missing: BTreeSet::new(),
                set_of: HashMap::new(),
                sets: BTreeMap::new(),
                preferred: OrdSet::new(),
                virtuous: OrdSet::new(),
                health: Health::default(),
            }),
        })
    }

    pub fn params(&self) -> Parameters {
        self.state.read().params.clone()
    }

    /// Fails with `DuplicateItem` or `VerificationFailed`, in which case
    /// nothing about the engine changed.
    pub fn add(&self, vertex: V) -> Result<()> {
        self.state.write().add(vertex)
    }

    /// Counts a query about `id`. Diagnostic only.
    pub fn vote(&self, id: &Identifier) -> Result<()> {
        match self.state.write().entries.get_mut(id) {
            Some(entry) => {
                entry.queries += 1;
                Ok(())
            }
            None => Err(Error::ItemNotFound(*id)),
        }
    }

    pub fn queries(&self, id: &Identifier) -> u64 {
        self.state.read().entries.get(id).map_or(0, |e| e.queries)
    }

    /// Feeds one complete poll, `{item -> votes}`. Votes for unknown or
    /// already-decided items, or for items whose ancestry is incomplete,
    /// are ignored.
    pub fn record_poll(&self, votes: &BTreeMap<Identifier, u32>) -> Result<()> {
        self.state.write().record_poll(votes);
        Ok(())
    }

    pub fn preferred(&self) -> OrdSet<Identifier> {
        self.state.read().preferred.clone()
    }

    pub fn virtuous(&self) -> OrdSet<Identifier> {
        self.state.read().virtuous.clone()
    }

    /// Other pending members of `id`'s conflict set. Empty for virtuous,
    /// decided and unknown items.
    pub fn conflicts(&self, id: &Identifier) -> OrdSet<Identifier> {
        self.state.read().conflicts(id)
    }

    /// Parents referenced by some item but not yet added.
    pub fn missing(&self) -> OrdSet<Identifier> {
        self.state.read().missing.iter().copied().collect()
    }

    pub fn status(&self, id: &Identifier) -> Option<Status> {
        self.state.read().status(id)
    }

    pub fn is_finalized(&self, id: &Identifier) -> bool {
        self.status(id) == Some(Status::Accepted)
    }

    /// Consecutive successful polls on `id`'s conflict set.
    pub fn confidence(&self, id: &Identifier) -> u32 {
        let st = self.state.read();
        st.set_of
            .get(id)
            .and_then(|set_id| st.sets.get(set_id))
            .map_or(0, |set| set.confidence.get_confidence())
    }

    pub fn health_check(&self) -> Health {
        self.state.read().health()
    }
}
