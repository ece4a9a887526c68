// Copyright 2026 The lumen authors
// Licensed under the MIT and Apache-2.0 licenses.

//! Linear-chain consensus.
//!
//! Same sampling, tallying and confidence machinery as `flare`, but over a
//! tree of blocks that must resolve to a single chain. There are no explicit
//! conflict sets: two blocks at the same height are rivals by construction,
//! and whichever chain gets finalized rejects the others at every height it
//! covers. There is one threshold and one tracker for the whole engine.
//!
//! Finalization is strictly ancestor-first. Focusing on a block accepts every
//! block between the last finalized one and it, oldest first, and no block
//! is ever accepted while its parent is still processing.
//!
//! Decided history below the last finalized block can be dropped with
//! `prune_decided`. Anything that later turns up building on dropped history
//! is at or below the finalized height, so it is rejected as stale.

use crate::{
    Confidence, Error, Health, Identifier, Parameters, Result, Status, Threshold, ValidatorSet,
};
use parking_lot::RwLock;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, trace, warn};

/// What the engine needs from a block. Only the genesis block has no parent.
pub trait Block {
    fn id(&self) -> Identifier;
    fn parent(&self) -> Option<Identifier>;
    /// Must be exactly one more than the parent's.
    fn height(&self) -> u64;
    fn verify(&self) -> Result<()>;
    fn accept(&mut self) {}
    fn reject(&mut self) {}
}

struct Entry<B> {
    block: B,
    status: Status,
    queries: u64,
}

struct State<B> {
    params: Parameters,
    blocks: HashMap<Identifier, Entry<B>>,
    by_height: BTreeMap<u64, BTreeSet<Identifier>>,
    children: HashMap<Identifier, BTreeSet<Identifier>>,
    preferred: Option<(Identifier, u64)>,
    last_finalized: Option<(Identifier, u64)>,
    threshold: Threshold,
    confidence: Confidence,
    // Accepted since the last `finalized_since_last_call`, oldest first.
    pending: Vec<Identifier>,
    health: Health,
}

impl<B: Block> State<B> {
    fn status(&self, id: &Identifier) -> Option<Status> {
        self.blocks.get(id).map(|e| e.status)
    }

    fn parent_of(&self, id: &Identifier) -> Option<Identifier> {
        self.blocks.get(id).and_then(|e| e.block.parent())
    }

    fn add(&mut self, block: B) -> Result<()> {
        let id = block.id();
        if self.blocks.contains_key(&id) {
            return Err(Error::DuplicateItem(id));
        }
        block.verify().map_err(|e| match e {
            Error::VerificationFailed(_) => e,
            other => Error::VerificationFailed(other.to_string()),
        })?;
        let height = block.height();
        let parent = block.parent();
        if let Some(p) = parent.and_then(|p| self.blocks.get(&p)) {
            if p.block.height() + 1 != height {
                return Err(Error::VerificationFailed(format!(
                    "height {} does not follow parent height {}",
                    height,
                    p.block.height()
                )));
            }
        }

        let parent_rejected = parent
            .map(|p| self.status(&p) == Some(Status::Rejected))
            .unwrap_or(false);
        let stale = self
            .last_finalized
            .map(|(_, h)| height <= h)
            .unwrap_or(false);

        if let Some(p) = parent {
            self.children.entry(p).or_default().insert(id);
        }
        self.by_height.entry(height).or_default().insert(id);
        self.blocks.insert(
            id,
            Entry {
                block,
                status: Status::Processing,
                queries: 0,
            },
        );
        self.health.items_added += 1;
        trace!("added {:?} at height {}", id, height);

        if parent_rejected || stale {
            info!(
                "{:?} at height {} can't be finalized (parent rejected: {}, stale: {})",
                id, height, parent_rejected, stale
            );
            self.reject_cascade(id);
            return Ok(());
        }
        match self.preferred {
            None => self.preferred = Some((id, height)),
            Some((tip, tip_height)) if parent == Some(tip) && height > tip_height => {
                debug!("preferred tip extended to {:?} at {}", id, height);
                self.preferred = Some((id, height));
            }
            _ => (),
        }
        Ok(())
    }

    // True when every ancestor back to the last finalized block (or back to
    // genesis, before anything is finalized) is present and processing.
    fn is_connected(&self, id: &Identifier) -> bool {
        let mut cur = *id;
        loop {
            if self.last_finalized.map(|(lf, _)| lf) == Some(cur) {
                return true;
            }
            match self.blocks.get(&cur) {
                None => return false,
                Some(e) if e.status != Status::Processing => return false,
                Some(e) => match e.block.parent() {
                    None => return self.last_finalized.is_none(),
                    Some(p) => cur = p,
                },
            }
        }
    }

    fn record_poll(&mut self, votes: &BTreeMap<Identifier, u32>) {
        self.health.polls_processed += 1;
        self.threshold.reset();
        for (item, count) in votes.iter() {
            match self.status(item) {
                None => warn!("ignoring {} votes for unknown {:?}", count, item),
                Some(Status::Processing) if self.is_connected(item) => {
                    self.threshold.add_votes(*item, *count);
                }
                Some(_) => trace!("ignoring votes for {:?}", item),
            }
        }
        let leader = match self.threshold.get_leader() {
            Some((leader, _)) => leader,
            None => {
                // Nothing usable came back; that's a failed round.
                self.confidence.record_poll(false, Identifier::EMPTY);
                return;
            }
        };
        if self.threshold.check_preference().is_some() {
            if let Some(e) = self.blocks.get(&leader) {
                if self.preferred.map(|(p, _)| p) != Some(leader) {
                    debug!("preference moves to {:?}", leader);
                }
                self.preferred = Some((leader, e.block.height()));
            }
        }
        let successful = self.threshold.check_confidence().is_some();
        self.confidence.record_poll(successful, leader);
        trace!(
            "poll: leader {:?} successful={} confidence={}",
            leader,
            successful,
            self.confidence.get_confidence()
        );
        if self.confidence.is_focused() {
            if let Some(choice) = self.confidence.get_choice() {
                self.finalize(choice);
            }
            self.confidence.reset();
        }
    }

    fn finalize(&mut self, target: Identifier) {
        let stop = self.last_finalized.map(|(lf, _)| lf);
        let mut path = Vec::new();
        let mut cur = Some(target);
        while let Some(id) = cur {
            if Some(id) == stop {
                break;
            }
            match self.status(&id) {
                Some(Status::Processing) => path.push(id),
                Some(_) => {
                    trace!("not finalizing {:?}: {:?} already decided", target, id);
                    return;
                }
                None => {
                    warn!("not finalizing {:?}: ancestor {:?} missing", target, id);
                    return;
                }
            }
            cur = self.parent_of(&id);
        }
        if cur.is_none() && stop.is_some() {
            // Walked off the root without meeting the last finalized block.
            warn!("not finalizing {:?}: not a descendant of last finalized", target);
            return;
        }

        let mut rivals = Vec::new();
        for id in path.iter().rev() {
            let height = match self.blocks.get_mut(id) {
                Some(entry) => {
                    entry.status = Status::Accepted;
                    entry.block.accept();
                    entry.block.height()
                }
                None => continue,
            };
            self.health.items_accepted += 1;
            self.pending.push(*id);
            self.last_finalized = Some((*id, height));
            info!("accepted {:?} at height {}", id, height);
            if let Some(siblings) = self.by_height.get(&height) {
                rivals.extend(siblings.iter().filter(|s| *s != id).copied());
            }
        }
        for rival in rivals {
            self.reject_cascade(rival);
        }
        self.repair_preference();
    }

    fn reject_cascade(&mut self, root: Identifier) {
        let mut work = vec![root];
        while let Some(id) = work.pop() {
            match self.blocks.get_mut(&id) {
                Some(entry) if entry.status == Status::Processing => {
                    entry.status = Status::Rejected;
                    entry.block.reject();
                }
                _ => continue,
            }
            self.health.items_rejected += 1;
            info!("rejected {:?}", id);
            if let Some(kids) = self.children.get(&id) {
                work.extend(kids.iter().copied());
            }
        }
    }

    // After a finalization the preferred tip may have been decided. Prefer
    // the deepest processing descendant of the last finalized block, or the
    // last finalized block itself if it has none.
    fn repair_preference(&mut self) {
        if let Some((tip, _)) = self.preferred {
            if self.status(&tip) == Some(Status::Processing) {
                return;
            }
        }
        let (root, root_height) = match self.last_finalized {
            Some(lf) => lf,
            None => return,
        };
        let mut best = (root, root_height);
        let mut work = vec![root];
        while let Some(id) = work.pop() {
            if let Some(kids) = self.children.get(&id) {
                for kid in kids.iter() {
                    if let Some(e) = self.blocks.get(kid) {
                        if e.status != Status::Processing {
                            continue;
                        }
                        let h = e.block.height();
                        if (h, Reverse(*kid)) > (best.1, Reverse(best.0)) {
                            best = (*kid, h);
                        }
                        work.push(*kid);
                    }
                }
            }
        }
        debug!("preference repaired to {:?}", best.0);
        self.preferred = Some(best);
    }

    fn prune_decided(&mut self, before_height: u64) -> usize {
        let cutoff = match self.last_finalized {
            Some((_, height)) => before_height.min(height),
            None => return 0,
        };
        let keep = self.by_height.split_off(&cutoff);
        let old = std::mem::replace(&mut self.by_height, keep);
        let mut dropped = 0;
        for (height, ids) in old {
            for id in ids {
                if self.status(&id) == Some(Status::Processing) {
                    self.by_height.entry(height).or_default().insert(id);
                    continue;
                }
                self.blocks.remove(&id);
                self.children.remove(&id);
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!("pruned {} decided blocks below height {}", dropped, cutoff);
        }
        dropped
    }

    fn health(&self) -> Health {
        let processing = self
            .blocks
            .values()
            .filter(|e| e.status == Status::Processing)
            .count() as u64;
        Health {
            processing,
            ..self.health
        }
    }
}

/// The chain consensus engine.
pub struct Beam<B> {
    state: RwLock<State<B>>,
}

impl<B: Block> Beam<B> {
    pub fn new(params: Parameters, validators: &ValidatorSet) -> Result<Self> {
        params.validate_for(validators)?;
        let threshold = params.threshold();
        let confidence = params.confidence();
        Ok(Beam {
            state: RwLock::new(State {
                params,
                blocks: HashMap::new(),
                by_height: BTreeMap::new(),
                children: HashMap::new(),
                preferred: None,
                last_finalized: None,
                threshold,
                confidence,
                pending: Vec::new(),
                health: Health::default(),
            }),
        })
    }

    pub fn params(&self) -> Parameters {
        self.state.read().params.clone()
    }

    /// Fails with `DuplicateItem` or `VerificationFailed`. A block whose
    /// parent was rejected, or at or below the last finalized height, is
    /// added but rejected straight away.
    pub fn add(&self, block: B) -> Result<()> {
        self.state.write().add(block)
    }

    pub fn vote(&self, id: &Identifier) -> Result<()> {
        match self.state.write().blocks.get_mut(id) {
            Some(entry) => {
                entry.queries += 1;
                Ok(())
            }
            None => Err(Error::ItemNotFound(*id)),
        }
    }

    pub fn queries(&self, id: &Identifier) -> u64 {
        self.state.read().blocks.get(id).map_or(0, |e| e.queries)
    }

    pub fn record_poll(&self, votes: &BTreeMap<Identifier, u32>) -> Result<()> {
        self.state.write().record_poll(votes);
        Ok(())
    }

    pub fn preferred(&self) -> Option<Identifier> {
        self.state.read().preferred.map(|(id, _)| id)
    }

    pub fn preferred_height(&self) -> Option<u64> {
        self.state.read().preferred.map(|(_, h)| h)
    }

    pub fn last_finalized(&self) -> Option<Identifier> {
        self.state.read().last_finalized.map(|(id, _)| id)
    }

    pub fn status(&self, id: &Identifier) -> Option<Status> {
        self.state.read().status(id)
    }

    pub fn is_finalized(&self, id: &Identifier) -> bool {
        self.status(id) == Some(Status::Accepted)
    }

    /// Blocks accepted since the previous call, oldest first.
    pub fn finalized_since_last_call(&self) -> Vec<Identifier> {
        std::mem::take(&mut self.state.write().pending)
    }

    pub fn confidence(&self) -> u32 {
        self.state.read().confidence.get_confidence()
    }

    /// Forgets decided blocks below `before_height`, clamped to the last
    /// finalized height, and returns how many went. Their `status` reads as
    /// `None` afterwards.
    pub fn prune_decided(&self, before_height: u64) -> usize {
        self.state.write().prune_decided(before_height)
    }

    pub fn health_check(&self) -> Health {
        self.state.read().health()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{id, init_tracing, Journal, TestBlock};

    fn params(beta: u32) -> Parameters {
        Parameters {
            beta,
            ..Parameters::default()
        }
    }

    fn engine(beta: u32) -> Beam<TestBlock> {
        Beam::new(params(beta), &ValidatorSet::uniform(21)).unwrap()
    }

    fn votes_for(n: u64, count: u32) -> BTreeMap<Identifier, u32> {
        std::iter::once((id(n), count)).collect()
    }

    #[test]
    fn add_errors() {
        let j = Journal::default();
        let beam = engine(2);
        let g = TestBlock::genesis(1, &j);
        beam.add(g.clone()).unwrap();
        assert_eq!(beam.add(g.clone()), Err(Error::DuplicateItem(id(1))));
        let mut bad = TestBlock::child_of(2, &g);
        bad.valid = false;
        assert!(matches!(beam.add(bad), Err(Error::VerificationFailed(_))));
        let mut skip = TestBlock::child_of(3, &g);
        skip.height = 5;
        assert!(matches!(beam.add(skip), Err(Error::VerificationFailed(_))));
        assert_eq!(beam.health_check().items_added, 1);
    }

    #[test]
    fn preferred_tip_extends() {
        let j = Journal::default();
        let beam = engine(2);
        let g = TestBlock::genesis(1, &j);
        let b1 = TestBlock::child_of(2, &g);
        let b1x = TestBlock::child_of(3, &g);
        let b2 = TestBlock::child_of(4, &b1);
        beam.add(g).unwrap();
        assert_eq!(beam.preferred(), Some(id(1)));
        beam.add(b1).unwrap();
        beam.add(b1x).unwrap();
        assert_eq!(beam.preferred(), Some(id(2)));
        beam.add(b2).unwrap();
        assert_eq!(beam.preferred(), Some(id(4)));
        assert_eq!(beam.preferred_height(), Some(2));
    }

    #[test]
    fn poll_moves_preference() {
        let j = Journal::default();
        let beam = engine(5);
        let g = TestBlock::genesis(1, &j);
        let b1 = TestBlock::child_of(2, &g);
        let b1x = TestBlock::child_of(3, &g);
        beam.add(g).unwrap();
        beam.add(b1).unwrap();
        beam.add(b1x).unwrap();
        beam.record_poll(&votes_for(3, 13)).unwrap();
        assert_eq!(beam.preferred(), Some(id(3)));
        assert_eq!(beam.confidence(), 0);
        beam.record_poll(&votes_for(3, 18)).unwrap();
        assert_eq!(beam.confidence(), 1);
    }

    #[test]
    fn finalization_cascades_to_ancestors_and_rejects_siblings() {
        init_tracing();
        let j = Journal::default();
        let beam = engine(1);
        let g = TestBlock::genesis(1, &j);
        let b1 = TestBlock::child_of(2, &g);
        let b1x = TestBlock::child_of(3, &g);
        let b2x = TestBlock::child_of(5, &b1x);
        let b2 = TestBlock::child_of(4, &b1);
        for b in vec![g, b1, b1x, b2x, b2] {
            beam.add(b).unwrap();
        }
        beam.record_poll(&votes_for(4, 20)).unwrap();
        assert_eq!(j.accepted(), vec![id(1), id(2), id(4)]);
        assert_eq!(beam.status(&id(3)), Some(Status::Rejected));
        assert_eq!(beam.status(&id(5)), Some(Status::Rejected));
        assert_eq!(beam.last_finalized(), Some(id(4)));
        assert_eq!(beam.finalized_since_last_call(), vec![id(1), id(2), id(4)]);
        assert!(beam.finalized_since_last_call().is_empty());
        assert_eq!(beam.preferred(), Some(id(4)));
    }

    #[test]
    fn stale_and_orphaned_blocks_are_rejected_on_add() {
        let j = Journal::default();
        let beam = engine(1);
        let g = TestBlock::genesis(1, &j);
        let b1 = TestBlock::child_of(2, &g);
        let b1x = TestBlock::child_of(3, &g);
        beam.add(g.clone()).unwrap();
        beam.add(b1.clone()).unwrap();
        beam.add(b1x.clone()).unwrap();
        beam.record_poll(&votes_for(2, 20)).unwrap();
        assert_eq!(beam.status(&id(3)), Some(Status::Rejected));
        // Child of a rejected block.
        beam.add(TestBlock::child_of(6, &b1x)).unwrap();
        assert_eq!(beam.status(&id(6)), Some(Status::Rejected));
        // A late sibling at a finalized height.
        beam.add(TestBlock::child_of(7, &g)).unwrap();
        assert_eq!(beam.status(&id(7)), Some(Status::Rejected));
        // Extending the finalized tip is fine.
        beam.add(TestBlock::child_of(8, &b1)).unwrap();
        assert_eq!(beam.status(&id(8)), Some(Status::Processing));
        assert_eq!(beam.preferred(), Some(id(8)));
    }

    #[test]
    fn missing_parent_blocks_votes_until_it_arrives() {
        let j = Journal::default();
        let beam = engine(1);
        let g = TestBlock::genesis(1, &j);
        let b1 = TestBlock::child_of(2, &g);
        let b2 = TestBlock::child_of(3, &b1);
        beam.add(g).unwrap();
        beam.add(b2).unwrap();
        beam.record_poll(&votes_for(3, 20)).unwrap();
        assert!(!beam.is_finalized(&id(3)));
        beam.add(b1).unwrap();
        beam.record_poll(&votes_for(3, 20)).unwrap();
        assert!(beam.is_finalized(&id(3)));
        assert_eq!(j.accepted(), vec![id(1), id(2), id(3)]);
    }

    #[test]
    fn failed_rounds_reset_confidence() {
        let j = Journal::default();
        let beam = engine(3);
        beam.add(TestBlock::genesis(1, &j)).unwrap();
        beam.record_poll(&votes_for(1, 18)).unwrap();
        beam.record_poll(&votes_for(1, 18)).unwrap();
        beam.record_poll(&BTreeMap::new()).unwrap();
        assert_eq!(beam.confidence(), 0);
        for _ in 0..2 {
            beam.record_poll(&votes_for(1, 18)).unwrap();
        }
        assert!(!beam.is_finalized(&id(1)));
        beam.record_poll(&votes_for(1, 18)).unwrap();
        assert!(beam.is_finalized(&id(1)));
        assert_eq!(beam.health_check().polls_processed, 6);
    }

    #[test]
    fn second_epoch_finalizes_from_last_finalized() {
        let j = Journal::default();
        let beam = engine(2);
        let g = TestBlock::genesis(1, &j);
        let b1 = TestBlock::child_of(2, &g);
        let b2 = TestBlock::child_of(3, &b1);
        beam.add(g).unwrap();
        beam.add(b1).unwrap();
        for _ in 0..2 {
            beam.record_poll(&votes_for(2, 19)).unwrap();
        }
        assert_eq!(beam.last_finalized(), Some(id(2)));
        assert_eq!(beam.confidence(), 0);
        beam.add(b2).unwrap();
        beam.record_poll(&votes_for(3, 19)).unwrap();
        beam.record_poll(&votes_for(3, 19)).unwrap();
        assert!(beam.is_finalized(&id(3)));
        assert_eq!(j.accepted(), vec![id(1), id(2), id(3)]);
        let h = beam.health_check();
        assert_eq!(h.items_accepted, 3);
        assert_eq!(h.processing, 0);
    }

    #[test]
    fn votes_for_decided_blocks_are_ignored() {
        let j = Journal::default();
        let beam = engine(1);
        beam.add(TestBlock::genesis(1, &j)).unwrap();
        beam.record_poll(&votes_for(1, 20)).unwrap();
        beam.record_poll(&votes_for(1, 20)).unwrap();
        beam.record_poll(&votes_for(42, 20)).unwrap();
        assert_eq!(j.count_for(&id(1)), 1);
        assert_eq!(beam.vote(&id(42)), Err(Error::ItemNotFound(id(42))));
        beam.vote(&id(1)).unwrap();
        assert_eq!(beam.queries(&id(1)), 1);
    }

    #[test]
    fn too_few_validators_refuse_to_construct() {
        assert!(matches!(
            Beam::<TestBlock>::new(params(2), &ValidatorSet::uniform(17)),
            Err(Error::Config(crate::ConfigError::AlphaExceedsValidators { .. }))
        ));
        assert!(Beam::<TestBlock>::new(params(2), &ValidatorSet::uniform(18)).is_ok());
    }

    #[test]
    fn pruning_drops_history_below_the_finalized_tip() {
        let j = Journal::default();
        let beam = engine(1);
        let g = TestBlock::genesis(1, &j);
        let b1 = TestBlock::child_of(2, &g);
        let b1x = TestBlock::child_of(3, &g);
        let b2 = TestBlock::child_of(4, &b1);
        for b in vec![g.clone(), b1.clone(), b1x.clone(), b2.clone()] {
            beam.add(b).unwrap();
        }
        assert_eq!(beam.prune_decided(100), 0);
        beam.record_poll(&votes_for(4, 20)).unwrap();
        assert_eq!(beam.last_finalized(), Some(id(4)));

        // Heights 0 and 1 go; the finalized tip at height 2 stays.
        assert_eq!(beam.prune_decided(100), 3);
        assert_eq!(beam.status(&id(1)), None);
        assert_eq!(beam.status(&id(3)), None);
        assert!(beam.is_finalized(&id(4)));
        assert_eq!(beam.prune_decided(100), 0);

        // Building on pruned history is stale.
        beam.add(TestBlock::child_of(5, &b1x)).unwrap();
        assert_eq!(beam.status(&id(5)), Some(Status::Rejected));

        // The chain keeps growing from the finalized tip.
        beam.add(TestBlock::child_of(6, &b2)).unwrap();
        assert_eq!(beam.preferred(), Some(id(6)));
        beam.record_poll(&votes_for(6, 20)).unwrap();
        assert!(beam.is_finalized(&id(6)));
        assert_eq!(beam.prune_decided(3), 2);
        assert_eq!(beam.health_check().processing, 0);
    }
}
