// Copyright 2026 The lumen authors
// Licensed under the MIT and Apache-2.0 licenses.

//! Network-wide finality.
//!
//! The engines decide things locally. `Nova` tracks, per item, which
//! validators have told us they finalized it too, and declares the item
//! *network-final* once a quorum has, we have, and everything it depends on
//! is network-final already. Network-final items stay on the frontier until
//! pruned.
//!
//! Getting finality notices onto and off the wire is the driver's job: we
//! hand a `FinalityNotice` to the `Sender`, and the driver calls
//! `receive_finality` for each notice that arrives from a peer. Only members
//! of the current validator set count as witnesses; notices from anyone else
//! are dropped. Notices carry no signature, so authenticating `from` is the
//! driver's job too.

use crate::{Error, Health, Identifier, NodeId, Parameters, Result, ValidatorSet, ID_LEN};
use im::OrdSet;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::SystemTime;
use tracing::{debug, info, trace};

/// The outbound half of the network, as far as this crate cares.
pub trait Sender {
    fn send(&self, to: &[NodeId], payload: &[u8]) -> Result<()>;
    fn broadcast(&self, payload: &[u8]) -> Result<()>;
}

/// "`from` has finalized `item`", as bytes: the item id followed by the
/// node id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FinalityNotice {
    pub item: Identifier,
    pub from: NodeId,
}

impl FinalityNotice {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ID_LEN + self.from.0.len());
        out.extend_from_slice(self.item.as_bytes());
        out.extend_from_slice(self.from.as_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < ID_LEN {
            return None;
        }
        let (item, from) = bytes.split_at(ID_LEN);
        Some(FinalityNotice {
            item: Identifier::from_slice(item)?,
            from: NodeId::from_slice(from)?,
        })
    }
}

/// Everything known about one item's finality. Unknown items read as the
/// default record: nothing final, no witnesses.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FinalityRecord {
    pub item_id: Identifier,
    pub local_finality: bool,
    pub network_finality: bool,
    pub witnesses: BTreeSet<NodeId>,
    pub dependencies: Vec<Identifier>,
    /// When network finality was reached.
    pub finalized_at: Option<SystemTime>,
}

impl FinalityRecord {
    fn new(item_id: Identifier) -> Self {
        FinalityRecord {
            item_id,
            ..FinalityRecord::default()
        }
    }

    /// True the first time `node` is recorded.
    pub fn add_witness(&mut self, node: NodeId) -> bool {
        self.witnesses.insert(node)
    }

    /// Local finality plus a quorum of witnesses from `validators`.
    /// Dependencies are checked separately, since they need to see other
    /// records.
    pub fn has_quorum(&self, validators: &ValidatorSet, quorum_size: usize) -> bool {
        self.local_finality
            && self
                .witnesses
                .iter()
                .filter(|w| validators.contains(w))
                .count()
                >= quorum_size
    }
}

/// `ceil(validators * fraction)`, at least 1.
pub fn quorum_size(validators: usize, fraction: f64) -> usize {
    ((validators as f64 * fraction).ceil() as usize).max(1)
}

struct State {
    records: HashMap<Identifier, FinalityRecord>,
    registered: HashSet<Identifier>,
    dependents: HashMap<Identifier, BTreeSet<Identifier>>,
    // Pruned items; they were network-final, and still count as such
    // for anything that depends on them.
    retired: HashSet<Identifier>,
    validators: ValidatorSet,
    quorum_threshold: f64,
    health: Health,
}

impl State {
    fn quorum_size(&self) -> usize {
        quorum_size(self.validators.len(), self.quorum_threshold)
    }

    fn is_network_final(&self, id: &Identifier) -> bool {
        self.retired.contains(id)
            || self.records.get(id).map_or(false, |r| r.network_finality)
    }

    fn is_locally_final(&self, id: &Identifier) -> bool {
        self.retired.contains(id) || self.records.get(id).map_or(false, |r| r.local_finality)
    }

    // Promotes `id` if it now qualifies, then anything waiting on it.
    fn try_promote(&mut self, id: Identifier, now: SystemTime) -> bool {
        let quorum = self.quorum_size();
        let mut promoted_root = false;
        let mut work = vec![id];
        while let Some(cur) = work.pop() {
            let ready = match self.records.get(&cur) {
                Some(r) if !r.network_finality && r.has_quorum(&self.validators, quorum) => r
                    .dependencies
                    .iter()
                    .all(|d| self.is_network_final(d)),
                _ => false,
            };
            if !ready {
                continue;
            }
            if let Some(r) = self.records.get_mut(&cur) {
                r.network_finality = true;
                r.finalized_at = Some(now);
                info!(
                    "{:?} is network-final with {} witnesses",
                    cur,
                    r.witnesses.len()
                );
            }
            self.health.items_accepted += 1;
            promoted_root |= cur == id;
            if let Some(waiting) = self.dependents.get(&cur) {
                work.extend(waiting.iter().copied());
            }
        }
        promoted_root
    }
}

/// The finality broadcaster for one node.
pub struct Nova<S> {
    node_id: NodeId,
    sender: S,
    state: RwLock<State>,
}

impl<S: Sender> Nova<S> {
    pub fn new(
        node_id: NodeId,
        validators: &ValidatorSet,
        params: &Parameters,
        sender: S,
    ) -> Result<Self> {
        params.validate_for(validators)?;
        Ok(Nova {
            node_id,
            sender,
            state: RwLock::new(State {
                records: HashMap::new(),
                registered: HashSet::new(),
                dependents: HashMap::new(),
                retired: HashSet::new(),
                validators: validators.clone(),
                quorum_threshold: params.quorum_threshold,
                health: Health::default(),
            }),
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn quorum_size(&self) -> usize {
        self.state.read().quorum_size()
    }

    /// Membership changed; recompute the quorum and promote anything that
    /// now meets it. Witnesses that left the set stop counting.
    pub fn update_validators(&self, validators: &ValidatorSet) {
        let mut st = self.state.write();
        st.validators = validators.clone();
        debug!(
            "validator count now {}, quorum {}",
            validators.len(),
            st.quorum_size()
        );
        let candidates: Vec<Identifier> = st
            .records
            .values()
            .filter(|r| r.local_finality && !r.network_finality)
            .map(|r| r.item_id)
            .collect();
        let now = SystemTime::now();
        for id in candidates {
            st.try_promote(id, now);
        }
    }

    /// Starts tracking `id`. Finality notices that arrived before
    /// registration are kept.
    pub fn register_vertex(&self, id: Identifier, dependencies: Vec<Identifier>) -> Result<()> {
        let mut st = self.state.write();
        if st.registered.contains(&id) || st.retired.contains(&id) {
            return Err(Error::AlreadyRegistered(id));
        }
        st.registered.insert(id);
        for d in dependencies.iter() {
            st.dependents.entry(*d).or_default().insert(id);
        }
        st.records
            .entry(id)
            .or_insert_with(|| FinalityRecord::new(id))
            .dependencies = dependencies;
        st.health.items_added += 1;
        trace!("registered {:?}", id);
        Ok(())
    }

    /// Marks `id` locally final, with ourselves as the first witness. All of
    /// its dependencies must be locally final first.
    pub fn record_finalization(&self, id: &Identifier) -> Result<()> {
        let mut st = self.state.write();
        if !st.registered.contains(id) {
            return Err(Error::ItemNotFound(*id));
        }
        let deps = match st.records.get(id) {
            Some(r) if r.local_finality => return Ok(()),
            Some(r) => r.dependencies.clone(),
            None => return Err(Error::ItemNotFound(*id)),
        };
        if let Some(dep) = deps.iter().find(|d| !st.is_locally_final(d)) {
            return Err(Error::DependencyNotFinalized {
                item: *id,
                dependency: *dep,
            });
        }
        let me = self.node_id;
        let member = st.validators.contains(&me);
        if let Some(r) = st.records.get_mut(id) {
            r.local_finality = true;
            if member {
                r.add_witness(me);
            }
        }
        debug!("{:?} locally final", id);
        st.try_promote(*id, SystemTime::now());
        Ok(())
    }

    /// Tells every peer we finalized `id`. Fails, without sending anything,
    /// unless `id` is locally final.
    pub fn broadcast_finality(&self, id: &Identifier) -> Result<()> {
        let notice = self.notice_for(id)?;
        self.sender.broadcast(&notice.to_bytes())
    }

    /// Like `broadcast_finality`, to specific peers.
    pub fn send_finality(&self, id: &Identifier, to: &[NodeId]) -> Result<()> {
        let notice = self.notice_for(id)?;
        self.sender.send(to, &notice.to_bytes())
    }

    // Takes the lock only to check; the sender is called without it.
    fn notice_for(&self, id: &Identifier) -> Result<FinalityNotice> {
        let st = self.state.read();
        if !st.records.get(id).map_or(false, |r| r.local_finality) {
            return Err(Error::NotLocallyFinalized(*id));
        }
        Ok(FinalityNotice {
            item: *id,
            from: self.node_id,
        })
    }

    /// Records `node` as having finalized `id`. Returns true if this made
    /// `id` network-final. Nodes outside the validator set are ignored.
    pub fn receive_finality(&self, id: &Identifier, node: NodeId) -> bool {
        let mut st = self.state.write();
        if st.retired.contains(id) {
            return false;
        }
        if !st.validators.contains(&node) {
            debug!("ignoring finality of {:?} from non-validator {:?}", id, node);
            return false;
        }
        let record = st
            .records
            .entry(*id)
            .or_insert_with(|| FinalityRecord::new(*id));
        if !record.add_witness(node) {
            return false;
        }
        trace!("{:?} witnessed by {:?}", id, node);
        if !record.local_finality {
            return false;
        }
        st.try_promote(*id, SystemTime::now())
    }

    /// Convenience for drivers: decode a notice and feed it in.
    pub fn receive_notice(&self, payload: &[u8]) -> Result<bool> {
        let notice = FinalityNotice::from_bytes(payload)
            .ok_or_else(|| Error::Transport("malformed finality notice".into()))?;
        Ok(self.receive_finality(&notice.item, notice.from))
    }

    pub fn get_finality_status(&self, id: &Identifier) -> FinalityRecord {
        self.state
            .read()
            .records
            .get(id)
            .cloned()
            .unwrap_or_else(|| FinalityRecord::new(*id))
    }

    /// Network-final items not yet pruned.
    pub fn get_nova_frontier(&self) -> OrdSet<Identifier> {
        self.state
            .read()
            .records
            .values()
            .filter(|r| r.network_finality)
            .map(|r| r.item_id)
            .collect()
    }

    /// Drops network-final items that became final before `before`. Pending
    /// items are never touched. Returns how many were dropped.
    pub fn prune_frontier(&self, before: SystemTime) -> usize {
        let mut st = self.state.write();
        let doomed: Vec<Identifier> = st
            .records
            .values()
            .filter(|r| r.network_finality && r.finalized_at.map_or(false, |t| t < before))
            .map(|r| r.item_id)
            .collect();
        for id in doomed.iter() {
            st.records.remove(id);
            st.registered.remove(id);
            st.dependents.remove(id);
            st.retired.insert(*id);
        }
        if !doomed.is_empty() {
            debug!("pruned {} network-final items", doomed.len());
        }
        doomed.len()
    }

    /// `items_added` counts registrations, `items_accepted` network
    /// finalizations, `processing` items registered but not yet
    /// network-final.
    pub fn health_check(&self) -> Health {
        let st = self.state.read();
        let processing = st
            .registered
            .iter()
            .filter(|id| !st.is_network_final(id))
            .count() as u64;
        Health {
            processing,
            ..st.health
        }
    }
}
