// Copyright 2026 The lumen authors
// Licensed under the MIT and Apache-2.0 licenses.

// Fixtures shared by the unit, scenario and property tests.

use crate::{Block, Error, Identifier, Result, Status, Vertex};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn id(n: u64) -> Identifier {
    Identifier::from_low_u64(n)
}

/// Records every accept/reject callback, in order.
#[derive(Clone, Debug, Default)]
pub struct Journal(Arc<Mutex<Vec<(Identifier, Status)>>>);

impl Journal {
    fn push(&self, item: Identifier, status: Status) {
        self.0.lock().push((item, status));
    }

    pub fn entries(&self) -> Vec<(Identifier, Status)> {
        self.0.lock().clone()
    }

    pub fn accepted(&self) -> Vec<Identifier> {
        self.entries()
            .into_iter()
            .filter(|(_, s)| *s == Status::Accepted)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn count_for(&self, item: &Identifier) -> usize {
        self.0.lock().iter().filter(|(i, _)| i == item).count()
    }
}

/// A vertex whose payload is a set of spent "inputs"; two vertices
/// conflict when they spend a common input.
#[derive(Clone, Debug)]
pub struct TestVertex {
    pub id: Identifier,
    pub parents: Vec<Identifier>,
    pub height: u64,
    pub inputs: BTreeSet<u64>,
    pub valid: bool,
    pub journal: Journal,
}

impl TestVertex {
    pub fn new(n: u64, parents: &[u64], height: u64, inputs: &[u64], journal: &Journal) -> Self {
        TestVertex {
            id: id(n),
            parents: parents.iter().map(|p| id(*p)).collect(),
            height,
            inputs: inputs.iter().copied().collect(),
            valid: true,
            journal: journal.clone(),
        }
    }
}

impl Vertex for TestVertex {
    fn id(&self) -> Identifier {
        self.id
    }
    fn parents(&self) -> Vec<Identifier> {
        self.parents.clone()
    }
    fn height(&self) -> u64 {
        self.height
    }
    fn verify(&self) -> Result<()> {
        if self.valid {
            Ok(())
        } else {
            Err(Error::VerificationFailed("bad vertex".into()))
        }
    }
    fn conflicts_with(&self, other: &Self) -> bool {
        !self.inputs.is_disjoint(&other.inputs)
    }
    fn accept(&mut self) {
        self.journal.push(self.id, Status::Accepted);
    }
    fn reject(&mut self) {
        self.journal.push(self.id, Status::Rejected);
    }
}

#[derive(Clone, Debug)]
pub struct TestBlock {
    pub id: Identifier,
    pub parent: Option<Identifier>,
    pub height: u64,
    pub valid: bool,
    pub journal: Journal,
}

impl TestBlock {
    pub fn genesis(n: u64, journal: &Journal) -> Self {
        TestBlock {
            id: id(n),
            parent: None,
            height: 0,
            valid: true,
            journal: journal.clone(),
        }
    }

    pub fn child_of(n: u64, parent: &TestBlock) -> Self {
        TestBlock {
            id: id(n),
            parent: Some(parent.id),
            height: parent.height + 1,
            valid: true,
            journal: parent.journal.clone(),
        }
    }
}

impl Block for TestBlock {
    fn id(&self) -> Identifier {
        self.id
    }
    fn parent(&self) -> Option<Identifier> {
        self.parent
    }
    fn height(&self) -> u64 {
        self.height
    }
    fn verify(&self) -> Result<()> {
        if self.valid {
            Ok(())
        } else {
            Err(Error::VerificationFailed("bad block".into()))
        }
    }
    fn accept(&mut self) {
        self.journal.push(self.id, Status::Accepted);
    }
    fn reject(&mut self) {
        self.journal.push(self.id, Status::Rejected);
    }
}
