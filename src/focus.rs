// Copyright 2026 The lumen authors
// Licensed under the MIT and Apache-2.0 licenses.

//! Confidence tracking: count consecutive successful polls on a choice
//! until there have been `beta` of them, at which point the choice is
//! final with overwhelming probability.
//!
//! Two variants:
//!
//!   - `Binary` is plain snowball: any failed poll zeroes the counter, and a
//!     success on a different choice restarts it at 1.
//!
//!   - `Unary` tolerates isolated failures. It remembers the last `2*beta`
//!     outcomes and only zeroes the counter when more than a third of the
//!     most recent `beta/2` rounds (at least one) failed.
//!
//! Both move through `Unfocused -> Focusing(choice, n) -> Focused(choice)`.
//! `Focused` is terminal for the decision at hand; the owning engine
//! finalizes and then calls `reset` to begin the next one.

use crate::Identifier;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::trace;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfidenceKind {
    Binary,
    Unary,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FocusState {
    Unfocused,
    Focusing(Identifier, u32),
    Focused(Identifier),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BinaryConfidence {
    beta: u32,
    choice: Option<Identifier>,
    successes: u32,
}

impl BinaryConfidence {
    pub fn new(beta: u32) -> Self {
        BinaryConfidence {
            beta,
            choice: None,
            successes: 0,
        }
    }

    pub fn record_poll(&mut self, successful: bool, choice: Identifier) {
        if !successful {
            // Keep the choice; only the streak is lost.
            self.successes = 0;
            return;
        }
        match self.choice {
            Some(current) if current == choice => self.successes += 1,
            Some(_) | None => {
                self.choice = Some(choice);
                self.successes = 1;
            }
        }
    }

    pub fn reset(&mut self) {
        self.choice = None;
        self.successes = 0;
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UnaryConfidence {
    beta: u32,
    choice: Option<Identifier>,
    successes: u32,
    // Last 2*beta outcomes, oldest at the front.
    history: VecDeque<bool>,
}

impl UnaryConfidence {
    pub fn new(beta: u32) -> Self {
        UnaryConfidence {
            beta,
            choice: None,
            successes: 0,
            history: VecDeque::with_capacity(2 * beta as usize),
        }
    }

    fn window(&self) -> usize {
        ((self.beta / 2) as usize).max(1)
    }

    fn recent_failures(&self) -> usize {
        self.history
            .iter()
            .rev()
            .take(self.window())
            .filter(|ok| !**ok)
            .count()
    }

    pub fn record_poll(&mut self, successful: bool, choice: Identifier) {
        self.history.push_back(successful);
        let cap = (2 * self.beta as usize).max(1);
        while self.history.len() > cap {
            self.history.pop_front();
        }
        if successful {
            self.choice = Some(choice);
            self.successes += 1;
            return;
        }
        let window = self.window();
        let failures = self.recent_failures();
        if failures * 3 > window {
            trace!(
                "unary confidence reset: {} failures in last {} rounds",
                failures,
                window
            );
            self.successes = 0;
        }
    }

    pub fn reset(&mut self) {
        self.choice = None;
        self.successes = 0;
        self.history.clear();
    }
}

/// One confidence tracker, of either variant.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Confidence {
    Binary(BinaryConfidence),
    Unary(UnaryConfidence),
}

impl Confidence {
    pub fn new(kind: ConfidenceKind, beta: u32) -> Self {
        match kind {
            ConfidenceKind::Binary => Confidence::Binary(BinaryConfidence::new(beta)),
            ConfidenceKind::Unary => Confidence::Unary(UnaryConfidence::new(beta)),
        }
    }

    pub fn kind(&self) -> ConfidenceKind {
        match self {
            Confidence::Binary(_) => ConfidenceKind::Binary,
            Confidence::Unary(_) => ConfidenceKind::Unary,
        }
    }

    pub fn record_poll(&mut self, successful: bool, choice: Identifier) {
        match self {
            Confidence::Binary(b) => b.record_poll(successful, choice),
            Confidence::Unary(u) => u.record_poll(successful, choice),
        }
    }

    pub fn beta(&self) -> u32 {
        match self {
            Confidence::Binary(b) => b.beta,
            Confidence::Unary(u) => u.beta,
        }
    }

    pub fn get_confidence(&self) -> u32 {
        match self {
            Confidence::Binary(b) => b.successes,
            Confidence::Unary(u) => u.successes,
        }
    }

    pub fn get_choice(&self) -> Option<Identifier> {
        match self {
            Confidence::Binary(b) => b.choice,
            Confidence::Unary(u) => u.choice,
        }
    }

    pub fn is_focused(&self) -> bool {
        self.get_choice().is_some() && self.get_confidence() >= self.beta()
    }

    pub fn state(&self) -> FocusState {
        match self.get_choice() {
            None => FocusState::Unfocused,
            Some(choice) if self.is_focused() => FocusState::Focused(choice),
            Some(choice) => match self.get_confidence() {
                0 => FocusState::Unfocused,
                n => FocusState::Focusing(choice, n),
            },
        }
    }

    pub fn reset(&mut self) {
        match self {
            Confidence::Binary(b) => b.reset(),
            Confidence::Unary(u) => u.reset(),
        }
    }
}
