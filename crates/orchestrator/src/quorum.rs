//! Signing quorum selection.
//!
//! Picks which key-generation parties take part in a signing run. The random
//! source is always supplied by the caller, so a seeded generator reproduces
//! a selection exactly.
//!
//! ## Policies
//!
//! - **Uniform**: every subset of the requested size is equally likely.
//! - **CoinFlip**: walks the indices in a cycle and keeps each unchosen index
//!   with probability one half until the set is full. Low indices are
//!   favoured; kept for parity with older fixture tooling.

use std::collections::BTreeSet;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{OrchestratorError, Result};

/// Selection policy for signing quorums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SelectionPolicy {
    #[default]
    Uniform,
    CoinFlip,
}

impl std::fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uniform => write!(f, "uniform"),
            Self::CoinFlip => write!(f, "coin-flip"),
        }
    }
}

/// Chooses a subset of party indices of an exact size.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuorumSelector {
    policy: SelectionPolicy,
}

impl QuorumSelector {
    pub fn new(policy: SelectionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }

    /// Returns exactly `quorum` distinct indices from `[0, total)`.
    pub fn select<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        total: u16,
        quorum: u16,
    ) -> Result<BTreeSet<u16>> {
        if quorum == 0 {
            return Err(OrchestratorError::validation("quorum must not be empty"));
        }
        if quorum > total {
            return Err(OrchestratorError::validation(format!(
                "quorum of {quorum} exceeds population of {total}"
            )));
        }

        let chosen = match self.policy {
            SelectionPolicy::Uniform => {
                rand::seq::index::sample(rng, usize::from(total), usize::from(quorum))
                    .into_iter()
                    .map(|i| i as u16)
                    .collect()
            }
            SelectionPolicy::CoinFlip => coin_flip(rng, total, quorum),
        };

        debug!("Selected quorum {:?} of {} ({})", chosen, total, self.policy);
        Ok(chosen)
    }
}

fn coin_flip<R: Rng + ?Sized>(rng: &mut R, total: u16, quorum: u16) -> BTreeSet<u16> {
    let mut chosen = BTreeSet::new();
    let mut i = 0u16;
    while chosen.len() < usize::from(quorum) {
        if !chosen.contains(&i) && rng.gen_bool(0.5) {
            chosen.insert(i);
        }
        i = (i + 1) % total;
    }
    chosen
}
