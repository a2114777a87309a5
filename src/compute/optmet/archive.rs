//! Archive of the best distinct designs found during a run.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::schema::{Design, SimulationOutcome};

/// Rank tier: feasible, infeasible, then not yet scored.
fn tier(outcome: Option<&SimulationOutcome>) -> u8 {
    match outcome {
        Some(o) if o.feasible => 0,
        Some(_) => 1,
        None => 2,
    }
}

/// Global ranking order; `Less` means better.
///
/// Feasible before infeasible before unscored, then higher score, then
/// fewer targets, then canonical form ascending.
pub fn rank_order(
    a: (Option<&SimulationOutcome>, usize, &str),
    b: (Option<&SimulationOutcome>, usize, &str),
) -> Ordering {
    let score = |o: Option<&SimulationOutcome>| o.map_or(f64::NEG_INFINITY, SimulationOutcome::score);
    tier(a.0)
        .cmp(&tier(b.0))
        .then_with(|| score(b.0).total_cmp(&score(a.0)))
        .then_with(|| a.1.cmp(&b.1))
        .then_with(|| a.2.cmp(b.2))
}

/// Compare two designs in ranking order.
pub fn compare_designs(a: &Design, b: &Design) -> Ordering {
    rank_order(
        (Some(&a.outcome), a.size(), &a.perturbations.canonical()),
        (Some(&b.outcome), b.size(), &b.perturbations.canonical()),
    )
}

/// Best distinct designs, deduplicated by canonical perturbation set.
#[derive(Debug, Default)]
pub struct DesignArchive {
    /// Designs indexed by canonical form.
    designs: BTreeMap<String, Design>,
    /// Maximum archive size.
    max_size: usize,
}

impl DesignArchive {
    /// Create a new archive.
    pub fn new(max_size: usize) -> Self {
        Self {
            designs: BTreeMap::new(),
            max_size,
        }
    }

    /// Add a design. Returns false if it was already present or ranks below
    /// every design of a full archive.
    pub fn add(&mut self, design: Design) -> bool {
        let key = design.perturbations.canonical();
        if self.designs.contains_key(&key) {
            return false;
        }

        if self.designs.len() >= self.max_size {
            let Some(worst) = self
                .designs
                .values()
                .max_by(|a, b| compare_designs(a, b))
                .map(|d| d.perturbations.canonical())
            else {
                return false;
            };
            if compare_designs(&design, &self.designs[&worst]) != Ordering::Less {
                return false;
            }
            self.designs.remove(&worst);
        }

        self.designs.insert(key, design);
        true
    }

    /// All designs, best first.
    pub fn ranked(&self) -> Vec<&Design> {
        let mut designs: Vec<_> = self.designs.values().collect();
        designs.sort_by(|a, b| compare_designs(a, b));
        designs
    }

    /// Get top N designs.
    pub fn top_n(&self, n: usize) -> Vec<&Design> {
        self.ranked().into_iter().take(n).collect()
    }

    /// Feasible designs not dominated in (score up, targets down), best first.
    pub fn pareto_front(&self) -> Vec<&Design> {
        let feasible: Vec<&Design> = self
            .ranked()
            .into_iter()
            .filter(|d| d.outcome.feasible)
            .collect();
        feasible
            .iter()
            .filter(|d| !feasible.iter().any(|other| dominates(other, d)))
            .copied()
            .collect()
    }

    /// Get archive size.
    pub fn len(&self) -> usize {
        self.designs.len()
    }

    /// Check if archive is empty.
    pub fn is_empty(&self) -> bool {
        self.designs.is_empty()
    }
}

fn dominates(a: &Design, b: &Design) -> bool {
    let (sa, sb) = (a.score(), b.score());
    sa >= sb && a.size() <= b.size() && (sa > sb || a.size() < b.size())
}
