//! Perturbation sets: the unit the search optimizes over.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// What a target identifier refers to in the network model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TargetKind {
    Metabolite,
    Reaction,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Metabolite => write!(f, "metabolite"),
            TargetKind::Reaction => write!(f, "reaction"),
        }
    }
}

/// Manipulation applied to a target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Action {
    /// Remove the target's activity.
    Knockout,
    /// Increase flux by a fold change (> 1).
    UpRegulation { fold_change: f64 },
    /// Decrease flux by a fold change (in (0, 1)).
    DownRegulation { fold_change: f64 },
}

impl Action {
    /// Regulation magnitude, if any.
    pub fn fold_change(&self) -> Option<f64> {
        match self {
            Action::Knockout => None,
            Action::UpRegulation { fold_change } | Action::DownRegulation { fold_change } => {
                Some(*fold_change)
            }
        }
    }

    pub fn is_knockout(&self) -> bool {
        matches!(self, Action::Knockout)
    }

    fn canonical(&self) -> String {
        match self {
            Action::Knockout => "KO".to_string(),
            Action::UpRegulation { fold_change } => format!("UP({fold_change:?})"),
            Action::DownRegulation { fold_change } => format!("DOWN({fold_change:?})"),
        }
    }
}

/// A single target manipulation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Perturbation {
    pub kind: TargetKind,
    pub action: Action,
}

impl Perturbation {
    pub fn knockout(kind: TargetKind) -> Self {
        Self {
            kind,
            action: Action::Knockout,
        }
    }
}

/// A set of targets with one manipulation each.
///
/// Entries are kept sorted by target identifier, so the canonical form is
/// independent of insertion order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PerturbationSet {
    entries: BTreeMap<String, Perturbation>,
}

impl PerturbationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a knockout-only set.
    pub fn knockouts<I, S>(kind: TargetKind, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: targets
                .into_iter()
                .map(|t| (t.into(), Perturbation::knockout(kind)))
                .collect(),
        }
    }

    /// Insert a target.
    ///
    /// Re-inserting an identical perturbation is a no-op; a different one
    /// for the same target is rejected.
    pub fn insert(
        &mut self,
        target: impl Into<String>,
        perturbation: Perturbation,
    ) -> Result<(), PerturbationError> {
        let target = target.into();
        match self.entries.get(&target) {
            Some(existing) if *existing == perturbation => Ok(()),
            Some(existing) => Err(PerturbationError::Conflict {
                target,
                existing: *existing,
                requested: perturbation,
            }),
            None => {
                self.entries.insert(target, perturbation);
                Ok(())
            }
        }
    }

    /// Set a target's perturbation, returning the previous one.
    pub fn replace(&mut self, target: impl Into<String>, perturbation: Perturbation) -> Option<Perturbation> {
        self.entries.insert(target.into(), perturbation)
    }

    /// Remove a target, returning its perturbation.
    pub fn remove(&mut self, target: &str) -> Option<Perturbation> {
        self.entries.remove(target)
    }

    pub fn get(&self, target: &str) -> Option<&Perturbation> {
        self.entries.get(target)
    }

    pub fn contains(&self, target: &str) -> bool {
        self.entries.contains_key(target)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in target order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Perturbation)> {
        self.entries.iter().map(|(t, p)| (t.as_str(), p))
    }

    /// Target identifiers in order.
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Stable serialized form used for cache keys and tie-breaking.
    pub fn canonical(&self) -> String {
        self.entries
            .iter()
            .map(|(target, p)| format!("{}:{}:{}", p.kind, target, p.action.canonical()))
            .collect::<Vec<_>>()
            .join(";")
    }
}

impl fmt::Display for PerturbationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.canonical())
    }
}

/// Perturbation set errors.
#[derive(Debug, thiserror::Error)]
pub enum PerturbationError {
    #[error("Target {target} already has {existing:?}, cannot apply {requested:?}")]
    Conflict {
        target: String,
        existing: Perturbation,
        requested: Perturbation,
    },
}
