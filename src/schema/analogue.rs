//! Analogue search and design replacement types.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::{Compound, Design, ObjectiveSpec, Perturbation, SolubilityClass, StructureCounts};

/// Analogue search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalogueSearchConfig {
    /// Fingerprint scheme to compare under.
    #[serde(default = "default_scheme")]
    pub fingerprint_scheme: String,
    /// Maximum number of analogues returned.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Inclusive similarity floor.
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
    /// Only consider compounds flagged as analogue candidates.
    #[serde(default = "default_candidates_only")]
    pub analogue_candidates_only: bool,
    /// Structural post-filters.
    #[serde(default)]
    pub filters: StructuralFilters,
}

impl Default for AnalogueSearchConfig {
    fn default() -> Self {
        Self {
            fingerprint_scheme: default_scheme(),
            top_k: default_top_k(),
            min_similarity: default_min_similarity(),
            analogue_candidates_only: default_candidates_only(),
            filters: StructuralFilters::default(),
        }
    }
}

fn default_scheme() -> String {
    "maccs".to_string()
}
fn default_top_k() -> usize {
    25
}
fn default_min_similarity() -> f64 {
    0.75
}
fn default_candidates_only() -> bool {
    true
}

impl AnalogueSearchConfig {
    pub fn validate(&self) -> Result<(), AnalogueConfigError> {
        if self.fingerprint_scheme.is_empty() {
            return Err(AnalogueConfigError::EmptyScheme);
        }
        if !(0.0..=1.0).contains(&self.min_similarity) {
            return Err(AnalogueConfigError::InvalidSimilarity(self.min_similarity));
        }
        Ok(())
    }
}

/// Hard structural filters relative to the query compound.
///
/// Differences are inclusive: `max_atom_difference: Some(2)` keeps
/// candidates within ±2 atoms of the query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructuralFilters {
    #[serde(default)]
    pub max_atom_difference: Option<u32>,
    #[serde(default)]
    pub max_bond_difference: Option<u32>,
    #[serde(default)]
    pub max_ring_difference: Option<u32>,
    #[serde(default)]
    pub solubility: SolubilityClass,
}

impl StructuralFilters {
    /// Check a candidate against the query compound's counts.
    ///
    /// Count filters need the query counts; without them only the
    /// solubility class applies.
    pub fn admits(&self, query: Option<StructureCounts>, candidate: &Compound) -> bool {
        if !self.solubility.admits(candidate.solubility) {
            return false;
        }
        let Some(query) = query else {
            return true;
        };
        let within = |limit: Option<u32>, a: u32, b: u32| limit.is_none_or(|n| a.abs_diff(b) <= n);
        within(self.max_atom_difference, query.atoms, candidate.num_atoms)
            && within(self.max_bond_difference, query.bonds, candidate.num_bonds)
            && within(self.max_ring_difference, query.rings, candidate.num_rings)
    }
}

/// A compound with its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCompound {
    pub key: String,
    pub similarity: f64,
}

/// Analogue search configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum AnalogueConfigError {
    #[error("Fingerprint scheme must not be empty")]
    EmptyScheme,
    #[error("min_similarity must be in [0, 1], got {0}")]
    InvalidSimilarity(f64),
}

// ============================================================================
// Design Replacement
// ============================================================================

/// Design replacement configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplacementConfig {
    /// Analogue search applied to every resolved metabolite.
    #[serde(default)]
    pub search: AnalogueSearchConfig,
    /// Reference namespace used to resolve model species to compounds.
    #[serde(default = "default_reference_namespace")]
    pub reference_namespace: String,
    /// Cofactors never proposed for replacement.
    #[serde(default = "default_currency_metabolites")]
    pub currency_metabolites: BTreeSet<String>,
    /// Metabolite species that must not be inhibited; skipped for
    /// up-regulated reactions.
    #[serde(default)]
    pub essential_metabolites: BTreeSet<String>,
    /// Reference flux per reaction; its sign picks the metabolites a
    /// reaction target acts on. Missing or zero means unknown.
    #[serde(default)]
    pub reference_fluxes: BTreeMap<String, f64>,
    /// Re-simulate reaction knockouts replaced by metabolite knockouts.
    #[serde(default)]
    pub validation: Option<ReplacementValidation>,
}

impl Default for ReplacementConfig {
    fn default() -> Self {
        Self {
            search: AnalogueSearchConfig::default(),
            reference_namespace: default_reference_namespace(),
            currency_metabolites: default_currency_metabolites(),
            essential_metabolites: BTreeSet::new(),
            reference_fluxes: BTreeMap::new(),
            validation: None,
        }
    }
}

fn default_reference_namespace() -> String {
    "bigg.metabolite".to_string()
}

fn default_currency_metabolites() -> BTreeSet<String> {
    [
        "atp", "adp", "nad", "nadh", "nadp", "nadph", "amp", "h2o", "h", "coa", "acp", "pi",
        "pppi", "ppi",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Settings for checking replacements against the simulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplacementValidation {
    /// Objective the replacement must preserve.
    pub objective: ObjectiveSpec,
    /// Maximum relative score loss accepted.
    #[serde(default = "default_max_loss")]
    pub max_loss: f64,
}

fn default_max_loss() -> f64 {
    0.2
}

/// A design annotated with per-target analogue information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplacedDesign {
    pub design: Design,
    pub targets: Vec<ReplacedTarget>,
}

impl ReplacedDesign {
    /// Targets that resolved to at least one metabolite.
    pub fn resolved(&self) -> impl Iterator<Item = &ReplacedTarget> {
        self.targets
            .iter()
            .filter(|t| matches!(t.resolution, TargetResolution::Resolved(_)))
    }
}

/// One design target and what it resolved to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplacedTarget {
    pub target: String,
    pub perturbation: Perturbation,
    pub resolution: TargetResolution,
}

/// Outcome of resolving a design target to metabolites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TargetResolution {
    /// One entry per resolved metabolite.
    Resolved(Vec<MetaboliteAnalogues>),
    /// Reaction with no metabolite left to replace.
    Unresolved,
    /// The target could not be processed.
    Failed { reason: String },
}

/// Analogues found for one metabolite species.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaboliteAnalogues {
    /// Model species identifier, compartment removed.
    pub species: String,
    pub lookup: AnalogueLookup,
    /// Inhibition needed to mimic a regulated target, in `[0, 1)`.
    #[serde(default)]
    pub fraction: Option<f64>,
    /// Present when replacement validation ran for this species.
    #[serde(default)]
    pub check: Option<ReplacementCheck>,
}

/// Catalogue lookup result for one species.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AnalogueLookup {
    /// The species resolved to `compound`; analogues ranked best first.
    Found {
        compound: String,
        analogues: Vec<ScoredCompound>,
    },
    /// No catalogue compound matches the species.
    NotFound { reason: String },
    /// The compound has no fingerprint under the configured scheme.
    MissingFingerprint { compound: String, scheme: String },
}

/// Simulated comparison of a reaction knockout with a metabolite knockout.
///
/// Scores are `None` when the corresponding design is infeasible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplacementCheck {
    /// Design with the reaction knockout removed.
    pub base_score: Option<f64>,
    /// Design with the reaction replaced by the metabolite knockout.
    pub replacement_score: Option<f64>,
    /// Relative loss against the original design score.
    pub loss: Option<f64>,
    pub accepted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compound(key: &str, atoms: u32, bonds: u32, rings: u32, solubility: Option<f64>) -> Compound {
        Compound {
            key: key.to_string(),
            structure: String::new(),
            formula: String::new(),
            num_atoms: atoms,
            num_bonds: bonds,
            num_rings: rings,
            solubility,
            rendered: None,
            analogue_candidate: true,
            synonyms: vec![],
            references: vec![],
        }
    }

    #[test]
    fn test_structural_filters_inclusive() {
        let filters = StructuralFilters {
            max_atom_difference: Some(2),
            max_ring_difference: Some(0),
            ..Default::default()
        };
        let query = Some(StructureCounts {
            atoms: 10,
            bonds: 10,
            rings: 1,
        });
        assert!(filters.admits(query, &compound("a", 12, 30, 1, None)));
        assert!(filters.admits(query, &compound("b", 8, 0, 1, None)));
        assert!(!filters.admits(query, &compound("c", 13, 10, 1, None)));
        assert!(!filters.admits(query, &compound("d", 10, 10, 2, None)));
    }

    #[test]
    fn test_solubility_filter_without_query_counts() {
        let filters = StructuralFilters {
            max_atom_difference: Some(0),
            solubility: SolubilityClass::High,
            ..Default::default()
        };
        assert!(filters.admits(None, &compound("a", 99, 0, 0, Some(50.0))));
        assert!(!filters.admits(None, &compound("b", 99, 0, 0, Some(1.0))));
    }

    #[test]
    fn test_default_currency_metabolites() {
        let config = ReplacementConfig::default();
        assert!(config.currency_metabolites.contains("atp"));
        assert!(config.currency_metabolites.contains("h2o"));
        assert_eq!(config.currency_metabolites.len(), 14);
    }

    #[test]
    fn test_invalid_similarity() {
        let config = AnalogueSearchConfig {
            min_similarity: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(AnalogueConfigError::InvalidSimilarity(_))
        ));
    }
}
