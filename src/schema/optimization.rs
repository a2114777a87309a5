//! OptMet configuration, simulation outcomes and search result types.
//!
//! This module provides the types for configuring the heuristic search over
//! perturbation sets and for reporting its progress and results.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{PerturbationSet, TargetKind};

/// Top-level configuration for an OptMet run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptMetConfig {
    /// Network model the designs are evaluated against.
    pub model: NetworkModelRef,
    /// Objective to maximize.
    pub objective: ObjectiveSpec,
    /// Whether the search manipulates metabolites or reactions.
    #[serde(default)]
    pub manipulation_type: ManipulationType,
    /// Knockouts only, or knockouts plus flux regulation.
    #[serde(default)]
    pub mode: DesignMode,
    /// Manipulable targets. When absent, the simulator is asked for them.
    #[serde(default)]
    pub targets: Option<Vec<String>>,
    /// Targets that must never be manipulated.
    #[serde(default)]
    pub essential_targets: BTreeSet<String>,
    /// Upper bound on simultaneous targets in a design.
    #[serde(default = "default_max_knockouts")]
    pub max_knockouts: usize,
    /// If true, candidate sizes range over 1..=max_knockouts; otherwise all
    /// candidates have exactly max_knockouts targets.
    #[serde(default = "default_variable_size")]
    pub variable_size: bool,
    /// Simulation call budget (cache hits are free).
    #[serde(default = "default_max_evaluations")]
    pub max_evaluations: u64,
    /// Genetic algorithm settings.
    #[serde(default)]
    pub algorithm: GeneticAlgorithmConfig,
    /// Population and generation settings.
    #[serde(default)]
    pub population: PopulationConfig,
    /// Evaluation settings.
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    /// Fold-change bounds for regulation in ALE mode.
    #[serde(default)]
    pub regulation: RegulationBounds,
    /// Which designs to return.
    #[serde(default)]
    pub output: OutputMode,
    /// Maximum number of distinct designs kept in the archive.
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Wall-clock limit in seconds.
    #[serde(default)]
    pub time_limit_secs: Option<f64>,
    /// Drop targets that do not contribute to the score from output designs.
    #[serde(default)]
    pub simplify: bool,
    /// Random seed for reproducibility.
    #[serde(default)]
    pub random_seed: Option<u64>,
}

impl Default for OptMetConfig {
    fn default() -> Self {
        Self {
            model: NetworkModelRef {
                id: "iJO1366".to_string(),
                version: "1".to_string(),
            },
            objective: ObjectiveSpec::default(),
            manipulation_type: ManipulationType::default(),
            mode: DesignMode::default(),
            targets: None,
            essential_targets: BTreeSet::new(),
            max_knockouts: default_max_knockouts(),
            variable_size: default_variable_size(),
            max_evaluations: default_max_evaluations(),
            algorithm: GeneticAlgorithmConfig::default(),
            population: PopulationConfig::default(),
            evaluation: EvaluationConfig::default(),
            regulation: RegulationBounds::default(),
            output: OutputMode::default(),
            max_results: default_max_results(),
            time_limit_secs: None,
            simplify: false,
            random_seed: None,
        }
    }
}

fn default_max_knockouts() -> usize {
    5
}
fn default_variable_size() -> bool {
    true
}
fn default_max_evaluations() -> u64 {
    20000
}
fn default_max_results() -> usize {
    50
}

/// Reference to a versioned network model.
///
/// The version participates in cache keys, so results computed against an
/// older model are never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkModelRef {
    pub id: String,
    pub version: String,
}

impl fmt::Display for NetworkModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.version)
    }
}

/// Manipulation universe selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManipulationType {
    #[default]
    Metabolites,
    Reactions,
}

impl ManipulationType {
    pub fn target_kind(&self) -> TargetKind {
        match self {
            ManipulationType::Metabolites => TargetKind::Metabolite,
            ManipulationType::Reactions => TargetKind::Reaction,
        }
    }
}

/// Kind of designs searched for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesignMode {
    /// Total loss of function only (knockouts).
    #[default]
    Mutagenesis,
    /// Knockouts and flux up/down-regulation, as selected by adaptive evolution.
    Ale,
}

/// Objective specification sent to the simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveSpec {
    /// How the score is derived from the simulation.
    #[serde(default)]
    pub function: ObjectiveFunction,
    /// Biomass reaction identifier.
    pub biomass: String,
    /// Product (design target) reaction identifier.
    pub product: String,
    /// Main carbon source uptake reaction identifier.
    pub substrate: String,
}

impl Default for ObjectiveSpec {
    fn default() -> Self {
        Self {
            function: ObjectiveFunction::default(),
            biomass: "BIOMASS_Ec_iJO1366_core_53p95M".to_string(),
            product: "EX_succ_e".to_string(),
            substrate: "EX_glc__D_e".to_string(),
        }
    }
}

impl ObjectiveSpec {
    /// Reactions whose fluxes the score depends on.
    pub fn fluxes_of_interest(&self) -> Vec<String> {
        vec![
            self.biomass.clone(),
            self.product.clone(),
            self.substrate.clone(),
        ]
    }

    /// Reactions whose flux range (variability) the score depends on.
    pub fn flux_ranges_of_interest(&self) -> Vec<String> {
        match self.function {
            ObjectiveFunction::BiomassProductCoupledMinYield => vec![self.product.clone()],
            _ => Vec::new(),
        }
    }
}

/// Score derived from a flux distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ObjectiveFunction {
    /// The simulator's own objective value.
    Objective,
    /// product / |substrate|
    ProductYield,
    /// biomass * product / |substrate|
    #[default]
    BiomassProductCoupledYield,
    /// biomass * minimum product / |substrate|, with the minimum product
    /// flux taken from variability analysis at the optimum (growth coupling).
    BiomassProductCoupledMinYield,
}

/// Genetic algorithm configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneticAlgorithmConfig {
    /// Selection method.
    #[serde(default)]
    pub selection: SelectionMethod,
    /// Crossover probability (0.0-1.0).
    #[serde(default = "default_crossover_rate")]
    pub crossover_rate: f32,
    /// Probability of each mutation operator firing on a child (0.0-1.0).
    #[serde(default = "default_mutation_rate")]
    pub mutation_rate: f32,
    /// Elitism: number of best individuals carried over unchanged.
    #[serde(default = "default_elitism")]
    pub elitism: usize,
}

impl Default for GeneticAlgorithmConfig {
    fn default() -> Self {
        Self {
            selection: SelectionMethod::default(),
            crossover_rate: default_crossover_rate(),
            mutation_rate: default_mutation_rate(),
            elitism: default_elitism(),
        }
    }
}

fn default_crossover_rate() -> f32 {
    0.8
}
fn default_mutation_rate() -> f32 {
    0.2
}
fn default_elitism() -> usize {
    2
}

/// Parent selection method.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum SelectionMethod {
    /// Tournament selection with configurable size.
    Tournament {
        #[serde(default = "default_tournament_size")]
        size: usize,
    },
    /// Rank-based selection.
    RankBased,
}

impl Default for SelectionMethod {
    fn default() -> Self {
        Self::Tournament {
            size: default_tournament_size(),
        }
    }
}

fn default_tournament_size() -> usize {
    3
}

/// Population and generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationConfig {
    /// Number of individuals in population.
    #[serde(default = "default_population_size")]
    pub size: usize,
    /// Maximum number of generations.
    #[serde(default = "default_max_generations")]
    pub max_generations: usize,
    /// Stop if the best score has not improved for N generations.
    #[serde(default = "default_stagnation_limit")]
    pub stagnation_limit: Option<usize>,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            size: default_population_size(),
            max_generations: default_max_generations(),
            stagnation_limit: default_stagnation_limit(),
        }
    }
}

fn default_population_size() -> usize {
    200
}
fn default_max_generations() -> usize {
    1000
}
fn default_stagnation_limit() -> Option<usize> {
    Some(30)
}

/// Evaluation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Number of concurrent simulations (0 = auto-detect).
    #[serde(default)]
    pub parallel_workers: usize,
}

/// Fold-change bounds for regulation targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegulationBounds {
    /// Up-regulation fold change range (both > 1).
    #[serde(default = "default_up_bounds")]
    pub up_bounds: (f64, f64),
    /// Down-regulation fold change range (both in (0, 1)).
    #[serde(default = "default_down_bounds")]
    pub down_bounds: (f64, f64),
    /// Gaussian mutation strength, relative to the bound width.
    #[serde(default = "default_regulation_strength")]
    pub mutation_strength: f64,
}

impl Default for RegulationBounds {
    fn default() -> Self {
        Self {
            up_bounds: default_up_bounds(),
            down_bounds: default_down_bounds(),
            mutation_strength: default_regulation_strength(),
        }
    }
}

fn default_up_bounds() -> (f64, f64) {
    (1.5, 10.0)
}
fn default_down_bounds() -> (f64, f64) {
    (0.05, 0.75)
}
fn default_regulation_strength() -> f64 {
    0.1
}

/// Which designs a run returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputMode {
    /// Only the single best design.
    Best,
    /// Feasible designs not dominated in (score, number of targets).
    ParetoFront,
    /// Every archived design, best first.
    #[default]
    Archive,
}

// ============================================================================
// Simulation Outcomes
// ============================================================================

/// Solver status reported by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverStatus {
    Optimal,
    Infeasible,
    Unbounded,
    TimeLimit,
    NumericFailure,
}

/// Normalized result of simulating one perturbation set.
///
/// Infeasible results are ordinary outcomes; `score()` ranks them below
/// every feasible one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationOutcome {
    pub feasible: bool,
    /// Score when feasible.
    pub objective_value: Option<f64>,
    pub solver_status: SolverStatus,
    /// Key fluxes, when the simulator reported them.
    #[serde(default)]
    pub phenotype: Option<Phenotype>,
}

impl SimulationOutcome {
    pub fn infeasible(status: SolverStatus) -> Self {
        Self {
            feasible: false,
            objective_value: None,
            solver_status: status,
            phenotype: None,
        }
    }

    /// Objective score, or negative infinity when infeasible.
    pub fn score(&self) -> f64 {
        match (self.feasible, self.objective_value) {
            (true, Some(value)) => value,
            _ => f64::NEG_INFINITY,
        }
    }
}

/// Fluxes describing the simulated phenotype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phenotype {
    pub biomass_flux: f64,
    pub product_flux: f64,
    pub substrate_flux: f64,
    /// product / |substrate| (0 when there is no uptake).
    pub product_yield: f64,
}

// ============================================================================
// Designs, Progress and Results
// ============================================================================

/// A scored perturbation set with provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Design {
    /// Unique identifier within the run.
    pub id: u64,
    /// The perturbations.
    pub perturbations: PerturbationSet,
    /// Simulation outcome.
    pub outcome: SimulationOutcome,
    /// Generation created.
    pub generation: usize,
    /// Parent IDs.
    pub parents: Vec<u64>,
}

impl Design {
    pub fn score(&self) -> f64 {
        self.outcome.score()
    }

    pub fn size(&self) -> usize {
        self.perturbations.len()
    }
}

/// Progress update emitted after each generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptMetProgress {
    /// Current generation number.
    pub generation: usize,
    /// Generation cap.
    pub max_generations: usize,
    /// Simulation calls spent so far.
    pub simulations: u64,
    /// Simulation budget.
    pub max_evaluations: u64,
    /// Cache hits so far.
    pub cache_hits: u64,
    /// Best feasible score seen so far.
    pub best_score: Option<f64>,
    /// Best feasible score in the current population.
    pub generation_best: Option<f64>,
    /// Fraction of the population that is feasible.
    pub feasible_fraction: f64,
    /// Generations since last improvement.
    pub stagnation_count: usize,
    /// Current best design.
    pub best: Option<Design>,
}

/// Per-generation history.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OptMetHistory {
    /// Running best feasible score (non-decreasing).
    pub best_score: Vec<Option<f64>>,
    /// Mean score of feasible candidates.
    pub avg_feasible_score: Vec<Option<f64>>,
    /// Fraction of feasible candidates.
    pub feasible_fraction: Vec<f64>,
}

/// Final result of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptMetResult {
    /// Designs selected by the output mode, best first.
    pub designs: Vec<Design>,
    /// Statistics from the run.
    pub stats: OptMetStats,
    /// Full history for analysis.
    pub history: OptMetHistory,
}

impl OptMetResult {
    pub fn best(&self) -> Option<&Design> {
        self.designs.first()
    }
}

/// Statistics from a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptMetStats {
    /// Generations completed.
    pub generations: usize,
    /// Simulation calls issued.
    pub simulations: u64,
    /// Evaluations served from cache.
    pub cache_hits: u64,
    /// Best feasible score.
    pub best_score: Option<f64>,
    /// Time taken (in seconds).
    pub elapsed_seconds: f64,
    /// Reason for stopping.
    pub stop_reason: StopReason,
}

/// Reason the search stopped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopReason {
    /// Simulation budget spent.
    EvaluationBudget,
    /// No improvement for the configured number of generations.
    Stagnation,
    /// Cancelled through the cancel handle.
    Cancelled,
    /// Generation cap reached.
    MaxGenerations,
    /// Wall-clock limit reached.
    TimeLimit,
}

// ============================================================================
// Validation
// ============================================================================

/// OptMet configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum OptMetConfigError {
    #[error("Population size must be at least 2")]
    PopulationTooSmall,
    #[error("max_knockouts must be at least 1")]
    NoKnockoutsAllowed,
    #[error("max_evaluations must be at least 1")]
    NoEvaluationBudget,
    #[error("max_results must be at least 1")]
    NoResults,
    #[error("Tournament size must be at least 1")]
    InvalidTournament,
    #[error("{name} must be in [0, 1], got {value}")]
    InvalidRate { name: &'static str, value: f32 },
    #[error("Invalid regulation bounds: {0}")]
    InvalidRegulationBounds(String),
    #[error("Objective {0} identifier is empty")]
    MissingObjective(&'static str),
    #[error("Time limit must be positive")]
    InvalidTimeLimit,
    #[error("No manipulable targets left after excluding {essential} essential targets")]
    EmptyUniverse { essential: usize },
}

impl OptMetConfig {
    /// Validate configuration before any simulation is issued.
    pub fn validate(&self) -> Result<(), OptMetConfigError> {
        if self.population.size < 2 {
            return Err(OptMetConfigError::PopulationTooSmall);
        }
        if self.max_knockouts == 0 {
            return Err(OptMetConfigError::NoKnockoutsAllowed);
        }
        if self.max_evaluations == 0 {
            return Err(OptMetConfigError::NoEvaluationBudget);
        }
        if self.max_results == 0 {
            return Err(OptMetConfigError::NoResults);
        }
        if let SelectionMethod::Tournament { size } = self.algorithm.selection
            && size == 0
        {
            return Err(OptMetConfigError::InvalidTournament);
        }

        let check_rate = |value: f32, name: &'static str| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(OptMetConfigError::InvalidRate { name, value })
            }
        };
        check_rate(self.algorithm.crossover_rate, "crossover_rate")?;
        check_rate(self.algorithm.mutation_rate, "mutation_rate")?;

        let (up_lo, up_hi) = self.regulation.up_bounds;
        if !(1.0 < up_lo && up_lo <= up_hi) {
            return Err(OptMetConfigError::InvalidRegulationBounds(format!(
                "up-regulation ({up_lo}, {up_hi}) must satisfy 1 < min <= max"
            )));
        }
        let (down_lo, down_hi) = self.regulation.down_bounds;
        if !(0.0 < down_lo && down_lo <= down_hi && down_hi < 1.0) {
            return Err(OptMetConfigError::InvalidRegulationBounds(format!(
                "down-regulation ({down_lo}, {down_hi}) must satisfy 0 < min <= max < 1"
            )));
        }

        if self.objective.biomass.is_empty() {
            return Err(OptMetConfigError::MissingObjective("biomass"));
        }
        if self.objective.product.is_empty() {
            return Err(OptMetConfigError::MissingObjective("product"));
        }
        if self.objective.substrate.is_empty() {
            return Err(OptMetConfigError::MissingObjective("substrate"));
        }

        if let Some(limit) = self.time_limit_secs
            && !(limit > 0.0)
        {
            return Err(OptMetConfigError::InvalidTimeLimit);
        }

        if let Some(targets) = &self.targets {
            self.manipulable(targets.iter().cloned())?;
        }

        Ok(())
    }

    /// Resolve the manipulation universe: essential targets removed, sorted
    /// and deduplicated.
    ///
    /// Essential targets are never part of a design, so their number does
    /// not compete with `max_knockouts`; only an empty universe makes the
    /// search impossible.
    pub fn manipulable<I>(&self, targets: I) -> Result<Vec<String>, OptMetConfigError>
    where
        I: IntoIterator<Item = String>,
    {
        let universe: BTreeSet<String> = targets
            .into_iter()
            .filter(|t| !self.essential_targets.contains(t))
            .collect();
        if universe.is_empty() {
            return Err(OptMetConfigError::EmptyUniverse {
                essential: self.essential_targets.len(),
            });
        }
        Ok(universe.into_iter().collect())
    }
}
