//! Genetic search over perturbation sets.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use rayon::prelude::*;

use crate::compute::cache::{CachedEvaluator, cache_key};
use crate::compute::simulation::{NetworkSimulator, SimulationAdapter, SimulationError};
use crate::schema::{
    Design, OptMetConfig, OptMetHistory, OptMetProgress, OptMetResult, OptMetStats, OutputMode,
    PerturbationSet, SelectionMethod, SimulationOutcome, StopReason,
};

use super::OptMetError;
use super::archive::{DesignArchive, rank_order};
use super::operators::{DesignRng, DesignSpace};
use super::simplify::simplify_design;

/// A candidate individual in the population.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Unique identifier.
    pub id: u64,
    /// The perturbations.
    pub perturbations: PerturbationSet,
    /// Canonical form, cached for ranking.
    pub canonical: String,
    /// Outcome, once evaluated. `None` if the budget ran out first.
    pub outcome: Option<SimulationOutcome>,
    /// Generation created.
    pub generation: usize,
    /// Parent IDs.
    pub parents: Vec<u64>,
}

impl Candidate {
    fn new(id: u64, perturbations: PerturbationSet, generation: usize, parents: Vec<u64>) -> Self {
        Self {
            id,
            canonical: perturbations.canonical(),
            perturbations,
            outcome: None,
            generation,
            parents,
        }
    }

    fn score(&self) -> Option<f64> {
        self.outcome
            .as_ref()
            .filter(|o| o.feasible)
            .map(SimulationOutcome::score)
    }

    /// Convert to a design, if evaluated.
    pub fn to_design(&self) -> Option<Design> {
        Some(Design {
            id: self.id,
            perturbations: self.perturbations.clone(),
            outcome: self.outcome.clone()?,
            generation: self.generation,
            parents: self.parents.clone(),
        })
    }
}

fn compare_candidates(a: &Candidate, b: &Candidate) -> std::cmp::Ordering {
    rank_order(
        (a.outcome.as_ref(), a.perturbations.len(), &a.canonical),
        (b.outcome.as_ref(), b.perturbations.len(), &b.canonical),
    )
}

/// Engine that runs the OptMet search.
pub struct OptMetEngine {
    config: OptMetConfig,
    evaluator: Arc<CachedEvaluator>,
    universe: Vec<String>,
    rng: DesignRng,
    pool: rayon::ThreadPool,
    population: Vec<Candidate>,
    archive: DesignArchive,
    history: OptMetHistory,
    generation: usize,
    best_score: Option<f64>,
    stagnation_count: usize,
    spent: AtomicU64,
    hits_at_start: u64,
    next_id: Arc<AtomicU64>,
    cancelled: Arc<AtomicBool>,
    started: Instant,
}

impl OptMetEngine {
    /// Create an engine with a fresh run-scoped cache.
    pub fn new(
        config: OptMetConfig,
        simulator: Arc<dyn NetworkSimulator>,
    ) -> Result<Self, OptMetError> {
        let evaluator = Arc::new(CachedEvaluator::new(SimulationAdapter::new(simulator)));
        Self::with_evaluator(config, evaluator)
    }

    /// Create an engine sharing an existing cache (e.g. one warmed from a
    /// snapshot).
    pub fn with_evaluator(
        config: OptMetConfig,
        evaluator: Arc<CachedEvaluator>,
    ) -> Result<Self, OptMetError> {
        config.validate()?;

        let kind = config.manipulation_type.target_kind();
        let targets = match &config.targets {
            Some(targets) => targets.clone(),
            None => evaluator.adapter().targets(&config.model, kind)?,
        };
        let universe = config.manipulable(targets)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.evaluation.parallel_workers)
            .build()?;

        let seed = config.random_seed.unwrap_or_else(rand::random);
        log::debug!("OptMet seed {seed}, {} manipulable {kind}s", universe.len());

        Ok(Self {
            rng: DesignRng::new(seed),
            archive: DesignArchive::new(config.max_results),
            hits_at_start: evaluator.hits(),
            config,
            evaluator,
            universe,
            pool,
            population: Vec::new(),
            history: OptMetHistory::default(),
            generation: 0,
            best_score: None,
            stagnation_count: 0,
            spent: AtomicU64::new(0),
            next_id: Arc::new(AtomicU64::new(0)),
            cancelled: Arc::new(AtomicBool::new(false)),
            started: Instant::now(),
        })
    }

    /// Get cancellation handle.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// The evaluation cache, shared with post-processing.
    pub fn evaluator(&self) -> &Arc<CachedEvaluator> {
        &self.evaluator
    }

    /// Manipulable targets, essential ones excluded.
    pub fn universe(&self) -> &[String] {
        &self.universe
    }

    /// Initialize the population.
    pub fn initialize(&mut self) {
        self.population.clear();
        self.generation = 0;

        let space = design_space(&self.config, &self.universe);
        for _ in 0..self.config.population.size {
            let set = self.rng.random_set(&space);
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            self.population.push(Candidate::new(id, set, 0, Vec::new()));
        }
    }

    /// Evaluate all unscored candidates.
    ///
    /// Admission runs sequentially in population order: cache hits are
    /// served, and each distinct miss reserves one unit of the simulation
    /// budget until it runs out. Only the admitted misses are then simulated
    /// in parallel, so a binding budget picks the same candidates on every
    /// run with the same seed. Refused candidates stay unscored.
    fn evaluate_population(&mut self) -> Result<(), SimulationError> {
        let evaluator = &self.evaluator;
        let objective = &self.config.objective;
        let model = &self.config.model;
        let spent = &self.spent;
        let cancelled = &self.cancelled;
        let max_evaluations = self.config.max_evaluations;

        let mut admitted: BTreeMap<String, PerturbationSet> = BTreeMap::new();
        for candidate in self.population.iter_mut().filter(|c| c.outcome.is_none()) {
            if let Some(cached) = evaluator.lookup(&candidate.perturbations, objective, model) {
                candidate.outcome = Some(cached);
                continue;
            }
            let key = cache_key(&candidate.perturbations, objective, model);
            if !admitted.contains_key(&key) && reserve(spent, cancelled, max_evaluations) {
                admitted.insert(key, candidate.perturbations.clone());
            }
        }
        if admitted.is_empty() {
            return Ok(());
        }

        let outcomes = self.pool.install(|| {
            admitted
                .into_par_iter()
                .map(|(key, set)| {
                    let mut asked = false;
                    let outcome = evaluator.evaluate_admitted(&set, objective, model, || {
                        asked = true;
                        !cancelled.load(Ordering::Relaxed)
                    })?;
                    // Cancelled, or served by another caller: give the unit back
                    if !asked || outcome.is_none() {
                        spent.fetch_sub(1, Ordering::SeqCst);
                    }
                    Ok((key, outcome))
                })
                .collect::<Result<BTreeMap<_, _>, SimulationError>>()
        })?;

        for candidate in self.population.iter_mut().filter(|c| c.outcome.is_none()) {
            let key = cache_key(&candidate.perturbations, objective, model);
            candidate.outcome = outcomes.get(&key).cloned().flatten();
        }
        Ok(())
    }

    /// Reserve one simulation for post-search work, unless cancelled or out
    /// of budget.
    fn admit(&self) -> bool {
        reserve(&self.spent, &self.cancelled, self.config.max_evaluations)
    }

    /// Rank the population, archive it and record history.
    fn record_generation(&mut self) {
        self.population.sort_by(compare_candidates);

        let gen_best = self.population.iter().find_map(Candidate::score);
        let improved = match (gen_best, self.best_score) {
            (Some(g), Some(b)) => g > b,
            (Some(_), None) => true,
            _ => false,
        };
        if improved {
            self.best_score = gen_best;
            self.stagnation_count = 0;
        } else if self.generation > 0 {
            self.stagnation_count += 1;
        }

        let feasible: Vec<f64> = self.population.iter().filter_map(Candidate::score).collect();
        let feasible_fraction = if self.population.is_empty() {
            0.0
        } else {
            feasible.len() as f64 / self.population.len() as f64
        };
        let avg_feasible =
            (!feasible.is_empty()).then(|| feasible.iter().sum::<f64>() / feasible.len() as f64);

        self.history.best_score.push(self.best_score);
        self.history.avg_feasible_score.push(avg_feasible);
        self.history.feasible_fraction.push(feasible_fraction);

        for design in self.population.iter().filter_map(Candidate::to_design) {
            self.archive.add(design);
        }

        log::debug!(
            "Generation {}: best {:?}, feasible {:.0}%, {} simulations",
            self.generation,
            self.best_score,
            feasible_fraction * 100.0,
            self.spent.load(Ordering::Relaxed)
        );
    }

    /// Genetic algorithm step. Expects a ranked population.
    fn step_genetic_algorithm(&mut self) {
        let ga_config = self.config.algorithm.clone();
        let size = self.config.population.size;
        let mut next_gen = Vec::with_capacity(size);

        // Elitism: keep best individuals with their outcomes
        for elite in self.population.iter().take(ga_config.elitism.min(size)) {
            next_gen.push(elite.clone());
        }

        let space = design_space(&self.config, &self.universe);

        // Fill rest with offspring
        while next_gen.len() < size {
            let idx1 = select_index(&mut self.rng, self.population.len(), &ga_config.selection);
            let idx2 = select_index(&mut self.rng, self.population.len(), &ga_config.selection);
            let parent1 = &self.population[idx1];
            let parent2 = &self.population[idx2];

            let mut child = if self.rng.chance(ga_config.crossover_rate) {
                self.rng
                    .crossover(&parent1.perturbations, &parent2.perturbations, &space)
            } else {
                parent1.perturbations.clone()
            };
            self.rng.mutate(&mut child, ga_config.mutation_rate, &space);

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            next_gen.push(Candidate::new(
                id,
                child,
                self.generation + 1,
                vec![parent1.id, parent2.id],
            ));
        }

        self.population = next_gen;
        self.generation += 1;
    }

    /// Get current progress.
    pub fn progress(&self) -> OptMetProgress {
        let generation_best = self.population.iter().filter_map(Candidate::score).reduce(f64::max);
        let feasible = self.population.iter().filter_map(Candidate::score).count();

        OptMetProgress {
            generation: self.generation,
            max_generations: self.config.population.max_generations,
            simulations: self.spent.load(Ordering::Relaxed),
            max_evaluations: self.config.max_evaluations,
            cache_hits: self.evaluator.hits() - self.hits_at_start,
            best_score: self.best_score,
            generation_best,
            feasible_fraction: if self.population.is_empty() {
                0.0
            } else {
                feasible as f64 / self.population.len() as f64
            },
            stagnation_count: self.stagnation_count,
            best: self.archive.top_n(1).first().map(|d| (*d).clone()),
        }
    }

    /// Check if the search should stop.
    fn should_stop(&self) -> Option<StopReason> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Some(StopReason::Cancelled);
        }

        if self.spent.load(Ordering::SeqCst) >= self.config.max_evaluations {
            return Some(StopReason::EvaluationBudget);
        }

        if let Some(limit) = self.config.population.stagnation_limit
            && self.stagnation_count >= limit
        {
            return Some(StopReason::Stagnation);
        }

        if self.generation >= self.config.population.max_generations {
            return Some(StopReason::MaxGenerations);
        }

        if let Some(limit) = self.config.time_limit_secs
            && self.started.elapsed().as_secs_f64() >= limit
        {
            return Some(StopReason::TimeLimit);
        }

        None
    }

    /// Run the search with a progress callback.
    pub fn run_with_callback<F>(&mut self, callback: F) -> Result<OptMetResult, OptMetError>
    where
        F: Fn(&OptMetProgress),
    {
        self.started = Instant::now();
        log::info!(
            "Starting OptMet on {} ({} targets, population {}, budget {})",
            self.config.model,
            self.universe.len(),
            self.config.population.size,
            self.config.max_evaluations
        );

        // Initialize and evaluate
        self.initialize();
        self.evaluate_population()?;
        self.record_generation();
        callback(&self.progress());

        let stop_reason = loop {
            if let Some(reason) = self.should_stop() {
                break reason;
            }

            self.step_genetic_algorithm();
            self.evaluate_population()?;
            self.record_generation();
            callback(&self.progress());
        };

        let designs = self.collect_designs(stop_reason)?;
        let elapsed = self.started.elapsed().as_secs_f64();

        log::info!(
            "OptMet stopped after {} generations ({:?}): {} designs, best {:?}",
            self.generation,
            stop_reason,
            designs.len(),
            self.best_score
        );

        Ok(OptMetResult {
            designs,
            stats: OptMetStats {
                generations: self.generation,
                simulations: self.spent.load(Ordering::Relaxed),
                cache_hits: self.evaluator.hits() - self.hits_at_start,
                best_score: self.best_score,
                elapsed_seconds: elapsed,
                stop_reason,
            },
            history: self.history.clone(),
        })
    }

    /// Run the search (blocking).
    pub fn run(&mut self) -> Result<OptMetResult, OptMetError> {
        self.run_with_callback(|_| {})
    }

    /// Select output designs, simplifying them first when configured.
    fn collect_designs(&self, stop_reason: StopReason) -> Result<Vec<Design>, OptMetError> {
        if !self.config.simplify || stop_reason == StopReason::Cancelled {
            return Ok(select_output(&self.archive, self.config.output));
        }

        let mut simplified = DesignArchive::new(self.config.max_results);
        for design in self.archive.ranked() {
            simplified.add(simplify_design(
                design,
                &self.evaluator,
                &self.config.objective,
                &self.config.model,
                || self.admit(),
            )?);
        }
        Ok(select_output(&simplified, self.config.output))
    }
}

/// Take one unit of the simulation budget.
fn reserve(spent: &AtomicU64, cancelled: &AtomicBool, max_evaluations: u64) -> bool {
    !cancelled.load(Ordering::Relaxed)
        && spent
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max_evaluations).then_some(n + 1)
            })
            .is_ok()
}

fn design_space<'a>(config: &'a OptMetConfig, universe: &'a [String]) -> DesignSpace<'a> {
    DesignSpace {
        universe,
        kind: config.manipulation_type.target_kind(),
        mode: config.mode,
        max_targets: config.max_knockouts.min(universe.len()),
        variable_size: config.variable_size,
        regulation: &config.regulation,
    }
}

/// Select a parent index from a ranked population (index 0 is best).
fn select_index(rng: &mut DesignRng, len: usize, method: &SelectionMethod) -> usize {
    match method {
        SelectionMethod::Tournament { size } => (0..(*size).max(1))
            .map(|_| rng.index(len))
            .min()
            .unwrap_or(0),
        SelectionMethod::RankBased => {
            // Rank-based: probability proportional to rank
            let total_rank: usize = (1..=len).sum();
            let mut target = rng.index(total_rank);
            for i in 0..len {
                let rank = len - i;
                if target < rank {
                    return i;
                }
                target -= rank;
            }
            0
        }
    }
}

fn select_output(archive: &DesignArchive, mode: OutputMode) -> Vec<Design> {
    let designs = match mode {
        OutputMode::Best => archive.top_n(1),
        OutputMode::ParetoFront => archive.pareto_front(),
        OutputMode::Archive => archive.ranked(),
    };
    designs.into_iter().cloned().collect()
}

/// Run OptMet to completion.
pub fn run_optmet(
    config: OptMetConfig,
    simulator: Arc<dyn NetworkSimulator>,
) -> Result<OptMetResult, OptMetError> {
    OptMetEngine::new(config, simulator)?.run()
}
