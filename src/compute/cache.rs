//! Memoized candidate evaluation.
//!
//! Simulations are expensive, so every outcome is cached under a key built
//! from the network model identity, the objective and the canonical
//! perturbation set. Concurrent requests for the same key share one
//! simulation: each key owns a slot whose lock is held while the simulator
//! runs.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::schema::{NetworkModelRef, ObjectiveSpec, PerturbationSet, SimulationOutcome};

use super::simulation::{SimulationAdapter, SimulationError};

type Slot = Arc<Mutex<Option<SimulationOutcome>>>;

/// Cache key for a (model, objective, perturbation set) triple.
///
/// Every identifier is length-prefixed, so separators inside identifiers
/// cannot make two different triples share a key.
pub fn cache_key(set: &PerturbationSet, objective: &ObjectiveSpec, model: &NetworkModelRef) -> String {
    let mut key = model_prefix(model);
    push_part(&mut key, &format!("{:?}", objective.function));
    push_part(&mut key, &objective.biomass);
    push_part(&mut key, &objective.product);
    push_part(&mut key, &objective.substrate);
    for (target, perturbation) in set.iter() {
        push_part(&mut key, &perturbation.kind.to_string());
        push_part(&mut key, target);
        push_part(&mut key, &format!("{:?}", perturbation.action));
    }
    key
}

/// Leading key parts shared by every entry of one network model.
fn model_prefix(model: &NetworkModelRef) -> String {
    let mut key = String::new();
    push_part(&mut key, &model.id);
    push_part(&mut key, &model.version);
    key
}

fn push_part(key: &mut String, part: &str) {
    key.push_str(&part.len().to_string());
    key.push(':');
    key.push_str(part);
    key.push('|');
}

/// Single-flight evaluation cache in front of a [`SimulationAdapter`].
pub struct CachedEvaluator {
    adapter: SimulationAdapter,
    slots: DashMap<String, Slot>,
    entries: AtomicUsize,
    simulations: AtomicU64,
    hits: AtomicU64,
}

impl CachedEvaluator {
    pub fn new(adapter: SimulationAdapter) -> Self {
        Self {
            adapter,
            slots: DashMap::new(),
            entries: AtomicUsize::new(0),
            simulations: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        }
    }

    /// The wrapped adapter.
    pub fn adapter(&self) -> &SimulationAdapter {
        &self.adapter
    }

    /// Evaluate a set, simulating only on a cache miss.
    pub fn evaluate_cached(
        &self,
        set: &PerturbationSet,
        objective: &ObjectiveSpec,
        model: &NetworkModelRef,
    ) -> Result<SimulationOutcome, SimulationError> {
        let slot = self.slot(set, objective, model);
        let mut outcome = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = self.hit(&outcome) {
            return Ok(cached);
        }
        self.simulate_into(&mut outcome, set, objective, model)
    }

    /// Evaluate a set, asking `admit` before spending a simulation.
    ///
    /// Hits are always served. On a miss `admit` runs once; if it refuses,
    /// `Ok(None)` is returned and nothing is simulated. Failed simulations
    /// leave the slot empty so the next caller retries.
    pub fn evaluate_admitted<F>(
        &self,
        set: &PerturbationSet,
        objective: &ObjectiveSpec,
        model: &NetworkModelRef,
        admit: F,
    ) -> Result<Option<SimulationOutcome>, SimulationError>
    where
        F: FnOnce() -> bool,
    {
        let slot = self.slot(set, objective, model);
        let mut outcome = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = self.hit(&outcome) {
            return Ok(Some(cached));
        }
        if !admit() {
            return Ok(None);
        }
        self.simulate_into(&mut outcome, set, objective, model)
            .map(Some)
    }

    /// Serve a set from cache without ever simulating.
    pub fn lookup(
        &self,
        set: &PerturbationSet,
        objective: &ObjectiveSpec,
        model: &NetworkModelRef,
    ) -> Option<SimulationOutcome> {
        let slot = Arc::clone(self.slots.get(&cache_key(set, objective, model))?.value());
        let outcome = slot.lock().unwrap_or_else(PoisonError::into_inner);
        self.hit(&outcome)
    }

    fn slot(&self, set: &PerturbationSet, objective: &ObjectiveSpec, model: &NetworkModelRef) -> Slot {
        let key = cache_key(set, objective, model);
        Arc::clone(&self.slots.entry(key).or_default())
    }

    fn hit(&self, outcome: &Option<SimulationOutcome>) -> Option<SimulationOutcome> {
        let cached = outcome.clone()?;
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(cached)
    }

    /// Simulate while holding the slot lock and store the outcome.
    fn simulate_into(
        &self,
        slot: &mut Option<SimulationOutcome>,
        set: &PerturbationSet,
        objective: &ObjectiveSpec,
        model: &NetworkModelRef,
    ) -> Result<SimulationOutcome, SimulationError> {
        self.simulations.fetch_add(1, Ordering::Relaxed);
        let outcome = self.adapter.evaluate(set, objective, model)?;
        *slot = Some(outcome.clone());
        self.entries.fetch_add(1, Ordering::Relaxed);
        Ok(outcome)
    }

    /// Simulator calls issued.
    pub fn simulations(&self) -> u64 {
        self.simulations.load(Ordering::Relaxed)
    }

    /// Evaluations served from cache.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of cached outcomes.
    pub fn len(&self) -> usize {
        self.entries.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the cached outcomes of one network model to disk.
    ///
    /// Slots still being simulated are skipped.
    pub fn save_snapshot<P: AsRef<Path>>(
        &self,
        path: P,
        model: &NetworkModelRef,
    ) -> Result<usize, CacheError> {
        let prefix = model_prefix(model);
        let mut entries: Vec<CacheEntry> = self
            .slots
            .iter()
            .filter(|slot| slot.key().starts_with(&prefix))
            .filter_map(|slot| {
                let outcome = slot.value().try_lock().ok()?.clone()?;
                Some(CacheEntry {
                    key: slot.key().clone(),
                    outcome,
                })
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        let count = entries.len();
        let snapshot = CacheSnapshot {
            model: model.clone(),
            entries,
        };
        fs::write(path, serde_json::to_string(&snapshot)?)?;
        log::info!("Saved {count} cached outcomes for {model}");
        Ok(count)
    }

    /// Load a snapshot written for `model`.
    ///
    /// A snapshot taken against a different model id or version is stale
    /// and ignored. Returns the number of outcomes loaded.
    pub fn load_snapshot<P: AsRef<Path>>(
        &self,
        path: P,
        model: &NetworkModelRef,
    ) -> Result<usize, CacheError> {
        let content = fs::read_to_string(path)?;
        let snapshot: CacheSnapshot = serde_json::from_str(&content)?;
        if snapshot.model != *model {
            log::warn!(
                "Ignoring cache snapshot for {} (current model is {})",
                snapshot.model,
                model
            );
            return Ok(0);
        }

        let mut loaded = 0;
        for entry in snapshot.entries {
            let slot = Arc::clone(&self.slots.entry(entry.key).or_default());
            let mut outcome = slot.lock().unwrap_or_else(PoisonError::into_inner);
            if outcome.is_none() {
                *outcome = Some(entry.outcome);
                self.entries.fetch_add(1, Ordering::Relaxed);
                loaded += 1;
            }
        }
        log::info!("Loaded {loaded} cached outcomes for {model}");
        Ok(loaded)
    }
}

/// On-disk cache snapshot.
#[derive(Debug, Serialize, Deserialize)]
struct CacheSnapshot {
    model: NetworkModelRef,
    entries: Vec<CacheEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    key: String,
    outcome: SimulationOutcome,
}

/// Cache persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid cache snapshot: {0}")]
    Json(#[from] serde_json::Error),
}
