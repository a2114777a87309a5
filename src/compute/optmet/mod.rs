//! OptMet: heuristic search for metabolite and reaction perturbations.
//!
//! This module searches the space of perturbation sets for designs that
//! maximize a production objective, evaluating every candidate through the
//! cached network simulator.
//!
//! # Overview
//!
//! - **Operators** (`operators`): Random generation, set crossover, and mutation
//! - **Search** (`search`): Seeded genetic algorithm with budget and cancellation
//! - **Archive** (`archive`): Best distinct designs and the global ranking order
//! - **Simplify** (`simplify`): Drops targets that do not contribute to the score
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use optmet::compute::NetworkSimulator;
//! use optmet::compute::optmet::OptMetEngine;
//! use optmet::schema::OptMetConfig;
//!
//! fn optimize(simulator: Arc<dyn NetworkSimulator>) -> Result<(), optmet::OptMetError> {
//!     let mut engine = OptMetEngine::new(OptMetConfig::default(), simulator)?;
//!     let result = engine.run_with_callback(|progress| {
//!         println!("Generation {}: best score = {:?}",
//!             progress.generation, progress.best_score);
//!     })?;
//!
//!     for design in &result.designs {
//!         println!("{} -> {}", design.perturbations, design.score());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Selection
//!
//! - `Tournament`: best of `size` uniformly drawn individuals
//! - `RankBased`: probability proportional to rank

mod archive;
mod operators;
mod search;
mod simplify;

pub use archive::{DesignArchive, compare_designs, rank_order};
pub use operators::{DesignRng, DesignSpace};
pub use search::{Candidate, OptMetEngine, run_optmet};
pub use simplify::simplify_design;

use crate::compute::similarity::SearchError;
use crate::compute::simulation::SimulationError;
use crate::compute::store::StoreError;
use crate::schema::OptMetConfigError;

/// Errors that abort an OptMet run or a design replacement.
#[derive(Debug, thiserror::Error)]
pub enum OptMetError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(#[from] OptMetConfigError),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error("Failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}
