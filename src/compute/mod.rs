//! Compute module - Simulation, similarity search and strain design.

mod cache;
mod replace;
mod similarity;
mod simulation;
mod store;

#[cfg(test)]
mod testing;

pub mod optmet;

pub use cache::*;
pub use optmet::OptMetError;
pub use replace::*;
pub use similarity::*;
pub use simulation::*;
pub use store::*;
