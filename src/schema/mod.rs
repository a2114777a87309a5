//! Schema module - Catalogue, perturbation and configuration types for OptMet.

mod analogue;
mod compound;
mod optimization;
mod perturbation;

pub use analogue::*;
pub use compound::*;
pub use optimization::*;
pub use perturbation::*;
