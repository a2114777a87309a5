//! OptMet - Metabolite-centric strain design with analogue replacement.
//!
//! This crate searches for metabolite or reaction perturbations that push a
//! constraint-based network model towards a production objective, and maps
//! the resulting designs to structurally similar compounds from a catalogue.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Compounds, perturbations, run configuration and results
//! - `compute`: Compound store, similarity search, simulation adapter,
//!   evaluation cache, the OptMet search and design replacement
//!
//! The network simulator and the compound catalogue are external services,
//! reached through the `NetworkSimulator` and `CompoundStore` traits.
//!
//! # Example
//!
//! ```rust,no_run
//! use optmet::{
//!     compute::{InMemoryCompoundStore, SimilarityEngine},
//!     schema::AnalogueSearchConfig,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemoryCompoundStore::load("catalogue.json")?;
//! let engine = SimilarityEngine::new(&store);
//!
//! let config = AnalogueSearchConfig::default();
//! for analogue in engine.find_analogues_of("SUCC", &config)? {
//!     println!("{}: {:.3}", analogue.key, analogue.similarity);
//! }
//! # Ok(())
//! # }
//! ```

pub mod compute;
pub mod schema;

// Re-export commonly used types
pub use compute::optmet::{OptMetEngine, run_optmet};
pub use compute::{
    CachedEvaluator, CompoundStore, DesignReplacer, InMemoryCompoundStore, NetworkSimulator,
    OptMetError, SimilarityEngine,
};
pub use schema::{AnalogueSearchConfig, Design, OptMetConfig, OptMetResult, ReplacementConfig};
