//! Compound store interface and an in-memory catalogue implementation.
//!
//! The persistent catalogue lives outside this crate; everything here talks
//! to it through [`CompoundStore`]. [`InMemoryCompoundStore`] loads a JSON
//! snapshot of the catalogue and is what the CLI and tests use.

use std::collections::BTreeMap;
use std::fs;
use std::ops::RangeInclusive;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::schema::{Compound, Fingerprint, FingerprintError};

/// Lazy stream of compounds produced by [`CompoundStore::search`].
pub type CompoundIter<'a> = Box<dyn Iterator<Item = Result<Compound, StoreError>> + Send + 'a>;

/// Read-only access to the compound catalogue.
pub trait CompoundStore: Send + Sync {
    /// Look up a compound by its structure key.
    fn get_by_key(&self, key: &str) -> Result<Compound, StoreError>;

    /// Fingerprint of a compound under a scheme.
    fn get_fingerprint(&self, key: &str, scheme: &str) -> Result<Fingerprint, StoreError>;

    /// Stream compounds matching a query, ordered by structure key.
    ///
    /// Every call starts a fresh pass over the catalogue.
    fn search<'a>(&'a self, query: &CompoundQuery) -> Result<CompoundIter<'a>, StoreError>;

    /// Compounds citing a `namespace:identifier` reference.
    fn find_by_reference(&self, reference: &str) -> Result<Vec<Compound>, StoreError>;

    /// Compounds with a synonym matching `text` (case-insensitive).
    fn find_by_synonym(&self, text: &str) -> Result<Vec<Compound>, StoreError>;
}

/// Compound store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Not found: {what}")]
    NotFound { what: String },
    #[error("Compound store unavailable during {operation}: {reason}")]
    Unavailable { operation: String, reason: String },
}

impl StoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Catalogue query. All ranges are inclusive; absent fields match anything.
#[derive(Debug, Clone, Default)]
pub struct CompoundQuery {
    pub atoms: Option<RangeInclusive<u32>>,
    pub bonds: Option<RangeInclusive<u32>>,
    pub rings: Option<RangeInclusive<u32>>,
    pub formula: Option<String>,
    pub analogue_candidates_only: bool,
}

impl CompoundQuery {
    /// Query matching every analogue candidate.
    pub fn analogue_candidates() -> Self {
        Self {
            analogue_candidates_only: true,
            ..Default::default()
        }
    }

    /// Check a compound against the query.
    pub fn matches(&self, compound: &Compound) -> bool {
        let in_range = |range: &Option<RangeInclusive<u32>>, value: u32| {
            range.as_ref().is_none_or(|r| r.contains(&value))
        };
        (!self.analogue_candidates_only || compound.analogue_candidate)
            && in_range(&self.atoms, compound.num_atoms)
            && in_range(&self.bonds, compound.num_bonds)
            && in_range(&self.rings, compound.num_rings)
            && self
                .formula
                .as_ref()
                .is_none_or(|f| *f == compound.formula)
    }
}

// ============================================================================
// In-memory catalogue
// ============================================================================

/// Snapshot format version understood by [`InMemoryCompoundStore`].
pub const CATALOGUE_SCHEMA_VERSION: u32 = 1;

/// JSON catalogue snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogueSnapshot {
    pub schema_version: u32,
    pub compounds: Vec<Compound>,
    #[serde(default)]
    pub fingerprints: Vec<FingerprintRecord>,
}

/// One stored fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintRecord {
    pub compound: String,
    pub scheme: String,
    pub bits: String,
}

/// Catalogue loading errors.
#[derive(Debug, thiserror::Error)]
pub enum CatalogueError {
    #[error("Duplicate compound key: {0}")]
    DuplicateCompound(String),
    #[error("Duplicate {scheme} fingerprint for compound {compound}")]
    DuplicateFingerprint { compound: String, scheme: String },
    #[error("Fingerprint references unknown compound {0}")]
    UnknownCompound(String),
    #[error("Unsupported catalogue schema version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("Invalid fingerprint: {0}")]
    Fingerprint(#[from] FingerprintError),
    #[error("Failed to read catalogue: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse catalogue: {0}")]
    Json(#[from] serde_json::Error),
}

/// Catalogue held in memory, keyed by structure key.
#[derive(Debug, Default)]
pub struct InMemoryCompoundStore {
    compounds: BTreeMap<String, Compound>,
    fingerprints: BTreeMap<(String, String), Fingerprint>,
}

impl InMemoryCompoundStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a compound; keys must be unique.
    pub fn insert_compound(&mut self, compound: Compound) -> Result<(), CatalogueError> {
        if self.compounds.contains_key(&compound.key) {
            return Err(CatalogueError::DuplicateCompound(compound.key));
        }
        self.compounds.insert(compound.key.clone(), compound);
        Ok(())
    }

    /// Attach a fingerprint to an existing compound, one per scheme.
    pub fn insert_fingerprint(
        &mut self,
        compound: &str,
        fingerprint: Fingerprint,
    ) -> Result<(), CatalogueError> {
        if !self.compounds.contains_key(compound) {
            return Err(CatalogueError::UnknownCompound(compound.to_string()));
        }
        let slot = (compound.to_string(), fingerprint.scheme().to_string());
        if self.fingerprints.contains_key(&slot) {
            return Err(CatalogueError::DuplicateFingerprint {
                compound: slot.0,
                scheme: slot.1,
            });
        }
        self.fingerprints.insert(slot, fingerprint);
        Ok(())
    }

    /// Build a store from a parsed snapshot.
    pub fn from_snapshot(snapshot: CatalogueSnapshot) -> Result<Self, CatalogueError> {
        if snapshot.schema_version != CATALOGUE_SCHEMA_VERSION {
            return Err(CatalogueError::UnsupportedVersion {
                found: snapshot.schema_version,
                expected: CATALOGUE_SCHEMA_VERSION,
            });
        }

        let mut store = Self::new();
        for compound in snapshot.compounds {
            store.insert_compound(compound)?;
        }
        for record in snapshot.fingerprints {
            let fingerprint = Fingerprint::from_bit_string(&record.scheme, &record.bits)?;
            store.insert_fingerprint(&record.compound, fingerprint)?;
        }

        log::debug!(
            "Loaded catalogue with {} compounds and {} fingerprints",
            store.compounds.len(),
            store.fingerprints.len()
        );
        Ok(store)
    }

    /// Parse a JSON catalogue snapshot.
    pub fn from_json(json: &str) -> Result<Self, CatalogueError> {
        Self::from_snapshot(serde_json::from_str(json)?)
    }

    /// Load a JSON catalogue snapshot from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CatalogueError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Export the catalogue as a snapshot.
    pub fn to_snapshot(&self) -> CatalogueSnapshot {
        CatalogueSnapshot {
            schema_version: CATALOGUE_SCHEMA_VERSION,
            compounds: self.compounds.values().cloned().collect(),
            fingerprints: self
                .fingerprints
                .iter()
                .map(|((compound, scheme), fp)| FingerprintRecord {
                    compound: compound.clone(),
                    scheme: scheme.clone(),
                    bits: fp.to_bit_string(),
                })
                .collect(),
        }
    }

    /// Write the catalogue to disk as JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), CatalogueError> {
        let json = serde_json::to_string_pretty(&self.to_snapshot())?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Number of compounds.
    pub fn len(&self) -> usize {
        self.compounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compounds.is_empty()
    }
}

impl CompoundStore for InMemoryCompoundStore {
    fn get_by_key(&self, key: &str) -> Result<Compound, StoreError> {
        self.compounds
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("compound {key}")))
    }

    fn get_fingerprint(&self, key: &str, scheme: &str) -> Result<Fingerprint, StoreError> {
        self.fingerprints
            .get(&(key.to_string(), scheme.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("{scheme} fingerprint of {key}")))
    }

    fn search<'a>(&'a self, query: &CompoundQuery) -> Result<CompoundIter<'a>, StoreError> {
        let query = query.clone();
        Ok(Box::new(
            self.compounds
                .values()
                .filter(move |c| query.matches(c))
                .cloned()
                .map(Ok),
        ))
    }

    fn find_by_reference(&self, reference: &str) -> Result<Vec<Compound>, StoreError> {
        Ok(self
            .compounds
            .values()
            .filter(|c| c.has_reference(reference))
            .cloned()
            .collect())
    }

    fn find_by_synonym(&self, text: &str) -> Result<Vec<Compound>, StoreError> {
        let needle = text.to_lowercase();
        Ok(self
            .compounds
            .values()
            .filter(|c| c.synonyms.iter().any(|s| s.to_lowercase() == needle))
            .cloned()
            .collect())
    }
}
