//! Fingerprint similarity search over the compound store.

use rayon::prelude::*;

use crate::schema::{
    AnalogueConfigError, AnalogueSearchConfig, Compound, Fingerprint, ScoredCompound,
    StructureCounts,
};

use super::store::{CompoundQuery, CompoundStore, StoreError};

/// Tanimoto coefficient |a ∧ b| / |a ∨ b|.
///
/// Shorter fingerprints are zero-extended. Identical bit sets score 1.0,
/// including two all-zero fingerprints.
pub fn tanimoto(a: &Fingerprint, b: &Fingerprint) -> f64 {
    let (a, b) = (a.words(), b.words());
    let mut intersection = 0u32;
    let mut union = 0u32;
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        intersection += (x & y).count_ones();
        union += (x | y).count_ones();
    }
    if union == 0 {
        1.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Similarity search errors.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Compound {key} has no {scheme} fingerprint")]
    MissingFingerprint { key: String, scheme: String },
    #[error("Query fingerprint uses scheme {found}, search configured for {expected}")]
    SchemeMismatch { expected: String, found: String },
    #[error("Invalid search configuration: {0}")]
    Config(#[from] AnalogueConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Ranks catalogue compounds by fingerprint similarity.
pub struct SimilarityEngine<'a> {
    store: &'a dyn CompoundStore,
}

impl<'a> SimilarityEngine<'a> {
    pub fn new(store: &'a dyn CompoundStore) -> Self {
        Self { store }
    }

    /// Find analogues of a query fingerprint.
    ///
    /// `counts` are the query compound's structure counts; count filters are
    /// skipped without them.
    pub fn find_analogues(
        &self,
        fingerprint: &Fingerprint,
        counts: Option<StructureCounts>,
        config: &AnalogueSearchConfig,
    ) -> Result<Vec<ScoredCompound>, SearchError> {
        self.rank(fingerprint, counts, None, config)
    }

    /// Find analogues of a catalogue compound, excluding the compound itself.
    pub fn find_analogues_of(
        &self,
        key: &str,
        config: &AnalogueSearchConfig,
    ) -> Result<Vec<ScoredCompound>, SearchError> {
        let compound = self.store.get_by_key(key)?;
        let fingerprint = self
            .store
            .get_fingerprint(key, &config.fingerprint_scheme)
            .map_err(|e| match e {
                StoreError::NotFound { .. } => SearchError::MissingFingerprint {
                    key: key.to_string(),
                    scheme: config.fingerprint_scheme.clone(),
                },
                other => SearchError::Store(other),
            })?;
        self.rank(&fingerprint, Some(compound.counts()), Some(key), config)
    }

    fn rank(
        &self,
        fingerprint: &Fingerprint,
        counts: Option<StructureCounts>,
        exclude: Option<&str>,
        config: &AnalogueSearchConfig,
    ) -> Result<Vec<ScoredCompound>, SearchError> {
        config.validate()?;
        if fingerprint.scheme() != config.fingerprint_scheme {
            return Err(SearchError::SchemeMismatch {
                expected: config.fingerprint_scheme.clone(),
                found: fingerprint.scheme().to_string(),
            });
        }

        let candidates = self.load_candidates(counts, exclude, config)?;

        let filters = &config.filters;
        let mut scored: Vec<ScoredCompound> = candidates
            .par_iter()
            .filter_map(|(compound, candidate_fp)| {
                let similarity = tanimoto(fingerprint, candidate_fp);
                (similarity >= config.min_similarity && filters.admits(counts, compound)).then(
                    || ScoredCompound {
                        key: compound.key.clone(),
                        similarity,
                    },
                )
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.key.cmp(&b.key))
        });
        scored.truncate(config.top_k);

        log::debug!(
            "Ranked {} candidates, {} analogues kept",
            candidates.len(),
            scored.len()
        );
        Ok(scored)
    }

    /// Stream candidates from the store and pair them with their fingerprints.
    fn load_candidates(
        &self,
        counts: Option<StructureCounts>,
        exclude: Option<&str>,
        config: &AnalogueSearchConfig,
    ) -> Result<Vec<(Compound, Fingerprint)>, SearchError> {
        let query = candidate_query(counts, config);
        let mut candidates = Vec::new();
        let mut unfingerprinted = 0usize;

        for compound in self.store.search(&query)? {
            let compound = compound?;
            if exclude == Some(compound.key.as_str()) {
                continue;
            }
            match self
                .store
                .get_fingerprint(&compound.key, &config.fingerprint_scheme)
            {
                Ok(fp) => candidates.push((compound, fp)),
                Err(StoreError::NotFound { .. }) => unfingerprinted += 1,
                Err(e) => return Err(e.into()),
            }
        }

        if unfingerprinted > 0 {
            log::debug!(
                "Skipped {} candidates without a {} fingerprint",
                unfingerprinted,
                config.fingerprint_scheme
            );
        }
        Ok(candidates)
    }
}

/// Store query narrowed by the count filters.
fn candidate_query(counts: Option<StructureCounts>, config: &AnalogueSearchConfig) -> CompoundQuery {
    let window = |center: u32, limit: Option<u32>| {
        limit.map(|n| center.saturating_sub(n)..=center.saturating_add(n))
    };
    let filters = &config.filters;
    let mut query = CompoundQuery {
        analogue_candidates_only: config.analogue_candidates_only,
        ..Default::default()
    };
    if let Some(c) = counts {
        query.atoms = window(c.atoms, filters.max_atom_difference);
        query.bonds = window(c.bonds, filters.max_bond_difference);
        query.rings = window(c.rings, filters.max_ring_difference);
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::store::InMemoryCompoundStore;
    use crate::compute::store::tests::{test_compound, test_store};
    use crate::schema::{SolubilityClass, StructuralFilters};
    use proptest::prelude::*;

    fn config(min_similarity: f64, top_k: usize) -> AnalogueSearchConfig {
        AnalogueSearchConfig {
            min_similarity,
            top_k,
            ..Default::default()
        }
    }

    fn fp(bits: &str) -> Fingerprint {
        Fingerprint::from_bit_string("maccs", bits).unwrap()
    }

    #[test]
    fn test_tanimoto_basic() {
        assert_eq!(tanimoto(&fp("1100"), &fp("1100")), 1.0);
        assert_eq!(tanimoto(&fp("1100"), &fp("0011")), 0.0);
        assert!((tanimoto(&fp("1100"), &fp("1010")) - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(tanimoto(&fp("0000"), &fp("0000")), 1.0);
        assert_eq!(tanimoto(&fp("0000"), &fp("00")), 1.0);
        assert_eq!(tanimoto(&fp("0000"), &fp("0100")), 0.0);
    }

    #[test]
    fn test_tanimoto_different_lengths() {
        let long = fp(&("1".to_string() + &"0".repeat(99)));
        assert_eq!(tanimoto(&fp("1"), &long), 1.0);
    }

    #[test]
    fn test_find_analogues_of_small_catalogue() {
        let store = test_store(&[("A", "1100"), ("B", "1010"), ("C", "0011")]);
        let engine = SimilarityEngine::new(&store);

        let hits = engine.find_analogues_of("A", &config(0.3, 10)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "B");
        assert!((hits[0].similarity - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_ties_broken_by_key() {
        let store = test_store(&[("Q", "1111"), ("Z", "1110"), ("M", "0111"), ("K", "1100")]);
        let engine = SimilarityEngine::new(&store);

        let hits = engine.find_analogues_of("Q", &config(0.0, 2)).unwrap();
        let keys: Vec<&str> = hits.iter().map(|h| h.key.as_str()).collect();
        assert_eq!(keys, vec!["M", "Z"]);
    }

    #[test]
    fn test_missing_fingerprint() {
        let mut store = test_store(&[("A", "1100")]);
        store.insert_compound(test_compound("B", 10)).unwrap();
        let engine = SimilarityEngine::new(&store);

        let err = engine.find_analogues_of("B", &config(0.0, 10)).unwrap_err();
        assert!(matches!(err, SearchError::MissingFingerprint { .. }));

        // Candidates without a fingerprint are skipped, not fatal
        let hits = engine.find_analogues(&fp("1100"), None, &config(0.0, 10)).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_filtered_compounds_do_not_take_slots() {
        let mut store = InMemoryCompoundStore::new();
        let mut query = test_compound("Q", 10);
        query.solubility = Some(20.0);
        store.insert_compound(query).unwrap();
        store.insert_fingerprint("Q", fp("1111")).unwrap();

        for (key, atoms, bits, solubility) in [
            ("A", 30, "1111", Some(20.0)),
            ("B", 11, "1110", Some(0.01)),
            ("C", 9, "1100", Some(50.0)),
        ] {
            let mut c = test_compound(key, atoms);
            c.num_bonds = 10;
            c.solubility = solubility;
            store.insert_compound(c).unwrap();
            store.insert_fingerprint(key, fp(bits)).unwrap();
        }

        let engine = SimilarityEngine::new(&store);
        let mut cfg = config(0.0, 1);
        cfg.filters = StructuralFilters {
            max_atom_difference: Some(1),
            solubility: SolubilityClass::High,
            ..Default::default()
        };
        let hits = engine.find_analogues_of("Q", &cfg).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "C");
    }

    #[test]
    fn test_scheme_mismatch() {
        let store = test_store(&[("A", "1100")]);
        let engine = SimilarityEngine::new(&store);
        let query = Fingerprint::from_bit_string("morgan", "1100").unwrap();
        assert!(matches!(
            engine.find_analogues(&query, None, &config(0.0, 10)),
            Err(SearchError::SchemeMismatch { .. })
        ));
    }

    fn bits() -> impl Strategy<Value = String> {
        prop::collection::vec(prop::bool::ANY, 1..200)
            .prop_map(|v| v.into_iter().map(|b| if b { '1' } else { '0' }).collect())
    }

    proptest! {
        #[test]
        fn test_tanimoto_symmetric_and_bounded(a in bits(), b in bits()) {
            let (a, b) = (fp(&a), fp(&b));
            let ab = tanimoto(&a, &b);
            prop_assert_eq!(ab, tanimoto(&b, &a));
            prop_assert!((0.0..=1.0).contains(&ab));
        }

        #[test]
        fn test_tanimoto_identical(a in bits()) {
            let a = fp(&a);
            prop_assert_eq!(tanimoto(&a, &a), 1.0);
        }

        #[test]
        fn test_tanimoto_disjoint(a in bits()) {
            let a = fp(&a);
            let complement: String = a
                .to_bit_string()
                .chars()
                .map(|c| if c == '1' { '0' } else { '1' })
                .collect();
            prop_assert_eq!(tanimoto(&a, &fp(&complement)), 0.0);
        }

        #[test]
        fn test_results_respect_floor_and_top_k(
            catalogue in prop::collection::vec("[01]{16}", 1..20),
            query in "[01]{16}",
            min_similarity in 0.0f64..=1.0,
            top_k in 0usize..10,
        ) {
            let keys: Vec<String> = (0..catalogue.len()).map(|i| format!("K{i:02}")).collect();
            let entries: Vec<(&str, &str)> = keys
                .iter()
                .zip(&catalogue)
                .map(|(k, b)| (k.as_str(), b.as_str()))
                .collect();
            let store = test_store(&entries);
            let engine = SimilarityEngine::new(&store);

            let hits = engine
                .find_analogues(&fp(&query), None, &config(min_similarity, top_k))
                .unwrap();
            prop_assert!(hits.len() <= top_k);
            prop_assert!(hits.iter().all(|h| h.similarity >= min_similarity));
            prop_assert!(hits.windows(2).all(|w| w[0].similarity >= w[1].similarity));
        }
    }
}
