//! Replacement of design targets with metabolite analogues.
//!
//! For every target of a design the replacer finds the model metabolites it
//! acts on, maps them to catalogue compounds and ranks their structural
//! analogues. Regulated targets also carry the inhibition fraction an
//! analogue has to reach. Reaction knockouts can additionally be checked
//! against the simulator: the reaction is swapped for a knockout of one of
//! its metabolites and the design is re-scored.

use std::collections::BTreeSet;

use crate::compute::OptMetError;
use crate::compute::cache::CachedEvaluator;
use crate::compute::similarity::{SearchError, SimilarityEngine};
use crate::compute::simulation::ReactionInfo;
use crate::compute::store::{CompoundStore, StoreError};
use crate::schema::{
    Action, AnalogueLookup, Design, MetaboliteAnalogues, NetworkModelRef, Perturbation, ReplacedDesign,
    ReplacedTarget, ReplacementCheck, ReplacementConfig, ReplacementValidation, SimulationOutcome,
    TargetKind, TargetResolution,
};

/// Minimum score gain of a replacement over the design without the reaction.
const MIN_REPLACEMENT_GAIN: f64 = 1e-6;

/// Strip a compartment suffix (`succ_c` -> `succ`, `glc__D_e` -> `glc__D`).
pub fn species_id(metabolite: &str) -> &str {
    match metabolite.rsplit_once('_') {
        Some((species, compartment))
            if !species.is_empty()
                && !species.ends_with('_')
                && (1..=2).contains(&compartment.len())
                && compartment
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()) =>
        {
            species
        }
        _ => metabolite,
    }
}

/// Inhibition an anti-metabolite must reach to mimic a regulated target.
///
/// Down-regulation by `fc` needs `1 - fc`. Up-regulation is mapped into
/// `]0, 1[` by `1 - 1/fc`. Knockouts have no fraction.
pub fn inhibition_fraction(action: &Action) -> Option<f64> {
    let fold_change = action.fold_change()?;
    Some(if fold_change > 1.0 {
        1.0 - 1.0 / fold_change
    } else {
        1.0 - fold_change
    })
}

/// Attaches ranked analogues to design targets.
pub struct DesignReplacer<'a> {
    store: &'a dyn CompoundStore,
    evaluator: &'a CachedEvaluator,
    config: ReplacementConfig,
}

impl<'a> DesignReplacer<'a> {
    pub fn new(
        store: &'a dyn CompoundStore,
        evaluator: &'a CachedEvaluator,
        config: ReplacementConfig,
    ) -> Self {
        Self {
            store,
            evaluator,
            config,
        }
    }

    /// Annotate every design.
    ///
    /// Targets that cannot be mapped are recorded and skipped; an
    /// unavailable store or simulator aborts.
    pub fn replace(
        &self,
        designs: &[Design],
        model: &NetworkModelRef,
    ) -> Result<Vec<ReplacedDesign>, OptMetError> {
        self.config.search.validate().map_err(SearchError::from)?;
        log::info!("Resolving analogues for {} designs", designs.len());

        designs
            .iter()
            .map(|design| self.replace_design(design, model))
            .collect()
    }

    fn replace_design(
        &self,
        design: &Design,
        model: &NetworkModelRef,
    ) -> Result<ReplacedDesign, OptMetError> {
        let mut targets = Vec::with_capacity(design.size());
        for (target, perturbation) in design.perturbations.iter() {
            let resolution = match perturbation.kind {
                TargetKind::Metabolite => self.resolve_metabolite(target, perturbation)?,
                TargetKind::Reaction => {
                    self.resolve_reaction(design, target, perturbation, model)?
                }
            };
            log::debug!("Design {} target {target}: {resolution:?}", design.id);
            targets.push(ReplacedTarget {
                target: target.to_string(),
                perturbation: *perturbation,
                resolution,
            });
        }

        Ok(ReplacedDesign {
            design: design.clone(),
            targets,
        })
    }

    fn resolve_metabolite(
        &self,
        target: &str,
        perturbation: &Perturbation,
    ) -> Result<TargetResolution, OptMetError> {
        let species = species_id(target);
        let lookup = self.lookup_species(species)?;
        Ok(match lookup {
            AnalogueLookup::NotFound { reason } => TargetResolution::Failed { reason },
            lookup => TargetResolution::Resolved(vec![MetaboliteAnalogues {
                species: species.to_string(),
                lookup,
                fraction: inhibition_fraction(&perturbation.action),
                check: None,
            }]),
        })
    }

    fn resolve_reaction(
        &self,
        design: &Design,
        reaction: &str,
        perturbation: &Perturbation,
        model: &NetworkModelRef,
    ) -> Result<TargetResolution, OptMetError> {
        let Some(info) = self.evaluator.adapter().reaction(model, reaction)? else {
            return Ok(TargetResolution::Unresolved);
        };

        let metabolites = self.associated_metabolites(reaction, &info, &perturbation.action);
        if metabolites.is_empty() {
            return Ok(TargetResolution::Unresolved);
        }

        let fraction = inhibition_fraction(&perturbation.action);
        let mut resolved = Vec::with_capacity(metabolites.len());
        for metabolite in metabolites {
            let species = species_id(metabolite);
            let check = match &self.config.validation {
                Some(validation) if perturbation.action.is_knockout() => Some(
                    self.check_replacement(design, reaction, metabolite, validation, model)?,
                ),
                _ => None,
            };
            resolved.push(MetaboliteAnalogues {
                species: species.to_string(),
                lookup: self.lookup_species(species)?,
                fraction,
                check,
            });
        }
        Ok(TargetResolution::Resolved(resolved))
    }

    /// Metabolites a reaction target acts on, one per species.
    ///
    /// With a non-zero reference flux these are the participants on the
    /// product side of that flux. Without one, a reversible reaction yields
    /// all participants and an irreversible one its products. Currency
    /// metabolites are dropped, and so are essential metabolites when the
    /// reaction is up-regulated.
    fn associated_metabolites<'i>(
        &self,
        reaction: &str,
        info: &'i ReactionInfo,
        action: &Action,
    ) -> Vec<&'i str> {
        let reference_flux = self
            .config
            .reference_fluxes
            .get(reaction)
            .copied()
            .unwrap_or(0.0);
        let upregulated = action.fold_change().is_some_and(|fc| fc > 1.0);

        let mut seen = BTreeSet::new();
        info.participants
            .iter()
            .filter(|(_, coefficient)| {
                if reference_flux != 0.0 {
                    coefficient * reference_flux > 0.0
                } else {
                    info.reversible || *coefficient > 0.0
                }
            })
            .map(|(metabolite, _)| metabolite.as_str())
            .filter(|m| {
                let species = species_id(m);
                !self.config.currency_metabolites.contains(species)
                    && !(upregulated && self.config.essential_metabolites.contains(species))
                    && seen.insert(species)
            })
            .collect()
    }

    /// Map a species to a catalogue compound and rank its analogues.
    fn lookup_species(&self, species: &str) -> Result<AnalogueLookup, OptMetError> {
        let reference = format!("{}:{species}", self.config.reference_namespace);
        let compound = match self.store.find_by_reference(&reference)?.into_iter().next() {
            Some(compound) => compound,
            None => match self.store.get_by_key(species) {
                Ok(compound) => compound,
                Err(StoreError::NotFound { .. }) => {
                    return Ok(AnalogueLookup::NotFound {
                        reason: format!("no compound references {reference}"),
                    });
                }
                Err(e) => return Err(e.into()),
            },
        };

        let engine = SimilarityEngine::new(self.store);
        match engine.find_analogues_of(&compound.key, &self.config.search) {
            Ok(analogues) => Ok(AnalogueLookup::Found {
                compound: compound.key,
                analogues,
            }),
            Err(SearchError::MissingFingerprint { key, scheme }) => {
                Ok(AnalogueLookup::MissingFingerprint {
                    compound: key,
                    scheme,
                })
            }
            Err(SearchError::Store(StoreError::NotFound { what })) => {
                Ok(AnalogueLookup::NotFound { reason: what })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Score the design with `reaction` replaced by a knockout of `metabolite`.
    fn check_replacement(
        &self,
        design: &Design,
        reaction: &str,
        metabolite: &str,
        validation: &ReplacementValidation,
        model: &NetworkModelRef,
    ) -> Result<ReplacementCheck, OptMetError> {
        let objective = &validation.objective;
        let original = self
            .evaluator
            .evaluate_cached(&design.perturbations, objective, model)?;

        let mut base = design.perturbations.clone();
        base.remove(reaction);
        let mut replaced = base.clone();
        replaced.replace(metabolite, Perturbation::knockout(TargetKind::Metabolite));

        let base_outcome = self.evaluator.evaluate_cached(&base, objective, model)?;
        let replaced_outcome = self.evaluator.evaluate_cached(&replaced, objective, model)?;

        let feasible_score = |o: &SimulationOutcome| o.feasible.then(|| o.score());
        let design_score = feasible_score(&original);
        let base_score = feasible_score(&base_outcome);
        let replacement_score = feasible_score(&replaced_outcome);

        let loss = match (design_score, replacement_score) {
            (Some(d), Some(r)) if d != 0.0 => Some((d - r) / d.abs()),
            _ => None,
        };
        let accepted = replaced_outcome.feasible
            && loss.is_some_and(|l| l < validation.max_loss)
            && replaced_outcome.score() - base_outcome.score() > MIN_REPLACEMENT_GAIN;

        Ok(ReplacementCheck {
            base_score,
            replacement_score,
            loss,
            accepted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::simulation::SimulationAdapter;
    use crate::compute::store::tests::test_compound;
    use crate::compute::store::{CompoundIter, CompoundQuery, InMemoryCompoundStore};
    use crate::compute::testing::{FakeSimulator, model, objective};
    use crate::schema::{
        AnalogueSearchConfig, Compound, Fingerprint, ObjectiveFunction, PerturbationSet,
        SolverStatus,
    };
    use std::sync::Arc;

    fn catalogue() -> InMemoryCompoundStore {
        let mut store = InMemoryCompoundStore::new();
        for (key, reference, bits) in [
            ("SUCC", Some("succ"), "11110000"),
            ("MALEATE", None, "11100000"),
            ("FUMARATE", Some("fum"), "11110001"),
            ("AKG", Some("akg"), "00001111"),
            ("NOFP", Some("nofp"), ""),
        ] {
            let mut compound = test_compound(key, 8);
            if let Some(r) = reference {
                compound.references = vec![format!("bigg.metabolite:{r}")];
            }
            store.insert_compound(compound).unwrap();
            if !bits.is_empty() {
                store
                    .insert_fingerprint(key, Fingerprint::from_bit_string("maccs", bits).unwrap())
                    .unwrap();
            }
        }
        store
    }

    fn simulator() -> FakeSimulator {
        FakeSimulator::new(["SUCDi", "AKGDH", "ATPM", "FUMt", "A"])
            .gain("SUCDi", 2.0)
            .gain("A", 1.0)
            .gain("fum_c", 2.5)
            .reaction(
                "SUCDi",
                &[("succ_c", -1.0), ("q8_c", -1.0), ("fum_c", 1.0), ("q8h2_c", 1.0)],
                false,
            )
            .reaction(
                "AKGDH",
                &[
                    ("akg_c", -1.0),
                    ("coa_c", -1.0),
                    ("nad_c", -1.0),
                    ("succoa_c", 1.0),
                    ("nadh_c", 1.0),
                ],
                false,
            )
            .reaction(
                "ATPM",
                &[("atp_c", -1.0), ("h2o_c", -1.0), ("adp_c", 1.0), ("pi_c", 1.0), ("h_c", 1.0)],
                false,
            )
            .reaction("FUMt", &[("fum_e", -1.0), ("fum_c", 1.0)], true)
    }

    fn config() -> ReplacementConfig {
        ReplacementConfig {
            search: AnalogueSearchConfig {
                min_similarity: 0.5,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn design(kind: TargetKind, targets: &[&str]) -> Design {
        Design {
            id: 1,
            perturbations: PerturbationSet::knockouts(kind, targets.iter().copied()),
            outcome: SimulationOutcome {
                feasible: true,
                objective_value: Some(1.0),
                solver_status: SolverStatus::Optimal,
                phenotype: None,
            },
            generation: 0,
            parents: vec![],
        }
    }

    fn regulated(kind: TargetKind, target: &str, action: Action) -> Design {
        let mut set = PerturbationSet::new();
        set.replace(target, Perturbation { kind, action });
        Design {
            perturbations: set,
            ..design(kind, &[])
        }
    }

    fn species(resolution: &TargetResolution) -> Vec<&str> {
        let TargetResolution::Resolved(metabolites) = resolution else {
            panic!("expected resolved target, got {resolution:?}");
        };
        metabolites.iter().map(|m| m.species.as_str()).collect()
    }

    fn evaluator(sim: FakeSimulator) -> CachedEvaluator {
        CachedEvaluator::new(SimulationAdapter::new(Arc::new(sim)))
    }

    #[test]
    fn test_species_id() {
        assert_eq!(species_id("succ_c"), "succ");
        assert_eq!(species_id("glc__D_e"), "glc__D");
        assert_eq!(species_id("13dpg_c"), "13dpg");
        assert_eq!(species_id("succ"), "succ");
        assert_eq!(species_id("_c"), "_c");
    }

    #[test]
    fn test_metabolite_target_resolved() {
        let store = catalogue();
        let evaluator = evaluator(simulator());
        let replacer = DesignReplacer::new(&store, &evaluator, config());

        let replaced = replacer
            .replace(&[design(TargetKind::Metabolite, &["succ_c"])], &model())
            .unwrap();
        let TargetResolution::Resolved(metabolites) = &replaced[0].targets[0].resolution else {
            panic!("expected resolved target");
        };
        assert_eq!(metabolites[0].species, "succ");
        let AnalogueLookup::Found { compound, analogues } = &metabolites[0].lookup else {
            panic!("expected analogues");
        };
        assert_eq!(compound, "SUCC");
        let keys: Vec<&str> = analogues.iter().map(|a| a.key.as_str()).collect();
        assert_eq!(keys, vec!["FUMARATE", "MALEATE"]);
    }

    #[test]
    fn test_unknown_metabolite_fails_without_aborting() {
        let store = catalogue();
        let evaluator = evaluator(simulator());
        let replacer = DesignReplacer::new(&store, &evaluator, config());

        let replaced = replacer
            .replace(&[design(TargetKind::Metabolite, &["xyz_c", "nofp_c"])], &model())
            .unwrap();
        let targets = &replaced[0].targets;
        assert!(matches!(
            targets[1].resolution,
            TargetResolution::Failed { .. }
        ));
        let TargetResolution::Resolved(nofp) = &targets[0].resolution else {
            panic!("expected resolved target");
        };
        assert!(matches!(
            nofp[0].lookup,
            AnalogueLookup::MissingFingerprint { .. }
        ));
    }

    #[test]
    fn test_reaction_metabolites_follow_direction() {
        let store = catalogue();
        let evaluator = evaluator(simulator());
        let replacer = DesignReplacer::new(&store, &evaluator, config());

        let replaced = replacer
            .replace(
                &[design(TargetKind::Reaction, &["AKGDH", "ATPM", "FUMt", "SUCDi", "UNKNOWN"])],
                &model(),
            )
            .unwrap();
        let targets = &replaced[0].targets;

        // AKGDH: nadh is currency, succoa remains and is not in the catalogue
        assert_eq!(species(&targets[0].resolution), vec!["succoa"]);
        assert!(matches!(
            &targets[0].resolution,
            TargetResolution::Resolved(akgdh) if matches!(akgdh[0].lookup, AnalogueLookup::NotFound { .. })
        ));

        // ATPM: only currency metabolites
        assert!(matches!(targets[1].resolution, TargetResolution::Unresolved));

        // FUMt: reversible, both sides are the same species
        assert_eq!(species(&targets[2].resolution), vec!["fum"]);

        // SUCDi: irreversible, products only
        assert_eq!(species(&targets[3].resolution), vec!["fum", "q8h2"]);

        // Unknown reaction
        assert!(matches!(targets[4].resolution, TargetResolution::Unresolved));
    }

    #[test]
    fn test_reference_flux_sets_direction() {
        let store = catalogue();
        let evaluator = evaluator(simulator());
        let mut config = config();
        config.reference_fluxes = [("SUCDi".to_string(), -1.0), ("FUMt".to_string(), 2.0)]
            .into_iter()
            .collect();
        let replacer = DesignReplacer::new(&store, &evaluator, config);

        let replaced = replacer
            .replace(&[design(TargetKind::Reaction, &["FUMt", "SUCDi"])], &model())
            .unwrap();
        let targets = &replaced[0].targets;
        assert_eq!(species(&targets[0].resolution), vec!["fum"]);
        // Running backwards, the substrates are produced
        assert_eq!(species(&targets[1].resolution), vec!["succ", "q8"]);
    }

    #[test]
    fn test_regulated_targets_carry_inhibition_fraction() {
        let store = catalogue();
        let evaluator = evaluator(simulator());
        let mut config = config();
        config.essential_metabolites = ["fum".to_string()].into_iter().collect();
        let replacer = DesignReplacer::new(&store, &evaluator, config);

        let designs = [
            regulated(TargetKind::Reaction, "SUCDi", Action::UpRegulation { fold_change: 4.0 }),
            regulated(TargetKind::Reaction, "SUCDi", Action::DownRegulation { fold_change: 0.25 }),
            regulated(TargetKind::Metabolite, "succ_c", Action::DownRegulation { fold_change: 0.4 }),
            design(TargetKind::Reaction, &["SUCDi"]),
        ];
        let replaced = replacer.replace(&designs, &model()).unwrap();
        let metabolites = |i: usize| match &replaced[i].targets[0].resolution {
            TargetResolution::Resolved(metabolites) => metabolites.clone(),
            other => panic!("expected resolved target, got {other:?}"),
        };

        // Up-regulation skips essential metabolites
        let up = metabolites(0);
        assert_eq!(up.len(), 1);
        assert_eq!(up[0].species, "q8h2");
        assert!((up[0].fraction.unwrap() - 0.75).abs() < 1e-12);

        let down = metabolites(1);
        assert_eq!(down.iter().map(|m| m.species.as_str()).collect::<Vec<_>>(), vec!["fum", "q8h2"]);
        assert!(down.iter().all(|m| (m.fraction.unwrap() - 0.75).abs() < 1e-12));

        let succ = metabolites(2);
        assert!((succ[0].fraction.unwrap() - 0.6).abs() < 1e-12);

        // Knockouts keep essential metabolites and have no fraction
        let knockout = metabolites(3);
        assert_eq!(knockout.len(), 2);
        assert!(knockout.iter().all(|m| m.fraction.is_none()));
    }

    #[test]
    fn test_inhibition_fraction() {
        assert_eq!(inhibition_fraction(&Action::Knockout), None);
        assert_eq!(inhibition_fraction(&Action::DownRegulation { fold_change: 0.25 }), Some(0.75));
        assert_eq!(inhibition_fraction(&Action::UpRegulation { fold_change: 2.0 }), Some(0.5));
        let strong = inhibition_fraction(&Action::UpRegulation { fold_change: 1000.0 }).unwrap();
        assert!(strong > 0.99 && strong < 1.0);
    }

    #[test]
    fn test_replacement_validation() {
        let store = catalogue();
        let evaluator = evaluator(simulator());
        let mut config = config();
        config.validation = Some(ReplacementValidation {
            objective: objective(ObjectiveFunction::Objective),
            max_loss: 0.2,
        });
        let replacer = DesignReplacer::new(&store, &evaluator, config);

        let replaced = replacer
            .replace(&[design(TargetKind::Reaction, &["A", "SUCDi"])], &model())
            .unwrap();
        let TargetResolution::Resolved(sucdi) = &replaced[0].targets[1].resolution else {
            panic!("expected resolved SUCDi");
        };

        // design 1+1+2 = 4, base 1+1 = 2, fum_c replacement 1+1+2.5 = 4.5
        let fum = sucdi[0].check.as_ref().unwrap();
        assert_eq!(sucdi[0].species, "fum");
        assert_eq!(fum.base_score, Some(2.0));
        assert_eq!(fum.replacement_score, Some(4.5));
        assert!((fum.loss.unwrap() + 0.125).abs() < 1e-12);
        assert!(fum.accepted);

        // q8h2_c knockout adds nothing over the base design
        let q8h2 = sucdi[1].check.as_ref().unwrap();
        assert_eq!(q8h2.replacement_score, Some(2.0));
        assert!(!q8h2.accepted);
    }

    struct UnavailableStore;

    impl CompoundStore for UnavailableStore {
        fn get_by_key(&self, _key: &str) -> Result<Compound, StoreError> {
            Err(unavailable())
        }
        fn get_fingerprint(&self, _key: &str, _scheme: &str) -> Result<Fingerprint, StoreError> {
            Err(unavailable())
        }
        fn search<'a>(&'a self, _query: &CompoundQuery) -> Result<CompoundIter<'a>, StoreError> {
            Err(unavailable())
        }
        fn find_by_reference(&self, _reference: &str) -> Result<Vec<Compound>, StoreError> {
            Err(unavailable())
        }
        fn find_by_synonym(&self, _text: &str) -> Result<Vec<Compound>, StoreError> {
            Err(unavailable())
        }
    }

    fn unavailable() -> StoreError {
        StoreError::Unavailable {
            operation: "query".to_string(),
            reason: "connection reset".to_string(),
        }
    }

    #[test]
    fn test_unavailable_store_aborts() {
        let evaluator = evaluator(simulator());
        let replacer = DesignReplacer::new(&UnavailableStore, &evaluator, config());
        let err = replacer
            .replace(&[design(TargetKind::Metabolite, &["succ_c"])], &model())
            .unwrap_err();
        assert!(matches!(
            err,
            OptMetError::Store(StoreError::Unavailable { .. })
        ));
    }
}
