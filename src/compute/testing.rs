//! Deterministic simulator double shared by unit tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::schema::{NetworkModelRef, ObjectiveFunction, ObjectiveSpec, SolverStatus, TargetKind};

use super::simulation::{
    FluxDirective, FluxRange, NetworkSimulator, ReactionInfo, SimulationRequest, SimulationResponse,
    SimulatorFault,
};

pub(crate) const BIOMASS: &str = "BIOMASS";
pub(crate) const PRODUCT: &str = "EX_succ_e";
pub(crate) const SUBSTRATE: &str = "EX_glc__D_e";

pub(crate) fn objective(function: ObjectiveFunction) -> ObjectiveSpec {
    ObjectiveSpec {
        function,
        biomass: BIOMASS.to_string(),
        product: PRODUCT.to_string(),
        substrate: SUBSTRATE.to_string(),
    }
}

pub(crate) fn model() -> NetworkModelRef {
    NetworkModelRef {
        id: "core".to_string(),
        version: "1".to_string(),
    }
}

/// Additive toy network.
///
/// product = 1 + sum of target gains (halved for regulation),
/// biomass = 1 - 0.05 per target, substrate = -10. Any lethal target makes
/// the solve infeasible. The objective value is the product flux. Requested
/// flux ranges span `[flux * (1 - flexibility), flux]`.
#[derive(Default)]
pub(crate) struct FakeSimulator {
    universe: Vec<String>,
    gains: BTreeMap<String, f64>,
    lethal: BTreeSet<String>,
    reactions: BTreeMap<String, ReactionInfo>,
    delay: Option<Duration>,
    flexibility: f64,
    unavailable: bool,
    calls: AtomicUsize,
}

impl FakeSimulator {
    pub(crate) fn new<I, S>(universe: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            universe: universe.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub(crate) fn gain(mut self, target: &str, gain: f64) -> Self {
        self.gains.insert(target.to_string(), gain);
        self
    }

    pub(crate) fn lethal<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lethal.extend(targets.into_iter().map(Into::into));
        self
    }

    pub(crate) fn reaction(mut self, id: &str, participants: &[(&str, f64)], reversible: bool) -> Self {
        self.reactions.insert(
            id.to_string(),
            ReactionInfo {
                id: id.to_string(),
                participants: participants
                    .iter()
                    .map(|(m, c)| (m.to_string(), *c))
                    .collect(),
                reversible,
            },
        );
        self
    }

    pub(crate) fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn flexibility(mut self, flexibility: f64) -> Self {
        self.flexibility = flexibility;
        self
    }

    pub(crate) fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// Number of `simulate` calls served.
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl NetworkSimulator for FakeSimulator {
    fn simulate(&self, request: &SimulationRequest) -> Result<SimulationResponse, SimulatorFault> {
        if self.unavailable {
            return Err(SimulatorFault("connection refused".to_string()));
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        if request
            .perturbations
            .iter()
            .any(|p| self.lethal.contains(&p.target))
        {
            return Ok(SimulationResponse {
                status: SolverStatus::Infeasible,
                objective_value: None,
                fluxes: BTreeMap::new(),
                flux_ranges: BTreeMap::new(),
            });
        }

        let mut product = 1.0;
        for p in &request.perturbations {
            let gain = self.gains.get(&p.target).copied().unwrap_or(0.0);
            product += match p.directive {
                FluxDirective::Block => gain,
                FluxDirective::Scale { .. } => gain * 0.5,
            };
        }
        let biomass = 1.0 - 0.05 * request.perturbations.len() as f64;

        let fluxes: BTreeMap<String, f64> = [
            (BIOMASS.to_string(), biomass),
            (PRODUCT.to_string(), product),
            (SUBSTRATE.to_string(), -10.0),
        ]
        .into_iter()
        .collect();
        let flux_ranges = request
            .flux_ranges_of_interest
            .iter()
            .filter_map(|id| {
                let flux = *fluxes.get(id)?;
                let range = FluxRange {
                    minimum: flux * (1.0 - self.flexibility),
                    maximum: flux,
                };
                Some((id.clone(), range))
            })
            .collect();

        Ok(SimulationResponse {
            status: SolverStatus::Optimal,
            objective_value: Some(product),
            fluxes,
            flux_ranges,
        })
    }

    fn targets(
        &self,
        _model: &NetworkModelRef,
        _kind: TargetKind,
    ) -> Result<Vec<String>, SimulatorFault> {
        Ok(self.universe.clone())
    }

    fn reaction(
        &self,
        _model: &NetworkModelRef,
        reaction_id: &str,
    ) -> Result<Option<ReactionInfo>, SimulatorFault> {
        Ok(self.reactions.get(reaction_id).cloned())
    }
}
