//! Network simulation adapter.
//!
//! The flux-balance simulator is an external collaborator reached through
//! [`NetworkSimulator`]. [`SimulationAdapter`] turns a perturbation set into
//! a request and normalizes the response into a [`SimulationOutcome`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::schema::{
    Action, NetworkModelRef, ObjectiveFunction, ObjectiveSpec, PerturbationSet, Phenotype,
    SimulationOutcome, SolverStatus, TargetKind,
};

/// Flux constraint applied to one target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FluxDirective {
    /// Force flux to zero.
    Block,
    /// Scale reference flux by a factor.
    Scale { factor: f64 },
}

impl From<Action> for FluxDirective {
    fn from(action: Action) -> Self {
        match action {
            Action::Knockout => FluxDirective::Block,
            Action::UpRegulation { fold_change } | Action::DownRegulation { fold_change } => {
                FluxDirective::Scale {
                    factor: fold_change,
                }
            }
        }
    }
}

/// One constrained target in a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetDirective {
    pub target: String,
    pub kind: TargetKind,
    pub directive: FluxDirective,
}

/// Request sent to the simulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationRequest {
    pub model: NetworkModelRef,
    pub objective: ObjectiveSpec,
    pub perturbations: Vec<TargetDirective>,
    pub fluxes_of_interest: Vec<String>,
    /// Reactions whose flux range at the optimum must be reported.
    #[serde(default)]
    pub flux_ranges_of_interest: Vec<String>,
}

/// Flux bounds of a reaction at the optimum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FluxRange {
    pub minimum: f64,
    pub maximum: f64,
}

/// Simulator response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResponse {
    pub status: SolverStatus,
    #[serde(default)]
    pub objective_value: Option<f64>,
    #[serde(default)]
    pub fluxes: BTreeMap<String, f64>,
    #[serde(default)]
    pub flux_ranges: BTreeMap<String, FluxRange>,
}

/// Stoichiometry of a model reaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionInfo {
    pub id: String,
    /// `(metabolite id, coefficient)`; substrates have negative coefficients.
    pub participants: Vec<(String, f64)>,
    pub reversible: bool,
}

/// Transport-level simulator failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct SimulatorFault(pub String);

/// The external network simulator.
pub trait NetworkSimulator: Send + Sync {
    /// Solve the model under the requested perturbations.
    fn simulate(&self, request: &SimulationRequest) -> Result<SimulationResponse, SimulatorFault>;

    /// Identifiers of the manipulable targets of a kind.
    fn targets(
        &self,
        model: &NetworkModelRef,
        kind: TargetKind,
    ) -> Result<Vec<String>, SimulatorFault>;

    /// Reaction stoichiometry, or `None` if the model has no such reaction.
    fn reaction(
        &self,
        model: &NetworkModelRef,
        reaction_id: &str,
    ) -> Result<Option<ReactionInfo>, SimulatorFault>;
}

/// Simulation errors.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("Simulator unavailable during {operation} of {key}: {reason}")]
    Unavailable {
        operation: &'static str,
        key: String,
        reason: String,
    },
    #[error("Malformed simulator response for {key}: {reason}")]
    MalformedResponse { key: String, reason: String },
}

/// Translates perturbation sets into simulator requests.
#[derive(Clone)]
pub struct SimulationAdapter {
    simulator: Arc<dyn NetworkSimulator>,
}

impl SimulationAdapter {
    pub fn new(simulator: Arc<dyn NetworkSimulator>) -> Self {
        Self { simulator }
    }

    /// Simulate a perturbation set and score it.
    ///
    /// Infeasible, unbounded, timed-out and numerically failed solves are
    /// returned as infeasible outcomes, not errors.
    pub fn evaluate(
        &self,
        set: &PerturbationSet,
        objective: &ObjectiveSpec,
        model: &NetworkModelRef,
    ) -> Result<SimulationOutcome, SimulationError> {
        let request = SimulationRequest {
            model: model.clone(),
            objective: objective.clone(),
            perturbations: set
                .iter()
                .map(|(target, p)| TargetDirective {
                    target: target.to_string(),
                    kind: p.kind,
                    directive: p.action.into(),
                })
                .collect(),
            fluxes_of_interest: objective.fluxes_of_interest(),
            flux_ranges_of_interest: objective.flux_ranges_of_interest(),
        };

        let response =
            self.simulator
                .simulate(&request)
                .map_err(|fault| SimulationError::Unavailable {
                    operation: "simulate",
                    key: set.canonical(),
                    reason: fault.0,
                })?;

        normalize(&response, objective).map_err(|reason| SimulationError::MalformedResponse {
            key: set.canonical(),
            reason,
        })
    }

    /// Manipulable targets of a kind.
    pub fn targets(
        &self,
        model: &NetworkModelRef,
        kind: TargetKind,
    ) -> Result<Vec<String>, SimulationError> {
        self.simulator
            .targets(model, kind)
            .map_err(|fault| SimulationError::Unavailable {
                operation: "targets",
                key: model.to_string(),
                reason: fault.0,
            })
    }

    /// Reaction stoichiometry.
    pub fn reaction(
        &self,
        model: &NetworkModelRef,
        reaction_id: &str,
    ) -> Result<Option<ReactionInfo>, SimulationError> {
        self.simulator
            .reaction(model, reaction_id)
            .map_err(|fault| SimulationError::Unavailable {
                operation: "reaction",
                key: reaction_id.to_string(),
                reason: fault.0,
            })
    }
}

/// Convert a response into an outcome, scoring it by the objective function.
fn normalize(
    response: &SimulationResponse,
    objective: &ObjectiveSpec,
) -> Result<SimulationOutcome, String> {
    if response.status != SolverStatus::Optimal {
        return Ok(SimulationOutcome::infeasible(response.status));
    }

    let flux = |id: &str| {
        response
            .fluxes
            .get(id)
            .copied()
            .ok_or_else(|| format!("missing flux for {id}"))
    };

    let phenotype = match (
        flux(&objective.biomass),
        flux(&objective.product),
        flux(&objective.substrate),
    ) {
        (Ok(biomass), Ok(product), Ok(substrate)) => Some(Phenotype {
            biomass_flux: biomass,
            product_flux: product,
            substrate_flux: substrate,
            product_yield: yield_of(product, substrate),
        }),
        _ => None,
    };

    let score = match objective.function {
        ObjectiveFunction::Objective => response
            .objective_value
            .ok_or_else(|| "optimal solution without an objective value".to_string())?,
        ObjectiveFunction::ProductYield => {
            yield_of(flux(&objective.product)?, flux(&objective.substrate)?)
        }
        ObjectiveFunction::BiomassProductCoupledYield => {
            flux(&objective.biomass)?
                * yield_of(flux(&objective.product)?, flux(&objective.substrate)?)
        }
        ObjectiveFunction::BiomassProductCoupledMinYield => {
            let range = response
                .flux_ranges
                .get(&objective.product)
                .ok_or_else(|| format!("missing flux range for {}", objective.product))?;
            flux(&objective.biomass)? * yield_of(range.minimum, flux(&objective.substrate)?)
        }
    };

    if !score.is_finite() {
        return Ok(SimulationOutcome::infeasible(SolverStatus::NumericFailure));
    }

    Ok(SimulationOutcome {
        feasible: true,
        objective_value: Some(score),
        solver_status: SolverStatus::Optimal,
        phenotype,
    })
}

/// product / |substrate|, zero without uptake.
fn yield_of(product: f64, substrate: f64) -> f64 {
    if substrate == 0.0 {
        0.0
    } else {
        product / substrate.abs()
    }
}
