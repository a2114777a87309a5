//! Removal of targets that do not contribute to a design's score.

use crate::compute::cache::CachedEvaluator;
use crate::compute::simulation::SimulationError;
use crate::schema::{Design, NetworkModelRef, ObjectiveSpec};

/// Drop, one at a time and in target order, every target whose removal
/// keeps the design feasible without lowering its score.
///
/// Infeasible designs and single-target designs are returned unchanged.
/// Each uncached evaluation asks `admit` first; a refusal stops
/// simplification and the design is returned as it was given.
pub fn simplify_design<F>(
    design: &Design,
    evaluator: &CachedEvaluator,
    objective: &ObjectiveSpec,
    model: &NetworkModelRef,
    admit: F,
) -> Result<Design, SimulationError>
where
    F: Fn() -> bool,
{
    let mut simplified = design.clone();
    if !design.outcome.feasible {
        return Ok(simplified);
    }

    let targets: Vec<String> = design.perturbations.targets().map(str::to_string).collect();
    for target in targets {
        if simplified.size() <= 1 {
            break;
        }
        let mut reduced = simplified.perturbations.clone();
        reduced.remove(&target);

        let Some(outcome) = evaluator.evaluate_admitted(&reduced, objective, model, &admit)? else {
            log::debug!("Budget exhausted while simplifying design {}", design.id);
            return Ok(design.clone());
        };
        if outcome.feasible && outcome.score() >= simplified.score() {
            log::debug!("Dropping {target} from design {}", design.id);
            simplified.perturbations = reduced;
            simplified.outcome = outcome;
        }
    }

    Ok(simplified)
}
