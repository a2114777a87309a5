//! Variation operators over perturbation sets.
//!
//! Provides random generation, crossover, and mutation operations.

use rand::prelude::*;

use crate::schema::{
    Action, DesignMode, Perturbation, PerturbationSet, RegulationBounds, TargetKind,
};

/// Where designs may live: the manipulable targets and size limits.
///
/// Essential targets are already removed from `universe`.
#[derive(Debug, Clone, Copy)]
pub struct DesignSpace<'a> {
    pub universe: &'a [String],
    pub kind: TargetKind,
    pub mode: DesignMode,
    /// Upper bound on targets per design, at most `universe.len()`.
    pub max_targets: usize,
    pub variable_size: bool,
    pub regulation: &'a RegulationBounds,
}

impl DesignSpace<'_> {
    /// Smallest size a design may have.
    fn min_targets(&self) -> usize {
        if self.variable_size {
            1
        } else {
            self.max_targets
        }
    }
}

/// Random number generator wrapper for design operations.
pub struct DesignRng {
    rng: StdRng,
}

impl DesignRng {
    /// Create from seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Generate a random design within the space.
    pub fn random_set(&mut self, space: &DesignSpace<'_>) -> PerturbationSet {
        let size = if space.variable_size {
            self.rng.gen_range(1..=space.max_targets)
        } else {
            space.max_targets
        };

        let mut set = PerturbationSet::new();
        for target in space.universe.choose_multiple(&mut self.rng, size) {
            let action = self.random_action(space);
            set.replace(target.clone(), Perturbation {
                kind: space.kind,
                action,
            });
        }
        set
    }

    /// Draw an action allowed by the design mode.
    pub fn random_action(&mut self, space: &DesignSpace<'_>) -> Action {
        match space.mode {
            DesignMode::Mutagenesis => Action::Knockout,
            DesignMode::Ale => {
                let (up_lo, up_hi) = space.regulation.up_bounds;
                let (down_lo, down_hi) = space.regulation.down_bounds;
                match self.rng.gen_range(0..3) {
                    0 => Action::Knockout,
                    1 => Action::UpRegulation {
                        fold_change: self.rng.gen_range(up_lo..=up_hi),
                    },
                    _ => Action::DownRegulation {
                        fold_change: self.rng.gen_range(down_lo..=down_hi),
                    },
                }
            }
        }
    }

    /// Gaussian mutation for a fold change, clamped to bounds.
    pub fn gaussian_mutate(&mut self, value: f64, strength: f64, bounds: (f64, f64)) -> f64 {
        let noise: f64 = self.rng.sample(rand_distr::StandardNormal);
        let mutated = value + noise * strength * (bounds.1 - bounds.0);
        mutated.clamp(bounds.0, bounds.1)
    }

    /// Set crossover.
    ///
    /// Each target of either parent is inherited with probability 1/2. When
    /// both parents carry a target with different actions, a coin flip picks
    /// one. The child is then repaired to the space's size limits.
    pub fn crossover(
        &mut self,
        parent1: &PerturbationSet,
        parent2: &PerturbationSet,
        space: &DesignSpace<'_>,
    ) -> PerturbationSet {
        let mut child = PerturbationSet::new();

        for (target, p1) in parent1.iter() {
            if !self.rng.gen_bool(0.5) {
                continue;
            }
            let inherited = match parent2.get(target) {
                Some(p2) if p2 != p1 && self.rng.gen_bool(0.5) => *p2,
                _ => *p1,
            };
            child.replace(target, inherited);
        }
        for (target, p2) in parent2.iter() {
            if !parent1.contains(target) && self.rng.gen_bool(0.5) {
                child.replace(target, *p2);
            }
        }

        self.repair(&mut child, space);
        child
    }

    /// Mutate a design in place.
    ///
    /// Each operator fires independently with probability `rate`: add a
    /// target, remove a target, swap a target for an absent one and, in ALE
    /// mode, re-draw an action or perturb a fold change.
    pub fn mutate(&mut self, set: &mut PerturbationSet, rate: f32, space: &DesignSpace<'_>) {
        let rate = f64::from(rate.clamp(0.0, 1.0));

        if self.rng.gen_bool(rate) && set.len() < space.max_targets {
            self.add_random_target(set, space);
        }

        if self.rng.gen_bool(rate)
            && set.len() > space.min_targets()
            && let Some(target) = self.pick_target(set)
        {
            set.remove(&target);
        }

        // Swap keeps the action and moves it to an absent target
        if self.rng.gen_bool(rate)
            && let Some(old) = self.pick_target(set)
            && let Some(new) = self.absent_target(set, space)
            && let Some(perturbation) = set.remove(&old)
        {
            set.replace(new, perturbation);
        }

        if space.mode == DesignMode::Ale {
            if self.rng.gen_bool(rate)
                && let Some(target) = self.pick_target(set)
            {
                let action = self.random_action(space);
                set.replace(target, Perturbation {
                    kind: space.kind,
                    action,
                });
            }

            if self.rng.gen_bool(rate) {
                self.perturb_fold_change(set, space);
            }
        }
    }

    /// Bernoulli draw.
    pub fn chance(&mut self, probability: f32) -> bool {
        self.rng.gen_bool(f64::from(probability.clamp(0.0, 1.0)))
    }

    /// Uniform index in `0..n`.
    pub fn index(&mut self, n: usize) -> usize {
        self.rng.gen_range(0..n)
    }

    fn pick_target(&mut self, set: &PerturbationSet) -> Option<String> {
        set.targets()
            .choose(&mut self.rng)
            .map(str::to_string)
    }

    fn absent_target(&mut self, set: &PerturbationSet, space: &DesignSpace<'_>) -> Option<String> {
        space
            .universe
            .iter()
            .filter(|t| !set.contains(t))
            .choose(&mut self.rng)
            .cloned()
    }

    fn add_random_target(&mut self, set: &mut PerturbationSet, space: &DesignSpace<'_>) {
        if let Some(target) = self.absent_target(set, space) {
            let action = self.random_action(space);
            set.replace(target, Perturbation {
                kind: space.kind,
                action,
            });
        }
    }

    fn perturb_fold_change(&mut self, set: &mut PerturbationSet, space: &DesignSpace<'_>) {
        let regulated: Vec<(String, Perturbation)> = set
            .iter()
            .filter(|(_, p)| !p.action.is_knockout())
            .map(|(t, p)| (t.to_string(), *p))
            .collect();
        let Some((target, perturbation)) = regulated.choose(&mut self.rng).cloned() else {
            return;
        };

        let strength = space.regulation.mutation_strength;
        let action = match perturbation.action {
            Action::UpRegulation { fold_change } => Action::UpRegulation {
                fold_change: self.gaussian_mutate(
                    fold_change,
                    strength,
                    space.regulation.up_bounds,
                ),
            },
            Action::DownRegulation { fold_change } => Action::DownRegulation {
                fold_change: self.gaussian_mutate(
                    fold_change,
                    strength,
                    space.regulation.down_bounds,
                ),
            },
            Action::Knockout => return,
        };
        set.replace(target, Perturbation {
            kind: perturbation.kind,
            action,
        });
    }

    /// Bring a design back within the size limits.
    fn repair(&mut self, set: &mut PerturbationSet, space: &DesignSpace<'_>) {
        while set.len() > space.max_targets {
            if let Some(target) = self.pick_target(set) {
                set.remove(&target);
            }
        }
        while set.len() < space.min_targets() && set.len() < space.universe.len() {
            self.add_random_target(set, space);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn universe() -> Vec<String> {
        (0..12).map(|i| format!("R{i:02}")).collect()
    }

    fn space<'a>(
        universe: &'a [String],
        mode: DesignMode,
        variable_size: bool,
        regulation: &'a RegulationBounds,
    ) -> DesignSpace<'a> {
        DesignSpace {
            universe,
            kind: TargetKind::Reaction,
            mode,
            max_targets: 4,
            variable_size,
            regulation,
        }
    }

    fn assert_within(set: &PerturbationSet, space: &DesignSpace<'_>) {
        assert!(set.len() <= space.max_targets);
        assert!(set.len() >= space.min_targets());
        assert!(set.targets().all(|t| space.universe.iter().any(|u| u == t)));
    }

    #[test]
    fn test_random_set_respects_space() {
        let universe = universe();
        let bounds = RegulationBounds::default();
        let space = space(&universe, DesignMode::Mutagenesis, true, &bounds);
        let mut rng = DesignRng::new(42);

        for _ in 0..100 {
            let set = rng.random_set(&space);
            assert_within(&set, &space);
            assert!(set.iter().all(|(_, p)| p.action.is_knockout()));
        }
    }

    #[test]
    fn test_fixed_size() {
        let universe = universe();
        let bounds = RegulationBounds::default();
        let space = space(&universe, DesignMode::Mutagenesis, false, &bounds);
        let mut rng = DesignRng::new(7);

        let a = rng.random_set(&space);
        let b = rng.random_set(&space);
        assert_eq!(a.len(), 4);
        for _ in 0..50 {
            let mut child = rng.crossover(&a, &b, &space);
            assert_eq!(child.len(), 4);
            rng.mutate(&mut child, 1.0, &space);
            assert_eq!(child.len(), 4);
        }
    }

    #[test]
    fn test_crossover_and_mutation_stay_in_space() {
        let universe = universe();
        let bounds = RegulationBounds::default();
        let space = space(&universe, DesignMode::Ale, true, &bounds);
        let mut rng = DesignRng::new(3);

        for _ in 0..200 {
            let a = rng.random_set(&space);
            let b = rng.random_set(&space);
            let mut child = rng.crossover(&a, &b, &space);
            assert_within(&child, &space);
            rng.mutate(&mut child, 1.0, &space);
            assert_within(&child, &space);

            for (_, p) in child.iter() {
                match p.action {
                    Action::Knockout => {}
                    Action::UpRegulation { fold_change } => {
                        assert!(fold_change >= bounds.up_bounds.0 && fold_change <= bounds.up_bounds.1)
                    }
                    Action::DownRegulation { fold_change } => assert!(
                        fold_change >= bounds.down_bounds.0 && fold_change <= bounds.down_bounds.1
                    ),
                }
            }
        }
    }

    #[test]
    fn test_seeded_determinism() {
        let universe = universe();
        let bounds = RegulationBounds::default();
        let space = space(&universe, DesignMode::Ale, true, &bounds);

        let mut rng1 = DesignRng::new(99);
        let mut rng2 = DesignRng::new(99);
        for _ in 0..10 {
            assert_eq!(rng1.random_set(&space), rng2.random_set(&space));
        }
    }

    #[test]
    fn test_small_universe() {
        let universe = vec!["only".to_string()];
        let bounds = RegulationBounds::default();
        let space = DesignSpace {
            max_targets: 1,
            ..space(&universe, DesignMode::Mutagenesis, true, &bounds)
        };
        let mut rng = DesignRng::new(1);

        let mut set = rng.random_set(&space);
        rng.mutate(&mut set, 1.0, &space);
        assert_eq!(set.targets().collect::<Vec<_>>(), vec!["only"]);
    }
}
