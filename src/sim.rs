// Copyright 2025 Cornell University
// released under MIT License

use log::info;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::acm::Acm;
use crate::ir::{ArcId, StateId};

/// Random walk through a synthesized automaton.
/// The same seed always produces the same trace.
pub struct Simulator<'a> {
    acm: &'a Acm,
    rng: StdRng,
    current: Option<StateId>,
}

impl<'a> Simulator<'a> {
    pub fn new(acm: &'a Acm, seed: u64) -> Self {
        Self {
            acm,
            rng: StdRng::seed_from_u64(seed),
            current: acm.automaton().initial_state(),
        }
    }

    pub fn current(&self) -> Option<StateId> {
        self.current
    }

    /// Fires one enabled arc, chosen uniformly.
    /// Returns `None` in a state without outgoing arcs.
    pub fn step(&mut self) -> Option<ArcId> {
        let acm: &'a Acm = self.acm;
        let automaton = acm.automaton();
        let arc = *automaton.arcs_from(self.current?).choose(&mut self.rng)?;
        self.current = Some(automaton[arc].target);
        Some(arc)
    }

    /// Labels of up to `steps` fired arcs
    pub fn trace(&mut self, steps: usize) -> Vec<&'a str> {
        let acm: &'a Acm = self.acm;
        let mut out = Vec::with_capacity(steps);
        for _ in 0..steps {
            let Some(arc) = self.step() else {
                info!("Deadlock after {} steps", out.len());
                break;
            };
            out.push(acm.automaton()[arc].label.as_str());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Policy;
    use crate::statespace::synthesize_default;

    #[test]
    fn same_seed_same_trace() {
        let graph = synthesize_default(Policy::Ow, 2).unwrap();
        let a = Simulator::new(&graph.acm, 7).trace(50);
        let b = Simulator::new(&graph.acm, 7).trace(50);
        assert_eq!(a.len(), 50);
        assert_eq!(a, b);
    }

    #[test]
    fn trace_follows_arcs() {
        let graph = synthesize_default(Policy::Rr, 3).unwrap();
        let automaton = graph.acm.automaton();
        let mut sim = Simulator::new(&graph.acm, 1);
        let mut state = sim.current().unwrap();
        for _ in 0..100 {
            let arc = sim.step().unwrap();
            assert_eq!(automaton[arc].source, state);
            state = sim.current().unwrap();
            assert_eq!(automaton[arc].target, state);
        }
    }
}
