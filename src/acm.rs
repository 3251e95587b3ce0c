// Copyright 2025 Cornell University
// released under MIT License

use rustc_hash::FxHashSet;

use crate::ir::{ControlProcess, IoKind};

/// Name used for the `.model` line of exported automata
pub const MODEL_NAME: &str = "ACM";

/// How downstream synthesis treats an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    /// completed reads and writes
    Internal,
    /// control events of the protocol, these become circuit outputs
    Output,
    /// events of arcs that do not touch the channel
    Dummy,
}

impl EventClass {
    pub fn of(kind: IoKind) -> Self {
        match kind {
            IoKind::Read | IoKind::Write => EventClass::Internal,
            IoKind::Control => EventClass::Output,
            IoKind::None => EventClass::Dummy,
        }
    }
}

/// A synthesized communication mechanism.
/// Arc labels are qualified with the name of the process that fired them.
#[derive(Debug, Clone)]
pub struct Acm {
    automaton: ControlProcess,
    process_names: Vec<String>,
}

impl Acm {
    pub(crate) fn new(automaton: ControlProcess, process_names: Vec<String>) -> Self {
        Self {
            automaton,
            process_names,
        }
    }

    pub fn automaton(&self) -> &ControlProcess {
        &self.automaton
    }

    /// Component processes in composition order
    pub fn process_names(&self) -> &[String] {
        &self.process_names
    }

    pub fn num_states(&self) -> usize {
        self.automaton.num_states()
    }

    pub fn num_arcs(&self) -> usize {
        self.automaton.num_arcs()
    }

    /// Distinct labels of all arcs in `class`, in order of first appearance
    pub fn classify_events(&self, class: EventClass) -> Vec<&str> {
        distinct(
            self.automaton
                .arcs()
                .filter(|(_, arc)| EventClass::of(arc.io.kind) == class)
                .map(|(_, arc)| arc.label.as_str()),
        )
    }

    /// Distinct labels of all arcs fired by process `name`
    pub fn process_events(&self, name: &str) -> Vec<&str> {
        let prefix = format!("{name}.");
        distinct(
            self.automaton
                .arcs()
                .map(|(_, arc)| arc.label.as_str())
                .filter(|label| label.starts_with(&prefix)),
        )
    }
}

fn distinct<'a>(labels: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut seen = FxHashSet::default();
    labels.filter(|l| seen.insert(*l)).collect()
}
