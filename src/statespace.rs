// Copyright 2025 Cornell University
// released under MIT License

use std::collections::VecDeque;

use cranelift_entity::PrimaryMap;
use log::{debug, info, trace};
use rustc_hash::FxHashMap;

use crate::acm::{Acm, MODEL_NAME};
use crate::counters::{ChannelState, CounterVector, History, Step};
use crate::errors::{ConfigError, ConfigResult};
use crate::ir::*;

/// One configuration of the composed system
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GlobalState {
    /// Local state of every component process, in composition order
    pub locals: Vec<StateId>,
    pub channel: ChannelState,
}

impl GlobalState {
    /// The part of the state that decides whether two states are merged.
    /// Re-read channels ignore the history.
    fn merge_key(&self, policy: Policy) -> GlobalState {
        match policy {
            Policy::Rr => GlobalState {
                locals: self.locals.clone(),
                channel: ChannelState {
                    counters: self.channel.counters,
                    history: History::default(),
                },
            },
            Policy::Ow | Policy::OwRr => self.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Exploring,
    Done,
}

/// Label and annotation of one arc of the synthesized automaton
#[derive(Debug, Clone, PartialEq, Eq)]
struct Firing {
    event: String,
    io: IoAnnotation,
}

impl Firing {
    fn new(event: String, io: IoAnnotation) -> Option<Self> {
        Some(Self { event, io })
    }
}

/// Names the event of a channel access arc that moves the channel from
/// `before` to `after`. Returns `None` when the transition is not part of
/// the automaton at all.
fn access_event(
    policy: Policy,
    event: &str,
    io: IoAnnotation,
    direction: Direction,
    before: &CounterVector,
    after: &CounterVector,
) -> Option<Firing> {
    let control = io.with_kind(IoKind::Control);
    match (policy, direction) {
        (Policy::Rr, Direction::Write) => match before.writer_step {
            Step::One => Firing::new(
                format!("{event}_{}", after.writer_cell),
                io.at(after.writer_cell, None),
            ),
            Step::Two => Firing::new(
                format!("l{}{}", before.writer_cell, after.writer_cell),
                control,
            ),
        },
        (Policy::Rr, Direction::Read) => match before.reader_step {
            Step::One => Firing::new(
                format!("m{}{}", before.reader_cell, after.reader_cell),
                control,
            ),
            Step::Two => Firing::new(
                format!("{event}_{}", before.reader_cell),
                io.at(before.reader_cell, None),
            ),
        },
        (Policy::Ow | Policy::OwRr, Direction::Write) => match before.writer_step {
            Step::One => Firing::new(
                format!("{event}_{}{}", before.writer_cell, before.writer_slot),
                io.at(before.writer_cell, Some(before.writer_slot)),
            ),
            Step::Two => Firing::new(
                format!(
                    "l{}{}{}{}",
                    before.writer_cell, before.writer_slot, after.writer_cell, after.writer_slot
                ),
                control,
            ),
        },
        (Policy::Ow | Policy::OwRr, Direction::Read) => match before.reader_step {
            Step::One => Firing::new(
                format!("{event}_{}{}", before.reader_cell, before.reader_slot),
                io.at(before.reader_cell, Some(before.reader_slot)),
            ),
            Step::Two => {
                let moved = (before.reader_cell, before.reader_slot)
                    != (after.reader_cell, after.reader_slot);
                // a pure overwrite channel has nothing to report if the reader stays put
                if policy == Policy::Ow && !moved {
                    return None;
                }
                Firing::new(
                    format!(
                        "m{}{}{}{}",
                        before.reader_cell, before.reader_slot, after.reader_cell, after.reader_slot
                    ),
                    control,
                )
            }
        },
    }
}

/// Explores the product of all processes of a system and the protocol
/// state of one channel.
///
/// States are discovered breadth first: new states enter the front of the
/// worklist and expansion takes them from the back. For every state the
/// processes are visited in system order and their arcs in insertion order,
/// so the numbering of the result is fully determined by the input.
pub struct StateGraphBuilder<'a> {
    channel: &'a Channel,
    processes: Vec<&'a ControlProcess>,
    initial_locals: Vec<StateId>,
    phase: Phase,
    /// Indexed by the same ids as the states of `acm`
    states: PrimaryMap<StateId, GlobalState>,
    seen: FxHashMap<GlobalState, StateId>,
    worklist: VecDeque<StateId>,
    acm: ControlProcess,
}

impl<'a> StateGraphBuilder<'a> {
    /// Validates that `channel_id` can be synthesized from `system`
    pub fn new(system: &'a System, channel_id: ChannelId) -> ConfigResult<Self> {
        let channel = &system[channel_id];
        if channel.writer().is_none() {
            return Err(ConfigError::UnboundWriter(channel.name().to_string()));
        }
        if channel.reader().is_none() {
            return Err(ConfigError::UnboundReader(channel.name().to_string()));
        }

        let mut processes = Vec::with_capacity(system.num_processes());
        let mut initial_locals = Vec::with_capacity(system.num_processes());
        for (_, process) in system.processes() {
            let initial = process
                .initial_state()
                .ok_or_else(|| ConfigError::EmptyProcess(process.name().to_string()))?;
            if let Some((other, _)) = process
                .channel_accesses()
                .find(|(ch, _)| *ch != channel_id)
            {
                return Err(ConfigError::ForeignChannel {
                    process: process.name().to_string(),
                    channel: system[other].name().to_string(),
                });
            }
            processes.push(process);
            initial_locals.push(initial);
        }

        Ok(Self {
            channel,
            processes,
            initial_locals,
            phase: Phase::Uninitialized,
            states: PrimaryMap::new(),
            seen: FxHashMap::default(),
            worklist: VecDeque::new(),
            acm: ControlProcess::new(MODEL_NAME),
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Creates the initial state. Does nothing once exploration started.
    pub fn initialize(&mut self) {
        if self.phase != Phase::Uninitialized {
            return;
        }
        info!(
            "Exploring channel `{}` ({} policy, {} cells, {} processes)",
            self.channel.name(),
            self.channel.policy(),
            self.channel.cell_count(),
            self.processes.len()
        );
        let initial = GlobalState {
            locals: self.initial_locals.clone(),
            channel: ChannelState::initial(self.channel),
        };
        self.insert(initial);
        self.phase = Phase::Exploring;
    }

    /// Expands one state from the worklist.
    /// Returns `false` once there is nothing left to explore.
    pub fn explore_next(&mut self) -> bool {
        match self.phase {
            Phase::Uninitialized => self.initialize(),
            Phase::Exploring => {}
            Phase::Done => return false,
        }
        match self.worklist.pop_back() {
            Some(current) => {
                self.expand(current);
                if self.worklist.is_empty() {
                    self.finish_exploration();
                }
                true
            }
            None => {
                self.finish_exploration();
                false
            }
        }
    }

    fn finish_exploration(&mut self) {
        self.phase = Phase::Done;
        info!(
            "Exploration done: {} states, {} arcs",
            self.acm.num_states(),
            self.acm.num_arcs()
        );
    }

    /// Explores until the fixpoint and returns the result
    pub fn run(mut self) -> StateGraph {
        while self.explore_next() {}
        let process_names = self
            .processes
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        StateGraph {
            acm: Acm::new(self.acm, process_names),
            states: self.states,
        }
    }

    fn lookup(&self, candidate: &GlobalState) -> Option<StateId> {
        self.seen
            .get(&candidate.merge_key(self.channel.policy()))
            .copied()
    }

    fn insert(&mut self, state: GlobalState) -> StateId {
        let label = self.states.len().to_string();
        let acm_id = self.acm.insert_state(label);
        let id = self.states.push(state);
        debug_assert_eq!(acm_id, id);
        self.seen
            .insert(self.states[id].merge_key(self.channel.policy()), id);
        self.worklist.push_front(id);
        id
    }

    fn expand(&mut self, current: StateId) {
        let state = self.states[current].clone();
        debug!(
            "Expanding {current}: locals {:?}, counters {:?}, history {:?}",
            state.locals, state.channel.counters, state.channel.history
        );

        for index in 0..self.processes.len() {
            let process: &'a ControlProcess = self.processes[index];
            let local = state.locals[index];

            for &arc_id in process.arcs_from(local) {
                let arc = &process[arc_id];
                let (channel, target, firing) = match arc.io.direction() {
                    None => (
                        state.channel.clone(),
                        arc.target,
                        Firing::new(arc.label.clone(), arc.io),
                    ),
                    Some(direction) => {
                        let before = &state.channel.counters;
                        let next = state.channel.fire(self.channel, direction);
                        // only the second step of an access moves the process
                        let target = match before.step(direction) {
                            Step::One => local,
                            Step::Two => arc.target,
                        };
                        let firing = access_event(
                            self.channel.policy(),
                            &arc.label,
                            arc.io,
                            direction,
                            before,
                            &next.counters,
                        );
                        (next, target, firing)
                    }
                };

                let Some(firing) = firing else {
                    trace!("{current}: `{}` of {} skipped", arc.label, process.name());
                    continue;
                };

                let mut locals = state.locals.clone();
                locals[index] = target;
                let candidate = GlobalState { locals, channel };
                let label = format!("{}.{}", process.name(), firing.event);

                match self.lookup(&candidate) {
                    None => {
                        let next = self.insert(candidate);
                        trace!("{current} -{label}-> {next} (new)");
                        self.acm.push_arc(current, label, next, firing.io);
                    }
                    Some(next) if next != current => {
                        trace!("{current} -{label}-> {next}");
                        self.acm.push_arc(current, label, next, firing.io);
                    }
                    Some(_) => trace!("{current}: self loop `{label}` dropped"),
                }
            }
        }
    }
}

/// Result of exploring a system
#[derive(Debug, Clone)]
pub struct StateGraph {
    pub acm: Acm,
    states: PrimaryMap<StateId, GlobalState>,
}

impl StateGraph {
    /// The configuration behind a state of the automaton
    pub fn global_state(&self, id: StateId) -> Option<&GlobalState> {
        self.states.get(id)
    }

    pub fn global_states(&self) -> impl Iterator<Item = (StateId, &GlobalState)> {
        self.states.iter()
    }
}

/// Synthesizes the mechanism for one channel of `system`
pub fn synthesize(system: &System, channel: ChannelId) -> ConfigResult<StateGraph> {
    Ok(StateGraphBuilder::new(system, channel)?.run())
}

/// Synthesizes the canonical one writer, one reader mechanism
pub fn synthesize_default(policy: Policy, cells: u32) -> ConfigResult<StateGraph> {
    let system = System::default_topology(policy, cells)?;
    let channel = system.sole_channel()?;
    synthesize(&system, channel)
}
