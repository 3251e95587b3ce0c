// Copyright 2025 Cornell University
// released under MIT License

use std::fmt;
use std::ops::Index;
use std::str::FromStr;

use cranelift_entity::{entity_impl, EntityRef, PrimaryMap, SecondaryMap};
use rustc_hash::FxHashMap;

use crate::errors::{ConfigError, ConfigResult, LookupError, LookupResult};

#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct StateId(u32);
entity_impl!(StateId, "s");

#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ArcId(u32);
entity_impl!(ArcId, "arc");

#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ProcessId(u32);
entity_impl!(ProcessId, "process");

#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ChannelId(u32);
entity_impl!(ChannelId, "channel");

/// Which side of a channel an I/O arc is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    /// Name of the process role that performs this kind of access
    pub fn role(&self) -> &'static str {
        match self {
            Direction::Read => "reader",
            Direction::Write => "writer",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => write!(f, "read"),
            Direction::Write => write!(f, "write"),
        }
    }
}

/// How an arc interacts with a channel.
/// `Control` arcs are the bookkeeping half of a two step access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IoKind {
    #[default]
    None,
    Read,
    Write,
    Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IoAnnotation {
    pub kind: IoKind,
    pub channel: Option<ChannelId>,
    pub cell: Option<u32>,
    pub slot: Option<u32>,
}

impl IoAnnotation {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn read(channel: ChannelId) -> Self {
        Self {
            kind: IoKind::Read,
            channel: Some(channel),
            ..Self::default()
        }
    }

    pub fn write(channel: ChannelId) -> Self {
        Self {
            kind: IoKind::Write,
            channel: Some(channel),
            ..Self::default()
        }
    }

    /// Copy of this annotation with a different kind
    pub fn with_kind(self, kind: IoKind) -> Self {
        Self { kind, ..self }
    }

    /// Copy of this annotation located at a channel position
    pub fn at(self, cell: u32, slot: Option<u32>) -> Self {
        Self {
            cell: Some(cell),
            slot,
            ..self
        }
    }

    /// `Some` for arcs that actually access a channel
    pub fn direction(&self) -> Option<Direction> {
        match self.kind {
            IoKind::Read => Some(Direction::Read),
            IoKind::Write => Some(Direction::Write),
            IoKind::None | IoKind::Control => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arc {
    pub source: StateId,
    pub target: StateId,
    pub label: String,
    pub io: IoAnnotation,
}

/// A finite automaton with labeled states and arcs.
/// States and arcs only ever get appended, so their ids stay valid.
/// The first state is the initial state.
#[derive(Debug, Clone, Default)]
pub struct ControlProcess {
    name: String,
    states: PrimaryMap<StateId, State>,
    arcs: PrimaryMap<ArcId, Arc>,
    by_label: FxHashMap<String, StateId>,
    outgoing: SecondaryMap<StateId, Vec<ArcId>>,
    incoming: SecondaryMap<StateId, Vec<ArcId>>,
}

impl ControlProcess {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn insert_state(&mut self, label: impl Into<String>) -> StateId {
        let label = label.into();
        let id = self.states.push(State {
            label: label.clone(),
        });
        self.by_label.entry(label).or_insert(id);
        id
    }

    /// Adds an arc without any channel access
    pub fn insert_arc(
        &mut self,
        source: StateId,
        label: impl Into<String>,
        target: StateId,
    ) -> LookupResult<ArcId> {
        self.insert_io_arc(source, label, target, IoAnnotation::none())
    }

    pub fn insert_io_arc(
        &mut self,
        source: StateId,
        label: impl Into<String>,
        target: StateId,
        io: IoAnnotation,
    ) -> LookupResult<ArcId> {
        self.check_state(source)?;
        self.check_state(target)?;
        Ok(self.push_arc(source, label.into(), target, io))
    }

    /// Appends an arc between states the caller created itself
    pub(crate) fn push_arc(
        &mut self,
        source: StateId,
        label: String,
        target: StateId,
        io: IoAnnotation,
    ) -> ArcId {
        let id = self.arcs.push(Arc {
            source,
            target,
            label,
            io,
        });
        self.outgoing[source].push(id);
        self.incoming[target].push(id);
        id
    }

    fn check_state(&self, id: StateId) -> LookupResult<()> {
        if self.states.is_valid(id) {
            Ok(())
        } else {
            Err(LookupError::StateOutOfRange {
                index: id,
                len: self.states.len(),
            })
        }
    }

    pub fn state(&self, id: StateId) -> LookupResult<&State> {
        self.states.get(id).ok_or(LookupError::StateOutOfRange {
            index: id,
            len: self.states.len(),
        })
    }

    pub fn arc(&self, id: ArcId) -> LookupResult<&Arc> {
        self.arcs.get(id).ok_or(LookupError::ArcOutOfRange {
            index: id,
            len: self.arcs.len(),
        })
    }

    pub fn state_label(&self, id: StateId) -> LookupResult<&str> {
        Ok(&self.state(id)?.label)
    }

    pub fn arc_label(&self, id: ArcId) -> LookupResult<&str> {
        Ok(&self.arc(id)?.label)
    }

    /// Finds a state by its label
    pub fn index_of(&self, label: &str) -> LookupResult<StateId> {
        self.by_label
            .get(label)
            .copied()
            .ok_or_else(|| LookupError::StateNotFound(label.to_string()))
    }

    /// Finds the first arc carrying `label`
    pub fn arc_index_of(&self, label: &str) -> LookupResult<ArcId> {
        self.arcs
            .iter()
            .find(|(_, arc)| arc.label == label)
            .map(|(id, _)| id)
            .ok_or_else(|| LookupError::ArcNotFound(label.to_string()))
    }

    /// Outgoing arcs of `state` in insertion order
    pub fn outgoing(&self, state: StateId) -> LookupResult<&[ArcId]> {
        self.check_state(state)?;
        Ok(&self.outgoing[state])
    }

    /// Like `outgoing`, for states the caller knows to exist
    pub(crate) fn arcs_from(&self, state: StateId) -> &[ArcId] {
        &self.outgoing[state]
    }

    pub fn incoming(&self, state: StateId) -> LookupResult<&[ArcId]> {
        self.check_state(state)?;
        Ok(&self.incoming[state])
    }

    pub fn successors(&self, state: StateId) -> LookupResult<Vec<StateId>> {
        Ok(self
            .outgoing(state)?
            .iter()
            .map(|a| self.arcs[*a].target)
            .collect())
    }

    pub fn predecessors(&self, state: StateId) -> LookupResult<Vec<StateId>> {
        Ok(self
            .incoming(state)?
            .iter()
            .map(|a| self.arcs[*a].source)
            .collect())
    }

    pub fn arc_between(&self, source: StateId, target: StateId) -> Option<ArcId> {
        if !self.states.is_valid(source) {
            return None;
        }
        self.outgoing[source]
            .iter()
            .copied()
            .find(|a| self.arcs[*a].target == target)
    }

    pub fn initial_state(&self) -> Option<StateId> {
        self.states.keys().next()
    }

    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    pub fn num_arcs(&self) -> usize {
        self.arcs.len()
    }

    pub fn states(&self) -> impl Iterator<Item = (StateId, &State)> {
        self.states.iter()
    }

    pub fn arcs(&self) -> impl Iterator<Item = (ArcId, &Arc)> {
        self.arcs.iter()
    }

    /// Channels this process reads from or writes to, with the direction
    pub fn channel_accesses(&self) -> impl Iterator<Item = (ChannelId, Direction)> + '_ {
        self.arcs.values().filter_map(|arc| {
            let direction = arc.io.direction()?;
            Some((arc.io.channel?, direction))
        })
    }
}

impl Index<StateId> for ControlProcess {
    type Output = State;

    fn index(&self, index: StateId) -> &Self::Output {
        &self.states[index]
    }
}

impl Index<ArcId> for ControlProcess {
    type Output = Arc;

    fn index(&self, index: ArcId) -> &Self::Output {
        &self.arcs[index]
    }
}

/// Channel access discipline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Policy {
    /// re-read (message): the reader may see the same item again
    Rr,
    /// overwrite (signal): the writer never waits, the reader sees the latest item
    Ow,
    /// overwrite and re-read (pool)
    OwRr,
}

impl Policy {
    pub const ALL: [Policy; 3] = [Policy::Rr, Policy::Ow, Policy::OwRr];

    /// Number of slots per cell
    pub fn slot_count(&self) -> u32 {
        match self {
            Policy::Rr => 1,
            Policy::Ow | Policy::OwRr => 2,
        }
    }

    /// Numeric policy code used by older tooling
    pub fn code(&self) -> u32 {
        match self {
            Policy::Ow => 100,
            Policy::Rr => 101,
            Policy::OwRr => 102,
        }
    }

    pub fn from_code(code: u32) -> ConfigResult<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.code() == code)
            .ok_or(ConfigError::UnknownPolicyCode(code))
    }
}

impl FromStr for Policy {
    type Err = ConfigError;

    /// Accepts policy names as well as numeric policy codes
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(code) = s.parse::<u32>() {
            return Self::from_code(code);
        }
        match s.to_ascii_lowercase().as_str() {
            "rr" | "rrbb" | "message" => Ok(Policy::Rr),
            "ow" | "owbb" | "signal" => Ok(Policy::Ow),
            "owrr" | "ow_rr" | "owrrbb" | "pool" => Ok(Policy::OwRr),
            _ => Err(ConfigError::UnknownPolicy(s.to_string())),
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Rr => write!(f, "RR"),
            Policy::Ow => write!(f, "OW"),
            Policy::OwRr => write!(f, "OW_RR"),
        }
    }
}

/// A shared memory channel between one writer and one reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    name: String,
    policy: Policy,
    cells: u32,
    slots: u32,
    writer: Option<ProcessId>,
    reader: Option<ProcessId>,
}

impl Channel {
    pub fn new(name: impl Into<String>, policy: Policy, cells: u32) -> ConfigResult<Self> {
        let name = name.into();
        check_cells(&name, cells)?;
        Ok(Self {
            name,
            policy,
            cells,
            slots: policy.slot_count(),
            writer: None,
            reader: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn cell_count(&self) -> u32 {
        self.cells
    }

    pub fn slot_count(&self) -> u32 {
        self.slots
    }

    /// Number of unread (cell, slot) pairs an overwriting channel remembers
    pub fn history_capacity(&self) -> usize {
        ((self.cells - 1) * self.slots) as usize
    }

    pub fn set_policy(&mut self, policy: Policy) {
        self.policy = policy;
        self.slots = policy.slot_count();
    }

    pub fn set_cells(&mut self, cells: u32) -> ConfigResult<()> {
        check_cells(&self.name, cells)?;
        self.cells = cells;
        Ok(())
    }

    pub fn writer(&self) -> Option<ProcessId> {
        self.writer
    }

    pub fn reader(&self) -> Option<ProcessId> {
        self.reader
    }

    pub fn bound(&self, direction: Direction) -> Option<ProcessId> {
        match direction {
            Direction::Read => self.reader,
            Direction::Write => self.writer,
        }
    }

    /// Fails if a different process already holds this side of the channel
    pub fn check_binding(&self, direction: Direction, process: ProcessId) -> ConfigResult<()> {
        match self.bound(direction) {
            Some(bound) if bound != process => Err(ConfigError::ConflictingBinding {
                channel: self.name.clone(),
                role: direction.role(),
                bound,
                requested: process,
            }),
            _ => Ok(()),
        }
    }

    pub fn bind(&mut self, direction: Direction, process: ProcessId) -> ConfigResult<()> {
        self.check_binding(direction, process)?;
        match direction {
            Direction::Read => self.reader = Some(process),
            Direction::Write => self.writer = Some(process),
        }
        Ok(())
    }

    pub fn bind_writer(&mut self, process: ProcessId) -> ConfigResult<()> {
        self.bind(Direction::Write, process)
    }

    pub fn bind_reader(&mut self, process: ProcessId) -> ConfigResult<()> {
        self.bind(Direction::Read, process)
    }
}

fn check_cells(channel: &str, cells: u32) -> ConfigResult<()> {
    if cells < 2 {
        Err(ConfigError::TooFewCells {
            channel: channel.to_string(),
            cells,
        })
    } else {
        Ok(())
    }
}

/// Owns all channels and processes of a model.
/// Processes keep the order in which they were added.
#[derive(Debug, Clone, Default)]
pub struct System {
    channels: PrimaryMap<ChannelId, Channel>,
    processes: PrimaryMap<ProcessId, ControlProcess>,
}

/// Name of the channel in the default topology
pub const DEFAULT_CHANNEL: &str = "CH";

impl System {
    pub fn new() -> Self {
        Self::default()
    }

    /// One writer repeatedly writing `CH` and one reader repeatedly reading it
    pub fn default_topology(policy: Policy, cells: u32) -> ConfigResult<Self> {
        let mut sys = System::new();
        let ch = sys.add_channel(Channel::new(DEFAULT_CHANNEL, policy, cells)?);

        let mut writer = ControlProcess::new("writer");
        let w0 = writer.insert_state("s0");
        writer.push_arc(w0, format!("wr{DEFAULT_CHANNEL}"), w0, IoAnnotation::write(ch));
        sys.add_process(writer)?;

        let mut reader = ControlProcess::new("reader");
        let r0 = reader.insert_state("s0");
        reader.push_arc(r0, format!("rd{DEFAULT_CHANNEL}"), r0, IoAnnotation::read(ch));
        sys.add_process(reader)?;

        Ok(sys)
    }

    pub fn add_channel(&mut self, channel: Channel) -> ChannelId {
        self.channels.push(channel)
    }

    /// Id the next added process will receive
    pub fn next_process_id(&self) -> ProcessId {
        self.processes.next_key()
    }

    /// Adds a process and binds it to every channel it accesses
    pub fn add_process(&mut self, process: ControlProcess) -> ConfigResult<ProcessId> {
        let id = self.next_process_id();
        for (ch, direction) in process.channel_accesses() {
            let channel = self
                .channels
                .get(ch)
                .ok_or_else(|| ConfigError::UnknownChannel(ch.to_string()))?;
            channel.check_binding(direction, id)?;
        }
        for (ch, direction) in process.channel_accesses() {
            self.channels[ch].bind(direction, id)?;
        }
        Ok(self.processes.push(process))
    }

    pub fn channel(&self, id: ChannelId) -> &Channel {
        &self.channels[id]
    }

    pub fn process(&self, id: ProcessId) -> &ControlProcess {
        &self.processes[id]
    }

    pub fn channels(&self) -> impl Iterator<Item = (ChannelId, &Channel)> {
        self.channels.iter()
    }

    pub fn processes(&self) -> impl Iterator<Item = (ProcessId, &ControlProcess)> {
        self.processes.iter()
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn num_processes(&self) -> usize {
        self.processes.len()
    }

    pub fn channel_by_name(&self, name: &str) -> LookupResult<ChannelId> {
        self.channels
            .iter()
            .find(|(_, c)| c.name() == name)
            .map(|(id, _)| id)
            .ok_or_else(|| LookupError::ChannelNotFound(name.to_string()))
    }

    pub fn process_by_name(&self, name: &str) -> LookupResult<ProcessId> {
        self.processes
            .iter()
            .find(|(_, p)| p.name() == name)
            .map(|(id, _)| id)
            .ok_or_else(|| LookupError::ProcessNotFound(name.to_string()))
    }

    /// The channel to synthesize when the caller did not name one
    pub fn sole_channel(&self) -> ConfigResult<ChannelId> {
        match self.channels.len() {
            0 => Err(ConfigError::NoChannel),
            1 => Ok(ChannelId::new(0)),
            n => Err(ConfigError::AmbiguousChannel(n)),
        }
    }
}

impl Index<ChannelId> for System {
    type Output = Channel;

    fn index(&self, index: ChannelId) -> &Self::Output {
        &self.channels[index]
    }
}

impl Index<ProcessId> for System {
    type Output = ControlProcess;

    fn index(&self, index: ProcessId) -> &Self::Output {
        &self.processes[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_process_lookups() {
        let mut p = ControlProcess::new("producer");
        let a = p.insert_state("a");
        let b = p.insert_state("b");
        let c = p.insert_state("c");
        let ab = p.insert_arc(a, "go", b).unwrap();
        p.insert_arc(b, "back", a).unwrap();
        p.insert_arc(a, "skip", c).unwrap();

        assert_eq!(p.index_of("b"), Ok(b));
        assert_eq!(p.state_label(c), Ok("c"));
        assert_eq!(p.arc_label(ab), Ok("go"));
        assert_eq!(p.arc_index_of("go"), Ok(ab));
        assert_eq!(p.successors(a).unwrap(), vec![b, c]);
        assert_eq!(p.predecessors(a).unwrap(), vec![b]);
        assert_eq!(p.arc_between(a, b), Some(ab));
        assert_eq!(p.arc_between(c, a), None);
        assert_eq!(p.initial_state(), Some(a));
        assert_eq!(p[ab].target, b);
    }

    #[test]
    fn lookups_fail_instead_of_defaulting() {
        let mut p = ControlProcess::new("p");
        let a = p.insert_state("a");
        let bogus = StateId::new(5);

        assert_eq!(
            p.index_of("zzz"),
            Err(LookupError::StateNotFound("zzz".to_string()))
        );
        assert_eq!(
            p.arc_index_of("go"),
            Err(LookupError::ArcNotFound("go".to_string()))
        );
        assert_eq!(
            p.insert_arc(a, "go", bogus),
            Err(LookupError::StateOutOfRange {
                index: bogus,
                len: 1
            })
        );
        assert!(p.successors(bogus).is_err());
        assert!(p.arc_label(ArcId::new(0)).is_err());
        // failed insertion leaves nothing behind
        assert_eq!(p.num_arcs(), 0);
    }

    #[test]
    fn policy_names_and_codes() {
        assert_eq!("signal".parse::<Policy>(), Ok(Policy::Ow));
        assert_eq!("MESSAGE".parse::<Policy>(), Ok(Policy::Rr));
        assert_eq!("pool".parse::<Policy>(), Ok(Policy::OwRr));
        assert_eq!("owrrbb".parse::<Policy>(), Ok(Policy::OwRr));
        assert_eq!(
            "mailbox".parse::<Policy>(),
            Err(ConfigError::UnknownPolicy("mailbox".to_string()))
        );
        for p in Policy::ALL {
            assert_eq!(Policy::from_code(p.code()), Ok(p));
        }
        assert_eq!(
            Policy::from_code(103),
            Err(ConfigError::UnknownPolicyCode(103))
        );
        assert_eq!("101".parse::<Policy>(), Ok(Policy::Rr));
        assert_eq!(
            "7".parse::<Policy>(),
            Err(ConfigError::UnknownPolicyCode(7))
        );
    }

    #[test]
    fn channel_derives_slots_from_policy() {
        let mut ch = Channel::new("CH", Policy::Rr, 3).unwrap();
        assert_eq!(ch.slot_count(), 1);
        assert_eq!(ch.history_capacity(), 2);
        ch.set_policy(Policy::Ow);
        assert_eq!(ch.slot_count(), 2);
        assert_eq!(ch.history_capacity(), 4);
        assert!(ch.set_cells(1).is_err());
        assert_eq!(ch.cell_count(), 3);
    }

    #[test]
    fn channel_rejects_one_cell() {
        assert_eq!(
            Channel::new("CH", Policy::Ow, 1),
            Err(ConfigError::TooFewCells {
                channel: "CH".to_string(),
                cells: 1
            })
        );
    }

    #[test]
    fn rebinding_to_another_process_fails() {
        let mut ch = Channel::new("CH", Policy::Rr, 2).unwrap();
        let p0 = ProcessId::new(0);
        let p1 = ProcessId::new(1);
        ch.bind_writer(p0).unwrap();
        ch.bind_writer(p0).unwrap();
        ch.bind_reader(p1).unwrap();
        assert_eq!(
            ch.bind_writer(p1),
            Err(ConfigError::ConflictingBinding {
                channel: "CH".to_string(),
                role: "writer",
                bound: p0,
                requested: p1,
            })
        );
        assert_eq!(ch.writer(), Some(p0));
    }

    #[test]
    fn default_topology_binds_both_sides() {
        let sys = System::default_topology(Policy::Rr, 2).unwrap();
        let ch = sys.sole_channel().unwrap();
        let writer = sys.process_by_name("writer").unwrap();
        let reader = sys.process_by_name("reader").unwrap();
        assert_eq!(sys[ch].writer(), Some(writer));
        assert_eq!(sys[ch].reader(), Some(reader));
        assert_eq!(sys[writer].num_states(), 1);
        let arc = &sys[writer][ArcId::new(0)];
        assert_eq!(arc.label, "wrCH");
        assert_eq!(arc.source, arc.target);
        assert_eq!(arc.io.direction(), Some(Direction::Write));
        assert_eq!(sys[reader][ArcId::new(0)].label, "rdCH");
    }

    #[test]
    fn second_writer_is_rejected() {
        let mut sys = System::default_topology(Policy::Ow, 2).unwrap();
        let ch = sys.sole_channel().unwrap();
        let mut intruder = ControlProcess::new("intruder");
        let s = intruder.insert_state("s0");
        intruder
            .insert_io_arc(s, "wrCH", s, IoAnnotation::write(ch))
            .unwrap();
        let err = sys.add_process(intruder).unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingBinding { .. }));
        assert_eq!(sys.num_processes(), 2);
    }
}
