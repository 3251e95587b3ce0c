// Copyright 2025 Cornell University
// released under MIT License

use std::collections::VecDeque;

use crate::ir::{Channel, Direction, Policy};

/// Phase of a two step channel access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// access not started
    One,
    /// access in progress, the next arc completes it
    Two,
}

impl Step {
    fn toggle(self) -> Self {
        match self {
            Step::One => Step::Two,
            Step::Two => Step::One,
        }
    }
}

/// Protocol state of a channel.
/// The slot fields and the overwrite flag stay at their initial values
/// under the re-read policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CounterVector {
    pub writer_cell: u32,
    pub reader_cell: u32,
    pub writer_step: Step,
    pub reader_step: Step,
    pub writer_slot: u32,
    pub reader_slot: u32,
    pub overwrite: bool,
}

impl CounterVector {
    pub fn initial(channel: &Channel) -> Self {
        let last = channel.cell_count() - 1;
        match channel.policy() {
            Policy::Rr => Self {
                writer_cell: last,
                reader_cell: 0,
                writer_step: Step::One,
                reader_step: Step::One,
                writer_slot: 0,
                reader_slot: 0,
                overwrite: false,
            },
            Policy::Ow | Policy::OwRr => Self {
                writer_cell: 0,
                reader_cell: last,
                writer_step: Step::One,
                reader_step: Step::One,
                writer_slot: 1,
                reader_slot: 1,
                overwrite: false,
            },
        }
    }

    pub fn step(&self, direction: Direction) -> Step {
        match direction {
            Direction::Read => self.reader_step,
            Direction::Write => self.writer_step,
        }
    }
}

/// A (cell, slot) position in the channel
pub type CellSlot = (u32, u32);

/// Positions the writer left behind that the reader has not consumed yet.
/// New entries go to the front, the back holds the oldest one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct History {
    entries: VecDeque<CellSlot>,
}

impl History {
    /// Records `entry`, dropping the oldest entry first if already at `capacity`
    pub fn push(&mut self, entry: CellSlot, capacity: usize) {
        if self.entries.len() >= capacity {
            self.entries.pop_back();
        }
        self.entries.push_front(entry);
    }

    pub fn take_oldest(&mut self) -> Option<CellSlot> {
        self.entries.pop_back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest first
    pub fn iter(&self) -> impl Iterator<Item = &CellSlot> {
        self.entries.iter()
    }
}

/// Everything the channel remembers in one global state
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelState {
    pub counters: CounterVector,
    pub history: History,
}

impl ChannelState {
    pub fn initial(channel: &Channel) -> Self {
        Self {
            counters: CounterVector::initial(channel),
            history: History::default(),
        }
    }

    /// Channel state after the `direction` side fires one arc.
    /// `self` is left untouched.
    pub fn fire(&self, channel: &Channel, direction: Direction) -> Self {
        let mut next = self.clone();
        match channel.policy() {
            Policy::Rr => rr_fire(&mut next.counters, channel.cell_count(), direction),
            Policy::Ow | Policy::OwRr => ow_fire(&mut next, channel, direction),
        }
        next
    }
}

fn rr_fire(c: &mut CounterVector, cells: u32, direction: Direction) {
    if cells == 2 {
        match direction {
            Direction::Write => match c.writer_step {
                Step::One if c.reader_cell != c.writer_cell => c.writer_step = Step::Two,
                Step::One => {}
                Step::Two => {
                    c.writer_cell = (c.writer_cell + 1) % cells;
                    c.writer_step = Step::One;
                }
            },
            Direction::Read => {
                if c.reader_step == Step::One {
                    c.reader_cell = (c.writer_cell + 1) % cells;
                }
                c.reader_step = c.reader_step.toggle();
            }
        }
    } else {
        match direction {
            Direction::Write => {
                let next = (c.writer_cell + 1) % cells;
                match c.writer_step {
                    Step::One => c.writer_step = Step::Two,
                    Step::Two if c.reader_cell != next => {
                        c.writer_cell = next;
                        c.writer_step = Step::One;
                    }
                    // the reader holds the next cell
                    Step::Two => {}
                }
            }
            Direction::Read => {
                let next = (c.reader_cell + 1) % cells;
                if c.reader_step == Step::One && next != c.writer_cell {
                    c.reader_cell = next;
                }
                c.reader_step = c.reader_step.toggle();
            }
        }
    }
}

fn ow_fire(state: &mut ChannelState, channel: &Channel, direction: Direction) {
    let c = &mut state.counters;
    match direction {
        Direction::Write => match c.writer_step {
            Step::One => c.writer_step = Step::Two,
            Step::Two => {
                let next_cell = (c.writer_cell + 1) % channel.cell_count();
                let mut next_slot = 1;
                if next_cell == c.reader_cell && next_slot == c.reader_slot {
                    next_slot = (next_slot + 1) % channel.slot_count();
                }
                state.history.push(
                    (c.writer_cell, c.writer_slot),
                    channel.history_capacity(),
                );
                c.overwrite = true;
                c.writer_cell = next_cell;
                c.writer_slot = next_slot;
                c.writer_step = Step::One;
            }
        },
        Direction::Read => match c.reader_step {
            Step::One => c.reader_step = Step::Two,
            Step::Two => {
                if let Some((cell, slot)) = state.history.take_oldest() {
                    c.reader_cell = cell;
                    c.reader_slot = slot;
                    c.overwrite = false;
                }
                c.reader_step = Step::One;
            }
        },
    }
}
