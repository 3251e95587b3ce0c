// Copyright 2025 Cornell University
// released under MIT License

use thiserror::Error;

use crate::ir::{ArcId, ProcessId, StateId};

/// Exit status used for every configuration error
pub const CONFIG_EXIT_CODE: u8 = 30;

/// Errors in the model that make synthesis impossible.
/// These are all detected before exploration starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown channel policy `{0}`")]
    UnknownPolicy(String),
    #[error("unknown channel policy code {0}")]
    UnknownPolicyCode(u32),
    #[error("channel `{channel}` needs at least 2 cells, got {cells}")]
    TooFewCells { channel: String, cells: u32 },
    #[error("channel `{channel}` already has {role} {bound}, cannot bind {requested}")]
    ConflictingBinding {
        channel: String,
        role: &'static str,
        bound: ProcessId,
        requested: ProcessId,
    },
    #[error("channel `{0}` has no writer process")]
    UnboundWriter(String),
    #[error("channel `{0}` has no reader process")]
    UnboundReader(String),
    #[error("no channel named `{0}`")]
    UnknownChannel(String),
    #[error("process `{process}` accesses channel `{channel}` which is not being synthesized")]
    ForeignChannel { process: String, channel: String },
    #[error("process `{0}` has no states")]
    EmptyProcess(String),
    #[error("the system does not declare any channel")]
    NoChannel,
    #[error("the system declares {0} channels, pick one explicitly")]
    AmbiguousChannel(usize),
}

impl ConfigError {
    pub fn exit_code(&self) -> u8 {
        CONFIG_EXIT_CODE
    }
}

/// Failed lookups in a `ControlProcess` or `System`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("no state labeled `{0}`")]
    StateNotFound(String),
    #[error("no arc labeled `{0}`")]
    ArcNotFound(String),
    #[error("{index} is out of range ({len} states)")]
    StateOutOfRange { index: StateId, len: usize },
    #[error("{index} is out of range ({len} arcs)")]
    ArcOutOfRange { index: ArcId, len: usize },
    #[error("no process named `{0}`")]
    ProcessNotFound(String),
    #[error("no channel named `{0}`")]
    ChannelNotFound(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
pub type LookupResult<T> = Result<T, LookupError>;
