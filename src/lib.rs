// Copyright 2025 Cornell University
// released under MIT License

pub mod acm;
pub mod counters;
pub mod diagnostic;
pub mod errors;
pub mod ir;
pub mod parser;
pub mod serialize;
pub mod sim;
pub mod statespace;
