// Copyright 2025 Cornell University
// released under MIT License

use std::io::Write;

use crate::acm::{Acm, EventClass, MODEL_NAME};

pub fn serialize_to_string(acm: &Acm, command_line: &[String]) -> std::io::Result<String> {
    let mut out = Vec::new();
    serialize(&mut out, acm, command_line)?;
    let out = String::from_utf8_lossy(&out).into_owned();
    Ok(out)
}

/// Writes `acm` as a petrify state graph.
/// `command_line` is echoed in the header so the file can be regenerated.
pub fn serialize(out: &mut impl Write, acm: &Acm, command_line: &[String]) -> std::io::Result<()> {
    let automaton = acm.automaton();

    writeln!(
        out,
        "# Generated by {} {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )?;
    write!(out, "#")?;
    for arg in command_line {
        write!(out, " {arg}")?;
    }
    writeln!(out)?;
    writeln!(
        out,
        "# {} states -- {} arcs",
        automaton.num_states(),
        automaton.num_arcs()
    )?;
    writeln!(out, ".model {MODEL_NAME}")?;

    for (keyword, class) in [
        (".internal", EventClass::Internal),
        (".outputs", EventClass::Output),
        (".dummy", EventClass::Dummy),
    ] {
        serialize_event_list(out, keyword, &acm.classify_events(class))?;
    }

    for (index, name) in acm.process_names().iter().enumerate() {
        write!(out, ".process {index}")?;
        for event in acm.process_events(name) {
            write!(out, " {event}")?;
        }
        writeln!(out)?;
    }

    writeln!(out, ".state graph # begin state graph")?;
    for (_, arc) in automaton.arcs() {
        writeln!(
            out,
            "s{} {} s{}",
            automaton[arc.source].label, arc.label, automaton[arc.target].label
        )?;
    }
    writeln!(out, ".marking{{s0}}")?;
    writeln!(out, ".end # end state graph")?;
    Ok(())
}

/// Empty lists are left out entirely
fn serialize_event_list(out: &mut impl Write, keyword: &str, events: &[&str]) -> std::io::Result<()> {
    if events.is_empty() {
        return Ok(());
    }
    write!(out, "{keyword}")?;
    for event in events {
        write!(out, " {event}")?;
    }
    writeln!(out)
}
