// Copyright 2025 Cornell University
// released under MIT License

use std::path::Path;

use anyhow::{anyhow, bail, Context};
use log::info;
use pest::error::InputLocation;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use rustc_hash::FxHashMap;

use crate::diagnostic::{DiagnosticHandler, Level};
use crate::errors::ConfigError;
use crate::ir::*;

#[derive(Parser)]
#[grammar = "system.pest"]
struct SystemParser;

/// What a top level name refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Declared {
    Channel(ChannelId),
    Process,
}

struct ParserContext<'a> {
    fileid: usize,
    handler: &'a mut DiagnosticHandler,
    system: System,
    names: FxHashMap<String, Declared>,
}

impl ParserContext<'_> {
    /// Reports `msg` at `pair` and turns it into an error
    fn error(&mut self, pair: &Pair<Rule>, msg: String) -> anyhow::Error {
        self.handler
            .emit_diagnostic_parsing(&msg, self.fileid, pair, Level::Error);
        anyhow!(msg)
    }

    /// Reports a configuration problem at `pair`
    fn config_error(&mut self, pair: &Pair<Rule>, err: ConfigError) -> anyhow::Error {
        self.handler
            .emit_diagnostic_parsing(&err.to_string(), self.fileid, pair, Level::Error);
        anyhow::Error::new(err)
    }

    fn check_fresh(&mut self, pair: &Pair<Rule>) -> anyhow::Result<()> {
        let name = pair.as_str();
        if self.names.contains_key(name) {
            return Err(self.error(pair, format!("`{name}` declared previously")));
        }
        Ok(())
    }

    fn parse_channel(&mut self, pair: Pair<Rule>) -> anyhow::Result<()> {
        // skip the keyword
        let mut inner = pair.into_inner().skip(1);
        let (Some(name), Some(policy), Some(cells)) = (inner.next(), inner.next(), inner.next())
        else {
            unreachable!("grammar guarantees channel name, policy and size")
        };

        self.check_fresh(&name)?;

        let parsed_policy = match policy.as_str().parse::<Policy>() {
            Ok(p) => p,
            Err(e) => return Err(self.config_error(&policy, e)),
        };
        let Ok(count) = cells.as_str().parse::<u32>() else {
            return Err(self.error(&cells, format!("`{}` is too large", cells.as_str())));
        };
        let channel = match Channel::new(name.as_str(), parsed_policy, count) {
            Ok(c) => c,
            Err(e) => return Err(self.config_error(&cells, e)),
        };
        info!(
            "Channel `{}`: {} policy, {} cells",
            channel.name(),
            channel.policy(),
            channel.cell_count()
        );
        let id = self.system.add_channel(channel);
        self.names
            .insert(name.as_str().to_string(), Declared::Channel(id));
        Ok(())
    }

    fn parse_process(&mut self, pair: Pair<Rule>) -> anyhow::Result<()> {
        let mut inner = pair.into_inner().skip(1);
        let Some(name) = inner.next() else {
            unreachable!("grammar guarantees a process name")
        };
        self.check_fresh(&name)?;
        self.names.insert(name.as_str().to_string(), Declared::Process);
        let id = self.system.next_process_id();
        let mut process = ControlProcess::new(name.as_str());

        for item in inner {
            match item.as_rule() {
                Rule::states_decl => self.parse_states(&mut process, item)?,
                Rule::arc_decl => self.parse_arc(&mut process, id, item)?,
                rule => unreachable!("unexpected {:?} in process body", rule),
            }
        }

        info!(
            "Process `{}`: {} states, {} arcs",
            process.name(),
            process.num_states(),
            process.num_arcs()
        );
        self.system.add_process(process)?;
        Ok(())
    }

    fn parse_states(&mut self, process: &mut ControlProcess, pair: Pair<Rule>) -> anyhow::Result<()> {
        for state in pair.into_inner().skip(1) {
            let label = state.as_str();
            if process.index_of(label).is_ok() || self.names.contains_key(label) {
                return Err(self.error(&state, format!("`{label}` declared previously")));
            }
            process.insert_state(label);
        }
        Ok(())
    }

    fn lookup_state(&mut self, process: &ControlProcess, pair: &Pair<Rule>) -> anyhow::Result<StateId> {
        match process.index_of(pair.as_str()) {
            Ok(id) => Ok(id),
            Err(_) => Err(self.error(pair, format!("state `{}` not declared", pair.as_str()))),
        }
    }

    fn parse_arc(
        &mut self,
        process: &mut ControlProcess,
        process_id: ProcessId,
        pair: Pair<Rule>,
    ) -> anyhow::Result<()> {
        let whole = pair.clone();
        let mut inner = pair.into_inner();
        let (Some(src), Some(dst), Some(event)) = (inner.next(), inner.next(), inner.next()) else {
            unreachable!("grammar guarantees source, target and event")
        };
        let source = self.lookup_state(process, &src)?;
        let target = self.lookup_state(process, &dst)?;
        if process.arc_between(source, target).is_some() {
            return Err(self.error(
                &whole,
                format!(
                    "arc from `{}` to `{}` declared previously",
                    src.as_str(),
                    dst.as_str()
                ),
            ));
        }

        match event.as_rule() {
            Rule::ident => {
                process.insert_arc(source, event.as_str(), target)?;
            }
            Rule::io_event => {
                let mut io = event.clone().into_inner();
                let (Some(kind), Some(channel)) = (io.next(), io.next()) else {
                    unreachable!("grammar guarantees direction and channel")
                };
                let direction = match kind.as_rule() {
                    Rule::kw_read => Direction::Read,
                    Rule::kw_write => Direction::Write,
                    rule => unreachable!("unexpected direction {:?}", rule),
                };
                let ch = match self.names.get(channel.as_str()).copied() {
                    Some(Declared::Channel(ch)) => ch,
                    Some(Declared::Process) => {
                        return Err(self.error(
                            &channel,
                            format!("`{}` is a process, not a channel", channel.as_str()),
                        ))
                    }
                    None => {
                        return Err(self.error(
                            &channel,
                            format!("channel `{}` not declared", channel.as_str()),
                        ))
                    }
                };
                if let Err(e) = self.system[ch].check_binding(direction, process_id) {
                    self.handler.emit_diagnostic_parsing(
                        &format!("too many process {}s for channel `{}`", direction.role(), channel.as_str()),
                        self.fileid,
                        &event,
                        Level::Error,
                    );
                    return Err(anyhow::Error::new(e));
                }
                let label = format!(
                    "{}_{}",
                    direction.to_string().to_uppercase(),
                    channel.as_str()
                );
                let annotation = match direction {
                    Direction::Read => IoAnnotation::read(ch),
                    Direction::Write => IoAnnotation::write(ch),
                };
                process.insert_io_arc(source, label, target, annotation)?;
            }
            rule => unreachable!("unexpected event {:?}", rule),
        }
        Ok(())
    }
}

/// Parses a system description.
/// Problems are reported through `handler`. Configuration problems
/// (unknown policies, too few cells, conflicting bindings) come back as a
/// `ConfigError` inside the returned error.
pub fn parse_system(
    source: &str,
    name: &str,
    handler: &mut DiagnosticHandler,
) -> anyhow::Result<System> {
    let fileid = handler.add_file(name.to_string(), source.to_string());

    let file = match SystemParser::parse(Rule::file, source) {
        Ok(mut pairs) => pairs.next().context("empty parse result")?,
        Err(err) => {
            let (start, end) = match err.location {
                InputLocation::Pos(start) => (start, start),
                InputLocation::Span(span) => span,
            };
            let msg = format!("Lexing failed: {}", err.variant.message());
            handler.emit_diagnostic_lexing(&msg, fileid, start, end, Level::Error);
            bail!(msg);
        }
    };

    let mut ctx = ParserContext {
        fileid,
        handler,
        system: System::new(),
        names: FxHashMap::default(),
    };
    for pair in file.into_inner() {
        match pair.as_rule() {
            Rule::channel_decl => ctx.parse_channel(pair)?,
            Rule::process_decl => ctx.parse_process(pair)?,
            Rule::EOI => {}
            rule => unreachable!("unexpected {:?} at top level", rule),
        }
    }
    Ok(ctx.system)
}

pub fn parse_file(
    filename: impl AsRef<Path>,
    handler: &mut DiagnosticHandler,
) -> anyhow::Result<System> {
    let path = filename.as_ref();
    let input = std::fs::read_to_string(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    parse_system(&input, &path.display().to_string(), handler)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use insta::Settings;

    use super::*;
    use crate::serialize::serialize_to_string;
    use crate::statespace::synthesize;

    fn snap(name: &str, content: String) {
        let mut settings = Settings::clone_current();
        settings.set_snapshot_path(Path::new("../tests/snapshots"));
        settings.set_prepend_module_to_snapshot(false);
        settings.bind(|| {
            insta::assert_snapshot!(name, content);
        });
    }

    /// Parses `source` and returns the error together with the diagnostics
    fn parse_err(source: &str) -> (anyhow::Error, String) {
        let mut handler = DiagnosticHandler::quiet();
        let err = parse_system(source, "test.acm", &mut handler).unwrap_err();
        (err, handler.error_string().to_string())
    }

    #[test]
    fn parse_pipeline() {
        let mut handler = DiagnosticHandler::quiet();
        let system = parse_file("tests/systems/pipeline.acm", &mut handler).unwrap();
        assert!(!handler.has_errors());
        assert_eq!(system.num_channels(), 1);
        assert_eq!(system.num_processes(), 2);

        let ch = system.channel_by_name("CH").unwrap();
        assert_eq!(system[ch].policy(), Policy::Rr);
        assert_eq!(system[ch].cell_count(), 2);
        let producer = system.process_by_name("producer").unwrap();
        assert_eq!(system[ch].writer(), Some(producer));

        let p = &system[producer];
        let p1 = p.index_of("p1").unwrap();
        let arc = p.arc_index_of("WRITE_CH").unwrap();
        assert_eq!(p[arc].source, p1);
        assert_eq!(p[arc].io.direction(), Some(Direction::Write));
    }

    #[test]
    fn synthesize_pipeline() {
        let mut handler = DiagnosticHandler::quiet();
        let system = parse_file("tests/systems/pipeline.acm", &mut handler).unwrap();
        let graph = synthesize(&system, system.sole_channel().unwrap()).unwrap();
        let cmd: Vec<String> = ["acm-synth", "--system", "pipeline.acm"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let content = serialize_to_string(&graph.acm, &cmd).unwrap();
        snap("pipeline", content);
    }

    #[test]
    fn comments_and_layout_are_ignored() {
        let source = "/* two\n lines */ channel c:pool(3); // trailing\n\
                      process w { states a; a -> a : write(c); }\n\
                      process r{states x,y;x->y:read(c);y->x:idle;}";
        let mut handler = DiagnosticHandler::quiet();
        let system = parse_system(source, "test.acm", &mut handler).unwrap();
        let r = system.process_by_name("r").unwrap();
        assert_eq!(system[r].num_arcs(), 2);
        assert_eq!(system[r].arc_label(ArcId::from_u32(1)).unwrap(), "idle");
    }

    #[test]
    fn unknown_policy_is_a_config_error() {
        let (err, diag) = parse_err("channel CH : mailbox(2);");
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::UnknownPolicy("mailbox".to_string()))
        );
        assert!(diag.contains("unknown channel policy `mailbox`"));
        assert!(diag.contains("test.acm:1:14"));
    }

    #[test]
    fn one_cell_is_a_config_error() {
        let (err, _) = parse_err("channel CH : signal(1);");
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::TooFewCells { cells: 1, .. })
        ));
    }

    #[test]
    fn second_writer_is_rejected() {
        let (err, diag) = parse_err(
            "channel CH : message(2);\n\
             process a { states s; s -> s : write(CH); }\n\
             process b { states s; s -> s : write(CH); }",
        );
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::ConflictingBinding { role: "writer", .. })
        ));
        assert!(diag.contains("too many process writers for channel `CH`"));
    }

    #[test]
    fn undeclared_names() {
        let (err, diag) = parse_err("process a { states s; s -> t : go; }");
        assert!(err.downcast_ref::<ConfigError>().is_none());
        assert!(diag.contains("state `t` not declared"));

        let (_, diag) = parse_err("process a { states s; s -> s : read(CH); }");
        assert!(diag.contains("channel `CH` not declared"));
    }

    #[test]
    fn redeclarations() {
        let (_, diag) = parse_err("channel CH : pool(2); process CH { states s; }");
        assert!(diag.contains("`CH` declared previously"));

        let (_, diag) = parse_err("process a { states s, s; }");
        assert!(diag.contains("`s` declared previously"));

        let (_, diag) = parse_err("process a { states s, t; s -> t : x; s -> t : y; }");
        assert!(diag.contains("arc from `s` to `t` declared previously"));
    }

    #[test]
    fn syntax_errors_are_reported() {
        let (err, diag) = parse_err("channel CH signal(2);");
        assert!(err.to_string().starts_with("Lexing failed"));
        assert!(diag.contains("test.acm:1:"));

        // keywords cannot be used as names
        let (_, diag) = parse_err("process read { states s; }");
        assert!(diag.contains("Lexing failed"));
    }
}
