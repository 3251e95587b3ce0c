// Copyright 2025 Cornell University
// released under MIT License

use std::io::Write;

use clap::ColorChoice;
use codespan_reporting::diagnostic::{
    Diagnostic as CodespanDiagnostic, Label as CodespanLabel, LabelStyle, Severity,
};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{Buffer, Color, ColorSpec, WriteColor};
use pest::iterators::Pair;
use pest::RuleType;

/// Severity of diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Error,
    Warning,
}

/// A label representing a part of the source code
#[derive(Debug, Clone, PartialEq, Eq)]
struct Label {
    message: Option<String>,
    range: (usize, usize),
}

impl Label {
    fn to_codespan_label(&self, fileid: usize) -> CodespanLabel<usize> {
        CodespanLabel::new(LabelStyle::Primary, fileid, self.range.0..self.range.1)
            .with_message(self.message.clone().unwrap_or_default())
    }
}

/// Diagnostic of a particular part of source code
struct Diagnostic {
    title: String,
    message: String,
    level: Level,
    location: Option<(usize, Label)>,
}

impl Diagnostic {
    fn severity(&self) -> Severity {
        match self.level {
            Level::Error => Severity::Error,
            Level::Warning => Severity::Warning,
        }
    }

    pub fn emit(&self, buffer: &mut Buffer, files: &SimpleFiles<String, String>) {
        if let Some((fileid, label)) = &self.location {
            let diagnostic = CodespanDiagnostic::new(self.severity())
                .with_message(&self.message)
                .with_labels(vec![label.to_codespan_label(*fileid)]);

            let config = term::Config::default();
            term::emit(buffer, &config, files, &diagnostic).expect("Failed to write diagnostic");
        } else {
            let color = match self.level {
                Level::Error => Color::Red,
                Level::Warning => Color::Yellow,
            };

            buffer
                .set_color(ColorSpec::new().set_bold(true).set_fg(Some(color)))
                .expect("Failed to set color");
            write!(buffer, "{}", self.title).expect("Failed to write title");
            buffer
                .set_color(&ColorSpec::new())
                .expect("Failed to reset color");
            writeln!(buffer, ": {}", self.message).expect("Failed to write message");
        }
    }
}

/// Collects diagnostics for system description files.
/// Everything reported is echoed to stderr and kept in `error_string`.
pub struct DiagnosticHandler {
    files: SimpleFiles<String, String>,
    error_string: String,
    /// `color_choice` indicates whether to emit error messages w/ ANSI colors
    color_choice: ColorChoice,
    echo: bool,
}

impl Default for DiagnosticHandler {
    /// Default `DiagnosticHandler` does not emit colored error messages
    fn default() -> Self {
        Self::new(ColorChoice::Never)
    }
}

impl DiagnosticHandler {
    pub fn new(color_choice: ColorChoice) -> Self {
        Self {
            files: SimpleFiles::new(),
            error_string: String::new(),
            color_choice,
            echo: true,
        }
    }

    /// Handler that only records, used by tests
    pub fn quiet() -> Self {
        Self {
            echo: false,
            ..Self::default()
        }
    }

    fn create_buffer(&self) -> Buffer {
        if self.color_choice == ColorChoice::Never {
            Buffer::no_color()
        } else {
            Buffer::ansi()
        }
    }

    pub fn add_file(&mut self, name: String, content: String) -> usize {
        self.files.add(name, content)
    }

    pub fn error_string(&self) -> &str {
        &self.error_string
    }

    pub fn has_errors(&self) -> bool {
        !self.error_string.is_empty()
    }

    fn report(&mut self, diagnostic: Diagnostic) {
        let mut buffer = self.create_buffer();
        diagnostic.emit(&mut buffer, &self.files);
        let error_msg = String::from_utf8_lossy(buffer.as_slice());
        self.error_string.push_str(&error_msg);
        if self.echo {
            eprint!("{}", error_msg);
        }
    }

    /// Note: we make this function parametric over any type `R`
    /// that implements Pest's `RuleType` trait
    /// so that we can call this function from different parsers
    pub fn emit_diagnostic_parsing<R: RuleType>(
        &mut self,
        message: &str,
        fileid: usize,
        pair: &Pair<'_, R>,
        level: Level,
    ) {
        let span = pair.as_span();
        self.emit_diagnostic_lexing(message, fileid, span.start(), span.end(), level);
    }

    pub fn emit_diagnostic_lexing(
        &mut self,
        message: &str,
        fileid: usize,
        start: usize,
        end: usize,
        level: Level,
    ) {
        let label = Label {
            message: Some(message.to_string()),
            range: (start, end),
        };
        self.report(Diagnostic {
            title: format!("{:?} in file {}", level, fileid),
            message: message.to_string(),
            level,
            location: Some((fileid, label)),
        });
    }

    pub fn emit_general_message(&mut self, message: &str, level: Level) {
        self.report(Diagnostic {
            title: format!("{:?}", level),
            message: message.to_string(),
            level,
            location: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexing_diagnostic_points_at_source() {
        let mut handler = DiagnosticHandler::quiet();
        let fileid = handler.add_file("sys.acm".to_string(), "channel X : bogus(2);\n".to_string());
        handler.emit_diagnostic_lexing("unknown policy", fileid, 12, 17, Level::Error);
        let out = handler.error_string();
        assert!(out.contains("error: unknown policy"));
        assert!(out.contains("sys.acm:1:13"));
        assert!(!out.contains('\u{1b}'));
    }

    #[test]
    fn colored_diagnostic_strips_to_plain_text() {
        let mut handler = DiagnosticHandler::new(ColorChoice::Always);
        handler.echo = false;
        let fileid = handler.add_file("sys.acm".to_string(), "channel X : bogus(2);\n".to_string());
        handler.emit_diagnostic_lexing("unknown policy", fileid, 12, 17, Level::Error);
        assert!(handler.error_string().contains('\u{1b}'));
        let plain = strip_ansi_escapes::strip_str(handler.error_string());
        assert!(plain.contains("error: unknown policy"));
        assert!(plain.contains("^^^^^ unknown policy"));
    }

    #[test]
    fn general_message_without_location() {
        let mut handler = DiagnosticHandler::quiet();
        assert!(!handler.has_errors());
        handler.emit_general_message("nothing to do", Level::Warning);
        assert_eq!(handler.error_string(), "Warning: nothing to do\n");
    }
}
