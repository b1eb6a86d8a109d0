// src/exec/output.rs

//! Where child process output goes.
//!
//! Output arrives from the pseudo-terminal in arbitrary chunks. A
//! [`LineBuffer`] reassembles them into lines, [`Replacements`] rewrites
//! each line, and an [`OutputSink`] prints the result.

use std::io::Write;

use colored::{Color, Colorize};
use regex::bytes::{NoExpand, Regex};

use crate::errors::{DevloopError, Result};

/// Destination for one supervisor's output.
pub trait OutputSink: Send + Sync {
    /// One complete line of child output, without its line terminator.
    fn write_line(&self, line: &[u8]);

    /// Lifecycle marker (`Building`, `<end: ...>`).
    fn info(&self, message: &str) {
        self.write_line(message.as_bytes());
    }

    /// Failure marker.
    fn error(&self, message: &str) {
        self.write_line(message.as_bytes());
    }
}

/// Console sink printing `name: line`, name padded and coloured.
#[derive(Debug, Clone)]
pub struct PrefixedConsole {
    prefix: String,
    color: Color,
}

const PALETTE: [Color; 6] = [
    Color::Cyan,
    Color::Magenta,
    Color::Blue,
    Color::Yellow,
    Color::Green,
    Color::BrightCyan,
];

impl PrefixedConsole {
    /// `width` is the length of the longest rule name, so prefixes align.
    pub fn new(name: &str, width: usize) -> Self {
        let index = name.bytes().map(usize::from).sum::<usize>() % PALETTE.len();
        Self {
            prefix: format!("{name:>width$}"),
            color: PALETTE[index],
        }
    }

    fn print(&self, body: &str) {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        // Nothing sensible to do when stdout is gone.
        let _ = writeln!(out, "{}: {}", self.prefix.color(self.color).bold(), body);
    }
}

impl OutputSink for PrefixedConsole {
    fn write_line(&self, line: &[u8]) {
        self.print(&String::from_utf8_lossy(line));
    }

    fn info(&self, message: &str) {
        self.print(&message.dimmed().to_string());
    }

    fn error(&self, message: &str) {
        self.print(&message.red().bold().to_string());
    }
}

/// Reassembles arbitrary byte chunks into lines.
///
/// Both `\n` and `\r\n` terminate a line; a trailing `\r` is dropped since a
/// pseudo-terminal translates `\n` into `\r\n`.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns the lines it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }

    /// Whatever is left once the stream ends.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        if self.pending.is_empty() {
            return None;
        }
        let mut rest = std::mem::take(&mut self.pending);
        if rest.last() == Some(&b'\r') {
            rest.pop();
        }
        Some(rest)
    }
}

/// Literal substring substitutions applied to output.
#[derive(Debug, Default)]
pub struct Replacements {
    rules: Vec<(Regex, Vec<u8>)>,
}

impl Replacements {
    pub fn new<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut rules = Vec::new();
        for (from, to) in pairs {
            if from.is_empty() {
                continue;
            }
            let re = Regex::new(&regex::escape(from)).map_err(|err| {
                DevloopError::ConfigError(format!("invalid replacement '{from}': {err}"))
            })?;
            rules.push((re, to.as_bytes().to_vec()));
        }
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn apply(&self, input: &[u8]) -> Vec<u8> {
        let mut out = input.to_vec();
        for (re, to) in &self.rules {
            out = re.replace_all(&out, NoExpand(to.as_slice())).into_owned();
        }
        out
    }
}
