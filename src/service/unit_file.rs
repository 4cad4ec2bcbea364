//! Reading and rewriting the `ExecStart=` line of a systemd unit.
//!
//! The launch arguments of an init-managed daemon live on that line; changing
//! them is a text substitution on the unit file followed by a daemon-reload.
//! An assignment may span several physical lines joined by a trailing `\`,
//! and words may be quoted; both are handled the way systemd reads them.

use std::borrow::Cow;
use std::fs;
use std::ops::Range;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;

use crate::atomic_write::write_atomic;

static EXEC_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^ExecStart=[ \t]*").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecStart {
    pub program: String,
    pub args: Vec<String>,
}

impl ExecStart {
    fn render(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// One `ExecStart=` assignment with its continuation lines joined.
/// `span` covers the value from after `=` to the end of its last line.
struct Assignment {
    span: Range<usize>,
    value: String,
}

fn assignment_at(unit: &str, start: usize) -> Assignment {
    let mut value = String::new();
    let mut pos = start;
    loop {
        let line_end = unit[pos..].find('\n').map_or(unit.len(), |i| pos + i);
        let line = unit[pos..line_end].trim_end();

        // Comment lines inside a continuation are dropped by systemd.
        let is_comment = pos != start && line.trim_start().starts_with(['#', ';']);
        if is_comment && line_end < unit.len() {
            pos = line_end + 1;
            continue;
        }

        match line.strip_suffix('\\') {
            Some(body) if line_end < unit.len() => {
                value.push_str(body);
                value.push(' ');
                pos = line_end + 1;
            }
            _ => {
                value.push_str(line);
                return Assignment {
                    span: start..pos + line.len(),
                    value: value.trim().to_string(),
                };
            }
        }
    }
}

/// The effective assignment: the last non-empty one. Empty ones only reset the list.
fn effective_assignment(unit: &str) -> Option<Assignment> {
    EXEC_START_RE
        .find_iter(unit)
        .map(|m| assignment_at(unit, m.end()))
        .filter(|a| !a.value.is_empty())
        .last()
}

fn split_words(value: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut chars = value.chars().peekable();
    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let Some(&first) = chars.peek() else {
            break;
        };

        let mut word = String::new();
        if first == '"' || first == '\'' {
            chars.next();
            loop {
                match chars.next() {
                    Some(c) if c == first => break,
                    Some('\\') if first == '"' => match chars.next() {
                        Some(c @ ('"' | '\\')) => word.push(c),
                        Some(c) => {
                            word.push('\\');
                            word.push(c);
                        }
                        None => bail!("Unterminated quote in ExecStart="),
                    },
                    Some(c) => word.push(c),
                    None => bail!("Unterminated quote in ExecStart="),
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                word.push(c);
            }
        }
        words.push(word);
    }
    Ok(words)
}

fn quote(word: &str) -> Cow<'_, str> {
    let plain = !word.is_empty()
        && !word.contains(|c: char| c.is_whitespace() || c == '"' || c == '\'');
    if plain {
        return Cow::Borrowed(word);
    }
    Cow::Owned(format!(
        "\"{}\"",
        word.replace('\\', "\\\\").replace('"', "\\\"")
    ))
}

/// The effective (last) `ExecStart=` of a unit.
pub fn parse_exec_start(unit: &str) -> Result<ExecStart> {
    let assignment = effective_assignment(unit).ok_or_else(|| anyhow!("No ExecStart= line"))?;
    let mut words = split_words(&assignment.value)?.into_iter();
    let program = words.next().ok_or_else(|| anyhow!("No ExecStart= line"))?;
    Ok(ExecStart {
        program,
        args: words.collect(),
    })
}

/// Replace the arguments of the effective `ExecStart=`, keeping the program
/// and every other line as they are. A continued assignment is rewritten as
/// a single line.
pub fn replace_exec_args(unit: &str, args: &[String]) -> Result<String> {
    let assignment = effective_assignment(unit).ok_or_else(|| anyhow!("No ExecStart= line"))?;
    let current = parse_exec_start(unit)?;
    if current.args == args {
        return Ok(unit.to_string());
    }
    let updated = ExecStart {
        program: current.program,
        args: args.to_vec(),
    };

    let mut out = String::with_capacity(unit.len() + 64);
    out.push_str(&unit[..assignment.span.start]);
    out.push_str(&updated.render());
    out.push_str(&unit[assignment.span.end..]);
    Ok(out)
}

/// Launch arguments of the unit at `path`.
pub fn read_args(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read unit file {}", path.display()))?;
    parse_exec_start(&text)
        .map(|exec| exec.args)
        .with_context(|| format!("Cannot read launch arguments from {}", path.display()))
}

/// Rewrite the launch arguments of the unit at `path`.
/// Returns whether the file changed.
pub fn write_args(path: &Path, args: &[String]) -> Result<bool> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read unit file {}", path.display()))?;
    let updated = replace_exec_args(&text, args)
        .with_context(|| format!("Cannot rewrite launch arguments in {}", path.display()))?;
    if updated == text {
        return Ok(false);
    }
    write_atomic(path, updated.as_bytes())?;
    Ok(true)
}
