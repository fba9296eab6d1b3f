// Stream Parser
//
// Turns a model response into Artifacts (complete files) and Commands.
// - Fenced blocks with a shell language tag are command blocks
// - Other fenced blocks become Artifacts only when they carry `filename=`
// - Prose outside fences is scanned for `$ ` prompts and known command verbs
//
// Parsing is pure: the same text always yields the same result.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use crate::models::{Artifact, Command, ParsedResponse};
use crate::utils::text::builtin_regex;

/// Fence marker
pub const FENCE: &str = "```";

/// Language tags whose blocks are executed rather than written to disk
pub const SHELL_LANGUAGES: &[&str] = &["bash", "sh", "shell", "zsh", "fish", "powershell", "cmd"];

/// Commands shorter than this are ignored
const MIN_COMMAND_LEN: usize = 3;

static FILENAME_ATTR: Lazy<Regex> =
    Lazy::new(|| builtin_regex(r#"filename\s*=\s*(?:"([^"]+)"|'([^']+)'|(\S+))"#));

/// Prose lines that start with one of these are treated as commands
static PROSE_COMMAND: Lazy<Regex> = Lazy::new(|| {
    builtin_regex(
        r"^(?:npm (?:install|i|run|start|build|test)\b|yarn (?:install|add|start|build|dev)\b|pnpm \S|npx \S|git (?:clone|init|add|commit|push|pull)\b)",
    )
});

/// Parse a complete (or partial) response
pub fn parse(full_text: &str) -> ParsedResponse {
    let segments: Vec<&str> = full_text.split(FENCE).collect();
    // An odd number of markers leaves the last segment inside an open fence
    let has_open_fence = segments.len() % 2 == 0;

    let mut artifacts = Vec::new();
    let mut commands = CommandCollector::default();

    for (index, segment) in segments.iter().enumerate() {
        let is_last = index == segments.len() - 1;
        if index % 2 == 0 {
            for line in segment.lines() {
                if let Some(cmd) = prose_command(line) {
                    commands.push(cmd);
                }
            }
        } else if is_last && has_open_fence {
            continue;
        } else {
            match parse_fence(segment) {
                Fence::Commands(lines) => lines.into_iter().for_each(|c| commands.push(c)),
                Fence::Artifact(artifact) => artifacts.push(artifact),
                Fence::Ignored => {}
            }
        }
    }

    ParsedResponse {
        artifacts,
        commands: commands.finish(),
    }
}

pub fn is_shell_language(language: &str) -> bool {
    let lower = language.to_lowercase();
    SHELL_LANGUAGES.contains(&lower.as_str())
}

enum Fence {
    Commands(Vec<String>),
    Artifact(Artifact),
    Ignored,
}

fn parse_fence(body: &str) -> Fence {
    let (header, code) = match body.split_once('\n') {
        Some((header, rest)) => (header.trim(), rest),
        None => (body.trim(), ""),
    };

    let language = header
        .split_whitespace()
        .next()
        .filter(|token| !token.starts_with("filename"))
        .unwrap_or("")
        .to_string();

    if is_shell_language(&language) {
        return Fence::Commands(code.lines().filter_map(shell_line).collect());
    }

    let filename = FILENAME_ATTR.captures(header).and_then(|caps| {
        caps.get(1)
            .or_else(|| caps.get(2))
            .or_else(|| caps.get(3))
            .map(|m| m.as_str().trim().to_string())
    });

    match filename {
        Some(filename) if !filename.is_empty() => Fence::Artifact(Artifact {
            language,
            filename,
            code: trim_blank_lines(code),
        }),
        _ => Fence::Ignored,
    }
}

fn shell_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("$ ").unwrap_or(line).trim();
    Some(line.to_string())
}

fn prose_command(line: &str) -> Option<String> {
    let line = line.trim().trim_matches('`').trim();
    if let Some(rest) = line.strip_prefix("$ ") {
        return Some(rest.trim().to_string());
    }
    if PROSE_COMMAND.is_match(line) {
        return Some(line.to_string());
    }
    None
}

/// Drop leading and trailing whitespace-only lines, keep inner indentation
fn trim_blank_lines(code: &str) -> String {
    let lines: Vec<&str> = code.lines().collect();
    let start = lines.iter().position(|l| !l.trim().is_empty());
    let end = lines.iter().rposition(|l| !l.trim().is_empty());
    match (start, end) {
        (Some(start), Some(end)) => lines[start..=end].join("\n"),
        _ => String::new(),
    }
}

/// Order-preserving, exact-match deduplication
#[derive(Default)]
struct CommandCollector {
    seen: HashSet<String>,
    commands: Vec<Command>,
}

impl CommandCollector {
    fn push(&mut self, text: String) {
        if text.chars().count() < MIN_COMMAND_LEN || !self.seen.insert(text.clone()) {
            return;
        }
        let order = self.commands.len();
        self.commands.push(Command { text, order });
    }

    fn finish(self) -> Vec<Command> {
        self.commands
    }
}

/// Accumulates streamed tokens and reports artifacts as their fences close
#[derive(Debug, Default)]
pub struct IncrementalParser {
    buffer: String,
    emitted: usize,
}

impl IncrementalParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a token; returns artifacts whose closing fence has now arrived
    pub fn push(&mut self, token: &str) -> Vec<Artifact> {
        self.buffer.push_str(token);

        let closed_end = match closed_prefix_len(&self.buffer) {
            Some(end) => end,
            None => return Vec::new(),
        };
        let artifacts = parse(&self.buffer[..closed_end]).artifacts;
        if artifacts.len() <= self.emitted {
            return Vec::new();
        }
        let fresh = artifacts[self.emitted..].to_vec();
        self.emitted = artifacts.len();
        fresh
    }

    pub fn text(&self) -> &str {
        &self.buffer
    }

    /// Final parse of everything received
    pub fn finish(&self) -> ParsedResponse {
        parse(&self.buffer)
    }
}

/// Length of the prefix ending at the last closing fence marker
fn closed_prefix_len(text: &str) -> Option<usize> {
    let positions: Vec<usize> = text.match_indices(FENCE).map(|(i, _)| i).collect();
    let closing = positions.len() / 2 * 2;
    if closing == 0 {
        return None;
    }
    Some(positions[closing - 1] + FENCE.len())
}
