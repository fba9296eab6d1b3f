// Text helpers for terminal output and built-in pattern tables

use regex::Regex;

/// Compile a built-in pattern. An invalid one is logged and replaced by a
/// pattern that never matches.
pub fn builtin_regex(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(re) => re,
        Err(e) => {
            log::error!("[Patterns] Invalid built-in pattern {:?}: {}", pattern, e);
            #[allow(clippy::unwrap_used)]
            Regex::new(r"\b\B").unwrap()
        }
    }
}

/// Remove ANSI escape sequences (colors, cursor movement) from terminal output
pub fn strip_ansi(input: &str) -> String {
    strip_ansi_escapes::strip_str(input)
}

/// Last `max_chars` characters of `input`
pub fn tail_chars(input: &str, max_chars: usize) -> &str {
    let count = input.chars().count();
    if count <= max_chars {
        return input;
    }
    match input.char_indices().nth(count - max_chars) {
        Some((idx, _)) => &input[idx..],
        None => input,
    }
}

/// First `max_chars` characters of `input`
pub fn head_chars(input: &str, max_chars: usize) -> &str {
    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => &input[..idx],
        None => input,
    }
}

/// Drop the shell's echo of `command` from the start of `output`.
///
/// The echo is the first line when it ends with the typed command, with or
/// without a prompt in front of it. An echo still missing its newline counts
/// as the whole output.
pub fn strip_command_echo<'a>(output: &'a str, command: &str) -> &'a str {
    let command = command.trim();
    if command.is_empty() {
        return output;
    }
    let (first, rest) = match output.find('\n') {
        Some(idx) => (&output[..idx], &output[idx + 1..]),
        None => (output, ""),
    };
    if first.trim_end_matches('\r').trim_end().ends_with(command) {
        rest
    } else {
        output
    }
}

/// Last `max_lines` lines of `input`
pub fn tail_lines(input: &str, max_lines: usize) -> &str {
    if max_lines == 0 {
        return "";
    }
    let trimmed = input.strip_suffix('\n').unwrap_or(input);
    match trimmed.rmatch_indices('\n').nth(max_lines - 1) {
        Some((idx, _)) => &input[idx + 1..],
        None => input,
    }
}
