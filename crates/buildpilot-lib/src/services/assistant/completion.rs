// Completion Detector
//
// Decides when a command written to an interactive terminal has finished by
// watching the output that appears after a mark taken before the write.
//
// Stops on the first of:
// - a completion rule matching the new output (plus a grace period)
// - output unchanged for the stability window, once some output exists
// - long-running commands: a local URL appears, or the detach delay passes
// - cancellation
// - the absolute timeout

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::time::{Duration, Instant};

use super::stream::CancelFlag;
use crate::services::terminal::TerminalHandle;
use crate::utils::config::CompletionConfig;
use crate::utils::text::{builtin_regex, strip_ansi, strip_command_echo};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    PatternMatched,
    OutputStable,
    DevServerReady,
    LongRunningDetached,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResult {
    /// Output since the mark, without ANSI escapes or the command's echo
    pub output: String,
    pub reason: CompletionReason,
    pub elapsed: Duration,
    /// Local dev-server URL seen in the output
    pub preview_url: Option<String>,
}

struct Rule {
    name: &'static str,
    pattern: Regex,
}

fn rule(name: &'static str, pattern: &str) -> Rule {
    Rule {
        name,
        pattern: builtin_regex(pattern),
    }
}

/// Ordered completion rules, tested against ANSI-stripped output
static COMPLETION_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        rule("npm-installed", r"(?i)\badded \d+ packages?|\bup to date\b|\bfound \d+ vulnerabilit"),
        rule("npm-failed", r"(?i)npm err!|npm error"),
        rule("yarn-done", r"(?i)\bdone in \d"),
        rule("pnpm-done", r"(?i)\bpackages: [+-]\d+"),
        rule("shell-prompt", r"(?:^|\n)[^\n]*[$%#>❯➜]\s*\z"),
        rule("generic", r"(?i)\b(?:completed|finished|error|failed)\b"),
    ]
});

/// Commands that start servers or watchers and never exit on their own
static LONG_RUNNING_RULES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)^(?:npm|pnpm|yarn|bun)\s+(?:run\s+)?(?:dev|start|serve|preview|watch)\b",
        r"(?i)^npx\s+(?:vite|next|serve|nodemon|http-server)\b",
        r"(?i)^(?:vite|nodemon|http-server|live-server)\b",
        r"(?i)^(?:next|nuxt|astro)\s+dev\b",
        r"(?i)^ng\s+serve\b",
        r"(?i)^python3?\s+-m\s+http\.server\b",
        r"(?i)\s--watch\b",
    ]
    .iter()
    .map(|p| builtin_regex(p))
    .collect()
});

/// URL patterns for a local development server, most specific first
static PREVIEW_URL_RULES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)Local:\s+(https?://[^\s]+)",
        r"(?i)(https?://(?:localhost|127\.0\.0\.1|0\.0\.0\.0)(?::\d+)?[^\s]*)",
        r"(?i)\blocalhost:(\d{2,5})\b",
    ]
    .iter()
    .map(|p| builtin_regex(p))
    .collect()
});

pub fn is_long_running(command: &str) -> bool {
    let command = command.trim();
    LONG_RUNNING_RULES.iter().any(|re| re.is_match(command))
}

/// Name of the first completion rule matching `output`
pub fn match_completion_rule(output: &str) -> Option<&'static str> {
    COMPLETION_RULES
        .iter()
        .find(|rule| rule.pattern.is_match(output))
        .map(|rule| rule.name)
}

/// Find a local dev-server URL, normalised to `http://localhost:<port>`
pub fn detect_preview_url(output: &str) -> Option<String> {
    for (index, re) in PREVIEW_URL_RULES.iter().enumerate() {
        if let Some(caps) = re.captures(output) {
            let raw = caps.get(1)?.as_str();
            let url = if index == PREVIEW_URL_RULES.len() - 1 {
                format!("http://localhost:{}", raw)
            } else {
                raw.trim_end_matches(['.', ',', ')', ']', '\'', '"']).to_string()
            };
            return Some(
                url.replace("://127.0.0.1", "://localhost")
                    .replace("://0.0.0.0", "://localhost"),
            );
        }
    }
    None
}

pub struct CompletionDetector {
    config: CompletionConfig,
}

impl CompletionDetector {
    pub fn new(config: CompletionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompletionConfig {
        &self.config
    }

    /// Wait until the command written after `mark` has finished
    pub async fn wait_for_completion(
        &self,
        terminal: &TerminalHandle,
        mark: usize,
        command: &str,
        cancel: &CancelFlag,
    ) -> CompletionResult {
        let long_running = is_long_running(command);
        let start = Instant::now();
        let absolute = self.config.absolute_timeout();
        let mut last_len = terminal.output_len();
        let mut last_change = start;

        let finish = |reason: CompletionReason, output: String| {
            let preview_url = detect_preview_url(&output);
            log::debug!(
                "[Completion] '{}' finished after {:?}: {:?}",
                command,
                start.elapsed(),
                reason
            );
            CompletionResult {
                output,
                reason,
                elapsed: start.elapsed(),
                preview_url,
            }
        };

        loop {
            if cancel.is_cancelled() {
                return finish(CompletionReason::Cancelled, self.output(terminal, mark, command));
            }
            let elapsed = start.elapsed();
            if elapsed >= absolute {
                log::warn!("[Completion] '{}' timed out after {:?}", command, absolute);
                return finish(CompletionReason::TimedOut, self.output(terminal, mark, command));
            }

            tokio::time::sleep(self.config.poll_interval().min(absolute - elapsed)).await;

            let len = terminal.output_len();
            if len != last_len {
                last_len = len;
                last_change = Instant::now();
            }
            let output = self.output(terminal, mark, command);

            if long_running {
                if detect_preview_url(&output).is_some() {
                    return finish(CompletionReason::DevServerReady, output);
                }
                if start.elapsed() >= self.config.long_running_exit() {
                    return finish(CompletionReason::LongRunningDetached, output);
                }
                continue;
            }

            if let Some(rule) = match_completion_rule(&output) {
                log::debug!("[Completion] Rule '{}' matched for '{}'", rule, command);
                tokio::time::sleep(self.config.grace_period()).await;
                return finish(CompletionReason::PatternMatched, self.output(terminal, mark, command));
            }

            if len > mark && last_change.elapsed() >= self.config.stability_window() {
                return finish(CompletionReason::OutputStable, output);
            }
        }
    }

    /// New output since `mark`, without colors or the shell's echo of `command`
    fn output(&self, terminal: &TerminalHandle, mark: usize, command: &str) -> String {
        let plain = strip_ansi(&terminal.output_since(mark));
        strip_command_echo(&plain, command).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> CompletionConfig {
        CompletionConfig {
            poll_interval_ms: 10,
            grace_period_ms: 10,
            stability_window_ms: 60,
            long_running_exit_ms: 150,
            absolute_timeout_ms: 400,
        }
    }

    #[test]
    fn test_long_running_detection() {
        assert!(is_long_running("npm run dev"));
        assert!(is_long_running("npm start"));
        assert!(is_long_running("yarn dev"));
        assert!(is_long_running("pnpm dev"));
        assert!(is_long_running("npx vite"));
        assert!(is_long_running("vite --port 3000"));
        assert!(is_long_running("tsc --watch"));
        assert!(!is_long_running("npm install"));
        assert!(!is_long_running("npm run build"));
    }

    #[test]
    fn test_completion_rules_in_order() {
        assert_eq!(match_completion_rule("added 120 packages in 3s"), Some("npm-installed"));
        assert_eq!(match_completion_rule("npm ERR! missing script: start"), Some("npm-failed"));
        assert_eq!(match_completion_rule("✨  Done in 2.31s."), Some("yarn-done"));
        assert_eq!(match_completion_rule("output\nuser@host:~/app$ "), Some("shell-prompt"));
        assert_eq!(match_completion_rule("Build finished"), Some("generic"));
        assert_eq!(match_completion_rule("compiling..."), None);
    }

    #[test]
    fn test_preview_url_detection() {
        assert_eq!(
            detect_preview_url("  ➜  Local:   http://localhost:5173/\n"),
            Some("http://localhost:5173/".to_string())
        );
        assert_eq!(
            detect_preview_url("Server running at http://127.0.0.1:8080."),
            Some("http://localhost:8080".to_string())
        );
        assert_eq!(
            detect_preview_url("listening on localhost:3000"),
            Some("http://localhost:3000".to_string())
        );
        assert_eq!(detect_preview_url("no server here"), None);
    }

    #[tokio::test]
    async fn test_pattern_match_completes() {
        let terminal = TerminalHandle::new("t", "/tmp", 10_000);
        let mark = terminal.output_len();
        let detector = CompletionDetector::new(fast_config());

        let writer = terminal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.push_output("\x1b[32madded 3 packages\x1b[0m in 1s\n");
        });

        let result = detector
            .wait_for_completion(&terminal, mark, "npm install", &CancelFlag::new())
            .await;

        assert_eq!(result.reason, CompletionReason::PatternMatched);
        assert_eq!(result.output, "added 3 packages in 1s\n");
    }

    #[tokio::test]
    async fn test_echoed_command_does_not_trigger_rules() {
        let terminal = TerminalHandle::new("t", "/tmp", 10_000);
        let mark = terminal.output_len();
        terminal.push_output("npm install serialize-error\r\n");

        let writer = terminal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            writer.push_output("added 1 package in 1s\n");
        });

        let config = CompletionConfig {
            stability_window_ms: 300,
            ..fast_config()
        };
        let result = CompletionDetector::new(config)
            .wait_for_completion(&terminal, mark, "npm install serialize-error", &CancelFlag::new())
            .await;

        // the word "error" in the echo must not end the wait early
        assert_eq!(result.reason, CompletionReason::PatternMatched);
        assert!(result.elapsed >= Duration::from_millis(120));
        assert_eq!(result.output, "added 1 package in 1s\n");
    }

    #[tokio::test]
    async fn test_stable_output_completes() {
        let terminal = TerminalHandle::new("t", "/tmp", 10_000);
        terminal.push_output("old output\n");
        let mark = terminal.output_len();
        terminal.push_output("compiling...\n");

        let result = CompletionDetector::new(fast_config())
            .wait_for_completion(&terminal, mark, "node build.js", &CancelFlag::new())
            .await;

        assert_eq!(result.reason, CompletionReason::OutputStable);
        assert_eq!(result.output, "compiling...\n");
    }

    #[tokio::test]
    async fn test_silent_terminal_hits_absolute_timeout() {
        let terminal = TerminalHandle::new("t", "/tmp", 10_000);
        let mark = terminal.output_len();
        let config = fast_config();
        let limit = config.absolute_timeout();

        let result = CompletionDetector::new(config)
            .wait_for_completion(&terminal, mark, "node slow.js", &CancelFlag::new())
            .await;

        assert_eq!(result.reason, CompletionReason::TimedOut);
        assert!(result.elapsed >= limit);
        assert!(result.elapsed < limit + Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_dev_server_returns_on_url() {
        let terminal = TerminalHandle::new("t", "/tmp", 10_000);
        let mark = terminal.output_len();
        terminal.push_output("VITE v5 ready\n  Local:   http://localhost:5173/\n");

        let result = CompletionDetector::new(fast_config())
            .wait_for_completion(&terminal, mark, "npm run dev", &CancelFlag::new())
            .await;

        assert_eq!(result.reason, CompletionReason::DevServerReady);
        assert_eq!(result.preview_url.as_deref(), Some("http://localhost:5173/"));
    }

    #[tokio::test]
    async fn test_long_running_detaches_after_delay() {
        let terminal = TerminalHandle::new("t", "/tmp", 10_000);
        let mark = terminal.output_len();
        terminal.push_output("watching for file changes... error count 0\n");

        let result = CompletionDetector::new(fast_config())
            .wait_for_completion(&terminal, mark, "tsc --watch", &CancelFlag::new())
            .await;

        // Long-running commands ignore completion and stability rules
        assert_eq!(result.reason, CompletionReason::LongRunningDetached);
    }

    #[tokio::test]
    async fn test_cancellation_stops_waiting() {
        let terminal = TerminalHandle::new("t", "/tmp", 10_000);
        let cancel = CancelFlag::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let result = CompletionDetector::new(fast_config())
            .wait_for_completion(&terminal, 0, "node slow.js", &cancel)
            .await;

        assert_eq!(result.reason, CompletionReason::Cancelled);
    }
}
