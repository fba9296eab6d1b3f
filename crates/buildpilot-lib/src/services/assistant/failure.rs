// Failure Analyzer
//
// Classifies failed command output with an ordered rule table. The first rule
// whose case-insensitive pattern matches the ANSI-stripped output wins.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::models::{ErrorAnalysis, ErrorType};
use crate::utils::text::{builtin_regex, strip_ansi};

/// Tokens that mark command output as failed
static ERROR_TOKENS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\berror\b",
        r"\berr!",
        r"\bfailed\b",
        r"command not found",
        r"is not recognized as",
        r"\benoent\b",
        r"\beacces\b",
        r"permission denied",
        r"\bfatal:",
        r"cannot find module",
        r"module not found",
        r"\beaddrinuse\b",
        r"\bsyntaxerror\b",
        r"\btypeerror\b",
        r"\breferenceerror\b",
        r"\btraceback \(most recent call last\)",
    ]
    .iter()
    .map(|p| builtin_regex(p))
    .collect()
});

/// Matches that look like errors but report success
static BENIGN_TOKENS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"\b0 errors?\b", r"\bno errors?\b", r"\bfound 0 vulnerabilities\b"]
        .iter()
        .map(|p| builtin_regex(p))
        .collect()
});

type FixPlan = fn(&Captures, &str) -> Vec<String>;

struct FailureRule {
    error_type: ErrorType,
    pattern: Regex,
    issue: &'static str,
    fix: FixPlan,
}

fn rule(error_type: ErrorType, pattern: &str, issue: &'static str, fix: FixPlan) -> FailureRule {
    FailureRule {
        error_type,
        pattern: builtin_regex(&format!("(?i){}", pattern)),
        issue,
        fix,
    }
}

fn capture<'a>(caps: &'a Captures, index: usize) -> Option<&'a str> {
    caps.get(index).map(|m| m.as_str())
}

static FAILURE_RULES: Lazy<Vec<FailureRule>> = Lazy::new(|| {
    vec![
        rule(
            ErrorType::MissingModule,
            r#"(?:cannot find module|can't resolve)\s*['"]([^'"]+)['"]"#,
            "Missing module",
            |caps, _| match capture(caps, 1) {
                Some(module) if module.starts_with('.') || module.starts_with('/') => vec![
                    format!("Create the missing file for '{}' or fix the import path", module),
                ],
                Some(module) => vec![
                    format!("Install the package: npm install {}", package_name(module)),
                    "Re-run the failed command".to_string(),
                ],
                None => vec!["Install the missing dependency".to_string()],
            },
        ),
        rule(
            ErrorType::CommandNotFound,
            r"(?m)(?:(\S+): command not found\s*$|command not found: (\S+)|'([^']+)' is not recognized as)",
            "Command not found",
            |caps, _| {
                let tool = capture(caps, 1)
                    .or_else(|| capture(caps, 2))
                    .or_else(|| capture(caps, 3))
                    .unwrap_or("the command");
                vec![
                    format!("Install {} or use an npx/npm script instead", tool),
                    "Check that the tool is on PATH".to_string(),
                ]
            },
        ),
        rule(
            ErrorType::PortInUse,
            r"eaddrinuse|address already in use|port \d+ is (?:already )?in use",
            "Port already in use",
            |_, _| {
                vec![
                    "Stop the process using the port or choose another port".to_string(),
                ]
            },
        ),
        rule(
            ErrorType::NpmError,
            r"npm err! (?:code )?e404|npm error (?:code )?e404|404 not found",
            "Package not found in the registry",
            |_, _| vec!["Check the package name and version in package.json".to_string()],
        ),
        rule(
            ErrorType::NpmError,
            r"eresolve|peer dep|conflicting peer dependency",
            "Dependency version conflict",
            |_, _| {
                vec![
                    "Align the conflicting package versions in package.json".to_string(),
                    "Or retry with npm install --legacy-peer-deps".to_string(),
                ]
            },
        ),
        rule(
            ErrorType::NpmError,
            r#"missing script:\s*"?([\w:.-]+)"?"#,
            "Missing npm script",
            |caps, _| {
                let script = capture(caps, 1).unwrap_or("the script");
                vec![format!("Add a \"{}\" script to package.json", script)]
            },
        ),
        rule(
            ErrorType::FileNotFound,
            r"enoent|no such file or directory",
            "File or directory not found",
            |_, _| vec!["Create the missing file or fix the path".to_string()],
        ),
        rule(
            ErrorType::PermissionError,
            r"eacces|permission denied|eperm",
            "Permission denied",
            |_, _| vec!["Fix file permissions or avoid writing outside the project".to_string()],
        ),
        rule(
            ErrorType::SyntaxError,
            r"syntaxerror|unexpected token",
            "Syntax error",
            |_, _| vec!["Fix the syntax error in the reported file".to_string()],
        ),
        rule(
            ErrorType::TypeError,
            r"typeerror",
            "Type error",
            |_, _| vec!["Fix the value or call reported in the type error".to_string()],
        ),
        rule(
            ErrorType::ReferenceError,
            r"referenceerror|is not defined",
            "Reference error",
            |_, _| vec!["Define or import the missing identifier".to_string()],
        ),
        rule(
            ErrorType::BuildError,
            r"build failed|failed to compile|compilation failed|error ts\d+|error during build",
            "Build failed",
            |_, _| vec!["Fix the compile errors reported above".to_string()],
        ),
        rule(
            ErrorType::GitError,
            r"fatal:",
            "Git command failed",
            |_, _| vec!["Check the repository state and the git command arguments".to_string()],
        ),
        rule(
            ErrorType::NpmError,
            r"npm err!|npm error",
            "npm command failed",
            |_, command| vec![format!("Inspect the npm error output of '{}'", command)],
        ),
    ]
});

static LOCATION_RULES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\(([^()\s]+\.[a-z]{1,5}):(\d+):\d+\)",
        r"([\w@./\\-]+\.(?:js|jsx|ts|tsx|mjs|cjs|json|css|scss|html|vue|svelte|py|rs)):(\d+)",
        r"(?:in|at) \.?/?([\w@./-]+\.[a-z]{1,5})\b",
        r#"file "([^"]+)", line (\d+)"#,
    ]
    .iter()
    .map(|p| builtin_regex(&format!("(?i){}", p)))
    .collect()
});

/// `@scope/pkg/sub/path` -> `@scope/pkg`, `pkg/sub` -> `pkg`
fn package_name(module: &str) -> String {
    let mut parts = module.split('/');
    match (parts.next(), parts.next()) {
        (Some(scope), Some(name)) if scope.starts_with('@') => format!("{}/{}", scope, name),
        (Some(name), _) => name.to_string(),
        _ => module.to_string(),
    }
}

/// True when the output contains an error token not explained by a benign phrase
pub fn output_indicates_failure(output: &str) -> bool {
    let lower = strip_ansi(output).to_lowercase();
    let cleaned = BENIGN_TOKENS
        .iter()
        .fold(lower, |text, re| re.replace_all(&text, "").into_owned());
    ERROR_TOKENS.iter().any(|re| re.is_match(&cleaned))
}

/// Classify the output of a failed command
pub fn analyze(output: &str, command: &str) -> ErrorAnalysis {
    let plain = strip_ansi(output);
    let (file, line) = extract_location(&plain);

    for rule in FAILURE_RULES.iter() {
        if let Some(caps) = rule.pattern.captures(&plain) {
            let detail = first_error_line(&plain);
            let issue = match detail {
                Some(detail) => format!("{}: {}", rule.issue, detail),
                None => rule.issue.to_string(),
            };
            let fix_plan = (rule.fix)(&caps, command);
            log::info!("[FailureAnalyzer] '{}' classified as {}", command, rule.error_type);
            return ErrorAnalysis {
                error_type: rule.error_type,
                issue,
                file,
                line,
                fix_plan,
            };
        }
    }

    ErrorAnalysis {
        error_type: ErrorType::Unknown,
        issue: first_error_line(&plain)
            .map(|l| l.to_string())
            .unwrap_or_else(|| format!("'{}' failed", command)),
        file,
        line,
        fix_plan: vec!["Review the command output and fix the reported problem".to_string()],
    }
}

fn extract_location(output: &str) -> (Option<String>, Option<u32>) {
    for re in LOCATION_RULES.iter() {
        if let Some(caps) = re.captures(output) {
            let file = caps.get(1).map(|m| m.as_str().trim_start_matches("./").to_string());
            let line = caps.get(2).and_then(|m| m.as_str().parse().ok());
            if file.is_some() {
                return (file, line);
            }
        }
    }
    (None, None)
}

fn first_error_line(output: &str) -> Option<&str> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && ERROR_TOKENS.iter().any(|re| re.is_match(&line.to_lowercase())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_script_is_npm_error() {
        let analysis = analyze(
            "npm ERR! Missing script: \"start\"\nnpm ERR! To see a list of scripts, run:\n",
            "npm start",
        );
        assert_eq!(analysis.error_type, ErrorType::NpmError);
        assert!(analysis.issue.starts_with("Missing npm script"));
        assert_eq!(analysis.fix_plan, vec!["Add a \"start\" script to package.json"]);
    }

    #[test]
    fn test_missing_module_suggests_install() {
        let analysis = analyze(
            "Error: Cannot find module 'express'\nRequire stack:\n- /app/server.js",
            "node server.js",
        );
        assert_eq!(analysis.error_type, ErrorType::MissingModule);
        assert_eq!(analysis.fix_plan[0], "Install the package: npm install express");
    }

    #[test]
    fn test_missing_scoped_module_and_relative_import() {
        let analysis = analyze("Cannot find module '@mui/material/Button'", "npm run build");
        assert_eq!(analysis.fix_plan[0], "Install the package: npm install @mui/material");

        let analysis = analyze("Module not found: Error: Can't resolve './App' in '/w/src'", "npm run build");
        assert_eq!(analysis.error_type, ErrorType::MissingModule);
        assert!(analysis.fix_plan[0].contains("./App"));
    }

    #[test]
    fn test_command_not_found() {
        let analysis = analyze("zsh: command not found: pnpm", "pnpm install");
        assert_eq!(analysis.error_type, ErrorType::CommandNotFound);
        assert!(analysis.fix_plan[0].contains("pnpm"));

        let analysis = analyze("bash: vite: command not found", "vite");
        assert!(analysis.fix_plan[0].contains("vite"));
    }

    #[test]
    fn test_classification_table() {
        let cases = [
            ("Error: listen EADDRINUSE: address already in use :::3000", ErrorType::PortInUse),
            ("npm ERR! code E404\nnpm ERR! 404 Not Found - GET https://registry", ErrorType::NpmError),
            ("npm ERR! code ERESOLVE\nnpm ERR! ERESOLVE unable to resolve", ErrorType::NpmError),
            ("Error: ENOENT: no such file or directory, open 'a.txt'", ErrorType::FileNotFound),
            ("Error: EACCES: permission denied, mkdir '/usr/lib'", ErrorType::PermissionError),
            ("SyntaxError: Unexpected token '}'", ErrorType::SyntaxError),
            ("TypeError: Cannot read properties of undefined", ErrorType::TypeError),
            ("ReferenceError: foo is not defined", ErrorType::ReferenceError),
            ("src/App.tsx(3,1): error TS2304: Cannot find name 'x'", ErrorType::BuildError),
            ("fatal: not a git repository", ErrorType::GitError),
            ("something odd happened", ErrorType::Unknown),
        ];
        for (output, expected) in cases {
            assert_eq!(analyze(output, "cmd").error_type, expected, "output: {}", output);
        }
    }

    #[test]
    fn test_location_extraction() {
        let analysis = analyze(
            "SyntaxError: Unexpected token\n    at Object.<anonymous> (/w/src/index.js:12:5)",
            "node src/index.js",
        );
        assert_eq!(analysis.file.as_deref(), Some("/w/src/index.js"));
        assert_eq!(analysis.line, Some(12));

        let analysis = analyze("./src/App.jsx:7:3: ERROR: Expected \";\"", "npm run build");
        assert_eq!(analysis.file.as_deref(), Some("src/App.jsx"));
        assert_eq!(analysis.line, Some(7));
    }

    #[test]
    fn test_ansi_is_ignored() {
        let analysis = analyze("\x1b[31mnpm ERR!\x1b[0m missing script: dev", "npm run dev");
        assert_eq!(analysis.error_type, ErrorType::NpmError);
    }

    #[test]
    fn test_output_indicates_failure() {
        assert!(output_indicates_failure("npm ERR! missing script: start"));
        assert!(output_indicates_failure("bash: foo: command not found"));
        assert!(output_indicates_failure("Build failed with 2 errors"));
        assert!(!output_indicates_failure("added 12 packages, found 0 vulnerabilities"));
        assert!(!output_indicates_failure("Compiled with 0 errors"));
        assert!(!output_indicates_failure("webpack compiled successfully"));
    }
}
