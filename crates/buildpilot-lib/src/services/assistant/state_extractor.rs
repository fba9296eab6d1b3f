// Project state extraction
//
// Scans the opening user messages of a conversation for the project goal,
// the technologies mentioned and an architecture description.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{Message, MessageRole, ProjectState};
use crate::utils::config::ContextConfig;
use crate::utils::text::{builtin_regex, head_chars};

/// (keyword, technology) in reporting order
const TECH_KEYWORDS: &[(&str, &str)] = &[
    ("react", "React"),
    ("vue", "Vue"),
    ("angular", "Angular"),
    ("electron", "Electron"),
    ("node", "Node.js"),
    ("express", "Express"),
    ("typescript", "TypeScript"),
    ("javascript", "JavaScript"),
    ("python", "Python"),
    ("tailwind", "Tailwind CSS"),
    ("firebase", "Firebase"),
    ("mongodb", "MongoDB"),
    ("postgresql", "PostgreSQL"),
    ("mysql", "MySQL"),
    ("redis", "Redis"),
    ("docker", "Docker"),
    ("kubernetes", "Kubernetes"),
    ("aws", "AWS"),
    ("vercel", "Vercel"),
    ("netlify", "Netlify"),
];

const ARCHITECTURE_PHRASES: &[&str] = &[
    "desktop app",
    "web app",
    "mobile app",
    "fullstack",
    "frontend",
    "backend",
    "microservices",
    "monolith",
    "serverless",
    "spa",
    "ssr",
    "static site",
];

// Keywords match at a word start so "nodejs" and "reactjs" count
static TECH_RULES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    TECH_KEYWORDS
        .iter()
        .map(|(keyword, tech)| (builtin_regex(&format!(r"(?i)\b{}", regex::escape(keyword))), *tech))
        .collect()
});

// Phrases match whole words so "spa" does not fire on "space"
static ARCHITECTURE_RULES: Lazy<Vec<Regex>> = Lazy::new(|| {
    ARCHITECTURE_PHRASES
        .iter()
        .map(|phrase| builtin_regex(&format!(r"(?i)\b{}\b", regex::escape(phrase))))
        .collect()
});

/// Technologies mentioned in `text`, in table order
pub fn detect_technologies(text: &str) -> Vec<&'static str> {
    TECH_RULES
        .iter()
        .filter(|(re, _)| re.is_match(text))
        .map(|(_, tech)| *tech)
        .collect()
}

/// The sentence containing the first architecture phrase, trimmed
pub fn detect_architecture(text: &str) -> Option<String> {
    let rule = ARCHITECTURE_RULES.iter().find(|re| re.is_match(text))?;
    text.split(['.', '!', '?'])
        .find(|sentence| rule.is_match(sentence))
        .map(|sentence| sentence.trim().to_string())
        .filter(|sentence| !sentence.is_empty())
}

/// Update `state` from the opening messages of `history`.
///
/// Extraction only runs while the conversation holds at most
/// `extraction_window` user messages. Returns true when the state changed.
pub fn extract_project_state(state: &mut ProjectState, history: &[Message], config: &ContextConfig) -> bool {
    let user_messages: Vec<&Message> = history.iter().filter(|m| m.role == MessageRole::User).collect();
    if user_messages.is_empty() || user_messages.len() > config.extraction_window {
        return false;
    }

    let mut changed = false;

    if let Some(first) = history.first().filter(|m| m.role == MessageRole::User) {
        changed |= state.set_goal_if_empty(head_chars(&first.content, config.goal_max_chars));
    }

    for message in user_messages.iter().take(config.extraction_window) {
        for tech in detect_technologies(&message.content) {
            changed |= state.add_technology(tech);
        }
        if state.architecture.is_none() {
            if let Some(architecture) = detect_architecture(&message.content) {
                changed |= state.set_architecture_if_empty(&architecture);
            }
        }
    }

    if changed {
        log::info!(
            "[ProjectState] Extracted state: goal={}, architecture={}, {} technologies",
            state.project_goal.is_some(),
            state.architecture.is_some(),
            state.tech_stack.len()
        );
    }
    changed
}
