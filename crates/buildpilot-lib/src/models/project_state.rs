// Project state models
// Durable facts about the project being built, kept per workspace

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A design decision recorded during the conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Long-lived project facts injected as a preamble into every prompt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectState {
    pub project_goal: Option<String>,
    pub architecture: Option<String>,
    /// Insertion-ordered, no duplicates
    pub tech_stack: Vec<String>,
    pub decisions: Vec<Decision>,
    /// Insertion-ordered, no duplicates
    pub constraints: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for ProjectState {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            project_goal: None,
            architecture: None,
            tech_stack: Vec::new(),
            decisions: Vec::new(),
            constraints: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl ProjectState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once any fact has been recorded
    pub fn is_initialized(&self) -> bool {
        self.project_goal.is_some()
            || self.architecture.is_some()
            || !self.tech_stack.is_empty()
            || !self.decisions.is_empty()
            || !self.constraints.is_empty()
    }

    /// Set the goal if none is recorded yet. Returns true when changed.
    pub fn set_goal_if_empty(&mut self, goal: &str) -> bool {
        let goal = goal.trim();
        if self.project_goal.is_some() || goal.is_empty() {
            return false;
        }
        self.project_goal = Some(goal.to_string());
        self.touch();
        true
    }

    /// Set the architecture if none is recorded yet. Returns true when changed.
    pub fn set_architecture_if_empty(&mut self, architecture: &str) -> bool {
        let architecture = architecture.trim();
        if self.architecture.is_some() || architecture.is_empty() {
            return false;
        }
        self.architecture = Some(architecture.to_string());
        self.touch();
        true
    }

    pub fn add_technology(&mut self, tech: &str) -> bool {
        if tech.is_empty() || self.tech_stack.iter().any(|t| t == tech) {
            return false;
        }
        self.tech_stack.push(tech.to_string());
        self.touch();
        true
    }

    pub fn add_decision(&mut self, text: &str) {
        self.decisions.push(Decision {
            text: text.to_string(),
            timestamp: Utc::now(),
        });
        self.touch();
    }

    pub fn add_constraint(&mut self, constraint: &str) -> bool {
        if constraint.is_empty() || self.constraints.iter().any(|c| c == constraint) {
            return false;
        }
        self.constraints.push(constraint.to_string());
        self.touch();
        true
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Cached summary of the middle segment of a long conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub summary: String,
    /// First summarized message index (inclusive)
    pub covered_start: usize,
    /// Last summarized message index (exclusive)
    pub covered_end: usize,
    pub created_at: DateTime<Utc>,
}

impl ConversationSummary {
    pub fn new(summary: String, covered_start: usize, covered_end: usize) -> Self {
        Self {
            summary,
            covered_start,
            covered_end,
            created_at: Utc::now(),
        }
    }
}
