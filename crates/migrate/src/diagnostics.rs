//! Human-readable report written when a migration run fails.

use std::fmt;

use deployd_core::attempt::Attempt;
use deployd_core::migration_state::MigrationState;
use deployd_core::retry::RetryState;
use deployd_core::scenario::Scenario;
use serde::Serialize;

/// Maximum characters of one attempt's output kept in the report.
const MAX_ATTEMPT_OUTPUT_CHARS: usize = 8 * 1024;

/// Everything an operator needs to understand a failed migration run.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub outcome: RetryState,
    pub scenario: Scenario,
    pub current_revision: Option<String>,
    pub head_revision: Option<String>,
    pub heads: Vec<String>,
    pub file_count: usize,
    pub attempts: Vec<Attempt>,
    pub recent_logs: Vec<String>,
}

impl Diagnostics {
    pub fn new(
        outcome: RetryState,
        scenario: Scenario,
        state: &MigrationState,
        attempts: Vec<Attempt>,
        recent_logs: Vec<String>,
    ) -> Self {
        Self {
            outcome,
            scenario,
            current_revision: state.current_revision.clone(),
            head_revision: state.head_revision.clone(),
            heads: state.heads.clone(),
            file_count: state.file_count,
            attempts,
            recent_logs,
        }
    }

    /// The report as a single JSON document, for structured log sinks.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "==== migration diagnostics ====")?;
        writeln!(f, "outcome:          {}", self.outcome)?;
        writeln!(f, "scenario:         {}", self.scenario)?;
        writeln!(
            f,
            "current revision: {}",
            self.current_revision.as_deref().unwrap_or("<none>")
        )?;
        match self.heads.len() {
            0 | 1 => writeln!(
                f,
                "head revision:    {}",
                self.head_revision.as_deref().unwrap_or("<none>")
            )?,
            _ => writeln!(f, "head revisions:   {} (ambiguous)", self.heads.join(", "))?,
        }
        writeln!(f, "migration files:  {}", self.file_count)?;

        writeln!(f, "---- attempts ({}) ----", self.attempts.len())?;
        if self.attempts.is_empty() {
            writeln!(f, "(none executed)")?;
        }
        for attempt in &self.attempts {
            let class = attempt
                .classification
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string());
            writeln!(
                f,
                "[attempt {}] exit={} class={} started={} duration={}ms",
                attempt.index,
                attempt.exit_code,
                class,
                attempt.started_at.to_rfc3339(),
                attempt.duration_ms,
            )?;
            writeln!(f, "{}", truncate(&attempt.output, MAX_ATTEMPT_OUTPUT_CHARS))?;
        }

        writeln!(f, "---- recent service logs ({}) ----", self.recent_logs.len())?;
        if self.recent_logs.is_empty() {
            writeln!(f, "(none captured)")?;
        }
        for line in &self.recent_logs {
            writeln!(f, "{line}")?;
        }
        write!(f, "==== end of diagnostics ====")
    }
}

/// Keep the tail of `text`, where tool errors usually are.
fn truncate(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - max_chars).collect();
    format!("... ({} chars omitted)\n{tail}", count - max_chars)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
