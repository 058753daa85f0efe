//! Lenient parsing of the agent's JSON summary on stdout.
//!
//! The agent's output is opaque to the supervisor; the only fields read are the
//! session identifier (for resumption) and a few cost counters that are logged.
//! Anything that does not parse is ignored.

use serde::Deserialize;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AgentReport {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub is_error: Option<bool>,
    #[serde(default)]
    pub cost_usd: Option<f64>,
    #[serde(default, alias = "total_cost_usd")]
    pub total_cost: Option<f64>,
    #[serde(default)]
    pub num_turns: Option<u32>,
}

impl AgentReport {
    /// The agent flagged its own run as failed, whatever its exit code.
    pub fn reported_error(&self) -> bool {
        self.is_error.unwrap_or(false)
    }

    /// Final response text, if the agent reported a non-blank one.
    pub fn result_text(&self) -> Option<&str> {
        self.result.as_deref().map(str::trim).filter(|text| !text.is_empty())
    }
}

/// Parse the agent summary from captured stdout.
///
/// Accepts either a single JSON document or a stream of JSON lines, in which
/// case the last object carrying a `session_id` wins.
pub fn parse_agent_report(stdout: &[u8]) -> Option<AgentReport> {
    let text = String::from_utf8_lossy(stdout);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(report) = serde_json::from_str::<AgentReport>(trimmed) {
        return Some(report);
    }
    trimmed
        .lines()
        .rev()
        .filter_map(|line| serde_json::from_str::<AgentReport>(line.trim()).ok())
        .find(|report| report.session_id.is_some())
}
