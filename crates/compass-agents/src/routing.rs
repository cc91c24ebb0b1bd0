use compass_config::AgentConfig;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::agents::parse_json_reply;
use crate::caller::{AgentCaller, CallInput};

pub const PRIMARY_COUNSELOR: &str = "primary_counselor";
pub const STRATEGIC_PLANNING: &str = "strategic_planning";
pub const COLLEGE_RESEARCH: &str = "college_research";

pub const KNOWN_AGENTS: [&str; 3] = [PRIMARY_COUNSELOR, STRATEGIC_PLANNING, COLLEGE_RESEARCH];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDecision {
    #[serde(default)]
    pub needs_routing: bool,
    #[serde(default)]
    pub target_agent: Option<String>,
    #[serde(default)]
    pub reason: String,
}

impl RoutingDecision {
    pub fn none(reason: impl Into<String>) -> Self {
        Self {
            needs_routing: false,
            target_agent: None,
            reason: reason.into(),
        }
    }

    /// Normalised target when routing was requested.
    pub fn target(&self) -> Option<String> {
        if !self.needs_routing {
            return None;
        }
        self.target_agent
            .as_deref()
            .map(normalize_agent_name)
            .filter(|name| !name.is_empty())
    }
}

/// `"Strategic Planning Agent"` and `"strategic-planning"` both become `strategic_planning`.
pub fn normalize_agent_name(raw: &str) -> String {
    let mut name: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect();
    while name.contains("__") {
        name = name.replace("__", "_");
    }
    let name = name.trim_matches('_');
    let name = name.strip_suffix("_agent").unwrap_or(name);
    match name {
        "strategic" | "strategy" => STRATEGIC_PLANNING.to_string(),
        "research" | "college" => COLLEGE_RESEARCH.to_string(),
        "counselor" | "primary" => PRIMARY_COUNSELOR.to_string(),
        other => other.to_string(),
    }
}

pub fn routing_prompt(query: &str) -> String {
    format!(
        r#"Analyze this query and determine if it should be handled by a specialized agent.
Query: {query}

Available specialized agents:
1. strategic_planning: long-term planning, application strategy, profile gaps and milestones
2. college_research: college matching, school comparisons and admissions statistics

Questions about deadlines, activities or essays stay with the primary counselor.

Respond in JSON format:
{{
    "needs_routing": boolean,
    "target_agent": string or null,
    "reason": string
}}"#
    )
}

/// Ask the counselor's model whether `query` belongs to a specialist.
/// Any call or parse failure means no routing.
pub async fn route_query(caller: &AgentCaller, config: &AgentConfig, query: &str) -> RoutingDecision {
    let input = CallInput::prompt(routing_prompt(query)).json();
    let raw = match caller.call(config, &input).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!("routing call failed: {e}");
            return RoutingDecision::none("Routing failed");
        }
    };

    match parse_json_reply::<RoutingDecision>(&raw) {
        Ok(decision) => {
            info!(
                "routing decision: needs_routing={} target={:?} reason={}",
                decision.needs_routing, decision.target_agent, decision.reason
            );
            decision
        }
        Err(e) => {
            warn!("unparsable routing decision: {e}");
            RoutingDecision::none("Routing failed")
        }
    }
}
