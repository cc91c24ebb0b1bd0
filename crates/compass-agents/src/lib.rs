pub mod actionable;
pub mod agents;
pub mod caller;
pub mod matches;
pub mod orchestrator;
pub mod providers;
pub mod routing;

#[cfg(test)]
mod testing;

pub use actionable::{
    ActionableItem, ExtractOptions, Extraction, MetadataPolicy, extract, extract_with,
};
pub use agents::{
    AgentHandle, CollegeResearchAgent, CounselorAgent, MilestoneSuggestion, ProfileGap,
    StrategicPlanningAgent,
};
pub use caller::{AgentCaller, CallInput, ProviderRegistry};
pub use matches::{
    CollegeMatch, CollegeMatchesDocument, MATCHES_SCHEMA_VERSION, MatchCache, MatchGenerator,
    StaleReason, profile_hash, staleness,
};
pub use orchestrator::{ChatReply, Orchestrator, RequestContext, StrategyReport};
pub use providers::{
    AnthropicProvider, ChatRole, LlmMessage, LlmProvider, LlmRequest, LlmResponse,
    OpenAiProvider, ResponseFormat, Usage,
};
pub use routing::{RoutingDecision, route_query};
