use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use compass_agents::{LlmProvider, LlmRequest, LlmResponse, ProviderRegistry};
use compass_common::{Error, Result};
use compass_config::ProviderConfig;

struct SlowProvider {
    id: String,
    delay: Duration,
    healthy: bool,
}

#[async_trait]
impl LlmProvider for SlowProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    async fn complete(&self, _request: &LlmRequest) -> Result<LlmResponse> {
        Err(Error::Agent("not used".into()))
    }

    async fn health_check(&self) -> Result<bool> {
        tokio::time::sleep(self.delay).await;
        Ok(self.healthy)
    }
}

#[tokio::test]
async fn test_health_check_runs_concurrently() {
    let mut registry = ProviderRegistry::new();
    let delay = Duration::from_millis(100);
    let count = 5;

    for i in 0..count {
        registry.register(
            Arc::new(SlowProvider {
                id: format!("mock-{i}"),
                delay,
                healthy: i != 2,
            }),
            ProviderConfig::default(),
        );
    }

    let start = Instant::now();
    let results = registry.health_check_all().await;
    let elapsed = start.elapsed();

    assert_eq!(results.len(), count);
    assert_eq!(results[2], ("mock-2".to_string(), false));
    assert!(results.iter().filter(|(_, ok)| *ok).count() == count - 1);

    // Sequential probing would take count * delay; allow half of that.
    let max_allowed = delay * count as u32 / 2;
    assert!(
        elapsed < max_allowed,
        "health checks took {elapsed:?}, expected under {max_allowed:?}"
    );
    assert!(elapsed >= delay);
}
