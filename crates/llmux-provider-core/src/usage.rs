use std::sync::Arc;

use llmux_common::UsageRecord;

/// One completed (or failed) upstream call, for accounting.
#[derive(Debug, Clone)]
pub struct UsageEvent {
    pub provider: String,
    pub model: String,
    pub credential_id: String,
    pub usage: UsageRecord,
    pub success: bool,
}

pub trait UsageReporter: Send + Sync {
    fn record(&self, event: UsageEvent);
}

pub type SharedUsageReporter = Arc<dyn UsageReporter>;

/// Default sink: structured tracing events.
#[derive(Debug, Default)]
pub struct TracingUsageReporter;

impl UsageReporter for TracingUsageReporter {
    fn record(&self, event: UsageEvent) {
        tracing::info!(
            event = "upstream_usage",
            provider = %event.provider,
            model = %event.model,
            credential_id = %event.credential_id,
            prompt_tokens = event.usage.prompt_tokens,
            completion_tokens = event.usage.completion_tokens,
            total_tokens = event.usage.total_tokens,
            success = event.success,
        );
    }
}

#[derive(Debug, Default)]
pub struct NoopUsageReporter;

impl UsageReporter for NoopUsageReporter {
    fn record(&self, _event: UsageEvent) {}
}
