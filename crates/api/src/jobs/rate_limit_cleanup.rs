//! Evicts idle clients from the auth rate limiter.

use std::sync::Arc;

use super::scheduler::{Job, JobFrequency};
use crate::middleware::AuthRateLimiter;

pub struct RateLimitCleanupJob {
    limiter: Arc<AuthRateLimiter>,
}

impl RateLimitCleanupJob {
    pub fn new(limiter: Arc<AuthRateLimiter>) -> Self {
        Self { limiter }
    }
}

#[async_trait::async_trait]
impl Job for RateLimitCleanupJob {
    fn name(&self) -> &'static str {
        "rate_limit_cleanup"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Minutes(5)
    }

    async fn execute(&self) -> Result<(), String> {
        self.limiter.retain_recent();
        Ok(())
    }
}
