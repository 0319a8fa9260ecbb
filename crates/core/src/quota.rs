use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Gate consulted before each analysis and bumped after each successful one.
#[async_trait::async_trait]
pub trait QuotaGate: Send + Sync {
    async fn can_use_ai(&self, user_id: &str) -> anyhow::Result<bool>;

    async fn increment_usage(&self, user_id: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Free,
    Pro,
}

type Month = (i32, u32);

#[derive(Debug, Clone, Copy)]
struct Usage {
    month: Month,
    count: u32,
}

/// Process-local quota: free users get `free_limit` analyses per calendar month (UTC), pro
/// users are unmetered. Counts are lost on restart.
#[derive(Debug)]
pub struct InMemoryQuota {
    free_limit: u32,
    plans: HashMap<String, Plan>,
    usage: tokio::sync::Mutex<HashMap<String, Usage>>,
}

impl InMemoryQuota {
    pub fn new(free_limit: u32) -> Self {
        Self {
            free_limit,
            plans: HashMap::new(),
            usage: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn with_plan(mut self, user_id: impl Into<String>, plan: Plan) -> Self {
        self.plans.insert(user_id.into(), plan);
        self
    }

    pub fn plan(&self, user_id: &str) -> Plan {
        self.plans.get(user_id).copied().unwrap_or_default()
    }

    async fn used_in(&self, user_id: &str, month: Month) -> u32 {
        let usage = self.usage.lock().await;
        match usage.get(user_id) {
            Some(u) if u.month == month => u.count,
            _ => 0,
        }
    }

    async fn can_use_ai_in(&self, user_id: &str, month: Month) -> bool {
        match self.plan(user_id) {
            Plan::Pro => true,
            Plan::Free => self.used_in(user_id, month).await < self.free_limit,
        }
    }

    async fn increment_in(&self, user_id: &str, month: Month) -> u32 {
        let mut usage = self.usage.lock().await;
        let entry = usage
            .entry(user_id.to_string())
            .or_insert(Usage { month, count: 0 });
        if entry.month != month {
            *entry = Usage { month, count: 0 };
        }
        entry.count = entry.count.saturating_add(1);
        entry.count
    }
}

fn current_month() -> Month {
    let now = Utc::now();
    (now.year(), now.month())
}

#[async_trait::async_trait]
impl QuotaGate for InMemoryQuota {
    async fn can_use_ai(&self, user_id: &str) -> anyhow::Result<bool> {
        Ok(self.can_use_ai_in(user_id, current_month()).await)
    }

    async fn increment_usage(&self, user_id: &str) -> anyhow::Result<()> {
        let count = self.increment_in(user_id, current_month()).await;
        tracing::debug!(user_id, count, plan = ?self.plan(user_id), "ai usage incremented");
        Ok(())
    }
}
