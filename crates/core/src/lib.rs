pub mod analysis;
pub mod domain;
pub mod llm;
pub mod quota;
pub mod storage;

pub mod config {
    use anyhow::Context;

    const DEFAULT_FREE_PLAN_LIMIT: u32 = 10;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub gemini_api_key: Option<String>,
        pub sentry_dsn: Option<String>,
        pub free_plan_limit: u32,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let free_plan_limit = match std::env::var("AI_FREE_PLAN_LIMIT") {
                Ok(s) => s
                    .trim()
                    .parse::<u32>()
                    .with_context(|| format!("AI_FREE_PLAN_LIMIT must be a non-negative integer (got {s:?})"))?,
                Err(_) => DEFAULT_FREE_PLAN_LIMIT,
            };

            Ok(Self {
                database_url: non_empty_var("DATABASE_URL"),
                gemini_api_key: non_empty_var("GEMINI_API_KEY"),
                sentry_dsn: non_empty_var("SENTRY_DSN"),
                free_plan_limit,
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_gemini_api_key(&self) -> anyhow::Result<&str> {
            self.gemini_api_key
                .as_deref()
                .context("GEMINI_API_KEY is required")
        }
    }

    fn non_empty_var(key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|s| !s.trim().is_empty())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn require_accessors_report_missing_keys() {
            let settings = Settings {
                database_url: None,
                gemini_api_key: None,
                sentry_dsn: None,
                free_plan_limit: DEFAULT_FREE_PLAN_LIMIT,
            };

            let err = settings.require_gemini_api_key().unwrap_err();
            assert!(err.to_string().contains("GEMINI_API_KEY"));
            assert!(settings.require_database_url().is_err());
        }
    }
}
