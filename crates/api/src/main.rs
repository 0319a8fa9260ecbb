use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kolscope_core::analysis::Analyzer;
use kolscope_core::domain::analysis::AnalysisResult;
use kolscope_core::llm::gemini::GeminiClient;
use kolscope_core::quota::{InMemoryQuota, QuotaGate};

const USER_ID_HEADER: &str = "x-user-id";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = kolscope_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let analyzer = match GeminiClient::from_settings(&settings) {
        Ok(client) => {
            tracing::info!(model = client.model(), "gemini analyzer configured");
            Some(Analyzer::new(client))
        }
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "analyzer unavailable; starting API in degraded mode");
            None
        }
    };

    let state = AppState {
        analyzer,
        quota: Arc::new(InMemoryQuota::new(settings.free_plan_limit)),
    };

    let app = router(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/ai/analyze", post(analyze))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    analyzer: Option<Analyzer>,
    quota: Arc<dyn QuotaGate>,
}

#[derive(Debug, Serialize)]
struct ApiData<T> {
    data: T,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {"code": self.code, "message": self.message}
        });
        (self.status, Json(body)).into_response()
    }
}

async fn analyze(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiData<AnalysisResult>>, ApiError> {
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "sign in first"))?
        .to_string();

    let allowed = state.quota.can_use_ai(&user_id).await.map_err(|e| {
        sentry_anyhow::capture_anyhow(&e);
        tracing::error!(error = %e, %user_id, "quota check failed");
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "ANALYSIS_ERROR",
            "quota check failed, please retry later",
        )
    })?;
    if !allowed {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "QUOTA_EXCEEDED",
            "monthly AI analysis limit reached; upgrade to Pro for unlimited analyses",
        ));
    }

    let content = parse_content(&body).ok_or_else(|| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "INVALID_INPUT",
            "provide non-empty text content",
        )
    })?;

    let Some(analyzer) = &state.analyzer else {
        tracing::error!("GEMINI_API_KEY is not configured");
        return Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "CONFIGURATION_ERROR",
            "server configuration error, contact the administrator",
        ));
    };

    let result = analyzer.analyze_text(&content).await.map_err(|e| {
        sentry::capture_error(&e);
        tracing::error!(error = %e, kind = e.code(), %user_id, "analysis failed");
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "ANALYSIS_ERROR", e.to_string())
    })?;

    // The analysis already happened; a failed counter update is reported but not surfaced.
    if let Err(e) = state.quota.increment_usage(&user_id).await {
        sentry_anyhow::capture_anyhow(&e);
        tracing::error!(error = %e, %user_id, "failed to record ai usage");
    }

    tracing::info!(%user_id, sentiment = %result.sentiment, "analysis completed");
    Ok(Json(ApiData { data: result }))
}

/// `{"content": "<non-blank string>"}`; anything else is invalid input.
fn parse_content(body: &[u8]) -> Option<String> {
    let v = serde_json::from_slice::<Value>(body).ok()?;
    let content = v.get("content")?.as_str()?;
    (!content.trim().is_empty()).then(|| content.to_string())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &kolscope_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use kolscope_core::llm::{Provider, TextGenerator};
    use serde_json::json;
    use tower::ServiceExt;

    struct CannedGenerator(&'static str);

    #[async_trait::async_trait]
    impl TextGenerator for CannedGenerator {
        fn provider(&self) -> Provider {
            Provider::Local
        }

        async fn invoke(&self, _prompt: &str) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    const BULLISH_REPLY: &str = r#"```json
{"sentiment":"Bullish","kolName":"Ann","tickerAnalyses":[{"ticker":"NVDA","sentiment":"Bullish","isPrimary":true}]}
```"#;

    fn state(reply: Option<&'static str>, free_limit: u32) -> AppState {
        AppState {
            analyzer: reply.map(|r| Analyzer::new(CannedGenerator(r))),
            quota: Arc::new(InMemoryQuota::new(free_limit)),
        }
    }

    fn request(user_id: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/ai/analyze")
            .header("content-type", "application/json");
        if let Some(user_id) = user_id {
            builder = builder.header(USER_ID_HEADER, user_id);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn returns_analysis_on_success() {
        let app = router(state(Some(BULLISH_REPLY), 10));
        let (status, body) = send(app, request(Some("u1"), r#"{"content":"Ann: NVDA 🚀"}"#)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["sentiment"], "Bullish");
        assert_eq!(body["data"]["tickers"], json!(["NVDA"]));
        assert_eq!(body["data"]["kolName"], "Ann");
    }

    #[tokio::test]
    async fn requires_user_identity() {
        let app = router(state(Some(BULLISH_REPLY), 10));
        let (status, body) = send(app, request(None, r#"{"content":"NVDA"}"#)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn rejects_invalid_content() {
        for body in [r#"{"content":"   "}"#, r#"{"content":42}"#, "{}", "not json"] {
            let app = router(state(Some(BULLISH_REPLY), 10));
            let (status, res) = send(app, request(Some("u1"), body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body={body}");
            assert_eq!(res["error"]["code"], "INVALID_INPUT");
        }
    }

    #[tokio::test]
    async fn enforces_quota_and_counts_successes_only() {
        let app = router(state(Some(BULLISH_REPLY), 1));

        let (status, _) = send(app.clone(), request(Some("u1"), r#"{"content":"NVDA"}"#)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(app, request(Some("u1"), r#"{"content":"NVDA"}"#)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "QUOTA_EXCEEDED");
    }

    #[tokio::test]
    async fn analysis_failure_is_a_server_error() {
        let app = router(state(Some("not json at all"), 1));

        let (status, body) = send(app.clone(), request(Some("u1"), r#"{"content":"NVDA"}"#)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["code"], "ANALYSIS_ERROR");
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .starts_with("AI analysis failed"));

        // The failed call did not consume quota; the next attempt still reaches the analyzer.
        let (status, body) = send(app, request(Some("u1"), r#"{"content":"NVDA"}"#)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["code"], "ANALYSIS_ERROR");
    }

    #[tokio::test]
    async fn missing_analyzer_is_a_configuration_error() {
        let app = router(state(None, 10));
        let (status, body) = send(app, request(Some("u1"), r#"{"content":"NVDA"}"#)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["code"], "CONFIGURATION_ERROR");
    }
}
