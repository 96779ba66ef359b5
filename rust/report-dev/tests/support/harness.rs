use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{self, header, Request, StatusCode},
    Router,
};
use report_dev::{
    config::AppConfig,
    datasource::{DataSource, Entity, PgDataSource},
    db,
    renderer::{RenderRequest, RendererConfig, ReportRenderer},
    server::Server,
};
use std::{
    env,
    future::Future,
    net::SocketAddr,
    sync::{Arc, Mutex, Once},
    time::Duration,
};
use tower::ServiceExt;

pub const BOUNDARY: &str = "report-dev-test-boundary";
pub const RENDERED: &[u8] = b"%PDF-1.4 rendered by fake engine";

static TRACING_INIT: Once = Once::new();

/// Data source returning a canned result (or error) and recording every query it receives.
#[derive(Default)]
pub struct StubSource {
    result: Mutex<Option<Result<Vec<Entity>, String>>>,
    queries: Mutex<Vec<String>>,
}

impl StubSource {
    pub fn returning(entities: Vec<Entity>) -> Self {
        Self {
            result: Mutex::new(Some(Ok(entities))),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Mutex::new(Some(Err(message.to_string()))),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataSource for StubSource {
    async fn find(&self, query_text: &str) -> anyhow::Result<Vec<Entity>> {
        self.queries.lock().unwrap().push(query_text.to_string());
        match self.result.lock().unwrap().clone() {
            Some(Ok(entities)) => Ok(entities),
            Some(Err(message)) => Err(anyhow::Error::msg(message)),
            None => Ok(Vec::new()),
        }
    }
}

/// Renderer that records requests and answers with a fixed document, or fails on demand.
#[derive(Default)]
pub struct StubRenderer {
    failure: Option<String>,
    requests: Mutex<Vec<RenderRequest>>,
}

impl StubRenderer {
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<RenderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReportRenderer for StubRenderer {
    async fn render(&self, request: RenderRequest) -> anyhow::Result<Vec<u8>> {
        self.requests.lock().unwrap().push(request);
        match &self.failure {
            Some(message) => Err(anyhow::Error::msg(message.clone())),
            None => Ok(RENDERED.to_vec()),
        }
    }
}

pub struct ConsoleHarness {
    router: Router,
    pub source: Arc<StubSource>,
    pub renderer: Arc<StubRenderer>,
}

impl ConsoleHarness {
    pub async fn get(&self, path: &str) -> http::Response<Body> {
        let request = Request::builder()
            .method(http::Method::GET)
            .uri(path)
            .body(Body::empty())
            .expect("request should build");
        self.send(request).await
    }

    pub async fn post_form(&self, path: &str, fields: &[(&str, &str)]) -> http::Response<Body> {
        let request = Request::builder()
            .method(http::Method::POST)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(encode_form(fields)))
            .expect("request should build");
        self.send(request).await
    }

    pub async fn upload(&self, field: &str, contents: &str) -> http::Response<Body> {
        let body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"report.jrxml\"\r\nContent-Type: text/xml\r\n\r\n{contents}\r\n--{BOUNDARY}--\r\n"
        );
        let request = Request::builder()
            .method(http::Method::POST)
            .uri("/developReport/report")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .expect("request should build");
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> http::Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router should respond")
    }
}

/// Runs a test closure against a console wired to in-memory collaborators.
pub async fn with_console<F, Fut>(
    developer_mode: bool,
    source: StubSource,
    renderer: StubRenderer,
    test: F,
) where
    F: FnOnce(ConsoleHarness) -> Fut,
    Fut: Future<Output = ()>,
{
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });

    let source = Arc::new(source);
    let renderer = Arc::new(renderer);
    let server = Server::with_collaborators(
        test_config(developer_mode),
        source.clone(),
        renderer.clone(),
    );

    test(ConsoleHarness {
        router: server.router(),
        source,
        renderer,
    })
    .await;
}

/// Runs a test closure against a Postgres-backed data source. Skipped unless
/// `REPORT_DEV_TEST_DATABASE_URL` points at a database the test may query.
pub async fn with_database<F, Fut>(test: F)
where
    F: FnOnce(PgDataSource) -> Fut,
    Fut: Future<Output = ()>,
{
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });

    let database_url = match env::var("REPORT_DEV_TEST_DATABASE_URL") {
        Ok(url) if !url.trim().is_empty() => url,
        _ => {
            eprintln!(
                "[report-dev-test] skipping Postgres test: REPORT_DEV_TEST_DATABASE_URL is not set"
            );
            return;
        }
    };

    let config = AppConfig {
        database_url,
        pg_ssl_root_cert: env::var("PGSSLROOTCERT").ok(),
        pg_ssl_cert: env::var("PGSSLCERT").ok(),
        pg_ssl_key: env::var("PGSSLKEY").ok(),
        ..test_config(true)
    };
    let pool = db::connect_pool(&config)
        .await
        .expect("failed to connect to test database");

    test(PgDataSource::new(pool, config.request_timeout)).await;
}

fn test_config(developer_mode: bool) -> AppConfig {
    AppConfig {
        listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        developer_mode,
        disabled_redirect: "/".to_string(),
        database_url: "postgres://unused/test".to_string(),
        max_pool_size: 1,
        pg_ssl_root_cert: None,
        pg_ssl_cert: None,
        pg_ssl_key: None,
        request_timeout: Duration::from_secs(5),
        renderer: RendererConfig {
            url: "http://renderer.invalid".to_string(),
            timeout: Duration::from_secs(5),
        },
        max_upload_bytes: 1024 * 1024,
        default_locale: "en".to_string(),
    }
}

fn encode_form(fields: &[(&str, &str)]) -> String {
    fields
        .iter()
        .map(|(key, value)| format!("{}={}", urlencoding::encode(key), urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

pub async fn read_text(response: http::Response<Body>) -> (StatusCode, String) {
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("response body should be readable");
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

pub async fn read_bytes(response: http::Response<Body>) -> Vec<u8> {
    body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("response body should be readable")
        .to_vec()
}
