use crate::{
    config::AppConfig,
    datasource::{DataSource, PgDataSource},
    db, descriptor,
    error::ServiceError,
    query::QueryRunner,
    renderer::{HttpReportRenderer, ReportRenderer},
    report::ReportDispatcher,
    state::AppState,
    views::{render, HqlView, ReportView},
};
use axum::{
    extract::{
        multipart::MultipartRejection, rejection::FormRejection, DefaultBodyLimit, Multipart,
        State,
    },
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::{collections::HashMap, sync::Arc};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

const TEMPLATE_FIELD: &str = "file";

pub struct Server {
    config: Arc<AppConfig>,
    state: AppState,
}

impl Server {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let pool = db::connect_pool(&config).await?;
        let source = PgDataSource::new(pool, config.request_timeout);
        let renderer = HttpReportRenderer::new(config.renderer.clone())?;
        Ok(Self::with_collaborators(
            config,
            Arc::new(source),
            Arc::new(renderer),
        ))
    }

    /// Builds the server around caller-supplied data and rendering backends.
    pub fn with_collaborators(
        config: AppConfig,
        source: Arc<dyn DataSource>,
        renderer: Arc<dyn ReportRenderer>,
    ) -> Self {
        let config = Arc::new(config);
        let state = AppState::new(
            Arc::clone(&config),
            QueryRunner::new(source),
            ReportDispatcher::new(renderer),
        );

        Self { config, state }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/healthz", get(Self::health))
            .route(
                "/developReport/hql",
                get(Self::show_query_form).post(Self::execute_query),
            )
            .route(
                "/developReport/report",
                get(Self::show_report_form).post(Self::upload_template),
            )
            .route(
                "/developReport/generate",
                post(Self::generate_report),
            )
            .with_state(self.state.clone())
            .layer(DefaultBodyLimit::max(self.config.max_upload_bytes))
            .layer(TraceLayer::new_for_http())
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.config.listen_addr;
        let listener = TcpListener::bind(addr).await?;
        info!(
            %addr,
            developer_mode = self.config.developer_mode,
            "report development console listening"
        );
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    async fn health() -> Json<serde_json::Value> {
        Json(json!({ "status": "ok" }))
    }

    async fn show_query_form(State(state): State<AppState>) -> Response {
        if !state.developer_mode() {
            return disabled(&state);
        }
        render(HqlView::form())
    }

    async fn execute_query(
        State(state): State<AppState>,
        form: Result<Form<QueryForm>, FormRejection>,
    ) -> Response {
        if !state.developer_mode() {
            return disabled(&state);
        }

        let hql = match form {
            Ok(Form(form)) => form.hql,
            Err(rejection) => {
                let err = ServiceError::InvalidRequest(rejection.body_text());
                return render(HqlView::failed(String::new(), &err));
            }
        };

        match state.query.run(&hql).await {
            Ok(outcome) => render(HqlView::outcome(hql, outcome)),
            Err(err) => render(HqlView::failed(hql, &err)),
        }
    }

    async fn show_report_form(State(state): State<AppState>) -> Response {
        if !state.developer_mode() {
            return disabled(&state);
        }
        render(ReportView::form())
    }

    async fn upload_template(
        State(state): State<AppState>,
        multipart: Result<Multipart, MultipartRejection>,
    ) -> Response {
        if !state.developer_mode() {
            return disabled(&state);
        }

        let upload = match multipart {
            Ok(multipart) => read_template_upload(multipart).await,
            Err(rejection) => Err(ServiceError::InvalidRequest(rejection.body_text())),
        };
        let template = match upload {
            Ok(Some(template)) => template,
            Ok(None) => return render(ReportView::file_invalid()),
            Err(err) => return render(ReportView::form().with_error("upload", &err)),
        };

        match descriptor::parse_parameters(&template) {
            Ok(params) => {
                debug!(parameters = params.len(), "template uploaded");
                render(ReportView::parameters(
                    template,
                    &params,
                    state.config.default_locale.clone(),
                ))
            }
            Err(err) => render(ReportView::form().with_error("upload", &err)),
        }
    }

    async fn generate_report(
        State(state): State<AppState>,
        form: Result<Form<HashMap<String, String>>, FormRejection>,
    ) -> Response {
        if !state.developer_mode() {
            return disabled(&state);
        }

        let fields = match form {
            Ok(Form(fields)) => fields,
            Err(rejection) => {
                let err = ServiceError::InvalidRequest(rejection.body_text());
                return render(ReportView::form().with_error("generate", &err));
            }
        };
        let template = fields.get("template").cloned().unwrap_or_default();
        let locale = fields.get("locale").cloned().unwrap_or_default();
        let Some(type_name) = fields.get("type") else {
            let err = ServiceError::InvalidRequest("missing form field 'type'".into());
            return render(
                ReportView::parameters(template, &[], locale).with_error("generate", &err),
            );
        };

        match state
            .reports
            .generate(&template, type_name, &locale, &fields)
            .await
        {
            Ok(download) => download.into_response(),
            Err(failure) => render(
                ReportView::parameters(template, &failure.params, locale)
                    .with_error("generate", &failure.error),
            ),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryForm {
    #[serde(default)]
    hql: String,
}

fn disabled(state: &AppState) -> Response {
    debug!("developer mode disabled; redirecting");
    Redirect::to(&state.config.disabled_redirect).into_response()
}

/// Reads the `file` part of the upload; `None` when it is missing or empty.
async fn read_template_upload(mut multipart: Multipart) -> Result<Option<String>, ServiceError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ServiceError::InvalidRequest(err.body_text()))?
    {
        if field.name() != Some(TEMPLATE_FIELD) {
            continue;
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|err| ServiceError::InvalidRequest(err.body_text()))?;
        if bytes.is_empty() {
            return Ok(None);
        }
        let template = String::from_utf8(bytes.to_vec()).map_err(|err| {
            ServiceError::MalformedTemplate(format!("template is not valid UTF-8: {err}"))
        })?;
        return Ok(Some(template));
    }

    Ok(None)
}
