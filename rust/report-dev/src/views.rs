//! HTML views for the console pages and the shared error presentation.

use crate::{
    error::ServiceError,
    params::ReportParameter,
    query::{QueryOutcome, QueryTable},
    report::ReportType,
};
use askama::Template;
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use std::{error::Error as StdError, fmt::Write as _};
use tracing::error;

/// Message and technical trace of a failed request, as shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorView {
    pub message: String,
    pub trace: String,
}

impl ErrorView {
    pub fn capture(err: &ServiceError) -> Self {
        let mut trace = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            let _ = write!(trace, "\nCaused by: {cause}");
            source = cause.source();
        }
        let _ = write!(trace, "\n\n{err:?}");

        Self {
            message: err.to_string(),
            trace,
        }
    }

    /// Logs the failure and captures it for display.
    pub fn present(context: &str, err: &ServiceError) -> Self {
        error!(error = ?err, context, "developer console request failed");
        Self::capture(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterRow {
    pub name: String,
    pub class: String,
    pub field: String,
    pub value: String,
}

impl From<&ReportParameter> for ParameterRow {
    fn from(param: &ReportParameter) -> Self {
        Self {
            name: param.name().to_string(),
            class: param.class().to_string(),
            field: param.field_name(),
            value: param.display_value(),
        }
    }
}

#[derive(Template, Default)]
#[template(path = "hql.html")]
pub struct HqlView {
    pub hql: String,
    pub table: Option<QueryTable>,
    pub is_empty: bool,
    pub error: Option<ErrorView>,
}

impl HqlView {
    pub fn form() -> Self {
        Self::default()
    }

    pub fn outcome(hql: String, outcome: QueryOutcome) -> Self {
        match outcome {
            QueryOutcome::Table(table) => Self {
                hql,
                table: Some(table),
                ..Self::default()
            },
            QueryOutcome::Empty => Self {
                hql,
                is_empty: true,
                ..Self::default()
            },
        }
    }

    pub fn failed(hql: String, err: &ServiceError) -> Self {
        Self {
            hql,
            error: Some(ErrorView::present("query", err)),
            ..Self::default()
        }
    }
}

#[derive(Template)]
#[template(path = "report.html")]
pub struct ReportView {
    pub template: Option<String>,
    pub params: Vec<ParameterRow>,
    pub locale: String,
    pub is_parameter: bool,
    pub is_file_invalid: bool,
    pub report_types: Vec<&'static str>,
    pub error: Option<ErrorView>,
}

impl ReportView {
    pub fn form() -> Self {
        Self {
            template: None,
            params: Vec::new(),
            locale: String::new(),
            is_parameter: false,
            is_file_invalid: false,
            report_types: ReportType::ALL.iter().map(|kind| kind.extension()).collect(),
            error: None,
        }
    }

    pub fn file_invalid() -> Self {
        Self {
            is_file_invalid: true,
            ..Self::form()
        }
    }

    /// Parameter entry form for an uploaded or resubmitted template.
    pub fn parameters(template: String, params: &[ReportParameter], locale: String) -> Self {
        Self {
            template: Some(template),
            params: params.iter().map(ParameterRow::from).collect(),
            locale,
            is_parameter: true,
            ..Self::form()
        }
    }

    pub fn with_error(mut self, context: &str, err: &ServiceError) -> Self {
        self.error = Some(ErrorView::present(context, err));
        self
    }
}

/// Renders an askama template into an axum HTML response.
pub fn render<T: Template>(view: T) -> Response {
    match view.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => {
            error!(error = %err, "failed to render view");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("template error: {err}"),
            )
                .into_response()
        }
    }
}
