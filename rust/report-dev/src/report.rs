//! Report generation: type resolution, parameter merging and the download response.

use crate::{
    descriptor,
    error::{Result, ServiceError},
    params::{ParameterValue, ReportParameter},
    renderer::{RenderRequest, ReportRenderer},
};
use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio_stream::Stream;
use tracing::{error, info};

const CHUNK_SIZE: usize = 4096;
const EXPIRES_IN_PAST: &str = "Tue, 03 Jul 2001 06:00:00 GMT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReportType {
    Pdf,
    Xls,
    Csv,
}

impl ReportType {
    pub const ALL: [ReportType; 3] = [ReportType::Pdf, ReportType::Xls, ReportType::Csv];

    /// Case-insensitive lookup by name (`pdf`, `XLS`, ...).
    pub fn parse(value: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.extension().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| ServiceError::UnsupportedReportType(value.to_string()))
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ReportType::Pdf => "application/pdf",
            ReportType::Xls => "application/vnd.ms-excel",
            ReportType::Csv => "text/csv",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ReportType::Pdf => "pdf",
            ReportType::Xls => "xls",
            ReportType::Csv => "csv",
        }
    }
}

/// Locale handed to the report engine, e.g. `en` or `pl_PL`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Locale(String);

impl Locale {
    pub fn new(tag: &str) -> Self {
        let mut parts = tag.trim().split(['_', '-']);
        let mut normalized = parts.next().unwrap_or_default().to_ascii_lowercase();
        if let Some(country) = parts.next() {
            normalized.push('_');
            normalized.push_str(&country.to_ascii_uppercase());
        }
        for variant in parts {
            normalized.push('_');
            normalized.push_str(variant);
        }
        Self(normalized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone)]
pub struct ReportDispatcher {
    renderer: Arc<dyn ReportRenderer>,
}

impl ReportDispatcher {
    pub fn new(renderer: Arc<dyn ReportRenderer>) -> Self {
        Self { renderer }
    }

    /// Parses the template and renders it with the submitted `params[<name>]` fields. A
    /// failure carries the parameters as far as they were assigned, for redisplay.
    pub async fn generate(
        &self,
        template: &str,
        type_name: &str,
        locale_tag: &str,
        fields: &HashMap<String, String>,
    ) -> std::result::Result<ReportDownload, GenerationFailure> {
        let mut params = match descriptor::parse_parameters(template) {
            Ok(params) => params,
            Err(error) => {
                return Err(GenerationFailure {
                    params: Vec::new(),
                    error,
                })
            }
        };

        match self
            .dispatch(template, type_name, locale_tag, &mut params, fields)
            .await
        {
            Ok(download) => Ok(download),
            Err(error) => Err(GenerationFailure { params, error }),
        }
    }

    async fn dispatch(
        &self,
        template: &str,
        type_name: &str,
        locale_tag: &str,
        params: &mut [ReportParameter],
        fields: &HashMap<String, String>,
    ) -> Result<ReportDownload> {
        let report_type = ReportType::parse(type_name)?;
        let locale = Locale::new(locale_tag);

        let mut values: BTreeMap<String, ParameterValue> = BTreeMap::new();
        for param in params.iter_mut() {
            param.assign(fields.get(&param.field_name()).map(String::as_str))?;
            values.insert(param.name().to_string(), param.value().clone());
        }

        let payload = self
            .renderer
            .render(RenderRequest {
                template: template.to_string(),
                report_type,
                parameters: values,
                locale: locale.clone(),
            })
            .await
            .map_err(ServiceError::ReportGeneration)?;

        info!(
            report_type = ?report_type,
            %locale,
            bytes = payload.len(),
            "report generated"
        );
        Ok(ReportDownload {
            report_type,
            payload: Bytes::from(payload),
        })
    }
}

#[derive(Debug)]
pub struct GenerationFailure {
    pub params: Vec<ReportParameter>,
    pub error: ServiceError,
}

/// A generated document, returned to the browser as an attachment.
#[derive(Debug)]
pub struct ReportDownload {
    report_type: ReportType,
    payload: Bytes,
}

impl ReportDownload {
    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(self.payload.len()));
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(self.report_type.mime_type()),
        );
        let disposition = match self.report_type {
            ReportType::Pdf => "attachment; filename=report.pdf",
            ReportType::Xls => "attachment; filename=report.xls",
            ReportType::Csv => "attachment; filename=report.csv",
        };
        headers.insert(
            header::CONTENT_DISPOSITION,
            HeaderValue::from_static(disposition),
        );
        headers.insert(header::EXPIRES, HeaderValue::from_static(EXPIRES_IN_PAST));
        headers.append(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store, no-cache, must-revalidate, max-age=0"),
        );
        headers.append(
            header::CACHE_CONTROL,
            HeaderValue::from_static("post-check=0, pre-check=0"),
        );
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        headers
    }
}

impl IntoResponse for ReportDownload {
    fn into_response(self) -> Response {
        let headers = self.headers();
        let body = Body::from_stream(PayloadStream::new(self.payload));
        (StatusCode::OK, headers, body).into_response()
    }
}

/// Yields the payload in fixed-size chunks and reports a copy failure if dropped early.
struct PayloadStream {
    payload: Bytes,
    written: usize,
}

impl PayloadStream {
    fn new(payload: Bytes) -> Self {
        Self {
            payload,
            written: 0,
        }
    }

    /// The copy failure to report when the stream ends before the whole payload was sent.
    fn copy_failure(&self) -> Option<ServiceError> {
        let total = self.payload.len();
        (self.written < total).then(|| ServiceError::ReportCopy {
            written: self.written,
            total,
        })
    }
}

impl Stream for PayloadStream {
    type Item = std::result::Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let total = self.payload.len();
        if self.written >= total {
            return Poll::Ready(None);
        }
        let end = (self.written + CHUNK_SIZE).min(total);
        let chunk = self.payload.slice(self.written..end);
        self.written = end;
        Poll::Ready(Some(Ok(chunk)))
    }
}

impl Drop for PayloadStream {
    fn drop(&mut self) {
        if let Some(err) = self.copy_failure() {
            error!(error = %err, "report download interrupted");
        }
    }
}
