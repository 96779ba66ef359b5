use std::num::ParseIntError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("malformed report template: {0}")]
    MalformedTemplate(String),

    #[error("invalid entity identifier '{token}'")]
    InvalidIdentifier {
        token: String,
        #[source]
        source: ParseIntError,
    },

    #[error("query failed: {0:#}")]
    Query(#[source] anyhow::Error),

    #[error("unsupported report type '{0}'")]
    UnsupportedReportType(String),

    #[error("report generation failed: {0:#}")]
    ReportGeneration(#[source] anyhow::Error),

    #[error("error while copying report to response: {written} of {total} bytes written")]
    ReportCopy { written: usize, total: usize },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}
