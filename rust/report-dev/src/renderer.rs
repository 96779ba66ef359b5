use crate::{params::ParameterValue, report::{Locale, ReportType}};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RendererConfig {
    pub url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderRequest {
    pub template: String,
    #[serde(rename = "type")]
    pub report_type: ReportType,
    pub parameters: BTreeMap<String, ParameterValue>,
    pub locale: Locale,
}

/// Turns a template plus typed parameters into a finished document.
#[async_trait]
pub trait ReportRenderer: Send + Sync {
    async fn render(&self, request: RenderRequest) -> Result<Vec<u8>>;
}

/// Delegates rendering to a remote report engine over HTTP.
#[derive(Clone)]
pub struct HttpReportRenderer {
    client: Client,
    config: Arc<RendererConfig>,
}

impl HttpReportRenderer {
    pub fn new(config: RendererConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }
}

#[async_trait]
impl ReportRenderer for HttpReportRenderer {
    async fn render(&self, request: RenderRequest) -> Result<Vec<u8>> {
        debug!(
            report_type = ?request.report_type,
            parameters = request.parameters.len(),
            "dispatching render request"
        );
        let response = self
            .client
            .post(format!("{}/render", self.config.url.trim_end_matches('/')))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("report engine returned status {status}: {body}");
        }

        Ok(response.bytes().await?.to_vec())
    }
}
