use crate::{config::AppConfig, query::QueryRunner, report::ReportDispatcher};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub query: QueryRunner,
    pub reports: ReportDispatcher,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, query: QueryRunner, reports: ReportDispatcher) -> Self {
        Self {
            config,
            query,
            reports,
        }
    }

    pub fn developer_mode(&self) -> bool {
        self.config.developer_mode
    }
}
