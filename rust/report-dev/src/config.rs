use crate::renderer::RendererConfig;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    env,
    net::{SocketAddr, ToSocketAddrs},
    time::Duration,
};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    /// Developer mode; every console endpoint redirects when this is off.
    pub developer_mode: bool,
    pub disabled_redirect: String,
    pub database_url: String,
    pub max_pool_size: u32,
    pub pg_ssl_root_cert: Option<String>,
    pub pg_ssl_cert: Option<String>,
    pub pg_ssl_key: Option<String>,
    pub request_timeout: Duration,
    pub renderer: RendererConfig,
    pub max_upload_bytes: usize,
    pub default_locale: String,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    report_dev_listen_addr: Option<String>,
    #[serde(default)]
    report_dev_listen_host: Option<String>,
    #[serde(default)]
    report_dev_listen_port: Option<u16>,
    #[serde(default)]
    report_dev_enabled: bool,
    #[serde(default = "default_redirect")]
    report_dev_disabled_redirect: String,
    #[serde(default)]
    report_dev_database_url: Option<String>,
    #[serde(default)]
    database_url: Option<String>,
    #[serde(default = "default_pool_size")]
    report_dev_max_pool_size: u32,
    #[serde(default = "default_timeout_secs")]
    report_dev_request_timeout_secs: u64,
    #[serde(default)]
    report_dev_renderer_url: Option<String>,
    #[serde(default = "default_renderer_timeout_ms")]
    report_dev_renderer_timeout_ms: u64,
    #[serde(default = "default_max_upload_bytes")]
    report_dev_max_upload_bytes: usize,
    #[serde(default = "default_locale")]
    report_dev_default_locale: String,
}

fn default_redirect() -> String {
    "/".to_string()
}

const fn default_pool_size() -> u32 {
    5
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_renderer_timeout_ms() -> u64 {
    30_000
}

const fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_locale() -> String {
    "en".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let raw: RawConfig =
            envy::from_env().context("failed to parse REPORT_DEV_* environment variables")?;

        let listen_addr = resolve_addr(
            raw.report_dev_listen_addr,
            raw.report_dev_listen_host,
            raw.report_dev_listen_port,
        )?;

        let database_url = raw
            .report_dev_database_url
            .or(raw.database_url)
            .context("REPORT_DEV_DATABASE_URL or DATABASE_URL must be set")?;

        let renderer_url = raw
            .report_dev_renderer_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .context("REPORT_DEV_RENDERER_URL must be set")?;

        Ok(Self {
            listen_addr,
            developer_mode: raw.report_dev_enabled,
            disabled_redirect: raw.report_dev_disabled_redirect,
            database_url,
            max_pool_size: raw.report_dev_max_pool_size.max(1),
            pg_ssl_root_cert: env::var("PGSSLROOTCERT").ok(),
            pg_ssl_cert: env::var("PGSSLCERT").ok(),
            pg_ssl_key: env::var("PGSSLKEY").ok(),
            request_timeout: Duration::from_secs(raw.report_dev_request_timeout_secs.max(1)),
            renderer: RendererConfig {
                url: renderer_url,
                timeout: Duration::from_millis(raw.report_dev_renderer_timeout_ms.max(1)),
            },
            max_upload_bytes: raw.report_dev_max_upload_bytes,
            default_locale: raw.report_dev_default_locale,
        })
    }
}

fn resolve_addr(
    addr: Option<String>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<SocketAddr> {
    if let Some(addr) = addr {
        return addr
            .to_socket_addrs()
            .context("invalid REPORT_DEV_LISTEN_ADDR value")?
            .next()
            .context("REPORT_DEV_LISTEN_ADDR resolved to no addresses");
    }

    let host = host.unwrap_or_else(|| "0.0.0.0".to_string());
    let port = port.unwrap_or(8490);
    format!("{host}:{port}")
        .to_socket_addrs()
        .context("invalid listen host/port combination")?
        .next()
        .context("listen address resolved to no targets")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "REPORT_DEV_LISTEN_ADDR",
        "REPORT_DEV_LISTEN_HOST",
        "REPORT_DEV_LISTEN_PORT",
        "REPORT_DEV_ENABLED",
        "REPORT_DEV_DISABLED_REDIRECT",
        "REPORT_DEV_DATABASE_URL",
        "DATABASE_URL",
        "REPORT_DEV_MAX_POOL_SIZE",
        "REPORT_DEV_REQUEST_TIMEOUT_SECS",
        "REPORT_DEV_RENDERER_URL",
        "REPORT_DEV_RENDERER_TIMEOUT_MS",
        "REPORT_DEV_MAX_UPLOAD_BYTES",
        "REPORT_DEV_DEFAULT_LOCALE",
    ];

    fn reset_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn defaults_apply_when_optional_values_unset() {
        reset_env();
        env::set_var("DATABASE_URL", "postgres://localhost/app");
        env::set_var("REPORT_DEV_RENDERER_URL", "http://renderer:9000/");

        let config = AppConfig::from_env().unwrap();
        assert!(!config.developer_mode);
        assert_eq!(config.disabled_redirect, "/");
        assert_eq!(config.listen_addr, SocketAddr::from(([0, 0, 0, 0], 8490)));
        assert_eq!(config.max_pool_size, 5);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.renderer.url, "http://renderer:9000/");
        assert_eq!(config.renderer.timeout, Duration::from_secs(30));
        assert_eq!(config.default_locale, "en");
        reset_env();
    }

    #[test]
    #[serial]
    fn explicit_values_override_defaults() {
        reset_env();
        env::set_var("REPORT_DEV_DATABASE_URL", "postgres://db/reports");
        env::set_var("DATABASE_URL", "postgres://ignored/other");
        env::set_var("REPORT_DEV_RENDERER_URL", "http://renderer");
        env::set_var("REPORT_DEV_ENABLED", "true");
        env::set_var("REPORT_DEV_LISTEN_ADDR", "127.0.0.1:9999");
        env::set_var("REPORT_DEV_REQUEST_TIMEOUT_SECS", "0");

        let config = AppConfig::from_env().unwrap();
        assert!(config.developer_mode);
        assert_eq!(config.database_url, "postgres://db/reports");
        assert_eq!(config.listen_addr, SocketAddr::from(([127, 0, 0, 1], 9999)));
        assert_eq!(config.request_timeout, Duration::from_secs(1));
        reset_env();
    }

    #[test]
    #[serial]
    fn missing_renderer_url_is_rejected() {
        reset_env();
        env::set_var("DATABASE_URL", "postgres://localhost/app");

        let err = AppConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("REPORT_DEV_RENDERER_URL"));
        reset_env();
    }

    #[test]
    #[serial]
    fn missing_database_url_is_rejected() {
        reset_env();
        env::set_var("REPORT_DEV_RENDERER_URL", "http://renderer");

        let err = AppConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
        reset_env();
    }
}
