use std::time::Duration;
use reqwest::{Client, ClientBuilder, Proxy, Response, StatusCode};
use crate::config::AppConfig;
use crate::errors::{AppError, Result};

/// Shared HTTP client for audio and cover downloads.
///
/// The overall timeout is sized for whole audio files, not single requests.
pub struct HttpPool {
    client: Client,
}

#[derive(Debug, Clone)]
pub struct HttpPoolOptions {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
    pub proxy: Option<String>,
    pub use_system_proxy: bool,
}

impl From<&AppConfig> for HttpPoolOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.download_timeout_secs),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            user_agent: config.user_agent.clone(),
            proxy: config.proxy.clone(),
            use_system_proxy: config.use_system_proxy,
        }
    }
}

impl HttpPool {
    pub fn new(options: HttpPoolOptions) -> Result<Self> {
        let mut builder = ClientBuilder::new()
            .pool_idle_timeout(Some(Duration::from_secs(30)))
            .timeout(options.timeout)
            .connect_timeout(options.connect_timeout)
            .user_agent(options.user_agent)
            .gzip(true)
            .brotli(true)
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true);

        if let Some(proxy_url) = &options.proxy {
            log::info!("🌐 [HTTP] Using proxy {}", proxy_url);
            builder = builder.proxy(Proxy::all(proxy_url)?);
        } else if !options.use_system_proxy {
            builder = builder.no_proxy();
        }

        Ok(Self {
            client: builder.build()?,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(HttpPoolOptions::from(config))
    }

    /// Sends a GET and insists on `200 OK`.
    pub async fn get(&self, url: &str) -> Result<Response> {
        let parsed = url::Url::parse(url)
            .map_err(|e| AppError::Download(format!("invalid url {}: {}", url, e)))?;

        log::debug!("🌐 [HTTP] GET {}", parsed);
        let response = self
            .client
            .get(parsed)
            .header("Accept", "audio/*,image/*,*/*;q=0.9")
            .send()
            .await
            .map_err(|e| AppError::Download(format!("request {}: {}", url, e)))?;

        if response.status() != StatusCode::OK {
            return Err(AppError::Download(format!(
                "unexpected HTTP status {} for {}",
                response.status(),
                url
            )));
        }

        Ok(response)
    }
}
