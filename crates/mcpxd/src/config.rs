//! Configuration loading
//!
//! The config comes from a local file or an `http(s)://` URL. `${VAR}`
//! placeholders are expanded from the environment before parsing; the
//! format follows the extension (`.toml`, `.yaml`/`.yml`, otherwise JSON).

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use mcpx_core::ProxyConfig;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

/// How to fetch and pre-process the config
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// File path or http(s) URL
    pub source: String,
    /// Skip TLS verification for remote configs
    pub insecure: bool,
    /// Expand `${VAR}` placeholders
    pub expand_env: bool,
    /// Remote fetch headers, `Key1:Value1;Key2:Value2`
    pub http_headers: String,
    /// Remote fetch timeout
    pub http_timeout: Duration,
}

impl LoadOptions {
    #[cfg(test)]
    fn file(path: &Path) -> Self {
        Self {
            source: path.display().to_string(),
            insecure: false,
            expand_env: true,
            http_headers: String::new(),
            http_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Toml,
    Yaml,
}

impl Format {
    fn from_path(path: &str) -> Self {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("toml") => Format::Toml,
            Some("yaml") | Some("yml") => Format::Yaml,
            _ => Format::Json,
        }
    }
}

fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Load, expand, parse and validate the config
pub async fn load(options: &LoadOptions) -> Result<ProxyConfig> {
    let (content, format) = if is_remote(&options.source) {
        let url = reqwest::Url::parse(&options.source)
            .with_context(|| format!("Invalid config URL: {}", options.source))?;
        let format = Format::from_path(url.path());
        (fetch(url, options).await?, format)
    } else {
        let content = tokio::fs::read_to_string(&options.source)
            .await
            .with_context(|| format!("Failed to read config file: {}", options.source))?;
        (content, Format::from_path(&options.source))
    };

    let content = if options.expand_env {
        substitute_env(&content)
    } else {
        content
    };

    let config = parse(&content, format)?;
    config.validate()?;
    Ok(config)
}

async fn fetch(url: reqwest::Url, options: &LoadOptions) -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(options.http_timeout)
        .danger_accept_invalid_certs(options.insecure)
        .default_headers(parse_headers(&options.http_headers)?)
        .build()
        .context("Failed to build HTTP client")?;

    let response = client
        .get(url.clone())
        .send()
        .await
        .with_context(|| format!("Failed to fetch config from {}", url))?;

    let status = response.status();
    if !status.is_success() {
        bail!("Fetching config from {} returned {}", url, status);
    }
    Ok(response.text().await?)
}

fn parse(content: &str, format: Format) -> Result<ProxyConfig> {
    let config = match format {
        Format::Json => serde_json::from_str(content).context("Failed to parse JSON config")?,
        Format::Toml => toml::from_str(content).context("Failed to parse TOML config")?,
        Format::Yaml => serde_yaml::from_str(content).context("Failed to parse YAML config")?,
    };
    Ok(config)
}

/// Parse `Key1:Value1;Key2:Value2`. Empty entries are skipped.
pub fn parse_headers(list: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for entry in list.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((key, value)) = entry.split_once(':') else {
            bail!("Invalid header '{}': expected Key:Value", entry);
        };
        let name = HeaderName::from_bytes(key.trim().as_bytes())
            .with_context(|| format!("Invalid header name '{}'", key.trim()))?;
        let value = HeaderValue::from_str(value.trim())
            .with_context(|| format!("Invalid value for header '{}'", key.trim()))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Replace `${VAR}` placeholders with environment values.
///
/// Unknown variables and malformed placeholders are left as-is.
pub fn substitute_env(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        match after.find('}') {
            Some(end) if end > 0 => {
                let name = &after[..end];
                match std::env::var(name) {
                    Ok(value) => result.push_str(&value),
                    Err(_) => {
                        result.push_str("${");
                        result.push_str(name);
                        result.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            _ => {
                result.push_str("${");
                rest = after;
            }
        }
    }

    result.push_str(rest);
    result
}
