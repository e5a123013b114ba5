//! Where the OPcache status document comes from: a status page over HTTP, or a PHP snippet run
//! inside PHP-FPM over FastCGI.

use super::error::Error;
use super::session::{Session, SessionConfig};

use std::collections::BTreeMap;
use std::time::Duration;

/// PHP-FPM puts a CGI header block (`X-Powered-By`, `Content-type`, blank line) in front of the
/// script output.
pub const HEADER_LINES: usize = 3;

pub const DEFAULT_PHP_CODE: &str =
    "<?php echo (json_encode(opcache_get_status(),JSON_PRETTY_PRINT)); ?>";
pub const DEFAULT_SCRIPT_PATH: &str = "/usr/local/share/opcache/opcache-state.php";
pub const DEFAULT_DOCUMENT_ROOT: &str = "/usr/local/share/opcache/";

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("FastCGI: {0}")]
    Fastcgi(#[from] Error),

    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("status code from scrape URI is wrong ({0})")]
    HttpStatus(u16),

    #[error("response for scrape URI is empty")]
    EmptyResponse,

    #[error("response is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl CollectError {
    /// Short operator-facing summary.
    pub fn summary(&self) -> &'static str {
        match self {
            CollectError::Fastcgi(Error::Connect { .. }) => "could not reach target",
            CollectError::Http(e) if e.is_connect() || e.is_timeout() => "could not reach target",
            CollectError::Http(_) => "HTTP exchange failed",
            CollectError::Fastcgi(Error::EmptyResponse) | CollectError::EmptyResponse => {
                "empty response"
            },
            CollectError::HttpStatus(_) => "bad status from target",
            CollectError::Json(_) => "unparseable response",
            CollectError::Fastcgi(_) => "FastCGI exchange failed",
        }
    }
}

#[derive(Clone, Debug)]
pub struct FastcgiTarget {
    pub host: String,
    pub port: u16,
    pub session: SessionConfig,
    pub script_path: String,
    pub document_root: String,
    pub php_code: String,
    /// Log the parameters and the raw and stripped responses.
    pub verbose: bool,
}

impl FastcgiTarget {
    pub fn new(host: impl Into<String>, port: u16) -> FastcgiTarget {
        FastcgiTarget {
            host: host.into(),
            port,
            session: SessionConfig::default(),
            script_path: DEFAULT_SCRIPT_PATH.to_owned(),
            document_root: DEFAULT_DOCUMENT_ROOT.to_owned(),
            php_code: DEFAULT_PHP_CODE.to_owned(),
            verbose: false,
        }
    }

    /// The environment PHP-FPM sees: a POST to the script, with `auto_prepend_file` pointed at
    /// the request body so the body itself runs as PHP.
    pub fn params(&self) -> BTreeMap<&'static str, String> {
        let mut params = BTreeMap::new();
        params.insert("GATEWAY_INTERFACE", "FastCGI/1.0".to_owned());
        params.insert("REQUEST_METHOD", "POST".to_owned());
        params.insert("SCRIPT_FILENAME", self.script_path.clone());
        params.insert("SCRIPT_NAME", self.script_path.clone());
        params.insert("QUERY_STRING", String::new());
        params.insert("REQUEST_URI", self.script_path.clone());
        params.insert("DOCUMENT_ROOT", self.document_root.clone());
        params.insert("SERVER_SOFTWARE", "php/fcgiclient".to_owned());
        params.insert("REMOTE_ADDR", "127.0.0.1".to_owned());
        params.insert("REMOTE_PORT", "9985".to_owned());
        params.insert("SERVER_ADDR", "127.0.0.1".to_owned());
        params.insert("SERVER_PORT", "80".to_owned());
        params.insert("SERVER_NAME", "localhost".to_owned());
        params.insert("SERVER_PROTOCOL", "HTTP/1.1".to_owned());
        params.insert("CONTENT_TYPE", "application/text".to_owned());
        params.insert("CONTENT_LENGTH", self.php_code.len().to_string());
        params.insert("PHP_VALUE", "auto_prepend_file = php://input".to_owned());
        params.insert("PHP_ADMIN_VALUE", "allow_url_include = On".to_owned());
        params
    }

    pub async fn fetch(&self) -> Result<String, CollectError> {
        let params = self.params();
        if self.verbose {
            info!("params: {:?}", params);
        }

        let session = Session::new(self.session.clone());
        let response = session.execute(&self.host, self.port, &params, self.php_code.as_bytes())
            .await?;

        if self.verbose {
            info!("response: {}", String::from_utf8_lossy(&response.stdout));
        }
        if response.is_error() {
            warn!("PHP-FPM reported errors: {}", String::from_utf8_lossy(&response.stderr).trim_end());
        }
        if response.stdout.is_empty() {
            error!("response for FastCGI call is empty");
            return Err(Error::EmptyResponse.into());
        }

        let body = strip_header_lines(&String::from_utf8_lossy(&response.stdout), HEADER_LINES);
        if self.verbose {
            info!("converted response: {}", body);
        }
        Ok(body)
    }
}

/// Drop the first `count` `\n`-separated lines.
pub fn strip_header_lines(text: &str, count: usize) -> String {
    text.splitn(count + 1, '\n').nth(count).unwrap_or("").to_owned()
}

#[derive(Clone, Debug)]
pub enum Source {
    StatusPage { url: String, timeout: Duration },
    Fastcgi(FastcgiTarget),
}

impl Source {
    /// Fetch the raw status document.
    pub async fn fetch(&self) -> Result<String, CollectError> {
        match self {
            Source::StatusPage { url, timeout } => fetch_status_page(url, *timeout).await,
            Source::Fastcgi(target) => target.fetch().await,
        }
    }
}

async fn fetch_status_page(url: &str, timeout: Duration) -> Result<String, CollectError> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()?;
    let response = client.get(url).send().await?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        error!("status code from scrape URI is wrong ({})", status.as_u16());
        return Err(CollectError::HttpStatus(status.as_u16()));
    }

    let text = response.text().await?;
    if text.is_empty() {
        error!("response for scrape URI is empty");
        return Err(CollectError::EmptyResponse);
    }
    Ok(text)
}
