//! Command line.

use super::collector::*;
use super::session::{Completion, SessionConfig};

use clap::Parser;

use std::time::Duration;

#[derive(Clone, Debug, Parser)]
#[command(name = "php-opcache-exporter", version, about = "php_opcache_exporter args")]
pub struct Config {
    /// Listen to this port
    #[arg(short, long, env = "VIRTUAL_PORT", default_value_t = 9462)]
    pub port: u16,

    /// URL for scraping, such as http://127.0.0.1/opcache-status.php
    #[arg(long, alias = "scrape_uri")]
    pub scrape_uri: Option<String>,

    /// Target FastCGI host, such as 127.0.0.1
    #[arg(long, default_value = "127.0.0.1")]
    pub fhost: String,

    /// FastCGI port
    #[arg(long, default_value_t = 9000)]
    pub fport: u16,

    /// Code for execution over the FastCGI client
    #[arg(long, alias = "phpcode", default_value = DEFAULT_PHP_CODE)]
    pub php_code: String,

    /// Script path reported to PHP-FPM
    #[arg(long, default_value = DEFAULT_SCRIPT_PATH)]
    pub script_path: String,

    /// Document root reported to PHP-FPM
    #[arg(long, default_value = DEFAULT_DOCUMENT_ROOT)]
    pub document_root: String,

    /// Connect timeout in seconds, for both FastCGI and the scrape URI
    #[arg(long, default_value_t = 3)]
    pub timeout: u64,

    /// Read FastCGI responses until the peer closes, ignoring EndRequest
    #[arg(long)]
    pub end_on_close: bool,

    /// Log FastCGI parameters and responses
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// The status page when a scrape URI is given, FastCGI otherwise.
    pub fn source(&self) -> Source {
        match self.scrape_uri {
            Some(ref url) => Source::StatusPage { url: url.clone(), timeout: self.timeout() },
            None => Source::Fastcgi(FastcgiTarget {
                host: self.fhost.clone(),
                port: self.fport,
                session: SessionConfig {
                    connect_timeout: self.timeout(),
                    completion: if self.end_on_close {
                        Completion::PeerClose
                    } else {
                        Completion::EndRequest
                    },
                },
                script_path: self.script_path.clone(),
                document_root: self.document_root.clone(),
                php_code: self.php_code.clone(),
                verbose: self.verbose,
            }),
        }
    }
}
