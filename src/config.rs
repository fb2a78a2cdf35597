use std::time::Duration;

use crate::cli::Cli;
use crate::layout::DataLayout;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub max_connections: usize,
    pub accept_invalid_certs: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            timeout: Duration::from_secs(30),
            max_connections: 50,
            accept_invalid_certs: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub layout: DataLayout,
    pub http: HttpConfig,
    pub retry: RetryPolicy,
    pub batch_size: usize,
    pub skip_completed: bool,
}

impl RunConfig {
    pub fn new(layout: DataLayout) -> Self {
        Self {
            layout,
            http: HttpConfig::default(),
            retry: RetryPolicy::default(),
            batch_size: 10,
            skip_completed: false,
        }
    }
}

impl From<&Cli> for RunConfig {
    fn from(cli: &Cli) -> Self {
        let mut layout = DataLayout::new(&cli.data_dir);
        if let Some(catalog) = &cli.catalog {
            layout = layout.with_catalog(catalog);
        }

        Self {
            layout,
            http: HttpConfig {
                timeout: Duration::from_secs(cli.timeout_secs.max(1)),
                max_connections: cli.max_connections.max(1),
                ..HttpConfig::default()
            },
            retry: RetryPolicy {
                attempts: cli.attempts.max(1),
                backoff: Duration::from_millis(cli.backoff_ms),
            },
            batch_size: cli.batch_size.max(1),
            skip_completed: cli.skip_completed,
        }
    }
}
