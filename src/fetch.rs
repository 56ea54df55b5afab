//! Page fetching
//!
//! Produces `HtmlPage` snapshots from URLs with a blocking HTTP agent.
//! robots.txt is consulted before each fetch and its crawl delay is
//! honoured per host.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::FetchError;
use crate::robots::RobotsCache;
use crate::table::HtmlPage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_respect_robots")]
    pub respect_robots: bool,
}

fn default_user_agent() -> String {
    concat!("table_parser/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_respect_robots() -> bool {
    true
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            respect_robots: default_respect_robots(),
        }
    }
}

/// Fetches pages one at a time; not meant to be shared across threads
pub struct PageFetcher {
    agent: ureq::Agent,
    config: FetchConfig,
    robots: RobotsCache,
    last_fetch: HashMap<String, Instant>,
}

impl PageFetcher {
    pub fn new(config: FetchConfig) -> Self {
        let agent = ureq::Agent::new_with_config(
            ureq::Agent::config_builder()
                .timeout_global(Some(Duration::from_secs(config.timeout_secs)))
                .user_agent(config.user_agent.as_str())
                .build(),
        );

        Self {
            agent,
            config,
            robots: RobotsCache::new(),
            last_fetch: HashMap::new(),
        }
    }

    /// Fetch `url` and parse it into a page snapshot
    pub fn fetch(&mut self, url: &str) -> Result<HtmlPage, FetchError> {
        let parsed = Url::parse(url)?;
        let host = parsed.host_str().unwrap_or_default().to_lowercase();

        if self.config.respect_robots {
            let verdict = self
                .robots
                .check_blocking(&self.agent, url, &self.config.user_agent);
            if !verdict.allowed {
                warn!(url, "fetch disallowed by robots.txt");
                return Err(FetchError::Disallowed(url.to_string()));
            }
            if let Some(delay) = verdict.crawl_delay {
                let wait = remaining_delay(self.last_fetch.get(&host).copied(), delay, Instant::now());
                if !wait.is_zero() {
                    debug!(host = %host, wait = ?wait, "honouring crawl delay");
                    std::thread::sleep(wait);
                }
            }
        }

        let resp = self.agent.get(url).call()?;
        self.last_fetch.insert(host, Instant::now());
        if !resp.status().is_success() {
            return Err(FetchError::Status {
                status: resp.status().as_u16(),
                url: url.to_string(),
            });
        }

        let html = resp.into_body().read_to_string()?;
        debug!(url, bytes = html.len(), "fetched page");
        Ok(HtmlPage::parse(&html))
    }
}

/// Time still to wait before the next request to a host
fn remaining_delay(last: Option<Instant>, delay_secs: f64, now: Instant) -> Duration {
    let Some(last) = last else {
        return Duration::ZERO;
    };
    let delay = Duration::try_from_secs_f64(delay_secs).unwrap_or(Duration::ZERO);
    delay.saturating_sub(now.saturating_duration_since(last))
}
