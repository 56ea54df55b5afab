//! robots.txt checks for page fetching

use std::collections::HashMap;
use std::time::{Duration, Instant};

use texting_robots::Robot;
use tracing::debug;

/// How long a fetched robots.txt stays valid
const ROBOTS_TTL: Duration = Duration::from_secs(3600);

/// Cached robots.txt per host, owned by a single fetcher
#[derive(Debug, Default)]
pub struct RobotsCache {
    cache: HashMap<String, CachedRobots>,
}

#[derive(Debug)]
struct CachedRobots {
    /// Raw robots.txt content (Robot doesn't impl Clone, so we store raw)
    robots_txt: String,
    fetched_at: Instant,
}

/// Verdict for one URL
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RobotsVerdict {
    pub allowed: bool,
    pub crawl_delay: Option<f64>,
}

impl RobotsVerdict {
    fn allow_all() -> Self {
        Self {
            allowed: true,
            crawl_delay: None,
        }
    }

    /// Evaluate a robots.txt body for one URL and user agent
    pub fn evaluate(robots_txt: &str, url: &str, user_agent: &str) -> Self {
        let allowed = Robot::new(user_agent, robots_txt.as_bytes())
            .map(|r| r.allowed(url))
            .unwrap_or(true);

        Self {
            allowed,
            crawl_delay: crawl_delay(robots_txt, user_agent),
        }
    }
}

impl RobotsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether `url` may be fetched, downloading robots.txt on a miss
    pub fn check_blocking(&mut self, agent: &ureq::Agent, url: &str, user_agent: &str) -> RobotsVerdict {
        let Ok(parsed) = url::Url::parse(url) else {
            return RobotsVerdict::allow_all();
        };
        let Some(host) = parsed.host_str().map(str::to_lowercase) else {
            return RobotsVerdict::allow_all();
        };

        if let Some(robots_txt) = self.cached(&host) {
            return RobotsVerdict::evaluate(robots_txt, url, user_agent);
        }

        let robots_url = format!("{}://{}/robots.txt", parsed.scheme(), host);
        let robots_txt = match agent.get(&robots_url).call() {
            Ok(resp) if resp.status().is_success() => {
                resp.into_body().read_to_string().unwrap_or_default()
            }
            _ => String::new(), // No robots.txt = allow all
        };
        debug!(host = %host, bytes = robots_txt.len(), "fetched robots.txt");

        let verdict = RobotsVerdict::evaluate(&robots_txt, url, user_agent);
        self.insert(host, robots_txt);
        verdict
    }

    /// robots.txt body for `host` if it is still fresh
    fn cached(&self, host: &str) -> Option<&str> {
        self.cache
            .get(host)
            .filter(|cached| cached.fetched_at.elapsed() < ROBOTS_TTL)
            .map(|cached| cached.robots_txt.as_str())
    }

    fn insert(&mut self, host: String, robots_txt: String) {
        self.cache.insert(
            host,
            CachedRobots {
                robots_txt,
                fetched_at: Instant::now(),
            },
        );
    }
}

/// Crawl-delay from the section naming the user agent, else from `*`
fn crawl_delay(robots_txt: &str, user_agent: &str) -> Option<f64> {
    let ua_lower = user_agent.to_lowercase();
    let mut in_named_section = false;
    let mut in_wildcard_section = false;
    let mut wildcard_delay: Option<f64> = None;

    for line in robots_txt.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let lower = line.to_lowercase();
        if let Some(agent) = lower.strip_prefix("user-agent:") {
            let agent = agent.trim();
            in_wildcard_section = agent == "*";
            in_named_section = !in_wildcard_section && !agent.is_empty() && ua_lower.contains(agent);
        } else if let Some(delay) = lower.strip_prefix("crawl-delay:") {
            if let Ok(delay) = delay.trim().parse::<f64>() {
                if in_named_section {
                    return Some(delay);
                }
                if in_wildcard_section {
                    wildcard_delay.get_or_insert(delay);
                }
            }
        }
    }

    wildcard_delay
}
