//! Parsed robots.txt for one origin
//!
//! `robots_txt` borrows from the text it parses, so the text is stored and parsed
//! on demand for every check. Crawl-delay is not exposed by that crate and is
//! extracted separately.

use robots_txt::Robots;
use robots_txt::matcher::SimpleMatcher;
use std::time::Duration;
use url::Url;

/// robots.txt rules for one scheme+host+port
#[derive(Clone, Debug, Default)]
pub struct RobotsRules {
    text: Option<String>,
    crawl_delay: Option<Duration>,
}

impl RobotsRules {
    /// Rules that allow everything (missing robots.txt, 4xx, fetch failure)
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Parse robots.txt text, picking the crawl-delay that applies to `user_agent`
    pub fn parse(text: impl Into<String>, user_agent: &str) -> Self {
        let text = text.into();
        let crawl_delay = extract_crawl_delay(&text, user_agent);
        Self {
            text: Some(text),
            crawl_delay,
        }
    }

    /// True when nothing was fetched
    pub fn is_allow_all(&self) -> bool {
        self.text.is_none()
    }

    /// Crawl-delay declared for our user agent (or `*`)
    pub fn crawl_delay(&self) -> Option<Duration> {
        self.crawl_delay
    }

    /// Whether `url` may be fetched by `user_agent`
    pub fn is_allowed(&self, url: &Url, user_agent: &str) -> bool {
        let Some(text) = &self.text else {
            return true;
        };
        let robots = Robots::from_str_lossy(text);
        let section = robots.choose_section(user_agent);
        let matcher = SimpleMatcher::new(&section.rules);

        match url.query() {
            Some(query) => matcher.check_path(&format!("{}?{}", url.path(), query)),
            None => matcher.check_path(url.path()),
        }
    }
}

/// Crawl-delay for `user_agent`; a group naming the agent beats the `*` group
fn extract_crawl_delay(robots_txt: &str, user_agent: &str) -> Option<Duration> {
    let agent = user_agent.to_ascii_lowercase();
    let mut group_agents: Vec<String> = Vec::new();
    let mut in_agent_lines = false;
    let mut specific = None;
    let mut wildcard = None;

    for line in robots_txt.lines() {
        let line = line.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        match key.as_str() {
            "user-agent" => {
                // consecutive user-agent lines share one group
                if !in_agent_lines {
                    group_agents.clear();
                }
                group_agents.push(value.to_ascii_lowercase());
                in_agent_lines = true;
            }
            "crawl-delay" => {
                in_agent_lines = false;
                let Some(delay) = parse_delay(value) else {
                    continue;
                };
                for name in &group_agents {
                    if name == "*" {
                        wildcard.get_or_insert(delay);
                    } else if !agent.is_empty() && agent.contains(name.as_str()) {
                        specific.get_or_insert(delay);
                    }
                }
            }
            _ => in_agent_lines = false,
        }
    }

    specific.or(wildcard)
}

fn parse_delay(value: &str) -> Option<Duration> {
    let secs: f64 = value.parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}
