//! robots.txt evaluation for a single domain.

use std::time::Duration;

use robotstxt::DefaultMatcher;

/// robots.txt body as stored in domain state. Empty means allow all.
#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    content: String,
}

impl RobotsRules {
    pub fn from_content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    /// Used when robots.txt is missing or could not be fetched.
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        if self.content.trim().is_empty() {
            return true;
        }
        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, user_agent, url)
    }

    /// `Crawl-delay` for the agent, falling back to the `*` group.
    pub fn crawl_delay(&self, user_agent: &str) -> Option<Duration> {
        let agent = user_agent.to_lowercase();
        let mut group: Vec<String> = Vec::new();
        let mut group_closed = false;
        let mut specific = None;
        let mut wildcard = None;

        for line in self.content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    if group_closed {
                        group.clear();
                        group_closed = false;
                    }
                    group.push(value.to_lowercase());
                }
                "crawl-delay" => {
                    group_closed = true;
                    let Ok(secs) = value.parse::<f64>() else {
                        continue;
                    };
                    if !secs.is_finite() || secs < 0.0 {
                        continue;
                    }
                    let delay = Duration::from_secs_f64(secs);
                    if group.iter().any(|ua| ua != "*" && agent.contains(ua.as_str())) {
                        specific = Some(delay);
                    } else if group.iter().any(|ua| ua == "*") {
                        wildcard = Some(delay);
                    }
                }
                _ => group_closed = true,
            }
        }

        specific.or(wildcard)
    }
}
