//! Robots.txt policy parsing
//!
//! Directives are scoped to the most specific applicable `User-agent` group:
//! a group naming our crawler exactly wins over the `*` group, and groups for
//! other agents are ignored. `Sitemap` lines are global.

use std::time::Duration;

/// Resolved crawl policy for one domain
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotsPolicy {
    disallowed: Vec<String>,
    allowed: Vec<String>,
    crawl_delay: Duration,
    sitemaps: Vec<String>,
}

/// Rules collected for one agent scope while parsing
#[derive(Debug, Default)]
struct GroupRules {
    disallowed: Vec<String>,
    allowed: Vec<String>,
    crawl_delay: Option<Duration>,
}

impl RobotsPolicy {
    /// A policy with no restrictions and no delay
    ///
    /// Used when robots.txt is absent, unreachable or unreadable so the
    /// crawl never stalls on it.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parses robots.txt content for the given crawler identifier
    ///
    /// # Example
    ///
    /// ```
    /// use sumi_swarm::robots::RobotsPolicy;
    ///
    /// let policy = RobotsPolicy::parse("User-agent: *\nDisallow: /priv\nAllow: /priv/public", "SumiSwarm");
    /// assert!(policy.approved("/priv/public/x"));
    /// assert!(!policy.approved("/priv/secret"));
    /// ```
    pub fn parse(content: &str, crawler_name: &str) -> Self {
        let agent = crawler_name.to_lowercase();

        let mut specific: Option<GroupRules> = None;
        let mut wildcard: Option<GroupRules> = None;
        let mut sitemaps = Vec::new();

        // Consecutive User-agent lines form one group
        let mut group_agents: Vec<String> = Vec::new();
        let mut reading_agents = false;

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    if !reading_agents {
                        group_agents.clear();
                    }
                    group_agents.push(value.to_lowercase());
                    reading_agents = true;
                }
                "sitemap" => {
                    if !value.is_empty() {
                        sitemaps.push(value.to_string());
                    }
                }
                "disallow" | "allow" | "crawl-delay" => {
                    reading_agents = false;

                    let mut targets: Vec<&mut GroupRules> = Vec::with_capacity(2);
                    if group_agents.iter().any(|a| *a == agent) {
                        targets.push(specific.get_or_insert_with(GroupRules::default));
                    }
                    if group_agents.iter().any(|a| a == "*") {
                        targets.push(wildcard.get_or_insert_with(GroupRules::default));
                    }

                    for rules in targets {
                        apply_directive(rules, &key, value);
                    }
                }
                _ => {}
            }
        }

        let rules = specific.or(wildcard).unwrap_or_default();
        Self {
            disallowed: rules.disallowed,
            allowed: rules.allowed,
            crawl_delay: rules.crawl_delay.unwrap_or(Duration::ZERO),
            sitemaps,
        }
    }

    /// Longest-prefix-match approval
    ///
    /// The longest disallow prefix of `path` decides unless an allow prefix
    /// of `path` is strictly longer. No applicable disallow means approved.
    pub fn approved(&self, path: &str) -> bool {
        let longest_disallow = self
            .disallowed
            .iter()
            .filter(|prefix| !prefix.is_empty() && path.starts_with(prefix.as_str()))
            .map(|prefix| prefix.len())
            .max()
            .unwrap_or(0);

        if longest_disallow == 0 {
            return true;
        }

        self.allowed.iter().any(|prefix| {
            !prefix.is_empty() && prefix.len() > longest_disallow && path.starts_with(prefix.as_str())
        })
    }

    /// Minimum gap between two GETs on this domain (zero means unthrottled)
    pub fn crawl_delay(&self) -> Duration {
        self.crawl_delay
    }

    pub fn sitemaps(&self) -> &[String] {
        &self.sitemaps
    }

    pub fn disallowed(&self) -> &[String] {
        &self.disallowed
    }

    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }
}

fn apply_directive(rules: &mut GroupRules, key: &str, value: &str) {
    match key {
        "disallow" => {
            if !value.is_empty() {
                rules.disallowed.push(value.to_string());
            }
        }
        "allow" => {
            if !value.is_empty() {
                rules.allowed.push(value.to_string());
            }
        }
        "crawl-delay" => {
            if let Ok(seconds) = value.parse::<f64>() {
                if seconds.is_finite() && seconds >= 0.0 {
                    rules.crawl_delay = Some(Duration::from_millis((seconds * 1000.0) as u64));
                }
            }
        }
        _ => {}
    }
}
