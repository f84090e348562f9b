//! Domain rules: does this action require resolution, or violate the
//! configured filesystem or network scope?
//!
//! Pure; no I/O. Rules are evaluated top to bottom and the first hit wins:
//! resolution requirement, then filesystem guard, then network guard,
//! otherwise ALLOW. Token presence is checked here; cryptographic validation
//! is the decision service's job.

use crate::config::{Config, RulesConfig, expand_path_str};
use crate::domain::{ActionProposal, Decision};

/// The outcome of the rules engine for one proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulesOutcome {
    /// ALLOW or DENY.
    pub decision: Decision,
    /// Reason text for DENY, empty for ALLOW.
    pub reason: String,
}

impl RulesOutcome {
    fn allow() -> Self {
        Self {
            decision: Decision::Allow,
            reason: String::new(),
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Deny,
            reason: reason.into(),
        }
    }
}

/// Evaluates the domain rules for a proposal under the given effective
/// config.
#[must_use]
pub fn evaluate(proposal: &ActionProposal, config: &Config) -> RulesOutcome {
    let action_type = proposal.action.action_type.as_str();

    if requires_resolution(action_type, &config.rules) && proposal.resolution_token.is_empty() {
        return RulesOutcome::deny(format!("Requires resolution for {action_type}"));
    }

    if action_type.starts_with("filesystem.") && !filesystem_allowed(proposal, &config.rules) {
        return RulesOutcome::deny("Filesystem access denied by rules");
    }

    if is_network_action(action_type) && !network_allowed(proposal, &config.rules) {
        return RulesOutcome::deny("Network access denied by rules");
    }

    RulesOutcome::allow()
}

/// True when `action_type` matches a `require_resolution` entry, either
/// exactly or as `entry.`-prefixed descendant.
#[must_use]
pub fn requires_resolution(action_type: &str, rules: &RulesConfig) -> bool {
    rules.require_resolution.iter().any(|entry| {
        action_type == entry
            || action_type
                .strip_prefix(entry)
                .is_some_and(|rest| rest.starts_with('.') || entry.ends_with('.'))
    })
}

fn is_network_action(action_type: &str) -> bool {
    action_type.starts_with("network.")
        || action_type.starts_with("http.")
        || action_type.starts_with("web.")
}

fn filesystem_allowed(proposal: &ActionProposal, rules: &RulesConfig) -> bool {
    if rules.filesystem.allow_roots.is_empty() {
        return true;
    }

    let Some(target) = proposal.action.target.get("path").and_then(|v| v.as_str()) else {
        return false;
    };

    rules.filesystem.allow_roots.iter().any(|root| {
        target.starts_with(root.as_str()) || target.starts_with(&expand_path_str(root))
    })
}

fn network_allowed(proposal: &ActionProposal, rules: &RulesConfig) -> bool {
    if !rules.network.deny_all {
        return true;
    }

    let domain = match proposal.action.target.get("domain").and_then(|v| v.as_str()) {
        Some(d) => d.to_string(),
        None => match proposal.action.target.get("url").and_then(|v| v.as_str()) {
            Some(url) => extract_domain(url),
            None => return false,
        },
    };

    rules.network.allow_domains.iter().any(|allowed| {
        domain == *allowed || domain.ends_with(&format!(".{allowed}"))
    })
}

/// Extracts the domain from a URL: strip the scheme, take up to the first
/// `/`.
fn extract_domain(url: &str) -> String {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .unwrap_or(url);
    match rest.find('/') {
        Some(idx) => rest[..idx].to_string(),
        None => rest.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::Config;

    fn proposal(action_type: &str) -> ActionProposal {
        let mut p = ActionProposal {
            agent_id: "a1".to_string(),
            ..ActionProposal::default()
        };
        p.action.action_type = action_type.to_string();
        p
    }

    fn with_target(mut p: ActionProposal, key: &str, value: &str) -> ActionProposal {
        p.action.target.insert(key.to_string(), json!(value));
        p
    }

    #[test]
    fn resolution_required_without_token() {
        let cfg = Config::default();
        let out = evaluate(&proposal("git.push"), &cfg);
        assert_eq!(out.decision, Decision::Deny);
        assert_eq!(out.reason, "Requires resolution for git.push");
    }

    #[test]
    fn resolution_matches_dotted_descendants() {
        let cfg = Config::default();
        let out = evaluate(&proposal("git.push.force"), &cfg);
        assert_eq!(out.decision, Decision::Deny);
        assert_eq!(out.reason, "Requires resolution for git.push.force");

        // "git.pushx" is not a descendant of "git.push".
        let out = evaluate(&proposal("git.pushx"), &cfg);
        assert_eq!(out.decision, Decision::Allow);
    }

    #[test]
    fn prefix_entries_match_whole_families() {
        let mut cfg = Config::default();
        cfg.rules.require_resolution = vec!["network.".to_string()];
        cfg.rules.network.deny_all = false;
        let out = evaluate(&proposal("network.request"), &cfg);
        assert_eq!(out.decision, Decision::Deny);
    }

    #[test]
    fn present_token_passes_the_presence_check() {
        let cfg = Config::default();
        let mut p = proposal("git.push");
        p.resolution_token = "anything".to_string();
        let out = evaluate(&p, &cfg);
        assert_eq!(out.decision, Decision::Allow);
    }

    #[test]
    fn filesystem_outside_roots_is_denied() {
        let cfg = Config::default(); // allow_roots ["~/dev"]
        let p = with_target(proposal("filesystem.read"), "path", "/etc/passwd");
        let out = evaluate(&p, &cfg);
        assert_eq!(out.decision, Decision::Deny);
        assert_eq!(out.reason, "Filesystem access denied by rules");
    }

    #[test]
    fn filesystem_inside_roots_is_allowed() {
        let cfg = Config::default();
        let p = with_target(proposal("filesystem.read"), "path", "~/dev/x.txt");
        let out = evaluate(&p, &cfg);
        assert_eq!(out.decision, Decision::Allow);

        // Expanded home also matches.
        let home = std::env::var("HOME").unwrap();
        let p = with_target(proposal("filesystem.read"), "path", &format!("{home}/dev/y"));
        let out = evaluate(&p, &cfg);
        assert_eq!(out.decision, Decision::Allow);
    }

    #[test]
    fn filesystem_without_path_target_is_denied_when_restricted() {
        let cfg = Config::default();
        let out = evaluate(&proposal("filesystem.read"), &cfg);
        assert_eq!(out.decision, Decision::Deny);
    }

    #[test]
    fn empty_roots_mean_no_restriction() {
        let mut cfg = Config::default();
        cfg.rules.filesystem.allow_roots = Vec::new();
        let p = with_target(proposal("filesystem.read"), "path", "/anywhere");
        let out = evaluate(&p, &cfg);
        assert_eq!(out.decision, Decision::Allow);
    }

    #[test]
    fn network_deny_all_blocks_unlisted_domains() {
        let mut cfg = Config::default();
        cfg.rules.network.allow_domains = vec!["github.com".to_string()];
        let p = with_target(proposal("http.get"), "url", "https://api.example.com/x");
        let out = evaluate(&p, &cfg);
        assert_eq!(out.decision, Decision::Deny);
        assert_eq!(out.reason, "Network access denied by rules");
    }

    #[test]
    fn network_subdomains_match_by_suffix() {
        let mut cfg = Config::default();
        cfg.rules.network.allow_domains = vec!["github.com".to_string()];

        let p = with_target(proposal("http.get"), "url", "https://raw.github.com/x/y");
        assert_eq!(evaluate(&p, &cfg).decision, Decision::Allow);

        let p = with_target(proposal("http.get"), "domain", "github.com");
        assert_eq!(evaluate(&p, &cfg).decision, Decision::Allow);

        // "evilgithub.com" is not a subdomain of "github.com".
        let p = with_target(proposal("http.get"), "domain", "evilgithub.com");
        assert_eq!(evaluate(&p, &cfg).decision, Decision::Deny);
    }

    #[test]
    fn network_without_target_is_denied_under_deny_all() {
        let cfg = Config::default();
        let out = evaluate(&proposal("web.fetch"), &cfg);
        assert_eq!(out.decision, Decision::Deny);
    }

    #[test]
    fn deny_all_off_allows_everything() {
        let mut cfg = Config::default();
        cfg.rules.network.deny_all = false;
        let out = evaluate(&proposal("http.get"), &cfg);
        assert_eq!(out.decision, Decision::Allow);
    }

    #[test]
    fn extract_domain_strips_scheme_and_path() {
        assert_eq!(extract_domain("https://api.example.com/v1/x"), "api.example.com");
        assert_eq!(extract_domain("http://example.com"), "example.com");
        assert_eq!(extract_domain("example.com/path"), "example.com");
    }

    #[test]
    fn non_matching_action_allows() {
        let cfg = Config::default();
        let out = evaluate(&proposal("tool.call"), &cfg);
        assert_eq!(out.decision, Decision::Allow);
    }
}
