//! Human-readable bundle summaries.
//!
//! `README.md` is deliberately excluded from the manifest hashes so that
//! human-readable additions never invalidate the signature.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};

use super::BundleError;

/// Content for `README.md` in a bundle directory. No secrets.
#[derive(Debug, Clone, Default)]
pub struct ReadmeOptions {
    /// Trigger tag, e.g. `decision_deny`.
    pub trigger: String,
    /// When the trigger fired.
    pub timestamp: Option<DateTime<Utc>>,
    /// Agent the bundle concerns.
    pub agent_id: String,
    /// Session the bundle concerns.
    pub session_id: String,
    /// Outcome, e.g. `DENY`.
    pub outcome: String,
    /// Stable reason codes.
    pub reason_codes: Vec<String>,
    /// One-line reason summary.
    pub reason_summary: String,
    /// Whether panic mode was effective.
    pub panic_enabled: bool,
    /// Suggested remedial commands.
    pub next_steps: Vec<String>,
    /// Directory name, used in the verify command.
    pub bundle_dir_name: String,
}

/// Writes `README.md` into `dir`.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_readme(dir: &Path, opts: &ReadmeOptions) -> Result<(), BundleError> {
    let outcome = if opts.outcome.is_empty() {
        "DENY/STOP"
    } else {
        opts.outcome.as_str()
    };
    let when = opts
        .timestamp
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Secs, true);
    let agent = if opts.agent_id.is_empty() {
        "N/A"
    } else {
        opts.agent_id.as_str()
    };
    let session = if opts.session_id.is_empty() {
        "N/A"
    } else {
        opts.session_id.as_str()
    };

    let mut why = String::new();
    for (i, code) in opts.reason_codes.iter().enumerate() {
        if i > 0 {
            why.push('\n');
        }
        why.push_str(&format!("{}. {code}", i + 1));
        if i == 0 && !opts.reason_summary.is_empty() {
            why.push_str(" - ");
            why.push_str(&opts.reason_summary);
        }
    }
    if why.is_empty() && !opts.reason_summary.is_empty() {
        why.push_str(&opts.reason_summary);
    }
    if why.is_empty() {
        why.push_str("See decision_records.jsonl for details.");
    }

    let panic_line = if opts.panic_enabled { "on" } else { "off" };

    let mut next_steps = String::new();
    for step in &opts.next_steps {
        if step.is_empty() || step.starts_with('#') {
            next_steps.push_str(step);
        } else {
            next_steps.push_str("- ");
            next_steps.push_str(step);
        }
        next_steps.push('\n');
    }
    if next_steps.is_empty() {
        next_steps.push_str("- `ctrldot panic off`  # if appropriate\n");
        next_steps
            .push_str("- `ctrldot resolve allow-once --agent <agent_id> --ttl 120s`  # to allow one action\n");
    }

    let verify_cmd = if opts.bundle_dir_name.is_empty() {
        "ctrldot bundle verify .".to_string()
    } else {
        format!("ctrldot bundle verify {}", opts.bundle_dir_name)
    };

    let md = format!(
        "# Ctrl Dot Bundle Summary\n\n\
         ## What happened\n\
         - **Trigger:** {trigger}\n\
         - **When:** {when}\n\
         - **Agent:** {agent}\n\
         - **Session:** {session}\n\
         - **Outcome:** {outcome}\n\n\
         ## Why\n{why}\n\n\
         ## Panic mode\n{panic_line}\n\n\
         ## Suggested next steps\n{next_steps}\n\
         ## Verify this bundle\n```\n{verify_cmd}\n```\n\n\
         ## Notes\n\
         This bundle is signed. Share the entire directory.\n",
        trigger = opts.trigger,
    );

    std::fs::write(dir.join("README.md"), md)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readme_includes_trigger_outcome_and_codes() {
        let dir = tempfile::TempDir::new().unwrap();
        write_readme(
            dir.path(),
            &ReadmeOptions {
                trigger: "decision_deny".to_string(),
                timestamp: Some(Utc::now()),
                agent_id: "a1".to_string(),
                session_id: "sess:1".to_string(),
                outcome: "DENY".to_string(),
                reason_codes: vec!["RESOLUTION_REQUIRED".to_string()],
                reason_summary: "Requires resolution for git.push".to_string(),
                panic_enabled: true,
                next_steps: vec!["ctrldot resolve allow-once --agent a1 --ttl 120s".to_string()],
                bundle_dir_name: "bundle_x".to_string(),
            },
        )
        .unwrap();

        let content = std::fs::read_to_string(dir.path().join("README.md")).unwrap();
        assert!(content.contains("**Trigger:** decision_deny"));
        assert!(content.contains("**Outcome:** DENY"));
        assert!(content.contains("1. RESOLUTION_REQUIRED - Requires resolution for git.push"));
        assert!(content.contains("## Panic mode\non"));
        assert!(content.contains("- ctrldot resolve allow-once --agent a1 --ttl 120s"));
        assert!(content.contains("ctrldot bundle verify bundle_x"));
    }

    #[test]
    fn empty_options_produce_placeholders() {
        let dir = tempfile::TempDir::new().unwrap();
        write_readme(dir.path(), &ReadmeOptions::default()).unwrap();
        let content = std::fs::read_to_string(dir.path().join("README.md")).unwrap();
        assert!(content.contains("**Agent:** N/A"));
        assert!(content.contains("**Outcome:** DENY/STOP"));
        assert!(content.contains("See decision_records.jsonl for details."));
        assert!(content.contains("ctrldot bundle verify ."));
    }
}
