//! Verification policy: baseline-aware classification and bounded retries.
//!
//! Everything here is pure. Running validators and reading stores happens in
//! [`crate::verify`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::types::{CheckReports, CheckResult, VerificationResult};

/// Checks whose new failures block acceptance of a session.
pub const BLOCKING_CHECKS: [&str; 2] = ["syntax", "tests"];
/// Consecutive blocked sessions after which the result is force-accepted.
pub const MAX_VERIFY_RETRIES: u32 = 3;

/// Per-check state captured once before the first session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Baseline {
    pub captured_at: String,
    pub checks: BTreeMap<String, CheckResult>,
}

impl Baseline {
    pub fn from_reports(reports: &CheckReports, now: &str) -> Self {
        Self {
            captured_at: now.to_string(),
            checks: reports
                .iter()
                .map(|(name, report)| (name.clone(), report.result))
                .collect(),
        }
    }

    pub fn failed(&self, check: &str) -> bool {
        self.checks.get(check) == Some(&CheckResult::Fail)
    }
}

/// Issues found while auditing a session, before retry policy is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Findings {
    pub blocking: Vec<String>,
    pub warnings: Vec<String>,
}

impl Findings {
    pub fn block(&mut self, issue: impl Into<String>) {
        self.blocking.push(issue.into());
    }

    pub fn warn(&mut self, issue: impl Into<String>) {
        self.warnings.push(issue.into());
    }
}

pub fn is_blocking_check(name: &str) -> bool {
    BLOCKING_CHECKS.contains(&name)
}

/// Sort validator reports into blocking issues and warnings.
///
/// Failures that already failed in the baseline are demoted to warnings.
/// Checks that could not run are warnings; skipped and passing checks add nothing.
pub fn classify_checks(reports: &CheckReports, baseline: Option<&Baseline>) -> Findings {
    let mut findings = Findings::default();
    for (name, report) in reports {
        let issue = format!("{name}: {}", report.message);
        match report.result {
            CheckResult::Ok | CheckResult::Skip => {}
            CheckResult::Error => findings.warn(issue),
            CheckResult::Fail => {
                if baseline.is_some_and(|b| b.failed(name)) {
                    findings.warn(format!("{issue} (pre-existing)"));
                } else if is_blocking_check(name) {
                    findings.block(issue);
                } else {
                    findings.warn(issue);
                }
            }
        }
    }
    findings
}

/// Retry count carried over from the previous session's result.
pub fn previous_retry_count(previous: Option<&VerificationResult>) -> u32 {
    match previous {
        Some(prev) if !prev.passed => prev.retry_count,
        _ => 0,
    }
}

/// Apply the bounded retry policy to a session's findings.
pub fn decide(findings: Findings, previous: Option<&VerificationResult>) -> VerificationResult {
    let Findings {
        mut blocking,
        mut warnings,
    } = findings;

    let retry_count = if blocking.is_empty() {
        0
    } else {
        previous_retry_count(previous) + 1
    };

    let force_accepted = retry_count >= MAX_VERIFY_RETRIES;
    if force_accepted {
        warnings.extend(
            blocking
                .drain(..)
                .map(|issue| format!("{issue} (force-accepted)")),
        );
    }

    VerificationResult {
        passed: blocking.is_empty() || force_accepted,
        blocking_issues: blocking,
        warnings,
        retry_count,
        force_accepted,
    }
}

/// Multi-line summary of a verification pass for the operator.
pub fn render_summary(result: &VerificationResult, reports: &CheckReports) -> String {
    let mut lines = Vec::new();
    for (name, report) in reports {
        lines.push(format!(
            "  {} {name}: {}",
            report.result.icon(),
            report.message
        ));
    }
    let verdict = if result.force_accepted {
        format!("FORCE-ACCEPTED after {} attempts", result.retry_count)
    } else if result.passed {
        "PASSED".to_string()
    } else {
        format!(
            "FAILED (attempt {}/{MAX_VERIFY_RETRIES})",
            result.retry_count
        )
    };
    lines.push(format!("  Verification: {verdict}"));
    for issue in &result.blocking_issues {
        lines.push(format!("    BLOCKING: {issue}"));
    }
    for warning in &result.warnings {
        lines.push(format!("    warning: {warning}"));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::CheckReport;

    fn reports(entries: &[(&str, CheckReport)]) -> CheckReports {
        entries
            .iter()
            .map(|(name, report)| (name.to_string(), report.clone()))
            .collect()
    }

    #[test]
    fn preexisting_failure_is_a_warning() {
        let before = reports(&[
            ("lint", CheckReport::fail("Lint issues found")),
            ("tests", CheckReport::ok("Tests passed")),
        ]);
        let baseline = Baseline::from_reports(&before, "t0");
        let now = reports(&[
            ("lint", CheckReport::fail("Lint issues found")),
            ("tests", CheckReport::ok("Tests passed")),
        ]);

        let findings = classify_checks(&now, Some(&baseline));
        assert!(findings.blocking.is_empty());
        assert_eq!(findings.warnings, ["lint: Lint issues found (pre-existing)"]);
    }

    #[test]
    fn new_blocking_failure_blocks_and_warning_check_warns() {
        let now = reports(&[
            ("build", CheckReport::fail("Build failed")),
            ("git", CheckReport::ok("clean")),
            ("syntax", CheckReport::error("timed out")),
            ("tests", CheckReport::fail("Tests failed")),
        ]);
        let findings = classify_checks(&now, Some(&Baseline::default()));
        assert_eq!(findings.blocking, ["tests: Tests failed"]);
        assert_eq!(
            findings.warnings,
            ["build: Build failed", "syntax: timed out"]
        );
    }

    #[test]
    fn third_consecutive_failure_is_force_accepted() {
        let failing = || Findings {
            blocking: vec!["tests: Tests failed".to_string()],
            warnings: Vec::new(),
        };

        let first = decide(failing(), None);
        assert!(!first.passed);
        assert_eq!(first.retry_count, 1);

        let second = decide(failing(), Some(&first));
        assert!(!second.passed);
        assert_eq!(second.retry_count, 2);

        let third = decide(failing(), Some(&second));
        assert!(third.passed);
        assert!(third.force_accepted);
        assert_eq!(third.retry_count, 3);
        assert!(third.blocking_issues.is_empty());
        assert_eq!(third.warnings, ["tests: Tests failed (force-accepted)"]);
    }

    #[test]
    fn pass_resets_and_following_failure_starts_over() {
        let passed = decide(Findings::default(), None);
        assert!(passed.passed);
        assert_eq!(passed.retry_count, 0);

        let stale = VerificationResult {
            passed: true,
            retry_count: 2,
            ..VerificationResult::default()
        };
        let next = decide(
            Findings {
                blocking: vec!["syntax: bad".to_string()],
                warnings: Vec::new(),
            },
            Some(&stale),
        );
        assert_eq!(next.retry_count, 1);
    }

    #[test]
    fn summary_reports_verdict() {
        let result = decide(
            Findings {
                blocking: vec!["tests: Tests failed".to_string()],
                warnings: Vec::new(),
            },
            None,
        );
        let text = render_summary(&result, &reports(&[("tests", CheckReport::fail("Tests failed"))]));
        assert!(text.contains("[FAIL] tests: Tests failed"));
        assert!(text.contains("FAILED (attempt 1/3)"));
        assert!(text.contains("BLOCKING: tests: Tests failed"));
    }
}
