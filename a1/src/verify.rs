//! Verification engine: audit a finished session against the baseline.

use std::path::Path;

use anyhow::Result;
use tracing::{info, instrument};

use crate::core::checkpoint::Checkpoint;
use crate::core::tasks::{TaskDocument, TaskStatus};
use crate::core::types::{CheckReports, CheckResult, VerificationResult};
use crate::core::verification::{Baseline, Findings, classify_checks, decide, render_summary};
use crate::io::baseline::load_or_capture;
use crate::io::timestamp;
use crate::io::validator::Validator;

/// Outcome of one verification pass.
#[derive(Debug, Clone)]
pub struct Verification {
    pub result: VerificationResult,
    pub reports: CheckReports,
    /// Operator-facing summary (see [`render_summary`]).
    pub summary: String,
}

/// Capture the baseline before the first session, or reuse the stored one.
pub fn capture_baseline<V: Validator>(validator: &V, path: &Path) -> Result<Baseline> {
    load_or_capture(path, || Baseline::from_reports(&validator.run_all(), &timestamp()))
}

pub struct VerificationEngine<'a, V> {
    validator: &'a V,
    baseline: Option<&'a Baseline>,
}

impl<'a, V: Validator> VerificationEngine<'a, V> {
    pub fn new(validator: &'a V, baseline: Option<&'a Baseline>) -> Self {
        Self {
            validator,
            baseline,
        }
    }

    /// Audit the state left behind by a session.
    ///
    /// `checkpoint` supplies the modified files, the completion claim and the
    /// previous result whose retry count carries over.
    #[instrument(skip_all, fields(session = checkpoint.session))]
    pub fn verify(&self, checkpoint: &Checkpoint, tasks: &TaskDocument) -> Verification {
        let mut reports = self.validator.run_all();
        let mut findings = classify_checks(&reports, self.baseline);

        let files: Vec<String> = checkpoint.files_modified.iter().cloned().collect();
        let deleted = self.validator.deleted_files(&files);
        for path in &deleted {
            findings.warn(format!("files: {path} was deleted after it was modified"));
        }
        let files: Vec<String> = files.into_iter().filter(|f| !deleted.contains(f)).collect();
        if !files.is_empty() {
            let report = self.validator.check_files_exist(&files);
            if report.is_fail() {
                findings.block(format!("files: {}", report.message));
            }
            reports.insert("files".to_string(), report);
        }

        self.check_success_criteria(tasks, &mut findings);

        if checkpoint.is_completed() && !tasks.is_complete() {
            let (done, total) = tasks.progress();
            findings.block(format!(
                "completion: checkpoint claims COMPLETED but only {done}/{total} tasks are done"
            ));
        }

        let result = decide(findings, checkpoint.last_verification.as_ref());
        info!(
            passed = result.passed,
            blocking = result.blocking_issues.len(),
            retry_count = result.retry_count,
            force_accepted = result.force_accepted,
            "verification finished"
        );
        let summary = render_summary(&result, &reports);
        Verification {
            result,
            reports,
            summary,
        }
    }

    fn check_success_criteria(&self, tasks: &TaskDocument, findings: &mut Findings) {
        for task in tasks.list(Some(TaskStatus::Done)) {
            let Some(criteria) = task.success_criteria.as_deref() else {
                continue;
            };
            let report = self.validator.check_criteria(criteria);
            match report.result {
                CheckResult::Fail => findings.block(format!(
                    "criteria {}: {} ({})",
                    task.id, report.message, criteria
                )),
                CheckResult::Error => findings.warn(format!("criteria {}: {}", task.id, report.message)),
                CheckResult::Ok | CheckResult::Skip => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::checkpoint::CheckpointStatus;
    use crate::core::tasks::TaskUpdate;
    use crate::core::types::CheckReport;
    use crate::core::verification::MAX_VERIFY_RETRIES;

    struct Fixed {
        reports: CheckReports,
        criteria: CheckReport,
    }

    impl Fixed {
        fn new(entries: &[(&str, CheckReport)]) -> Self {
            Self {
                reports: entries
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), v.clone()))
                    .collect(),
                criteria: CheckReport::skip("unverifiable"),
            }
        }
    }

    impl Validator for Fixed {
        fn run_all(&self) -> CheckReports {
            self.reports.clone()
        }

        fn check_files_exist(&self, paths: &[String]) -> CheckReport {
            let missing: Vec<&str> = paths
                .iter()
                .filter(|p| p.starts_with("gone"))
                .map(String::as_str)
                .collect();
            if missing.is_empty() {
                CheckReport::ok("all present")
            } else {
                CheckReport::fail(format!("missing: {}", missing.join(", ")))
            }
        }

        fn deleted_files(&self, paths: &[String]) -> Vec<String> {
            paths.iter().filter(|p| p.starts_with("gone/removed")).cloned().collect()
        }

        fn check_criteria(&self, _criteria: &str) -> CheckReport {
            self.criteria.clone()
        }
    }

    fn done_task(doc: &mut TaskDocument, criteria: Option<&str>) {
        let task = doc.add("t", "", "t0");
        doc.update(
            &task.id,
            &TaskUpdate {
                status: Some(TaskStatus::Done),
                success_criteria: criteria.map(str::to_string),
                ..TaskUpdate::default()
            },
        );
    }

    #[test]
    fn pre_existing_lint_failure_is_only_a_warning() {
        let validator = Fixed::new(&[
            ("lint", CheckReport::fail("3 warnings")),
            ("tests", CheckReport::ok("passed")),
        ]);
        let baseline = Baseline::from_reports(&validator.run_all(), "t0");
        let engine = VerificationEngine::new(&validator, Some(&baseline));

        let v = engine.verify(&Checkpoint::initial("t0"), &TaskDocument::default());
        assert!(v.result.passed);
        assert!(v.result.blocking_issues.is_empty());
        assert_eq!(v.result.warnings, ["lint: 3 warnings (pre-existing)"]);
    }

    #[test]
    fn missing_modified_files_block() {
        let validator = Fixed::new(&[]);
        let engine = VerificationEngine::new(&validator, None);
        let mut checkpoint = Checkpoint::initial("t0");
        checkpoint.files_modified.insert("gone.rs".to_string());
        checkpoint.files_modified.insert("here.rs".to_string());

        let v = engine.verify(&checkpoint, &TaskDocument::default());
        assert!(!v.result.passed);
        assert_eq!(v.result.blocking_issues, ["files: missing: gone.rs"]);
        assert!(v.summary.contains("[FAIL] files"));
    }

    #[test]
    fn files_deleted_in_version_control_only_warn() {
        let validator = Fixed::new(&[]);
        let engine = VerificationEngine::new(&validator, None);
        let mut checkpoint = Checkpoint::initial("t0");
        checkpoint.files_modified.insert("gone/removed.rs".to_string());
        checkpoint.files_modified.insert("here.rs".to_string());

        let v = engine.verify(&checkpoint, &TaskDocument::default());
        assert!(v.result.passed);
        assert_eq!(
            v.result.warnings,
            ["files: gone/removed.rs was deleted after it was modified"]
        );
    }

    #[test]
    fn failed_criteria_of_done_tasks_block() {
        let mut validator = Fixed::new(&[]);
        validator.criteria = CheckReport::fail("Missing: out.txt");
        let engine = VerificationEngine::new(&validator, None);
        let mut tasks = TaskDocument::default();
        done_task(&mut tasks, Some("out.txt exists"));
        done_task(&mut tasks, None);

        let v = engine.verify(&Checkpoint::initial("t0"), &tasks);
        assert_eq!(
            v.result.blocking_issues,
            ["criteria task_001: Missing: out.txt (out.txt exists)"]
        );
    }

    #[test]
    fn completion_claim_must_match_progress() {
        let validator = Fixed::new(&[]);
        let engine = VerificationEngine::new(&validator, None);
        let mut tasks = TaskDocument::default();
        done_task(&mut tasks, None);
        tasks.add("open", "", "t0");
        let mut checkpoint = Checkpoint::initial("t0");
        checkpoint.status = CheckpointStatus::Completed;

        let v = engine.verify(&checkpoint, &tasks);
        assert_eq!(v.result.blocking_issues.len(), 1);
        assert!(v.result.blocking_issues[0].contains("only 1/2 tasks"));
    }

    #[test]
    fn third_consecutive_failure_is_force_accepted() {
        let validator = Fixed::new(&[("tests", CheckReport::fail("1 failed"))]);
        let engine = VerificationEngine::new(&validator, None);
        let mut checkpoint = Checkpoint::initial("t0");

        let mut results = Vec::new();
        for _ in 0..MAX_VERIFY_RETRIES {
            let v = engine.verify(&checkpoint, &TaskDocument::default());
            checkpoint.last_verification = Some(v.result.clone());
            results.push(v.result);
        }

        assert_eq!(
            results.iter().map(|r| r.retry_count).collect::<Vec<_>>(),
            [1, 2, 3]
        );
        assert!(!results[1].passed);
        let last = &results[2];
        assert!(last.passed && last.force_accepted);
        assert!(last.blocking_issues.is_empty());
        assert_eq!(last.warnings, ["tests: 1 failed (force-accepted)"]);
    }

    #[test]
    fn baseline_is_captured_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("baseline.json");
        let first = capture_baseline(&Fixed::new(&[("lint", CheckReport::fail("x"))]), &path)
            .expect("capture");
        let second = capture_baseline(&Fixed::new(&[("lint", CheckReport::ok("y"))]), &path)
            .expect("reuse");
        assert_eq!(first, second);
        assert!(second.failed("lint"));
    }
}
