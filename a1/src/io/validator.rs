//! Read-only project checks: syntax, tests, lint, build and repository status.
//!
//! Every check degrades instead of failing: a missing tool is `skip`, a
//! timeout or spawn failure is `error`. Nothing here aborts the session loop.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, instrument, warn};
use walkdir::{DirEntry, WalkDir};

use super::config::{CheckCommand, ValidatorConfig};
use super::git::Git;
use super::process::{is_not_found, run_command_with_timeout};
use crate::core::types::{CheckReport, CheckReports, CheckResult};

/// Characters of command output kept in a report's details.
const DETAILS_TAIL_CHARS: usize = 500;

static FILE_THEN_EXISTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)['"]?(\S+\.\w{1,5})['"]?\s+exist"#).expect("valid regex")
});
static EXISTS_THEN_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)exist\w*\s+['"]?(\S+\.\w{1,5})['"]?"#).expect("valid regex")
});

/// Runs project checks on behalf of the verification engine.
pub trait Validator {
    /// Run every applicable check, keyed by check name.
    fn run_all(&self) -> CheckReports;

    /// Fail if any of `paths` (relative to the project) is missing.
    fn check_files_exist(&self, paths: &[String]) -> CheckReport;

    /// Those of `paths` that version control shows as deliberately deleted.
    fn deleted_files(&self, _paths: &[String]) -> Vec<String> {
        Vec::new()
    }

    /// Check one free-form success criterion where it is recognisable.
    fn check_criteria(&self, criteria: &str) -> CheckReport;
}

impl<V: Validator + ?Sized> Validator for &V {
    fn run_all(&self) -> CheckReports {
        (**self).run_all()
    }

    fn check_files_exist(&self, paths: &[String]) -> CheckReport {
        (**self).check_files_exist(paths)
    }

    fn deleted_files(&self, paths: &[String]) -> Vec<String> {
        (**self).deleted_files(paths)
    }

    fn check_criteria(&self, criteria: &str) -> CheckReport {
        (**self).check_criteria(criteria)
    }
}

/// What a criterion asks to be checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Criterion {
    TestsPass,
    LintClean,
    FileExists(String),
    Unverifiable,
}

/// Classify a free-form success criterion.
pub fn parse_criterion(criteria: &str) -> Criterion {
    let lower = criteria.to_lowercase();
    if (lower.contains("test") && lower.contains("pass"))
        || lower.contains("pytest")
        || lower.contains("cargo test")
    {
        return Criterion::TestsPass;
    }
    if lower.contains("lint")
        && (lower.contains("clean") || lower.contains("pass") || lower.contains("no "))
    {
        return Criterion::LintClean;
    }
    let captured = FILE_THEN_EXISTS
        .captures(criteria)
        .or_else(|| EXISTS_THEN_FILE.captures(criteria))
        .and_then(|caps| caps.get(1));
    match captured {
        Some(m) => Criterion::FileExists(m.as_str().trim_matches(['"', '\'']).to_string()),
        None => Criterion::Unverifiable,
    }
}

enum Outcome {
    Finished {
        success: bool,
        code: Option<i32>,
        output: String,
    },
    TimedOut,
    Missing(String),
}

/// Validator over a project directory with auto-detected or configured commands.
#[derive(Debug, Clone)]
pub struct ProjectValidator {
    root: PathBuf,
    config: ValidatorConfig,
}

impl ProjectValidator {
    pub fn new(root: impl Into<PathBuf>, config: ValidatorConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.config.test_timeout_secs)
    }

    fn exec(&self, argv: &[&str], timeout: Duration) -> Result<Outcome, String> {
        let Some((program, args)) = argv.split_first() else {
            return Err("empty command".to_string());
        };
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.root);
        match run_command_with_timeout(cmd, timeout, self.config.output_limit_bytes) {
            Ok(out) if out.timed_out => Ok(Outcome::TimedOut),
            Ok(out) => Ok(Outcome::Finished {
                success: out.status.success(),
                code: out.status.code(),
                output: out.combined(),
            }),
            Err(err) if is_not_found(&err) => Ok(Outcome::Missing(program.to_string())),
            Err(err) => Err(format!("{err:#}")),
        }
    }

    /// Run `argv` and map the usual outcomes to a report.
    fn simple_check(
        &self,
        argv: &[&str],
        timeout: Duration,
        ok_message: &str,
        fail_message: &str,
    ) -> CheckReport {
        let outcome = self.exec(argv, timeout);
        report_outcome(&argv.join(" "), outcome, timeout, ok_message, fail_message)
    }

    fn configured(&self, check: &Option<CheckCommand>) -> Option<Vec<String>> {
        check.as_ref().map(|c| c.command.clone())
    }

    fn has_rust(&self) -> bool {
        self.root.join("Cargo.toml").is_file()
    }

    fn has_node(&self) -> bool {
        self.root.join("package.json").is_file()
    }

    fn python_files(&self) -> Vec<PathBuf> {
        WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_ignored_dir(e))
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "py"))
            .map(DirEntry::into_path)
            .collect()
    }

    fn has_python(&self) -> bool {
        self.root.join("pyproject.toml").is_file()
            || self.root.join("setup.py").is_file()
            || !self.python_files().is_empty()
    }

    #[instrument(skip_all)]
    fn check_syntax(&self) -> CheckReport {
        if let Some(argv) = self.configured(&self.config.syntax) {
            let argv: Vec<&str> = argv.iter().map(String::as_str).collect();
            return self.simple_check(&argv, self.timeout(), "Syntax OK", "Syntax errors");
        }
        if self.has_rust() {
            return self.simple_check(
                &["cargo", "check", "--quiet", "--all-targets"],
                self.test_timeout(),
                "Syntax OK (cargo check)",
                "Compilation errors",
            );
        }
        let files = self.python_files();
        if files.is_empty() {
            return CheckReport::skip("No source files to check");
        }

        let mut errors = Vec::new();
        for file in &files {
            let path = file.to_string_lossy();
            match self.exec(&["python3", "-m", "py_compile", path.as_ref()], self.timeout()) {
                Ok(Outcome::Finished { success: true, .. }) => {}
                Ok(Outcome::Finished { output, .. }) => {
                    let name = file
                        .strip_prefix(&self.root)
                        .unwrap_or(file)
                        .display()
                        .to_string();
                    errors.push(format!("{name}: {}", output.trim()));
                }
                Ok(Outcome::Missing(program)) => {
                    return CheckReport::skip(format!("Command not found: {program}"));
                }
                Ok(Outcome::TimedOut) => return timed_out("python3 -m py_compile", self.timeout()),
                Err(err) => {
                    return CheckReport::error("Could not run python3 -m py_compile")
                        .with_details(err);
                }
            }
        }
        if errors.is_empty() {
            return CheckReport::ok(format!("Syntax OK ({} files)", files.len()));
        }
        CheckReport::fail(format!("Syntax errors in {} files", errors.len()))
            .with_details(errors.iter().take(5).cloned().collect::<Vec<_>>().join("\n"))
            .with_command("python3 -m py_compile")
    }

    #[instrument(skip_all)]
    fn check_tests(&self) -> CheckReport {
        if let Some(argv) = self.configured(&self.config.tests) {
            let argv: Vec<&str> = argv.iter().map(String::as_str).collect();
            return self.simple_check(&argv, self.test_timeout(), "All tests passed", "Tests failed");
        }
        if self.has_rust() {
            return self.simple_check(
                &["cargo", "test", "--quiet"],
                self.test_timeout(),
                "All tests passed",
                "Tests failed",
            );
        }
        if !self.has_python() {
            return CheckReport::skip("No test framework found");
        }

        let pytest = ["python3", "-m", "pytest", "-q", "--tb=short"];
        match self.exec(&pytest, self.test_timeout()) {
            Ok(Outcome::Finished { code: Some(5), .. }) => {
                CheckReport::skip("No tests found").with_command("pytest")
            }
            Ok(Outcome::Finished { output, .. }) if output.contains("No module named pytest") => {
                self.simple_check(
                    &["python3", "-m", "unittest", "discover"],
                    self.test_timeout(),
                    "All tests passed",
                    "Tests failed",
                )
            }
            Ok(Outcome::Finished { success: true, .. }) => {
                CheckReport::ok("All tests passed").with_command("pytest")
            }
            Ok(Outcome::Finished { output, .. }) => CheckReport::fail("Tests failed")
                .with_details(tail(&output))
                .with_command("pytest"),
            Ok(Outcome::TimedOut) => timed_out("pytest", self.test_timeout()),
            Ok(Outcome::Missing(_)) => CheckReport::skip("No test framework found"),
            Err(err) => CheckReport::error("Could not run pytest").with_details(err),
        }
    }

    #[instrument(skip_all)]
    fn check_lint(&self) -> CheckReport {
        if let Some(argv) = self.configured(&self.config.lint) {
            let argv: Vec<&str> = argv.iter().map(String::as_str).collect();
            return self.simple_check(&argv, self.timeout(), "Lint passed", "Lint issues found");
        }
        if self.has_rust() {
            let argv = ["cargo", "clippy", "--quiet", "--", "-D", "warnings"];
            let outcome = self.exec(&argv, self.test_timeout());
            if finished_with(&outcome, "no such command") {
                return CheckReport::skip("No linter found (clippy)");
            }
            return report_outcome(
                &argv.join(" "),
                outcome,
                self.test_timeout(),
                "Lint passed",
                "Lint issues found",
            );
        }
        if !self.has_python() {
            return CheckReport::skip("No linter configured");
        }

        for argv in [
            &["ruff", "check", ".", "--output-format=concise"][..],
            &["flake8", "."][..],
        ] {
            match self.exec(argv, self.timeout()) {
                Ok(Outcome::Missing(_)) => continue,
                Ok(Outcome::Finished { success: true, .. }) => {
                    return CheckReport::ok("Lint passed").with_command(argv.join(" "));
                }
                Ok(Outcome::Finished { output, .. }) => {
                    let issues = output.lines().filter(|l| !l.trim().is_empty()).count();
                    return CheckReport::fail(format!("Lint issues: {issues}"))
                        .with_details(tail(&output))
                        .with_command(argv.join(" "));
                }
                Ok(Outcome::TimedOut) => return timed_out(&argv.join(" "), self.timeout()),
                Err(err) => {
                    return CheckReport::error(format!("Could not run {}", argv[0])).with_details(err);
                }
            }
        }
        CheckReport::skip("No linter found (ruff/flake8)")
    }

    #[instrument(skip_all)]
    fn check_build(&self) -> CheckReport {
        if let Some(argv) = self.configured(&self.config.build) {
            let argv: Vec<&str> = argv.iter().map(String::as_str).collect();
            return self.simple_check(&argv, self.test_timeout(), "Build successful", "Build failed");
        }
        if self.has_rust() {
            return self.simple_check(
                &["cargo", "build", "--quiet"],
                self.test_timeout(),
                "Build successful",
                "Build failed",
            );
        }
        if self.root.join("pyproject.toml").is_file() {
            let argv = ["python3", "-m", "build", "--no-isolation"];
            let outcome = self.exec(&argv, self.test_timeout());
            if finished_with(&outcome, "No module named build") {
                return CheckReport::skip("build module not installed");
            }
            return report_outcome(
                &argv.join(" "),
                outcome,
                self.test_timeout(),
                "Build successful",
                "Build failed",
            );
        }
        if self.has_node() {
            let argv = ["npm", "run", "build"];
            let outcome = self.exec(&argv, self.timeout());
            if finished_with(&outcome, "issing script") {
                return CheckReport::skip("No build script");
            }
            return report_outcome(
                &argv.join(" "),
                outcome,
                self.timeout(),
                "npm build successful",
                "npm build failed",
            );
        }
        CheckReport::skip("No build config found")
    }

    fn check_git(&self) -> Option<CheckReport> {
        let git = Git::new(&self.root);
        if !git.is_repo() {
            return None;
        }
        let report = match git.change_summary() {
            Ok(summary) => CheckReport::ok(format!(
                "Changes: {}, untracked: {}",
                summary.changed, summary.untracked
            )),
            Err(err) => {
                warn!(err = %err, "git status failed");
                CheckReport::error("git status failed").with_details(format!("{err:#}"))
            }
        };
        Some(report.with_command("git status --porcelain"))
    }

    fn criteria_report(criteria: &str, report: CheckReport) -> CheckReport {
        CheckReport {
            message: format!("Criteria '{criteria}': {}", report.message),
            ..report
        }
    }
}

impl Validator for ProjectValidator {
    #[instrument(skip_all, fields(root = %self.root.display()))]
    fn run_all(&self) -> CheckReports {
        let mut reports = CheckReports::new();
        reports.insert("syntax".to_string(), self.check_syntax());
        reports.insert("tests".to_string(), self.check_tests());
        reports.insert("lint".to_string(), self.check_lint());
        reports.insert("build".to_string(), self.check_build());
        if let Some(git) = self.check_git() {
            reports.insert("git".to_string(), git);
        }
        debug!(
            failed = reports.values().filter(|r| r.result == CheckResult::Fail).count(),
            "validator pass finished"
        );
        reports
    }

    fn check_files_exist(&self, paths: &[String]) -> CheckReport {
        if paths.is_empty() {
            return CheckReport::skip("No files to check");
        }
        let missing: Vec<&str> = paths
            .iter()
            .filter(|p| !self.root.join(p).exists())
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            return CheckReport::ok(format!("All {} files exist", paths.len()));
        }
        CheckReport::fail(format!(
            "{} files missing: {}",
            missing.len(),
            missing.iter().take(5).copied().collect::<Vec<_>>().join(", ")
        ))
    }

    fn deleted_files(&self, paths: &[String]) -> Vec<String> {
        let git = Git::new(&self.root);
        if paths.is_empty() || !git.is_repo() {
            return Vec::new();
        }
        match git.deleted_paths() {
            Ok(deleted) => paths
                .iter()
                .filter(|p| deleted.contains(p))
                .cloned()
                .collect(),
            Err(err) => {
                warn!(err = %err, "git status failed");
                Vec::new()
            }
        }
    }

    fn check_criteria(&self, criteria: &str) -> CheckReport {
        match parse_criterion(criteria) {
            Criterion::TestsPass => Self::criteria_report(criteria, self.check_tests()),
            Criterion::LintClean => Self::criteria_report(criteria, self.check_lint()),
            Criterion::FileExists(name) => {
                if self.root.join(&name).exists() {
                    CheckReport::ok(format!("Criteria '{criteria}': file {name} found"))
                } else {
                    CheckReport::fail(format!("Criteria '{criteria}': file {name} NOT found"))
                }
            }
            Criterion::Unverifiable => {
                CheckReport::skip(format!("Criteria '{criteria}': can't verify automatically"))
            }
        }
    }
}

fn is_ignored_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry.file_name().to_str().is_some_and(|name| {
            name.starts_with('.')
                || matches!(
                    name,
                    "node_modules" | "target" | "venv" | "__pycache__" | "dist" | "build"
                )
        })
}

fn report_outcome(
    label: &str,
    outcome: Result<Outcome, String>,
    timeout: Duration,
    ok_message: &str,
    fail_message: &str,
) -> CheckReport {
    match outcome {
        Ok(Outcome::Finished { success: true, .. }) => CheckReport::ok(ok_message).with_command(label),
        Ok(Outcome::Finished { output, .. }) => CheckReport::fail(fail_message)
            .with_details(tail(&output))
            .with_command(label),
        Ok(Outcome::TimedOut) => timed_out(label, timeout),
        Ok(Outcome::Missing(program)) => CheckReport::skip(format!("Command not found: {program}")),
        Err(err) => CheckReport::error(format!("Could not run {label}")).with_details(err),
    }
}

/// A failed run whose output mentions `needle`.
fn finished_with(outcome: &Result<Outcome, String>, needle: &str) -> bool {
    matches!(outcome, Ok(Outcome::Finished { success: false, output, .. }) if output.contains(needle))
}

fn timed_out(label: &str, timeout: Duration) -> CheckReport {
    CheckReport::error(format!("Timed out after {}s", timeout.as_secs())).with_command(label)
}

fn tail(output: &str) -> String {
    let trimmed = output.trim();
    let count = trimmed.chars().count();
    if count <= DETAILS_TAIL_CHARS {
        return trimmed.to_string();
    }
    trimmed.chars().skip(count - DETAILS_TAIL_CHARS).collect()
}
