//! Result Normalizer — maps a [`RawOutcome`] plus context into the
//! caller-facing [`ExecutionResult`].

use once_cell::sync::Lazy;
use regex_lite::Regex;

use crate::sandbox::{RawOutcome, TerminationCause};
use crate::types::{ExecutionId, ExecutionResult, ExecutionStatus, OUTPUT_TRUNCATION_MARKER};

/// Substrings that show up in compiler diagnostics across the four
/// supported toolchains. A nonzero exit with one of these in stderr is
/// treated as a compile-stage failure rather than a runtime one, since
/// the supervisor only ever observes one exit code for the combined
/// compile-then-run command.
const COMPILE_DIAGNOSTIC_MARKERS: &[&str] = &[
    "error:",
    "syntax error",
    "cannot find symbol",
    "compilation failed",
    "fatal error",
    ": error",
];

#[allow(clippy::unwrap_used)] // patterns are compile-time constants, never fail
static TEMP_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"/tmp/[^\s:]+").unwrap());
#[allow(clippy::unwrap_used)]
static HOME_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"/(home|root)/[^\s:]+").unwrap());

/// Produce the final [`ExecutionResult`] for a completed run.
///
/// `supports_compile` must be the originating [`crate::registry::LanguageSpec`]'s
/// own flag: the compile-diagnostic heuristic in [`looks_like_compile_failure`]
/// is only meaningful for languages whose launch command actually compiles
/// before running, since an interpreted language's nonzero exit can never be
/// a compile-stage failure and its traceback text (e.g. Python's
/// `KeyError:`/`ValueError:`) can otherwise collide with compiler phrasing.
pub fn normalize(
    execution_id: ExecutionId,
    outcome: RawOutcome,
    source_filename: &str,
    output_cap_bytes: usize,
    supports_compile: bool,
) -> ExecutionResult {
    let stdout = String::from_utf8_lossy(&outcome.stdout).into_owned();
    let stderr_raw = String::from_utf8_lossy(&outcome.stderr).into_owned();

    let status = match outcome.termination_cause {
        TerminationCause::KilledByTimeout => ExecutionStatus::Timeout,
        TerminationCause::KilledByMemory => ExecutionStatus::MemoryLimitExceeded,
        TerminationCause::Aborted => ExecutionStatus::InternalError,
        TerminationCause::InternalFailure => ExecutionStatus::InternalError,
        TerminationCause::Exited if outcome.exit_code == 0 => ExecutionStatus::Success,
        TerminationCause::Exited
            if supports_compile && looks_like_compile_failure(&stderr_raw) =>
        {
            ExecutionStatus::CompilationError
        }
        TerminationCause::Exited => ExecutionStatus::RuntimeError,
    };

    let stdout = redact_and_cap(&stdout, source_filename, output_cap_bytes);
    let stderr = redact_and_cap(&stderr_raw, source_filename, output_cap_bytes);

    ExecutionResult {
        execution_id,
        status,
        stdout,
        stderr,
        exit_code: outcome.exit_code,
        wall_time_ms: outcome.wall_time_ms,
        peak_memory_bytes: outcome.peak_memory_bytes,
        violations: None,
    }
}

fn looks_like_compile_failure(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    COMPILE_DIAGNOSTIC_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

/// Apply path redaction rules in order, then length-cap the result.
/// Redaction runs before truncation so a redacted, shorter string is
/// never truncated unnecessarily.
fn redact_and_cap(text: &str, source_filename: &str, cap: usize) -> String {
    let mut redacted = TEMP_PATH.replace_all(text, "[temp_file]").into_owned();
    redacted = redacted.replace(source_filename, "[script]");
    redacted = HOME_PATH.replace_all(&redacted, "[path]").into_owned();

    if redacted.len() <= cap {
        return redacted;
    }

    let mut truncated = truncate_to_char_boundary(&redacted, cap);
    truncated.push_str(OUTPUT_TRUNCATION_MARKER);
    truncated
}

fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(
        exit_code: i32,
        cause: TerminationCause,
        stdout: &str,
        stderr: &str,
    ) -> RawOutcome {
        RawOutcome {
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
            exit_code,
            wall_time_ms: 12,
            peak_memory_bytes: Some(1024),
            termination_cause: cause,
        }
    }

    #[test]
    fn success_on_clean_exit() {
        let result = normalize(
            "exec_1".into(),
            outcome(0, TerminationCause::Exited, "hi\n", ""),
            "main.py",
            100_000,
            false,
        );
        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.stdout, "hi\n");
    }

    #[test]
    fn runtime_error_on_nonzero_exit_without_compile_markers() {
        let result = normalize(
            "exec_1".into(),
            outcome(1, TerminationCause::Exited, "", "Traceback...\nKeyError: 'x'"),
            "main.py",
            100_000,
            false,
        );
        assert_eq!(result.status, ExecutionStatus::RuntimeError);
    }

    #[test]
    fn interpreter_traceback_is_never_classified_as_a_compile_error() {
        // Regression: "keyerror: 'x'".contains("error:") is true, so this
        // must only stay RuntimeError because Python never compiles
        // (supports_compile = false) — the heuristic must not even run.
        for stderr in [
            "Traceback (most recent call last):\nKeyError: 'x'",
            "Traceback (most recent call last):\nValueError: invalid literal",
            "Traceback (most recent call last):\nTypeError: unsupported operand",
        ] {
            let result = normalize(
                "exec_1".into(),
                outcome(1, TerminationCause::Exited, "", stderr),
                "main.py",
                100_000,
                false,
            );
            assert_eq!(result.status, ExecutionStatus::RuntimeError, "stderr: {stderr}");
        }
    }

    #[test]
    fn compilation_error_detected_from_stderr_markers() {
        let result = normalize(
            "exec_1".into(),
            outcome(
                1,
                TerminationCause::Exited,
                "",
                "main.cpp:3:1: error: expected ';' before '}' token",
            ),
            "main.cpp",
            100_000,
            true,
        );
        assert_eq!(result.status, ExecutionStatus::CompilationError);
    }

    #[test]
    fn compile_heuristic_is_skipped_entirely_for_non_compiled_languages() {
        // Same stderr text that triggers CompilationError for a compiled
        // language must not do so when `supports_compile` is false.
        let result = normalize(
            "exec_1".into(),
            outcome(
                1,
                TerminationCause::Exited,
                "",
                "main.cpp:3:1: error: expected ';' before '}' token",
            ),
            "main.cpp",
            100_000,
            false,
        );
        assert_eq!(result.status, ExecutionStatus::RuntimeError);
    }

    #[test]
    fn aborted_cause_maps_to_internal_error_not_success_or_runtime_error() {
        let result = normalize(
            "exec_1".into(),
            outcome(
                -1,
                TerminationCause::Aborted,
                "",
                "partial output\nexecution aborted externally by kill_execution",
            ),
            "main.py",
            100_000,
            false,
        );
        assert_eq!(result.status, ExecutionStatus::InternalError);
    }

    #[test]
    fn timeout_cause_maps_to_timeout_status() {
        let result = normalize(
            "exec_1".into(),
            outcome(-1, TerminationCause::KilledByTimeout, "", ""),
            "main.py",
            100_000,
            false,
        );
        assert_eq!(result.status, ExecutionStatus::Timeout);
    }

    #[test]
    fn memory_cause_maps_to_memory_limit_exceeded() {
        let result = normalize(
            "exec_1".into(),
            outcome(137, TerminationCause::KilledByMemory, "", ""),
            "main.py",
            100_000,
            false,
        );
        assert_eq!(result.status, ExecutionStatus::MemoryLimitExceeded);
    }

    #[test]
    fn redacts_temp_paths() {
        let result = normalize(
            "exec_1".into(),
            outcome(
                1,
                TerminationCause::Exited,
                "",
                "open failed: /tmp/sandkeep/code_exec_exec_1/main.py",
            ),
            "main.py",
            100_000,
            false,
        );
        assert!(!result.stderr.contains("/tmp/"));
        assert!(result.stderr.contains("[temp_file]"));
    }

    #[test]
    fn redacts_source_filename_references() {
        let result = normalize(
            "exec_1".into(),
            outcome(1, TerminationCause::Exited, "", "File \"main.py\", line 2"),
            "main.py",
            100_000,
            false,
        );
        assert!(result.stderr.contains("[script]"));
        assert!(!result.stderr.contains("main.py"));
    }

    #[test]
    fn truncates_output_over_cap_with_single_marker() {
        let big = "x".repeat(50);
        let result = normalize(
            "exec_1".into(),
            outcome(0, TerminationCause::Exited, &big, ""),
            "main.py",
            10,
            false,
        );
        assert!(result.stdout.ends_with(OUTPUT_TRUNCATION_MARKER));
        assert_eq!(
            result.stdout.matches("truncated").count(),
            1,
            "truncation marker must appear exactly once"
        );
    }
}
