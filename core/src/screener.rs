//! Screener — pure lexical pre-run filter for forbidden constructs.
//! Defense in depth, not a security boundary: the
//! container sandbox is the boundary, this gives fast, friendly
//! rejections and raises the cost of trivial exploits.

use once_cell::sync::Lazy;
use regex_lite::Regex;

use crate::types::{LanguageId, MAX_SOURCE_BYTES};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreenerVerdict {
    Accept { sanitized_source: String },
    Reject { reasons: Vec<String> },
}

#[allow(clippy::expect_used)] // patterns are compile-time constants, never fail
fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("static screener pattern must compile"))
        .collect()
}

const GENERIC_RAW: &[(&str, &str)] = &[
    (r"\.\./", "directory traversal (`../`)"),
    (r"/etc/passwd", "reference to /etc/passwd"),
    (r"/proc/", "reference to /proc/"),
    (r"\bsystem\s*\(", "call to system(...)"),
    (r"\bexec\s*\(", "call to exec(...)"),
    (r"\beval\s*\(", "call to eval(...)"),
];

static GENERIC_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    let patterns: Vec<&str> = GENERIC_RAW.iter().map(|(p, _)| *p).collect();
    compile(&patterns)
        .into_iter()
        .zip(GENERIC_RAW.iter().map(|(_, label)| *label))
        .collect()
});

struct LanguagePatterns {
    patterns: Vec<Regex>,
    labels: Vec<&'static str>,
}

fn language_patterns(language: LanguageId) -> &'static LanguagePatterns {
    static PYTHON: Lazy<LanguagePatterns> = Lazy::new(|| {
        let labels = [
            r"\bimport\s+os\b",
            r"\bimport\s+sys\b",
            r"\bimport\s+subprocess\b",
            r"\bimport\s+socket\b",
            r"\bimport\s+urllib\b",
            r"\bimport\s+requests\b",
            r"\bimport\s+shutil\b",
            r"\bimport\s+glob\b",
            r"\bimport\s+tempfile\b",
            r"\bimport\s+pickle\b",
            r"\bimport\s+marshal\b",
            r"\b__import__\s*\(",
            r"\bcompile\s*\(",
            r"\bopen\s*\(",
            r"\bfile\s*\(",
        ];
        LanguagePatterns {
            patterns: compile(&labels),
            labels: labels.to_vec(),
        }
    });
    static JS: Lazy<LanguagePatterns> = Lazy::new(|| {
        let labels = [
            r#"require\s*\(\s*['"]fs['"]\s*\)"#,
            r#"require\s*\(\s*['"]child_process['"]\s*\)"#,
            r#"require\s*\(\s*['"]net['"]\s*\)"#,
            r#"require\s*\(\s*['"]https?['"]\s*\)"#,
            r#"require\s*\(\s*['"]crypto['"]\s*\)"#,
            r#"require\s*\(\s*['"]os['"]\s*\)"#,
            r#"require\s*\(\s*['"]path['"]\s*\)"#,
            r#"require\s*\(\s*['"]stream['"]\s*\)"#,
            r#"require\s*\(\s*['"]util['"]\s*\)"#,
            r#"require\s*\(\s*['"]vm['"]\s*\)"#,
            r"\bprocess\b",
            r"\bglobal\b",
            r"__dirname\b",
            r"__filename\b",
        ];
        LanguagePatterns {
            patterns: compile(&labels),
            labels: labels.to_vec(),
        }
    });
    static CPP: Lazy<LanguagePatterns> = Lazy::new(|| {
        let labels = [
            r"#include\s*<cstdlib>",
            r"#include\s*<stdlib\.h>",
            r"#include\s*<unistd\.h>",
            r"#include\s*<sys/",
            r"#include\s*<windows\.h>",
            r"#include\s*<process\.h>",
            r"#include\s*<signal\.h>",
            r"#include\s*<fcntl\.h>",
            r"\bsystem\s*\(",
            r"\bexecl?p?\s*\(",
            r"\bfork\s*\(",
            r"\bkill\s*\(",
            r"\bexit\s*\(",
        ];
        LanguagePatterns {
            patterns: compile(&labels),
            labels: labels.to_vec(),
        }
    });
    static JAVA: Lazy<LanguagePatterns> = Lazy::new(|| {
        let labels = [
            r"import\s+java\.io\.File\b",
            r"import\s+java\.net\.",
            r"import\s+java\.lang\.Runtime\b",
            r"import\s+java\.lang\.ProcessBuilder\b",
            r"import\s+java\.nio\.file\.",
            r"import\s+java\.security\.",
            r"import\s+javax\.script\.",
            r"Runtime\.getRuntime\(\)\.exec",
            r"\bProcessBuilder\b",
            r"System\.exit\s*\(",
            r"\bFile\.",
            r"\bFiles\.",
        ];
        LanguagePatterns {
            patterns: compile(&labels),
            labels: labels.to_vec(),
        }
    });

    match language {
        LanguageId::Python => &PYTHON,
        LanguageId::Javascript => &JS,
        LanguageId::Cpp => &CPP,
        LanguageId::Java => &JAVA,
    }
}

/// Normalize line endings and strip NUL bytes. This is the text that is
/// actually written to the workspace.
fn canonicalize(source: &str) -> String {
    source.replace("\r\n", "\n").replace('\0', "")
}

/// Validate `source` for `language`, returning either the sanitized source
/// ready to write to disk, or the list of human-readable violation
/// reasons.
pub fn validate(source: &str, language: LanguageId) -> ScreenerVerdict {
    let mut reasons = Vec::new();

    if source.is_empty() {
        reasons.push("source is empty".to_string());
    }
    if source.len() > MAX_SOURCE_BYTES {
        reasons.push(format!(
            "source exceeds maximum size of {MAX_SOURCE_BYTES} bytes"
        ));
    }
    if source.contains('\0') {
        reasons.push("source contains a NUL byte".to_string());
    }

    for (pattern, label) in GENERIC_PATTERNS.iter() {
        if pattern.is_match(source) {
            reasons.push(format!("forbidden pattern: {label}"));
        }
    }

    let lang_patterns = language_patterns(language);
    for (pattern, label) in lang_patterns.patterns.iter().zip(lang_patterns.labels.iter()) {
        if pattern.is_match(source) {
            reasons.push(format!("forbidden pattern: {label}"));
        }
    }

    if !reasons.is_empty() {
        return ScreenerVerdict::Reject { reasons };
    }

    ScreenerVerdict::Accept {
        sanitized_source: canonicalize(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_clean_python() {
        let verdict = validate("print(\"Hello, World!\")", LanguageId::Python);
        assert!(matches!(verdict, ScreenerVerdict::Accept { .. }));
    }

    #[test]
    fn rejects_python_os_import() {
        let verdict = validate("import os\nos.system('ls')", LanguageId::Python);
        match verdict {
            ScreenerVerdict::Reject { reasons } => {
                assert!(reasons.iter().any(|r| r.contains("import os")));
            }
            _ => panic!("expected rejection"),
        }
    }

    #[test]
    fn rejects_js_process_reference() {
        let verdict = validate("console.log(process.pid)", LanguageId::Javascript);
        match verdict {
            ScreenerVerdict::Reject { reasons } => {
                assert!(reasons.iter().any(|r| r.contains("process")));
            }
            _ => panic!("expected rejection"),
        }
    }

    #[test]
    fn rejects_empty_source() {
        let verdict = validate("", LanguageId::Python);
        assert!(matches!(verdict, ScreenerVerdict::Reject { .. }));
    }

    #[test]
    fn rejects_nul_byte() {
        let verdict = validate("print(1)\0", LanguageId::Python);
        match verdict {
            ScreenerVerdict::Reject { reasons } => {
                assert!(reasons.iter().any(|r| r.contains("NUL")));
            }
            _ => panic!("expected rejection"),
        }
    }

    #[test]
    fn rejects_oversized_source() {
        let huge = "a".repeat(MAX_SOURCE_BYTES + 1);
        let verdict = validate(&huge, LanguageId::Python);
        assert!(matches!(verdict, ScreenerVerdict::Reject { .. }));
    }

    #[test]
    fn rejects_directory_traversal() {
        let verdict = validate("open('../../etc/shadow')", LanguageId::Python);
        match verdict {
            ScreenerVerdict::Reject { reasons } => {
                assert!(reasons.iter().any(|r| r.contains("traversal")));
            }
            _ => panic!("expected rejection"),
        }
    }

    #[test]
    fn canonicalize_normalizes_crlf_and_strips_nul() {
        assert_eq!(canonicalize("a\r\nb\0c"), "a\nbc");
    }

    #[test]
    fn accepts_clean_cpp() {
        let src = "#include <iostream>\nint main(){std::cout<<1+1;}";
        let verdict = validate(src, LanguageId::Cpp);
        assert!(matches!(verdict, ScreenerVerdict::Accept { .. }));
    }

    #[test]
    fn rejects_cpp_system_call() {
        let src = "#include <cstdlib>\nint main(){system(\"ls\");}";
        let verdict = validate(src, LanguageId::Cpp);
        assert!(matches!(verdict, ScreenerVerdict::Reject { .. }));
    }

    #[test]
    fn rejects_java_process_builder() {
        let src = "public class Main { public static void main(String[] a) { new ProcessBuilder(\"ls\"); } }";
        let verdict = validate(src, LanguageId::Java);
        assert!(matches!(verdict, ScreenerVerdict::Reject { .. }));
    }
}
