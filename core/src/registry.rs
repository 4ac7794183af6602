//! Language Registry — a read-only-at-steady-state table mapping a
//! [`LanguageId`] to its [`LanguageSpec`].

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::types::LanguageId;

/// Immutable, per-language invocation contract. Built once at process
/// start; never mutated afterward.
#[derive(Debug, Clone)]
pub struct LanguageSpec {
    pub id: LanguageId,
    pub image: &'static str,
    pub supports_compile: bool,
    pub compile_timeout_ms: u64,
    pub run_timeout_ms: u64,
    pub default_memory_bytes: u64,
    pub default_cpu_fraction: f64,
    default_filename: &'static str,
}

impl LanguageSpec {
    /// Derive the filename the source should be written to inside the
    /// workspace. For class-bound languages (Java) this is lexical, not a
    /// parse: scan for the first public-class declaration and use its
    /// identifier; failing that, the first class declaration of any
    /// visibility; failing that, fall back to the fixed default. This
    /// mirrors the real javac/java invocation contract without embedding a
    /// parser.
    pub fn source_filename(&self, source: &str) -> String {
        match self.id {
            LanguageId::Java => format!("{}.java", java_public_class_name(source)),
            _ => self.default_filename.to_string(),
        }
    }

    /// Shell command run inside the container's working directory
    /// (`/app`) against the file produced by [`source_filename`]. For
    /// compiled languages this compiles then runs in one shell
    /// invocation — the supervisor only ever sees one process and one
    /// exit code.
    pub fn launch_cmd(&self, filename: &str) -> Vec<String> {
        let cmd = match self.id {
            LanguageId::Python => format!("python3 {filename}"),
            LanguageId::Javascript => format!("node {filename}"),
            LanguageId::Cpp => {
                format!("g++ -O2 -o /tmp/a.out {filename} && /tmp/a.out")
            }
            LanguageId::Java => {
                let class = filename.trim_end_matches(".java");
                format!("javac {filename} && java {class}")
            }
        };
        vec!["sh".to_string(), "-c".to_string(), cmd]
    }
}

/// First public-class identifier, else first class identifier of any
/// visibility, else the fixed default `"Main"`. The scan is purely lexical:
/// the first matching token is authoritative, even inside a comment or
/// string literal.
#[allow(clippy::unwrap_used)] // patterns are compile-time constants, never fail
fn java_public_class_name(source: &str) -> String {
    static PUBLIC_CLASS: Lazy<regex_lite::Regex> =
        Lazy::new(|| regex_lite::Regex::new(r"public\s+(?:final\s+|abstract\s+)?class\s+(\w+)").unwrap());
    static ANY_CLASS: Lazy<regex_lite::Regex> =
        Lazy::new(|| regex_lite::Regex::new(r"\bclass\s+(\w+)").unwrap());

    if let Some(caps) = PUBLIC_CLASS.captures(source) {
        return caps.get(1).map(|m| m.as_str()).unwrap_or("Main").to_string();
    }
    if let Some(caps) = ANY_CLASS.captures(source) {
        return caps.get(1).map(|m| m.as_str()).unwrap_or("Main").to_string();
    }
    "Main".to_string()
}

fn built_in_specs() -> HashMap<LanguageId, LanguageSpec> {
    let mut m = HashMap::new();
    m.insert(
        LanguageId::Python,
        LanguageSpec {
            id: LanguageId::Python,
            image: "python:3.9-alpine",
            supports_compile: false,
            compile_timeout_ms: 0,
            run_timeout_ms: 30_000,
            default_memory_bytes: 128 * 1024 * 1024,
            default_cpu_fraction: 0.5,
            default_filename: "main.py",
        },
    );
    m.insert(
        LanguageId::Javascript,
        LanguageSpec {
            id: LanguageId::Javascript,
            image: "node:16-alpine",
            supports_compile: false,
            compile_timeout_ms: 0,
            run_timeout_ms: 30_000,
            default_memory_bytes: 128 * 1024 * 1024,
            default_cpu_fraction: 0.5,
            default_filename: "main.js",
        },
    );
    m.insert(
        LanguageId::Cpp,
        LanguageSpec {
            id: LanguageId::Cpp,
            image: "gcc:9-alpine",
            supports_compile: true,
            compile_timeout_ms: 15_000,
            run_timeout_ms: 45_000,
            default_memory_bytes: 128 * 1024 * 1024,
            default_cpu_fraction: 0.5,
            default_filename: "main.cpp",
        },
    );
    m.insert(
        LanguageId::Java,
        LanguageSpec {
            id: LanguageId::Java,
            image: "openjdk:11-alpine",
            supports_compile: true,
            compile_timeout_ms: 15_000,
            run_timeout_ms: 45_000,
            default_memory_bytes: 256 * 1024 * 1024,
            default_cpu_fraction: 0.5,
            default_filename: "Main.java",
        },
    );
    m
}

/// Read-only table of [`LanguageSpec`]s, keyed by [`LanguageId`].
pub struct LanguageRegistry {
    specs: HashMap<LanguageId, LanguageSpec>,
}

impl LanguageRegistry {
    pub fn built_in() -> Self {
        Self {
            specs: built_in_specs(),
        }
    }

    pub fn lookup(&self, id: LanguageId) -> Option<&LanguageSpec> {
        self.specs.get(&id)
    }

    pub fn all(&self) -> impl Iterator<Item = &LanguageSpec> {
        self.specs.values()
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::built_in()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn lookup_returns_known_language() {
        let reg = LanguageRegistry::built_in();
        let spec = reg.lookup(LanguageId::Python).expect("python registered");
        assert_eq!(spec.image, "python:3.9-alpine");
        assert!(!spec.supports_compile);
    }

    #[test]
    fn java_filename_uses_public_class_name() {
        let reg = LanguageRegistry::built_in();
        let spec = reg.lookup(LanguageId::Java).unwrap();
        let src = "import java.util.*;\npublic class Solution {\n  public static void main(String[] a) {}\n}\n";
        assert_eq!(spec.source_filename(src), "Solution.java");
    }

    #[test]
    fn java_filename_falls_back_to_any_class() {
        let reg = LanguageRegistry::built_in();
        let spec = reg.lookup(LanguageId::Java).unwrap();
        let src = "class Helper {}\n";
        assert_eq!(spec.source_filename(src), "Helper.java");
    }

    #[test]
    fn java_filename_falls_back_to_default() {
        let reg = LanguageRegistry::built_in();
        let spec = reg.lookup(LanguageId::Java).unwrap();
        assert_eq!(spec.source_filename("System.out.println(1);"), "Main.java");
    }

    #[test]
    fn python_filename_is_fixed() {
        let reg = LanguageRegistry::built_in();
        let spec = reg.lookup(LanguageId::Python).unwrap();
        assert_eq!(spec.source_filename("print(1)"), "main.py");
    }

    #[test]
    fn java_launch_cmd_compiles_then_runs_resolved_class() {
        let reg = LanguageRegistry::built_in();
        let spec = reg.lookup(LanguageId::Java).unwrap();
        let cmd = spec.launch_cmd("Solution.java");
        assert_eq!(cmd, vec!["sh", "-c", "javac Solution.java && java Solution"]);
    }

    #[test]
    fn python_launch_cmd_runs_interpreter_directly() {
        let reg = LanguageRegistry::built_in();
        let spec = reg.lookup(LanguageId::Python).unwrap();
        let cmd = spec.launch_cmd("main.py");
        assert_eq!(cmd, vec!["sh", "-c", "python3 main.py"]);
    }
}
