//! Top-level symbol extraction over a small set of known languages.
//!
//! One regex table per extension family; matches are taken line by line,
//! so only declarations at (or near) the top level are found. That is the
//! point: the map orients the model, it is not an index.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Extensions considered for the symbol map.
pub const MAP_EXTENSIONS: &[&str] = &[
    "rs", "go", "py", "js", "ts", "tsx", "java", "c", "h", "cpp", "hpp", "rb",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    /// Workspace-relative path.
    pub file: String,
    /// 1-based line number.
    pub line: usize,
    pub name: String,
}

struct LangRules {
    extensions: &'static [&'static str],
    patterns: Vec<Regex>,
}

static RULES: Lazy<Vec<LangRules>> = Lazy::new(|| {
    let rx = |s: &str| Regex::new(s).expect("static symbol pattern");
    vec![
        LangRules {
            extensions: &["rs"],
            patterns: vec![
                rx(r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?fn\s+([A-Za-z_]\w*)"),
                rx(r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:struct|enum|trait)\s+([A-Za-z_]\w*)"),
            ],
        },
        LangRules {
            extensions: &["go"],
            patterns: vec![
                rx(r"^func\s+(?:\([^)]*\)\s*)?([A-Za-z_]\w*)"),
                rx(r"^type\s+([A-Za-z_]\w*)"),
            ],
        },
        LangRules {
            extensions: &["py"],
            patterns: vec![rx(r"^(?:def|class)\s+([A-Za-z_]\w*)")],
        },
        LangRules {
            extensions: &["js", "ts", "tsx"],
            patterns: vec![
                rx(r"^(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)"),
                rx(r"^(?:export\s+)?(?:abstract\s+)?class\s+([A-Za-z_$][\w$]*)"),
                rx(r"^(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*="),
            ],
        },
        LangRules {
            extensions: &["java"],
            patterns: vec![rx(
                r"^\s*(?:public\s+|protected\s+|private\s+)?(?:static\s+)?(?:final\s+)?(?:class|interface|enum)\s+([A-Za-z_]\w*)",
            )],
        },
        LangRules {
            extensions: &["c", "h", "cpp", "hpp"],
            patterns: vec![
                rx(r"^(?:typedef\s+)?(?:struct|enum|union)\s+([A-Za-z_]\w*)"),
                rx(r"^[A-Za-z_][\w\s\*&:<>,]*?\b([A-Za-z_]\w*)\s*\([^;]*\)?\s*\{?\s*$"),
            ],
        },
        LangRules {
            extensions: &["rb"],
            patterns: vec![rx(r"^\s*(?:def|class|module)\s+([A-Za-z_]\w*[?!]?)")],
        },
    ]
});

fn rules_for(path: &Path) -> Option<&'static LangRules> {
    let ext = path.extension()?.to_str()?;
    RULES.iter().find(|r| r.extensions.contains(&ext))
}

/// Extract symbols from one file's content. The relative path is recorded
/// on each symbol.
pub fn extract_from(rel_path: &Path, content: &str) -> Vec<Symbol> {
    let Some(rules) = rules_for(rel_path) else {
        return Vec::new();
    };
    let file = rel_path.to_string_lossy().replace('\\', "/");

    let mut out = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        for pattern in &rules.patterns {
            if let Some(caps) = pattern.captures(line) {
                if let Some(name) = caps.get(1) {
                    out.push(Symbol {
                        file: file.clone(),
                        line: idx + 1,
                        name: name.as_str().to_string(),
                    });
                    break;
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn rust_symbols() {
        let src = "pub struct Foo;\n\nimpl Foo {}\n\npub async fn run() {}\nfn helper() {}\n";
        let syms = extract_from(&PathBuf::from("src/lib.rs"), src);
        let names: Vec<&str> = syms.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Foo", "run", "helper"]);
        assert_eq!(syms[0].line, 1);
        assert_eq!(syms[1].line, 5);
    }

    #[test]
    fn python_top_level_only() {
        let src = "class A:\n    def method(self):\n        pass\n\ndef top():\n    pass\n";
        let syms = extract_from(&PathBuf::from("m.py"), src);
        let names: Vec<&str> = syms.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["A", "top"]);
    }

    #[test]
    fn typescript_exports() {
        let src = "export function go() {}\nexport const LIMIT = 3\nclass Widget {}\n";
        let syms = extract_from(&PathBuf::from("app.ts"), src);
        let names: Vec<&str> = syms.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["go", "LIMIT", "Widget"]);
    }

    #[test]
    fn unknown_extension_yields_nothing() {
        assert!(extract_from(&PathBuf::from("notes.md"), "# hi\n").is_empty());
    }

    #[test]
    fn go_methods_and_types() {
        let src = "func main() {}\nfunc (s *Server) Serve() {}\ntype Server struct {}\n";
        let syms = extract_from(&PathBuf::from("main.go"), src);
        let names: Vec<&str> = syms.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["main", "Serve", "Server"]);
    }
}
