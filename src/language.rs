use camino::Utf8Path;
use tree_sitter::Language;
use tree_sitter_language::LanguageFn;

/// Languages the token engine can parse structurally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LangId {
    Rust,
    C,
    Cpp,
    Python,
    Javascript,
    Typescript,
    Tsx,
    Go,
    Java,
}

impl std::fmt::Display for LangId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Rust => "rust",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::Python => "python",
            Self::Javascript => "javascript",
            Self::Typescript => "typescript",
            Self::Tsx => "tsx",
            Self::Go => "go",
            Self::Java => "java",
        };
        write!(f, "{s}")
    }
}

impl LangId {
    pub const ALL: [LangId; 9] = [
        Self::Rust,
        Self::C,
        Self::Cpp,
        Self::Python,
        Self::Javascript,
        Self::Typescript,
        Self::Tsx,
        Self::Go,
        Self::Java,
    ];

    /// Detect language from file extension.
    pub fn from_path(path: &Utf8Path) -> Option<Self> {
        let ext = path.extension().unwrap_or("").to_lowercase();

        match ext.as_str() {
            "rs" => Some(Self::Rust),
            "c" | "h" => Some(Self::C),
            "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" => Some(Self::Cpp),
            "py" | "pyi" => Some(Self::Python),
            "js" | "mjs" | "cjs" | "jsx" => Some(Self::Javascript),
            "ts" | "mts" | "cts" => Some(Self::Typescript),
            "tsx" => Some(Self::Tsx),
            "go" => Some(Self::Go),
            "java" => Some(Self::Java),
            _ => None,
        }
    }

    /// Detect language from shebang line.
    pub fn from_shebang(first_line: &str) -> Option<Self> {
        if !first_line.starts_with("#!") {
            return None;
        }
        let line = first_line.to_lowercase();
        if line.contains("python") {
            Some(Self::Python)
        } else if line.contains("node") || line.contains("deno") || line.contains("bun") {
            Some(Self::Javascript)
        } else {
            None
        }
    }

    /// Detect from the extension, falling back to the shebang of `source`.
    pub fn detect(path: &Utf8Path, source: &[u8]) -> Option<Self> {
        Self::from_path(path).or_else(|| {
            let first_line = std::str::from_utf8(source)
                .ok()
                .and_then(|s| s.lines().next())
                .unwrap_or("");
            Self::from_shebang(first_line)
        })
    }

    fn language_fn(self) -> LanguageFn {
        match self {
            Self::Rust => tree_sitter_rust::LANGUAGE,
            Self::C => tree_sitter_c::LANGUAGE,
            Self::Cpp => tree_sitter_cpp::LANGUAGE,
            Self::Python => tree_sitter_python::LANGUAGE,
            Self::Javascript => tree_sitter_javascript::LANGUAGE,
            Self::Typescript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT,
            Self::Tsx => tree_sitter_typescript::LANGUAGE_TSX,
            Self::Go => tree_sitter_go::LANGUAGE,
            Self::Java => tree_sitter_java::LANGUAGE,
        }
    }

    /// Get the tree-sitter Language for this language ID.
    pub fn ts_language(self) -> Language {
        Language::new(self.language_fn())
    }
}
