//! Language detection and the default file allow-list.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Extensions indexed when the configuration does not override them.
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "jsx", "tsx", "java", "kt", "go", "rs", "c", "cpp", "h", "rb", "php",
    "swift", "scala", "sql", "graphql", "yaml", "yml", "json", "toml", "md", "rst", "txt",
];

/// Directories never descended into.
pub const DEFAULT_SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "__pycache__",
    ".venv",
    "venv",
    "dist",
    "build",
    ".next",
    "target",
];

/// Languages with a stable identifier. Anything else is tagged by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Go,
    Java,
    Kotlin,
    C,
    Cpp,
    Ruby,
    Php,
    Swift,
    Scala,
    Sql,
    GraphQl,
    Bash,
    Yaml,
    Toml,
    Json,
    Markdown,
    ReStructuredText,
    Text,
}

impl Lang {
    /// Identifier stored in chunk metadata.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Go => "go",
            Self::Java => "java",
            Self::Kotlin => "kotlin",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::Ruby => "ruby",
            Self::Php => "php",
            Self::Swift => "swift",
            Self::Scala => "scala",
            Self::Sql => "sql",
            Self::GraphQl => "graphql",
            Self::Bash => "bash",
            Self::Yaml => "yaml",
            Self::Toml => "toml",
            Self::Json => "json",
            Self::Markdown => "markdown",
            Self::ReStructuredText => "rst",
            Self::Text => "text",
        }
    }

    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        let lang = match ext.to_ascii_lowercase().as_str() {
            "rs" => Self::Rust,
            "py" | "pyi" => Self::Python,
            "js" | "jsx" | "mjs" | "cjs" => Self::JavaScript,
            "ts" | "tsx" | "mts" | "cts" => Self::TypeScript,
            "go" => Self::Go,
            "java" => Self::Java,
            "kt" | "kts" => Self::Kotlin,
            "c" | "h" => Self::C,
            "cpp" | "cc" | "cxx" | "hpp" | "hh" => Self::Cpp,
            "rb" => Self::Ruby,
            "php" => Self::Php,
            "swift" => Self::Swift,
            "scala" | "sc" => Self::Scala,
            "sql" => Self::Sql,
            "graphql" | "gql" => Self::GraphQl,
            "sh" | "bash" | "zsh" => Self::Bash,
            "yaml" | "yml" => Self::Yaml,
            "toml" => Self::Toml,
            "json" | "jsonc" => Self::Json,
            "md" | "markdown" => Self::Markdown,
            "rst" => Self::ReStructuredText,
            "txt" => Self::Text,
            _ => return None,
        };
        Some(lang)
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Language tag for a file: the known language id, else the lower-cased extension, else `text`.
#[must_use]
pub fn language_tag(path: &Path) -> String {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return Lang::Text.id().to_owned();
    };
    Lang::from_extension(ext).map_or_else(|| ext.to_ascii_lowercase(), |l| l.id().to_owned())
}

/// Normalise a configured extension: lower-case, without the leading dot.
#[must_use]
pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}
