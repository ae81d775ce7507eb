//! Language detection and tree-sitter grammar loading

use std::path::Path;
use tree_sitter::Language;

/// Languages the graph builder parses
///
/// JSON and Markdown files are deliberately excluded from the graph: they
/// produce no symbols and would only dilute lexical scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lang {
    TypeScript,
    Tsx,
    JavaScript,
    Jsx,
    Python,
}

impl Lang {
    /// Detect language from a file path extension, `None` for unsupported files
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension().and_then(|e| e.to_str())?;
        Self::from_extension(ext)
    }

    /// Detect language from an extension string
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "ts" | "mts" | "cts" => Some(Self::TypeScript),
            "tsx" => Some(Self::Tsx),
            "js" | "mjs" | "cjs" => Some(Self::JavaScript),
            "jsx" => Some(Self::Jsx),
            "py" | "pyi" => Some(Self::Python),
            _ => None,
        }
    }

    /// Canonical language name
    pub fn name(&self) -> &'static str {
        match self {
            Self::TypeScript => "typescript",
            Self::Tsx => "tsx",
            Self::JavaScript => "javascript",
            Self::Jsx => "jsx",
            Self::Python => "python",
        }
    }

    /// Extension candidates probed when resolving a relative import
    /// that omits its extension (`./auth` -> `./auth.ts`, `./auth/index.ts`, ...)
    pub fn import_extension_candidates() -> &'static [&'static str] {
        &["ts", "tsx", "js", "jsx", "py"]
    }

    /// Get the tree-sitter Language for parsing
    pub fn tree_sitter_language(&self) -> Language {
        match self {
            Self::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Self::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Self::JavaScript | Self::Jsx => tree_sitter_javascript::LANGUAGE.into(),
            Self::Python => tree_sitter_python::LANGUAGE.into(),
        }
    }

    /// Whether this language uses the JS/TS extraction rules
    pub fn is_javascript_family(&self) -> bool {
        matches!(
            self,
            Self::TypeScript | Self::Tsx | Self::JavaScript | Self::Jsx
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_extension() {
        assert_eq!(Lang::from_extension("ts"), Some(Lang::TypeScript));
        assert_eq!(Lang::from_extension("tsx"), Some(Lang::Tsx));
        assert_eq!(Lang::from_extension("jsx"), Some(Lang::Jsx));
        assert_eq!(Lang::from_extension("py"), Some(Lang::Python));
        assert_eq!(Lang::from_extension("json"), None);
        assert_eq!(Lang::from_extension("md"), None);
    }

    #[test]
    fn test_from_path() {
        assert_eq!(Lang::from_path(Path::new("src/auth.ts")), Some(Lang::TypeScript));
        assert_eq!(Lang::from_path(Path::new("README")), None);
    }
}
