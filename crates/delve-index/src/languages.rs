//! Language detection, tree-sitter grammar registry, and per-language
//! extraction rules.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Supported language with its tree-sitter grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Go,
    Bash,
    Toml,
    Json,
    Markdown,
}

/// Node kinds the chunker looks for in a syntax tree.
///
/// `wrappers` are nodes that carry a declaration in a field (decorators,
/// `export`), `containers` are scopes whose children are treated as top
/// level (Rust `mod`), and `variables` are declarations that may bind an
/// arrow function or function expression.
#[derive(Debug)]
pub struct SyntaxRules {
    pub functions: &'static [&'static str],
    pub classes: &'static [&'static str],
    pub wrappers: &'static [(&'static str, &'static str)],
    pub containers: &'static [&'static str],
    pub variables: &'static [&'static str],
    pub branches: &'static [&'static str],
    pub nesting: &'static [&'static str],
    pub imports: &'static [&'static str],
}

static RUST_RULES: SyntaxRules = SyntaxRules {
    functions: &["function_item"],
    classes: &[
        "impl_item",
        "trait_item",
        "struct_item",
        "enum_item",
        "union_item",
    ],
    wrappers: &[],
    containers: &["mod_item"],
    variables: &[],
    branches: &[
        "if_expression",
        "match_arm",
        "for_expression",
        "while_expression",
        "loop_expression",
        "try_expression",
    ],
    nesting: &["block", "match_block", "closure_expression"],
    imports: &["use_declaration", "extern_crate_declaration"],
};

static PYTHON_RULES: SyntaxRules = SyntaxRules {
    functions: &["function_definition"],
    classes: &["class_definition"],
    wrappers: &[("decorated_definition", "definition")],
    containers: &[],
    variables: &[],
    branches: &[
        "if_statement",
        "elif_clause",
        "for_statement",
        "while_statement",
        "except_clause",
        "conditional_expression",
        "boolean_operator",
    ],
    nesting: &["block"],
    imports: &["import_statement", "import_from_statement"],
};

static SCRIPT_RULES: SyntaxRules = SyntaxRules {
    functions: &[
        "function_declaration",
        "generator_function_declaration",
        "method_definition",
    ],
    classes: &[
        "class_declaration",
        "abstract_class_declaration",
        "interface_declaration",
    ],
    wrappers: &[("export_statement", "declaration")],
    containers: &[],
    variables: &["lexical_declaration", "variable_declaration"],
    branches: &[
        "if_statement",
        "for_statement",
        "for_in_statement",
        "while_statement",
        "do_statement",
        "switch_case",
        "catch_clause",
        "ternary_expression",
    ],
    nesting: &["statement_block", "arrow_function", "function_expression"],
    imports: &["import_statement"],
};

static GO_RULES: SyntaxRules = SyntaxRules {
    functions: &["function_declaration", "method_declaration"],
    classes: &["type_declaration"],
    wrappers: &[],
    containers: &[],
    variables: &[],
    branches: &[
        "if_statement",
        "for_statement",
        "expression_case",
        "type_case",
        "communication_case",
    ],
    nesting: &["block", "func_literal"],
    imports: &["import_declaration"],
};

impl Lang {
    pub const ALL: [Self; 9] = [
        Self::Rust,
        Self::Python,
        Self::JavaScript,
        Self::TypeScript,
        Self::Go,
        Self::Bash,
        Self::Toml,
        Self::Json,
        Self::Markdown,
    ];

    /// Identifier used in point payloads, filters and config.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Go => "go",
            Self::Bash => "bash",
            Self::Toml => "toml",
            Self::Json => "json",
            Self::Markdown => "markdown",
        }
    }

    /// Parse a language tag, accepting common short aliases.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "rust" | "rs" => Some(Self::Rust),
            "python" | "py" => Some(Self::Python),
            "javascript" | "js" | "jsx" => Some(Self::JavaScript),
            "typescript" | "ts" | "tsx" => Some(Self::TypeScript),
            "go" | "golang" => Some(Self::Go),
            "bash" | "sh" | "shell" => Some(Self::Bash),
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            "markdown" | "md" => Some(Self::Markdown),
            _ => None,
        }
    }

    /// Get the tree-sitter grammar. Returns `None` if the
    /// corresponding feature is not enabled.
    #[must_use]
    pub fn grammar(self) -> Option<tree_sitter::Language> {
        match self {
            #[cfg(feature = "lang-rust")]
            Self::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            #[cfg(feature = "lang-python")]
            Self::Python => Some(tree_sitter_python::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            #[cfg(feature = "lang-go")]
            Self::Go => Some(tree_sitter_go::LANGUAGE.into()),
            #[cfg(feature = "lang-config")]
            Self::Bash => Some(tree_sitter_bash::LANGUAGE.into()),
            #[cfg(feature = "lang-config")]
            Self::Toml => Some(tree_sitter_toml_ng::LANGUAGE.into()),
            #[cfg(feature = "lang-config")]
            Self::Json => Some(tree_sitter_json::LANGUAGE.into()),
            #[cfg(feature = "lang-config")]
            Self::Markdown => Some(tree_sitter_md::LANGUAGE.into()),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// Extraction rules for languages with structural chunking. Config and
    /// markup languages have none and are split into line windows.
    #[must_use]
    pub fn syntax_rules(self) -> Option<&'static SyntaxRules> {
        match self {
            Self::Rust => Some(&RUST_RULES),
            Self::Python => Some(&PYTHON_RULES),
            Self::JavaScript | Self::TypeScript => Some(&SCRIPT_RULES),
            Self::Go => Some(&GO_RULES),
            Self::Bash | Self::Toml | Self::Json | Self::Markdown => None,
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Detect language from file extension.
#[must_use]
pub fn detect_language(path: &Path) -> Option<Lang> {
    let ext = path.extension()?.to_str()?;
    match ext {
        "rs" => Some(Lang::Rust),
        "py" | "pyi" => Some(Lang::Python),
        "js" | "jsx" | "mjs" | "cjs" => Some(Lang::JavaScript),
        "ts" | "tsx" | "mts" | "cts" => Some(Lang::TypeScript),
        "go" => Some(Lang::Go),
        "sh" | "bash" | "zsh" => Some(Lang::Bash),
        "toml" => Some(Lang::Toml),
        "json" | "jsonc" => Some(Lang::Json),
        "md" | "markdown" => Some(Lang::Markdown),
        _ => None,
    }
}

/// Language tag stored with a file's chunks. Unknown extensions keep their
/// extension as the tag so they stay filterable; files without one are `text`.
#[must_use]
pub fn language_tag(path: &Path) -> String {
    if let Some(lang) = detect_language(path) {
        return lang.id().to_owned();
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map_or_else(|| "text".to_owned(), str::to_ascii_lowercase)
}
