//! Syntax-aware chunking via tree-sitter with a line-window fallback.
//!
//! Structured extraction emits top-level functions and classes; a class is
//! followed by its methods (and nested classes, recursively) with
//! `parent_symbol` set. Files without a grammar, or whose tree yields no
//! definitions, are split into fixed line windows.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use tree_sitter::{Node, Parser};

use crate::languages::{Lang, SyntaxRules};

/// Complexity assigned when no syntax tree is available to measure.
pub const NEUTRAL_COMPLEXITY: f32 = 0.5;

/// Kind of definition a chunk covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Function,
    Method,
    Class,
    Block,
}

impl ChunkType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::Block => "block",
        }
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One chunk of source code.
///
/// Lines are 0-based and inclusive; `content` is the covered lines verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeChunk {
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
    pub chunk_type: ChunkType,
    pub language: String,
    pub symbol_name: Option<String>,
    pub parent_symbol: Option<String>,
    pub complexity: f32,
    pub tokens_estimate: usize,
}

/// Chunker configuration.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Lines per block when falling back to windowing (default: 50).
    pub fallback_window_lines: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            fallback_window_lines: 50,
        }
    }
}

/// How chunks are found for one language, decided once at construction.
pub enum ExtractionStrategy {
    Structured {
        grammar: tree_sitter::Language,
        rules: &'static SyntaxRules,
    },
    Fallback,
}

pub struct Chunker {
    config: ChunkerConfig,
    strategies: HashMap<Lang, ExtractionStrategy>,
}

impl fmt::Debug for Chunker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut structured: Vec<&str> = self
            .strategies
            .iter()
            .filter(|(_, s)| matches!(s, ExtractionStrategy::Structured { .. }))
            .map(|(lang, _)| lang.id())
            .collect();
        structured.sort_unstable();
        f.debug_struct("Chunker")
            .field("config", &self.config)
            .field("structured", &structured)
            .finish()
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }
}

impl Chunker {
    #[must_use]
    pub fn new(config: ChunkerConfig) -> Self {
        let strategies = Lang::ALL
            .into_iter()
            .map(|lang| {
                let strategy = match (lang.grammar(), lang.syntax_rules()) {
                    (Some(grammar), Some(rules)) => {
                        ExtractionStrategy::Structured { grammar, rules }
                    }
                    _ => ExtractionStrategy::Fallback,
                };
                (lang, strategy)
            })
            .collect();
        Self { config, strategies }
    }

    /// Strategy selected for a language tag. Unknown tags use windowing.
    #[must_use]
    pub fn strategy_for(&self, language: &str) -> Option<&ExtractionStrategy> {
        Lang::from_tag(language).and_then(|lang| self.strategies.get(&lang))
    }

    /// Split `text` into chunks. Never fails: parse problems degrade to
    /// line windows. Empty input yields no chunks; whitespace-only input
    /// yields one block holding it verbatim.
    #[must_use]
    pub fn chunk(&self, text: &str, language: &str) -> Vec<CodeChunk> {
        if text.is_empty() {
            return Vec::new();
        }
        let lines = LineIndex::new(text);
        if text.trim().is_empty() {
            return vec![CodeChunk {
                content: text.to_owned(),
                start_line: 0,
                end_line: lines.len() - 1,
                chunk_type: ChunkType::Block,
                language: language.to_owned(),
                symbol_name: None,
                parent_symbol: None,
                complexity: NEUTRAL_COMPLEXITY,
                tokens_estimate: estimate_tokens(text),
            }];
        }

        if let Some(ExtractionStrategy::Structured { grammar, rules }) =
            self.strategy_for(language)
        {
            match extract_structured(text, language, grammar, rules, &lines) {
                Some(chunks) if !chunks.is_empty() => return chunks,
                Some(_) => debug!(language, "no definitions found, using line windows"),
                None => warn!(language, "parse failed, using line windows"),
            }
        }

        self.window_chunks(language, &lines)
    }

    fn window_chunks(&self, language: &str, lines: &LineIndex<'_>) -> Vec<CodeChunk> {
        let window = self.config.fallback_window_lines.max(1);
        let mut chunks = Vec::new();
        let mut start = 0;
        while start < lines.len() {
            let end = (start + window).min(lines.len()) - 1;
            let content = lines.slice(start, end);
            if !content.trim().is_empty() {
                chunks.push(CodeChunk {
                    content: content.to_owned(),
                    start_line: start,
                    end_line: end,
                    chunk_type: ChunkType::Block,
                    language: language.to_owned(),
                    symbol_name: None,
                    parent_symbol: None,
                    complexity: NEUTRAL_COMPLEXITY,
                    tokens_estimate: estimate_tokens(content),
                });
            }
            start += window;
        }
        chunks
    }
}

/// Cheap token estimate, strictly below the character count for any
/// non-empty text.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    let chars = text.chars().count();
    (chars / 4).max(1).min(chars.saturating_sub(1))
}

/// Byte offsets of line starts, for slicing whole lines out of the source.
struct LineIndex<'a> {
    text: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(text: &'a str) -> Self {
        let mut starts = vec![0];
        for (i, byte) in text.bytes().enumerate() {
            if byte == b'\n' && i + 1 < text.len() {
                starts.push(i + 1);
            }
        }
        Self { text, starts }
    }

    fn len(&self) -> usize {
        self.starts.len()
    }

    /// Lines `start..=end` without the final line terminator.
    fn slice(&self, start: usize, end: usize) -> &'a str {
        let from = self.starts[start];
        let to = match self.starts.get(end + 1) {
            Some(next) => next - 1,
            None => self.text.len() - usize::from(self.text.ends_with('\n')),
        };
        &self.text[from..to]
    }
}

struct Extraction<'a> {
    source: &'a str,
    language: &'a str,
    rules: &'static SyntaxRules,
    lines: &'a LineIndex<'a>,
    imports: usize,
    chunks: Vec<CodeChunk>,
}

fn extract_structured(
    source: &str,
    language: &str,
    grammar: &tree_sitter::Language,
    rules: &'static SyntaxRules,
    lines: &LineIndex<'_>,
) -> Option<Vec<CodeChunk>> {
    let mut parser = Parser::new();
    if let Err(e) = parser.set_language(grammar) {
        warn!(language, "set_language failed: {e}");
        return None;
    }
    let tree = parser.parse(source, None)?;
    let root = tree.root_node();

    let mut extraction = Extraction {
        source,
        language,
        rules,
        lines,
        imports: count_imports(&root, rules),
        chunks: Vec::new(),
    };
    extraction.collect(&root, None);
    Some(extraction.chunks)
}

impl Extraction<'_> {
    fn collect(&mut self, parent: &Node<'_>, scope: Option<&str>) {
        let child_count = u32::try_from(parent.named_child_count()).unwrap_or(u32::MAX);
        for i in 0..child_count {
            let Some(outer) = parent.named_child(i) else {
                continue;
            };
            let node = self.unwrap_wrapper(outer);
            let kind = node.kind();

            if self.rules.classes.contains(&kind) {
                let name = entity_name(&node, self.source);
                self.push(&outer, &node, ChunkType::Class, name.clone(), scope);
                if let Some(body) = node.child_by_field_name("body") {
                    let inner_scope = name.as_deref().or(scope);
                    self.collect(&body, inner_scope);
                }
            } else if self.rules.functions.contains(&kind) {
                let name = entity_name(&node, self.source);
                let receiver = (kind == "method_declaration")
                    .then(|| receiver_type(&node, self.source))
                    .flatten();
                match (receiver.as_deref(), scope) {
                    (Some(owner), _) | (None, Some(owner)) => {
                        self.push(&outer, &node, ChunkType::Method, name, Some(owner));
                    }
                    (None, None) => self.push(&outer, &node, ChunkType::Function, name, None),
                }
            } else if self.rules.containers.contains(&kind) {
                if let Some(body) = node.child_by_field_name("body") {
                    self.collect(&body, scope);
                }
            } else if scope.is_none()
                && self.rules.variables.contains(&kind)
                && let Some(name) = bound_function_name(&node, self.source)
            {
                self.push(&outer, &node, ChunkType::Function, Some(name), None);
            }
        }
    }

    fn unwrap_wrapper<'t>(&self, node: Node<'t>) -> Node<'t> {
        self.rules
            .wrappers
            .iter()
            .find(|(kind, _)| *kind == node.kind())
            .and_then(|(_, field)| node.child_by_field_name(field))
            .unwrap_or(node)
    }

    /// `outer` bounds the lines (so decorators and `export` stay attached);
    /// `node` is the definition itself.
    fn push(
        &mut self,
        outer: &Node<'_>,
        node: &Node<'_>,
        chunk_type: ChunkType,
        symbol_name: Option<String>,
        parent_symbol: Option<&str>,
    ) {
        let last = self.lines.len() - 1;
        let start = outer.start_position().row.min(last);
        let end_pos = outer.end_position();
        let mut end = end_pos.row;
        if end_pos.column == 0 && end > start {
            end -= 1;
        }
        let end = end.clamp(start, last);

        let content = self.lines.slice(start, end);
        let mut stats = NodeStats::default();
        measure(node, self.rules, 0, &mut stats);

        self.chunks.push(CodeChunk {
            content: content.to_owned(),
            start_line: start,
            end_line: end,
            chunk_type,
            language: self.language.to_owned(),
            symbol_name,
            parent_symbol: parent_symbol.map(str::to_owned),
            complexity: score_complexity(
                end - start + 1,
                stats.max_depth,
                stats.branches,
                self.imports,
            ),
            tokens_estimate: estimate_tokens(content),
        });
    }
}

fn entity_name(node: &Node<'_>, source: &str) -> Option<String> {
    // impl_item names its subject with a "type" field; Go type_declaration
    // keeps the name on its type_spec child.
    if let Some(name) = node
        .child_by_field_name("name")
        .or_else(|| node.child_by_field_name("type"))
    {
        return Some(source[name.byte_range()].to_string());
    }
    let child_count = u32::try_from(node.named_child_count()).unwrap_or(u32::MAX);
    (0..child_count)
        .filter_map(|i| node.named_child(i))
        .find_map(|child| child.child_by_field_name("name"))
        .map(|name| source[name.byte_range()].to_string())
}

/// Type a Go method is declared on: `(s *Server[T])` -> `Server`.
fn receiver_type(node: &Node<'_>, source: &str) -> Option<String> {
    let receiver = node.child_by_field_name("receiver")?;
    let text = source[receiver.byte_range()]
        .trim_matches(|c| c == '(' || c == ')')
        .trim();
    let ty = text.split_whitespace().last()?.trim_start_matches('*');
    let ty = ty.split('[').next().unwrap_or(ty);
    (!ty.is_empty()).then(|| ty.to_owned())
}

/// Name bound by `const f = () => ...` style declarations.
fn bound_function_name(node: &Node<'_>, source: &str) -> Option<String> {
    let child_count = u32::try_from(node.named_child_count()).unwrap_or(u32::MAX);
    (0..child_count)
        .filter_map(|i| node.named_child(i))
        .filter(|child| child.kind() == "variable_declarator")
        .find_map(|declarator| {
            let value = declarator.child_by_field_name("value")?;
            if !matches!(
                value.kind(),
                "arrow_function" | "function_expression" | "function"
            ) {
                return None;
            }
            let name = declarator.child_by_field_name("name")?;
            Some(source[name.byte_range()].to_string())
        })
}

fn count_imports(root: &Node<'_>, rules: &SyntaxRules) -> usize {
    let child_count = u32::try_from(root.named_child_count()).unwrap_or(u32::MAX);
    (0..child_count)
        .filter_map(|i| root.named_child(i))
        .filter(|child| rules.imports.contains(&child.kind()))
        .count()
}

#[derive(Default)]
struct NodeStats {
    branches: usize,
    max_depth: usize,
}

fn measure(node: &Node<'_>, rules: &SyntaxRules, depth: usize, stats: &mut NodeStats) {
    let child_count = u32::try_from(node.named_child_count()).unwrap_or(u32::MAX);
    for i in 0..child_count {
        let Some(child) = node.named_child(i) else {
            continue;
        };
        let kind = child.kind();
        if rules.branches.contains(&kind) {
            stats.branches += 1;
        }
        let depth = if rules.nesting.contains(&kind) {
            depth + 1
        } else {
            depth
        };
        stats.max_depth = stats.max_depth.max(depth);
        measure(&child, rules, depth, stats);
    }
}

/// Weighted blend of size, nesting, branching and imports, each saturating
/// at a cap. The definition's own body counts as the first nesting level.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn score_complexity(
    lines: usize,
    max_depth: usize,
    branches: usize,
    imports: usize,
) -> f32 {
    let ratio = |value: usize, cap: usize| value.min(cap) as f32 / cap as f32;
    let score = 0.25 * ratio(lines, 100)
        + 0.30 * ratio(max_depth.saturating_sub(1), 6)
        + 0.30 * ratio(branches, 15)
        + 0.15 * ratio(imports, 20);
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn symbols(chunks: &[CodeChunk]) -> Vec<(ChunkType, Option<&str>, Option<&str>)> {
        chunks
            .iter()
            .map(|c| {
                (
                    c.chunk_type,
                    c.symbol_name.as_deref(),
                    c.parent_symbol.as_deref(),
                )
            })
            .collect()
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(Chunker::default().chunk("", "python").is_empty());
    }

    #[test]
    fn whitespace_only_text_is_one_block() {
        let text = "   \n\n\t\n";
        let chunks = Chunker::default().chunk(text, "python");
        assert_eq!(chunks.len(), 1);
        let block = &chunks[0];
        assert_eq!(block.chunk_type, ChunkType::Block);
        assert_eq!(block.content, text);
        assert_eq!((block.start_line, block.end_line), (0, 2));
        assert!(block.tokens_estimate < text.chars().count());
    }

    #[cfg(feature = "lang-python")]
    #[test]
    fn python_three_functions_in_source_order() {
        let source = "def a():\n    return 1\n\n\ndef b(x):\n    if x:\n        return 2\n    return 3\n\n\ndef c():\n    pass\n";
        let chunks = Chunker::default().chunk(source, "python");
        assert_eq!(
            symbols(&chunks),
            vec![
                (ChunkType::Function, Some("a"), None),
                (ChunkType::Function, Some("b"), None),
                (ChunkType::Function, Some("c"), None),
            ]
        );
        assert_eq!((chunks[0].start_line, chunks[0].end_line), (0, 1));
        assert_eq!((chunks[1].start_line, chunks[1].end_line), (4, 7));
        assert_eq!(chunks[2].content, "def c():\n    pass");
        assert!(chunks.iter().all(|c| c.language == "python"));
    }

    #[cfg(feature = "lang-python")]
    #[test]
    fn python_class_methods_and_nested_class() {
        let source = "class Outer:\n    def method(self):\n        return 1\n\n    class Inner:\n        def deep(self):\n            pass\n";
        let chunks = Chunker::default().chunk(source, "python");
        assert_eq!(
            symbols(&chunks),
            vec![
                (ChunkType::Class, Some("Outer"), None),
                (ChunkType::Method, Some("method"), Some("Outer")),
                (ChunkType::Class, Some("Inner"), Some("Outer")),
                (ChunkType::Method, Some("deep"), Some("Inner")),
            ]
        );
        assert_eq!(chunks[0].end_line, 6);
    }

    #[cfg(feature = "lang-python")]
    #[test]
    fn python_decorator_stays_with_function() {
        let source = "import functools\n\n@functools.cache\ndef cached():\n    return 1\n";
        let chunks = Chunker::default().chunk(source, "python");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].symbol_name.as_deref(), Some("cached"));
        assert_eq!(chunks[0].start_line, 2);
        assert!(chunks[0].content.starts_with("@functools.cache"));
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn rust_impl_methods_have_parent() {
        let source = "struct Foo;\n\nimpl Foo {\n    fn bar(&self) -> i32 {\n        42\n    }\n}\n\nfn free() {}\n";
        let chunks = Chunker::default().chunk(source, "rust");
        assert_eq!(
            symbols(&chunks),
            vec![
                (ChunkType::Class, Some("Foo"), None),
                (ChunkType::Class, Some("Foo"), None),
                (ChunkType::Method, Some("bar"), Some("Foo")),
                (ChunkType::Function, Some("free"), None),
            ]
        );
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn rust_mod_contents_are_top_level() {
        let source = "mod inner {\n    pub fn helper() {}\n}\n";
        let chunks = Chunker::default().chunk(source, "rust");
        assert_eq!(
            symbols(&chunks),
            vec![(ChunkType::Function, Some("helper"), None)]
        );
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn rust_without_definitions_falls_back_to_blocks() {
        let source = "use std::io;\nuse std::path::Path;\n";
        let chunks = Chunker::default().chunk(source, "rust");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_type, ChunkType::Block);
        assert!((chunks[0].complexity - NEUTRAL_COMPLEXITY).abs() < f32::EPSILON);
    }

    #[cfg(feature = "lang-go")]
    #[test]
    fn go_method_uses_receiver_as_parent() {
        let source = "package main\n\ntype Server struct{}\n\nfunc (s *Server) Start() error {\n\treturn nil\n}\n\nfunc main() {}\n";
        let chunks = Chunker::default().chunk(source, "go");
        assert_eq!(
            symbols(&chunks),
            vec![
                (ChunkType::Class, Some("Server"), None),
                (ChunkType::Method, Some("Start"), Some("Server")),
                (ChunkType::Function, Some("main"), None),
            ]
        );
    }

    #[cfg(feature = "lang-js")]
    #[test]
    fn javascript_exports_arrows_and_classes() {
        let source = "export function login(user) {\n  return true;\n}\n\nconst logout = () => {\n  return false;\n};\n\nclass Session {\n  refresh() {\n    return 1;\n  }\n}\n";
        let chunks = Chunker::default().chunk(source, "javascript");
        assert_eq!(
            symbols(&chunks),
            vec![
                (ChunkType::Function, Some("login"), None),
                (ChunkType::Function, Some("logout"), None),
                (ChunkType::Class, Some("Session"), None),
                (ChunkType::Method, Some("refresh"), Some("Session")),
            ]
        );
        assert!(chunks[0].content.starts_with("export function login"));
    }

    #[test]
    fn unknown_language_uses_line_windows() {
        let chunker = Chunker::new(ChunkerConfig {
            fallback_window_lines: 2,
        });
        let chunks = chunker.chunk("one\ntwo\nthree\n", "cobol");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, "one\ntwo");
        assert_eq!((chunks[1].start_line, chunks[1].end_line), (2, 2));
        assert!(chunks.iter().all(|c| c.chunk_type == ChunkType::Block));
    }

    #[test]
    fn blank_windows_are_skipped() {
        let chunker = Chunker::new(ChunkerConfig {
            fallback_window_lines: 2,
        });
        let chunks = chunker.chunk("a\nb\n\n\nc", "text");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].content, "c");
        assert_eq!(chunks[1].start_line, 4);
    }

    #[test]
    fn strategy_selected_per_language() {
        let chunker = Chunker::default();
        assert!(chunker.strategy_for("cobol").is_none());
        assert!(matches!(
            chunker.strategy_for("toml"),
            Some(ExtractionStrategy::Fallback) | None
        ));
        #[cfg(feature = "lang-rust")]
        assert!(matches!(
            chunker.strategy_for("rust"),
            Some(ExtractionStrategy::Structured { .. })
        ));
    }

    #[test]
    fn estimate_tokens_below_char_count() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("x"), 0);
        assert_eq!(estimate_tokens("abcde"), 1);
        assert_eq!(estimate_tokens(&"a".repeat(400)), 100);
    }

    #[test]
    fn complexity_is_bounded() {
        assert!(score_complexity(0, 0, 0, 0).abs() < f32::EPSILON);
        assert!((score_complexity(10_000, 100, 100, 100) - 1.0).abs() < 1e-6);
        let mid = score_complexity(50, 3, 5, 2);
        assert!(mid > 0.0 && mid < 1.0);
    }

    #[cfg(feature = "lang-python")]
    #[test]
    fn branching_raises_complexity() {
        let chunker = Chunker::default();
        let flat = chunker.chunk("def f():\n    return 1\n", "python");
        let branchy = chunker.chunk(
            "def f(x):\n    if x:\n        for i in x:\n            if i:\n                return i\n    return 0\n",
            "python",
        );
        assert!(branchy[0].complexity > flat[0].complexity);
    }

    proptest! {
        #[test]
        fn chunks_reproduce_their_lines(
            lines in prop::collection::vec("[a-z():= {}]{0,16}", 1..60),
            language in prop::sample::select(vec!["python", "rust", "javascript", "text"]),
        ) {
            let text = lines.join("\n");
            let chunker = Chunker::new(ChunkerConfig { fallback_window_lines: 7 });
            let source_lines: Vec<&str> = text.split('\n').collect();
            let chunks = chunker.chunk(&text, language);
            if !text.is_empty() && text.trim().is_empty() {
                prop_assert_eq!(chunks.len(), 1);
                prop_assert_eq!(&chunks[0].content, &text);
                return Ok(());
            }
            for chunk in chunks {
                prop_assert!(chunk.end_line >= chunk.start_line);
                prop_assert!(chunk.end_line < source_lines.len());
                let expected = source_lines[chunk.start_line..=chunk.end_line].join("\n");
                prop_assert_eq!(&chunk.content, &expected);
                prop_assert!(chunk.tokens_estimate < chunk.content.chars().count());
                prop_assert!((0.0..=1.0).contains(&chunk.complexity));
            }
        }

        #[test]
        fn non_blank_text_always_chunks(body in "[a-z]{1,12}( [a-z]{1,12}){0,5}") {
            let chunks = Chunker::default().chunk(&body, "python");
            prop_assert!(!chunks.is_empty());
        }
    }
}
