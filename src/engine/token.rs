use anyhow::{Context, Result, bail};
use camino::Utf8Path;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use tree_sitter::{Parser, Tree};

use super::SimilarityEngine;
use super::reference::jaccard;
use crate::error::AnalysisError;
use crate::language::LangId;
use crate::models::similarity::FileSimilarity;
use crate::source;

pub const NAME: &str = "token";

pub(crate) fn default_min_tokens() -> usize {
    5
}

pub(crate) fn default_window() -> usize {
    4
}

const WORD_PATTERN: &str = r"\w+|[^\w\s]";

/// Structural fingerprinting engine.
///
/// Files are reduced to their token kinds with tree-sitter (so renaming
/// identifiers or editing comments does not change the score), fingerprinted
/// as hashed k-grams, winnowed, and compared by Jaccard index. Files in
/// languages without a grammar fall back to word tokens.
#[derive(Debug, Clone)]
pub struct TokenEngine {
    min_tokens: usize,
    window: usize,
    words: Regex,
}

impl TokenEngine {
    pub fn new(min_tokens: usize, window: usize) -> Result<Self> {
        if min_tokens == 0 || window == 0 {
            bail!(AnalysisError::config(format!(
                "Token engine needs min_tokens >= 1 and window >= 1 (got {min_tokens}, {window})"
            )));
        }
        let words = Regex::new(WORD_PATTERN).context("Failed to compile word pattern")?;
        Ok(Self {
            min_tokens,
            window,
            words,
        })
    }

    /// Winnowed fingerprints of one file.
    pub fn fingerprints(&self, relpath: &str, source: &[u8]) -> HashSet<u64> {
        let tokens = tokenize(relpath, source, &self.words);
        let kgrams = kgram_hashes(&tokens, self.min_tokens);
        winnow(&kgrams, self.window)
    }
}

impl SimilarityEngine for TokenEngine {
    fn name(&self) -> &str {
        NAME
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn compute_file_similarity(
        &self,
        paths: [&Path; 2],
        relpath: &str,
        original: Option<&str>,
    ) -> Result<FileSimilarity> {
        let a = source::read_file(paths[0]).map_err(|e| AnalysisError::engine(NAME, e))?;
        let b = source::read_file(paths[1]).map_err(|e| AnalysisError::engine(NAME, e))?;

        let score = if a.as_bytes() == b.as_bytes() {
            1.0
        } else {
            jaccard(&self.fingerprints(relpath, &a), &self.fingerprints(relpath, &b))
        };

        Ok(FileSimilarity::new(relpath, NAME, self.version(), score).with_original(original))
    }
}

fn token_hash(token: &str) -> u64 {
    let digest = blake3::hash(token.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

/// Token hashes for `source`, structural when a grammar is available.
pub fn tokenize(relpath: &str, source: &[u8], words: &Regex) -> Vec<u64> {
    let structural = LangId::detect(Utf8Path::new(relpath), source)
        .and_then(|lang| parse_source(source, lang).ok())
        .map(|tree| leaf_kinds(&tree));

    match structural {
        Some(tokens) => tokens,
        None => words
            .find_iter(&String::from_utf8_lossy(source))
            .map(|m| token_hash(m.as_str()))
            .collect(),
    }
}

/// Parse source bytes with a known language.
fn parse_source(source: &[u8], lang_id: LangId) -> Result<Tree> {
    let mut parser = Parser::new();
    parser
        .set_language(&lang_id.ts_language())
        .context("Failed to set parser language")?;

    parser
        .parse(source, None)
        .ok_or_else(|| anyhow::anyhow!("tree-sitter produced no tree for {lang_id}"))
}

/// Kinds of the leaf nodes in document order; comment subtrees are dropped.
fn leaf_kinds(tree: &Tree) -> Vec<u64> {
    let mut tokens = Vec::new();
    let mut cursor = tree.walk();

    loop {
        let node = cursor.node();
        let is_comment = node.kind().contains("comment");

        if !is_comment {
            if node.child_count() == 0 {
                if !node.is_missing() {
                    tokens.push(token_hash(node.kind()));
                }
            } else if cursor.goto_first_child() {
                continue;
            }
        }

        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return tokens;
            }
        }
    }
}

/// Hash of every run of `k` consecutive tokens. Shorter inputs become one k-gram.
fn kgram_hashes(tokens: &[u64], k: usize) -> Vec<u64> {
    if tokens.is_empty() {
        return Vec::new();
    }
    let combine = |window: &[u64]| {
        window.iter().fold(0xcbf2_9ce4_8422_2325u64, |acc, t| {
            (acc ^ t).wrapping_mul(0x0000_0100_0000_01b3)
        })
    };
    if tokens.len() < k {
        return vec![combine(tokens)];
    }
    tokens.windows(k).map(combine).collect()
}

/// Winnowing: keep the rightmost minimum of every window of `w` k-gram hashes.
fn winnow(hashes: &[u64], w: usize) -> HashSet<u64> {
    if hashes.len() <= w {
        return hashes.iter().copied().collect();
    }

    let mut selected = HashSet::new();
    for window in hashes.windows(w) {
        let mut min_idx = 0;
        for (i, h) in window.iter().enumerate() {
            if *h <= window[min_idx] {
                min_idx = i;
            }
        }
        selected.insert(window[min_idx]);
    }
    selected
}
