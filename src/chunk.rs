//! Structure-aware recursive text chunker.
//!
//! Splits normalized document text into overlapping passages. Splitting
//! prefers legal/structural headings found at line starts (`Article`,
//! `Titre`, `Chapitre`, `Section`, `§`) and only falls back to paragraph,
//! line, word and finally character boundaries for pieces that still exceed
//! `chunk_size`.
//!
//! The separator that introduces a piece stays at the start of that piece,
//! so a heading is never separated from the body that follows it. Adjacent
//! small pieces are then merged greedily up to `chunk_size`, and the
//! trailing pieces of each chunk (up to `overlap` units) are replayed at the
//! start of the next one.
//!
//! Sizes are measured in characters, or in cl100k BPE tokens when the
//! tokenizer-aware mode is enabled.

use std::collections::VecDeque;

use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use tiktoken_rs::CoreBPE;

/// Separators from coarsest to finest. The character fallback is implicit.
static SEPARATORS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\nArticle\s+(?:L\.)?\d+(?:[._-]\d+)?",
        r"\nTitre\s+(?:I{1,3}|IV|V|VI|VII|VIII|IX|\d+)",
        r"\nChapitre\s+(?:I{1,3}|IV|V|VI|VII|VIII|IX|\d+)",
        r"\n(?:SECTION|Section)\s+(?:I{1,3}|IV|V|VI|VII|VIII|IX|\d+)",
        r"\n§\s*\d+",
        r"\n\n",
        r"\n",
        r" ",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("separator patterns are valid"))
    .collect()
});

static CL100K: OnceCell<CoreBPE> = OnceCell::new();

/// Unit in which `chunk_size` and `overlap` are expressed.
#[derive(Clone, Copy)]
enum Measure {
    Chars,
    Tokens(&'static CoreBPE),
}

impl Measure {
    fn resolve(use_tiktoken: bool) -> Self {
        if !use_tiktoken {
            return Measure::Chars;
        }
        match CL100K.get_or_try_init(tiktoken_rs::cl100k_base) {
            Ok(bpe) => Measure::Tokens(bpe),
            Err(e) => {
                tracing::warn!(error = %e, "cl100k tokenizer unavailable, measuring chunks in characters");
                Measure::Chars
            }
        }
    }

    fn len(&self, text: &str) -> usize {
        match self {
            Measure::Chars => text.chars().count(),
            Measure::Tokens(bpe) => bpe.encode_ordinary(text).len(),
        }
    }
}

/// Split `text` into ordered passages of at most `chunk_size` units with
/// `overlap` units replayed between neighbours.
///
/// Empty or whitespace-only input yields no chunks. The output is a pure
/// function of the inputs.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize, use_tiktoken: bool) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() || chunk_size == 0 {
        return Vec::new();
    }

    let splitter = Splitter {
        chunk_size,
        overlap: overlap.min(chunk_size.saturating_sub(1)),
        measure: Measure::resolve(use_tiktoken),
    };

    let mut out = Vec::new();
    splitter.split(text, 0, &mut out);

    out.into_iter()
        .map(|chunk| chunk.trim().to_string())
        .filter(|chunk| !chunk.is_empty())
        .collect()
}

struct Splitter {
    chunk_size: usize,
    overlap: usize,
    measure: Measure,
}

impl Splitter {
    fn split(&self, text: &str, level: usize, out: &mut Vec<String>) {
        let chosen = SEPARATORS
            .iter()
            .enumerate()
            .skip(level)
            .find(|(_, separator)| separator.is_match(text))
            .map(|(i, _)| i);

        let pieces = match chosen {
            Some(i) => split_keeping_separator(text, &SEPARATORS[i]),
            None => split_chars(text),
        };

        let mut fitting: Vec<&str> = Vec::new();
        for piece in pieces {
            if self.measure.len(piece) < self.chunk_size {
                fitting.push(piece);
                continue;
            }

            if !fitting.is_empty() {
                self.merge(&fitting, out);
                fitting.clear();
            }
            match chosen {
                Some(i) => self.split(piece, i + 1, out),
                None => out.push(piece.to_string()),
            }
        }

        if !fitting.is_empty() {
            self.merge(&fitting, out);
        }
    }

    fn merge(&self, pieces: &[&str], out: &mut Vec<String>) {
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = self.measure.len(piece);

            if total + len > self.chunk_size && !window.is_empty() {
                push_joined(&window, out);

                while total > self.overlap || (total > 0 && total + len > self.chunk_size) {
                    match window.pop_front() {
                        Some((_, front_len)) => total -= front_len,
                        None => break,
                    }
                }
            }

            window.push_back((piece, len));
            total += len;
        }

        push_joined(&window, out);
    }
}

fn push_joined(window: &VecDeque<(&str, usize)>, out: &mut Vec<String>) {
    let joined: String = window.iter().map(|(piece, _)| *piece).collect();
    let joined = joined.trim();
    if !joined.is_empty() {
        out.push(joined.to_string());
    }
}

/// Split before every separator match; each match starts the following piece.
fn split_keeping_separator<'a>(text: &'a str, separator: &Regex) -> Vec<&'a str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    for m in separator.find_iter(text) {
        if m.start() > start {
            pieces.push(&text[start..m.start()]);
        }
        start = m.start();
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

fn split_chars(text: &str) -> Vec<&str> {
    text.char_indices()
        .map(|(i, c)| &text[i..i + c.len_utf8()])
        .collect()
}
