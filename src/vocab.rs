//! Vocabulary interface and text/token conversion.
//!
//! The vocabulary tables themselves (id↔piece lookup, special-token ids)
//! are owned by the model loader and consumed here through the
//! [`Vocabulary`] trait. [`TokenCodec`] implements the two conversion
//! conventions on top of it:
//!
//! - SentencePiece-style vocabularies mark spaces with `▁` inside pieces;
//!   detokenization strips exactly one leading space from the first
//!   emitted non-BOS piece.
//! - Byte-pair-style vocabularies carry their own space markers;
//!   detokenization concatenates pieces verbatim.

use tracing::warn;

use crate::error::{Error, Result};

/// Token identifier within a vocabulary.
pub type TokenId = u32;

/// SentencePiece space marker (U+2581).
const SPM_SPACE: char = '\u{2581}';

/// Whitespace convention used by a vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VocabKind {
    /// SentencePiece: spaces encoded as `▁` inside pieces.
    SentencePiece,
    /// Byte-pair encoding: pieces carry their own space markers.
    BytePair,
}

/// Read-only view of a model's vocabulary tables.
pub trait Vocabulary {
    /// Whitespace convention of this vocabulary.
    fn kind(&self) -> VocabKind;

    /// Number of tokens.
    fn n_tokens(&self) -> usize;

    /// Raw string fragment for a token id, `None` if out of range.
    fn piece(&self, token: TokenId) -> Option<&str>;

    /// Token id for an exact piece, `None` if the piece is not in the
    /// vocabulary.
    fn token(&self, piece: &str) -> Option<TokenId>;

    /// Beginning-of-sequence token, if the vocabulary defines one.
    fn bos(&self) -> Option<TokenId>;

    /// End-of-sequence token, if the vocabulary defines one.
    fn eos(&self) -> Option<TokenId>;

    /// Longest piece length in bytes, bounding the greedy matcher.
    fn max_piece_len(&self) -> usize;

    /// Whether a token is a control/special token.
    fn is_special(&self, token: TokenId) -> bool {
        Some(token) == self.bos() || Some(token) == self.eos()
    }
}

/// Text/token conversion over an external [`Vocabulary`].
#[derive(Debug, Clone)]
pub struct TokenCodec<V> {
    vocab: V,
}

impl<V: Vocabulary> TokenCodec<V> {
    /// Wrap a vocabulary.
    pub fn new(vocab: V) -> Self {
        Self { vocab }
    }

    /// Access the underlying vocabulary.
    pub fn vocab(&self) -> &V {
        &self.vocab
    }

    /// Convert text to token ids.
    ///
    /// `add_bos` prepends the beginning-of-sequence token only when the
    /// vocabulary defines one. `allow_special` permits matching pieces
    /// that map to special tokens; otherwise those pieces are treated as
    /// plain text and matched through shorter non-special pieces.
    ///
    /// Input that cannot be consumed fails with [`Error::MalformedInput`]
    /// and no partial token list is returned.
    pub fn tokenize(
        &self,
        text: &str,
        add_bos: bool,
        allow_special: bool,
    ) -> Result<Vec<TokenId>> {
        let mut tokens = Vec::new();
        if add_bos {
            if let Some(bos) = self.vocab.bos() {
                tokens.push(bos);
            }
        }

        if text.is_empty() {
            return Ok(tokens);
        }

        let encoded = match self.vocab.kind() {
            // SentencePiece prefixes one space and folds spaces into the
            // marker before matching.
            VocabKind::SentencePiece => {
                let mut s = String::with_capacity(text.len() + SPM_SPACE.len_utf8());
                s.push(' ');
                s.push_str(text);
                s.replace(' ', "\u{2581}")
            }
            VocabKind::BytePair => text.to_string(),
        };

        let mut at = 0;
        while at < encoded.len() {
            match self.longest_match(&encoded[at..], allow_special) {
                Some((token, len)) => {
                    tokens.push(token);
                    at += len;
                }
                None => {
                    return Err(Error::MalformedInput(format!(
                        "no vocabulary piece matches input at byte {at}"
                    )));
                }
            }
        }

        Ok(tokens)
    }

    /// Greedy longest-prefix match at the head of `rest`.
    fn longest_match(&self, rest: &str, allow_special: bool) -> Option<(TokenId, usize)> {
        let limit = self.vocab.max_piece_len().min(rest.len());
        let mut end = limit;
        // Walk candidate cut points down to 1 byte, on char boundaries.
        while end > 0 {
            if rest.is_char_boundary(end) {
                if let Some(token) = self.vocab.token(&rest[..end]) {
                    if allow_special || !self.vocab.is_special(token) {
                        return Some((token, end));
                    }
                }
            }
            end -= 1;
        }
        None
    }

    /// Convert token ids back to text.
    ///
    /// Ids outside the vocabulary range are reported and substituted with
    /// U+FFFD; decoding continues.
    pub fn detokenize(&self, tokens: &[TokenId]) -> String {
        match self.vocab.kind() {
            VocabKind::SentencePiece => self.detokenize_spm(tokens),
            VocabKind::BytePair => self.detokenize_bpe(tokens),
        }
    }

    fn detokenize_spm(&self, tokens: &[TokenId]) -> String {
        let mut out = String::new();
        let bos = self.vocab.bos();
        let mut first_piece = true;

        for &token in tokens {
            if Some(token) == bos {
                continue;
            }
            let piece = self.piece_or_replacement(token);
            let decoded: String = piece.chars().map(|c| if c == SPM_SPACE { ' ' } else { c }).collect();
            if first_piece {
                // Exactly one leading space comes from the encoding
                // convention, not the text.
                out.push_str(decoded.strip_prefix(' ').unwrap_or(&decoded));
                first_piece = false;
            } else {
                out.push_str(&decoded);
            }
        }
        out
    }

    fn detokenize_bpe(&self, tokens: &[TokenId]) -> String {
        let bos = self.vocab.bos();
        tokens
            .iter()
            .filter(|&&t| Some(t) != bos)
            .map(|&t| self.piece_or_replacement(t))
            .collect()
    }

    fn piece_or_replacement(&self, token: TokenId) -> String {
        match self.vocab.piece(token) {
            Some(piece) => piece.to_string(),
            None => {
                warn!(token, "detokenize: token outside vocabulary range");
                '\u{FFFD}'.to_string()
            }
        }
    }

    /// Raw string fragment for a single token, for incremental streaming
    /// display.
    pub fn piece(&self, token: TokenId) -> Result<&str> {
        self.vocab
            .piece(token)
            .ok_or(Error::InvalidVocabularyToken(token))
    }
}
