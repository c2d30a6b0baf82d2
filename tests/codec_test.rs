//! Integration tests for TokenCodec over mock vocabularies.

use nano_decode::vocab::{TokenCodec, TokenId, VocabKind, Vocabulary};
use nano_decode::Error;

/// Table-backed vocabulary for tests.
struct MockVocab {
    kind: VocabKind,
    pieces: Vec<&'static str>,
    bos: Option<TokenId>,
    eos: Option<TokenId>,
    special: Vec<TokenId>,
}

impl Vocabulary for MockVocab {
    fn kind(&self) -> VocabKind {
        self.kind
    }

    fn n_tokens(&self) -> usize {
        self.pieces.len()
    }

    fn piece(&self, token: TokenId) -> Option<&str> {
        self.pieces.get(token as usize).copied()
    }

    fn token(&self, piece: &str) -> Option<TokenId> {
        self.pieces
            .iter()
            .position(|&p| p == piece)
            .map(|i| i as TokenId)
    }

    fn bos(&self) -> Option<TokenId> {
        self.bos
    }

    fn eos(&self) -> Option<TokenId> {
        self.eos
    }

    fn max_piece_len(&self) -> usize {
        self.pieces.iter().map(|p| p.len()).max().unwrap_or(0)
    }

    fn is_special(&self, token: TokenId) -> bool {
        self.special.contains(&token)
    }
}

fn spm_vocab() -> MockVocab {
    MockVocab {
        kind: VocabKind::SentencePiece,
        pieces: vec![
            "<s>", "</s>", "\u{2581}Hello", "\u{2581}world", "\u{2581}", "Hello", "world", "!",
            "lo", "wor", "ld",
        ],
        bos: Some(0),
        eos: Some(1),
        special: vec![0, 1],
    }
}

fn bpe_vocab() -> MockVocab {
    MockVocab {
        kind: VocabKind::BytePair,
        pieces: vec!["<|end|>", "Hello", " world", "!", " ", "wor", "ld"],
        bos: None,
        eos: Some(0),
        special: vec![0],
    }
}

#[test]
fn spm_round_trip_ascii() {
    let codec = TokenCodec::new(spm_vocab());
    let text = "Hello world!";
    let tokens = codec.tokenize(text, false, false).unwrap();
    assert_eq!(codec.detokenize(&tokens), text);
}

#[test]
fn spm_add_bos_prepends_marker() {
    let codec = TokenCodec::new(spm_vocab());
    let tokens = codec.tokenize("Hello", true, false).unwrap();
    assert_eq!(tokens[0], 0);
    // BOS does not leak into the decoded text.
    assert_eq!(codec.detokenize(&tokens), "Hello");
}

#[test]
fn spm_strips_exactly_one_leading_space() {
    let codec = TokenCodec::new(spm_vocab());
    // "▁Hello" then "▁world": interior pieces keep their spaces.
    let text = codec.detokenize(&[2, 3]);
    assert_eq!(text, "Hello world");
}

#[test]
fn bpe_concatenates_verbatim() {
    let codec = TokenCodec::new(bpe_vocab());
    let text = "Hello world!";
    let tokens = codec.tokenize(text, false, false).unwrap();
    assert_eq!(codec.detokenize(&tokens), text);
}

#[test]
fn bpe_add_bos_is_noop_without_bos() {
    let codec = TokenCodec::new(bpe_vocab());
    let with = codec.tokenize("Hello", true, false).unwrap();
    let without = codec.tokenize("Hello", false, false).unwrap();
    assert_eq!(with, without);
}

#[test]
fn special_pieces_ignored_unless_allowed() {
    let codec = TokenCodec::new(bpe_vocab());
    // "<|end|>" is special and nothing else in the vocabulary covers the
    // '<' byte, so matching it as plain text must fail outright.
    let err = codec.tokenize("<|end|>", false, false).unwrap_err();
    assert!(matches!(err, Error::MalformedInput(_)));

    let tokens = codec.tokenize("<|end|>", false, true).unwrap();
    assert_eq!(tokens, vec![0]);
}

#[test]
fn malformed_input_returns_no_partial_list() {
    let codec = TokenCodec::new(bpe_vocab());
    // "Hello" matches, the emoji never will.
    let err = codec.tokenize("Hello\u{1F600}", false, false).unwrap_err();
    assert!(matches!(err, Error::MalformedInput(_)));
}

#[test]
fn out_of_range_token_substituted_in_detokenize() {
    let codec = TokenCodec::new(bpe_vocab());
    let text = codec.detokenize(&[1, 999, 3]);
    assert_eq!(text, "Hello\u{FFFD}!");
}

#[test]
fn piece_reports_invalid_token() {
    let codec = TokenCodec::new(spm_vocab());
    assert_eq!(codec.piece(2).unwrap(), "\u{2581}Hello");
    assert!(matches!(
        codec.piece(999),
        Err(Error::InvalidVocabularyToken(999))
    ));
}

#[test]
fn interior_tokens_round_trip_exactly() {
    let codec = TokenCodec::new(spm_vocab());
    let tokens = codec.tokenize("Hello world", false, false).unwrap();
    // Re-tokenizing the decoded text reproduces the same ids.
    let decoded = codec.detokenize(&tokens);
    let again = codec.tokenize(&decoded, false, false).unwrap();
    assert_eq!(tokens, again);
}
