//! Tokenizer boundary.
//!
//! The vocabulary itself is an external collaborator.  The search only needs
//! to encode prompts/prefixes/hotwords, decode final token ids to text, and
//! know the special-token layout ([`SpecialTokens`]).

pub mod special;

pub use special::{LanguageToken, SpecialTokens};

/// Single-character symbols suppressed by the non-speech sentinel.
const SINGLE_SYMBOLS: &str = "\"#()*+/:;<=>@[\\]^_`{|}~「」『』";

/// Multi-character symbols suppressed by the non-speech sentinel.
const MULTI_SYMBOLS: &str = "<< >> <<< >>> -- --- -( -[ (' (\" (( )) ((( ))) [[ ]] {{ }} ♪♪ ♪♪♪";

/// Musical-note symbols; their first token is suppressed even when the
/// symbol spans several tokens.
const MISCELLANEOUS_SYMBOLS: &str = "♩♪♫♬♭♮♯";

// ---------------------------------------------------------------------------
// Tokenizer trait
// ---------------------------------------------------------------------------

/// Text ⇄ token-id mapping plus the special-token layout.
pub trait Tokenizer {
    /// Encode text into token ids (no special tokens added).
    fn encode(&self, text: &str) -> Vec<u32>;

    /// Decode token ids to text.  Implementations skip timestamp tokens.
    fn decode(&self, tokens: &[u32]) -> String;

    /// Special-token ids.
    fn special_tokens(&self) -> &SpecialTokens;

    /// Tokens that denote non-speech annotations (speaker tags, music
    /// symbols, brackets), derived from this tokenizer's own encoding.
    ///
    /// A symbol contributes its token when it encodes to exactly one token,
    /// with or without a leading space; musical notes always contribute their
    /// first token.
    fn non_speech_tokens(&self) -> Vec<u32> {
        let mut result: Vec<u32> = [" -", " '"]
            .iter()
            .filter_map(|s| self.encode(s).first().copied())
            .collect();

        let symbols = SINGLE_SYMBOLS
            .chars()
            .map(String::from)
            .chain(MULTI_SYMBOLS.split_whitespace().map(String::from));
        let misc = MISCELLANEOUS_SYMBOLS.chars().map(String::from);

        for (symbol, is_misc) in symbols.map(|s| (s, false)).chain(misc.map(|s| (s, true))) {
            for text in [symbol.clone(), format!(" {symbol}")] {
                let tokens = self.encode(&text);
                if tokens.len() == 1 || (is_misc && !tokens.is_empty()) {
                    result.push(tokens[0]);
                }
            }
        }

        result.sort_unstable();
        result.dedup();
        result
    }
}
