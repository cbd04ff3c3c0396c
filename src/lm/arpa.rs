//! Back-off n-gram model in ARPA text format.
//!
//! ```text
//! \data\
//! ngram 1=4
//! ngram 2=2
//!
//! \1-grams:
//! -1.0  <s>   -0.3
//! -0.5  a     -0.2
//! ...
//! \2-grams:
//! -0.1  <s> a
//! ...
//! \end\
//! ```

use std::collections::HashMap;
use std::path::Path;

use super::{NgramScorer, BEGIN_OF_SENTENCE, UNKNOWN_WORD};
use crate::error::{DecodeError, Result};

/// Score of a word the model cannot represent at all.
const UNKNOWN_SCORE: f32 = -100.0;

#[derive(Debug, Clone, Copy)]
struct Entry {
    logprob: f32,
    backoff: f32,
}

/// Context of the last `order - 1` word ids.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArpaState {
    context: Vec<u32>,
}

// ---------------------------------------------------------------------------
// ArpaModel
// ---------------------------------------------------------------------------

/// An in-memory back-off n-gram model.
#[derive(Debug, Clone)]
pub struct ArpaModel {
    vocab: HashMap<String, u32>,
    /// `ngrams[n]` holds the `(n + 1)`-grams.
    ngrams: Vec<HashMap<Vec<u32>, Entry>>,
}

impl ArpaModel {
    /// Load a model from an ARPA file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let model = Self::from_arpa_str(&text)?;
        log::info!(
            "lm: loaded {}-gram model with {} words from {}",
            model.order(),
            model.vocab.len(),
            path.display()
        );
        Ok(model)
    }

    /// Parse ARPA text.
    pub fn from_arpa_str(text: &str) -> Result<Self> {
        let err = |line: usize, msg: &str| {
            DecodeError::LanguageModel(format!("arpa line {}: {msg}", line + 1))
        };

        let mut vocab: HashMap<String, u32> = HashMap::new();
        let mut ngrams: Vec<HashMap<Vec<u32>, Entry>> = Vec::new();
        let mut section: Option<usize> = None;
        let mut seen_data = false;

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            if line == "\\data\\" {
                seen_data = true;
                continue;
            }
            if line == "\\end\\" {
                break;
            }
            if let Some(order) = line
                .strip_prefix('\\')
                .and_then(|l| l.strip_suffix("-grams:"))
            {
                let n: usize = order.parse().map_err(|_| err(lineno, "bad section header"))?;
                if n == 0 {
                    return Err(err(lineno, "n-gram order must be at least 1"));
                }
                while ngrams.len() < n {
                    ngrams.push(HashMap::new());
                }
                section = Some(n);
                continue;
            }
            let Some(n) = section else {
                // Header lines ("ngram N=count") carry nothing we need.
                continue;
            };

            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < n + 1 {
                return Err(err(lineno, "too few fields"));
            }
            let logprob: f32 = fields[0]
                .parse()
                .map_err(|_| err(lineno, "bad log probability"))?;
            let backoff: f32 = match fields.get(n + 1) {
                Some(b) => b.parse().map_err(|_| err(lineno, "bad back-off weight"))?,
                None => 0.0,
            };
            let key: Vec<u32> = fields[1..=n]
                .iter()
                .map(|w| {
                    let next = vocab.len() as u32;
                    *vocab.entry((*w).to_string()).or_insert(next)
                })
                .collect();
            ngrams[n - 1].insert(key, Entry { logprob, backoff });
        }

        if !seen_data || ngrams.first().map_or(true, HashMap::is_empty) {
            return Err(DecodeError::LanguageModel(
                "arpa text has no \\data\\ section or no unigrams".into(),
            ));
        }
        Ok(Self { vocab, ngrams })
    }

    /// Highest n-gram order.
    pub fn order(&self) -> usize {
        self.ngrams.len()
    }

    /// log10 p(word | context) with standard back-off.
    fn conditional(&self, context: &[u32], word: u32) -> f32 {
        let mut backoff = 0.0;
        let longest = context.len().min(self.order().saturating_sub(1));
        for n in (0..=longest).rev() {
            let history = &context[context.len() - n..];
            let mut key = history.to_vec();
            key.push(word);
            if let Some(entry) = self.ngrams[n].get(&key) {
                return backoff + entry.logprob;
            }
            if n > 0 {
                if let Some(h) = self.ngrams[n - 1].get(history) {
                    backoff += h.backoff;
                }
            }
        }
        backoff + UNKNOWN_SCORE
    }
}

impl NgramScorer for ArpaModel {
    type State = ArpaState;

    fn begin_state(&self) -> ArpaState {
        ArpaState {
            context: self
                .vocab
                .get(BEGIN_OF_SENTENCE)
                .map(|&id| vec![id])
                .unwrap_or_default(),
        }
    }

    fn score(&self, state: &ArpaState, word: &str) -> (f32, ArpaState) {
        let Some(id) = self
            .vocab
            .get(word)
            .or_else(|| self.vocab.get(UNKNOWN_WORD))
            .copied()
        else {
            // Nothing to append; the preceding context carries over.
            return (UNKNOWN_SCORE, state.clone());
        };

        let logprob = self.conditional(&state.context, id);
        let keep = self.order().saturating_sub(1);
        let mut context = state.context.clone();
        context.push(id);
        if context.len() > keep {
            context.drain(..context.len() - keep);
        }
        (logprob, ArpaState { context })
    }
}
