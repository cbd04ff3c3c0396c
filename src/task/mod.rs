//! Decoding task: options in, one result per audio out.
//!
//! # State machine
//!
//! ```text
//!  INIT ──► LANGUAGE_DETECT? ──► SAMPLE_LOOP ──► FINALIZE ──► RANK ──► DONE
//!   │            │                   │
//!   │            └─ task = lang_id ──┼──────────────────────────────► DONE
//!   │                                │
//!   │  validate options              │  per step:
//!   │  build fixed prefix            │    logits(last position)
//!   │  pick decoder variant          │    no-speech prob (step 0, sot position)
//!   │  build filter pipeline         │    filters → decoder.update
//!   │                                │  stop: completed | context full | budget
//!   │                                │  cache released on every exit
//! ```

pub mod compression;
pub mod language;
pub mod options;
pub mod result;

use ndarray::{Array3, Axis};

use crate::batch::TokenBatch;
use crate::decoder::{
    AcousticScorer, BeamSearchDecoder, CandidateLimit, GreedyDecoder, LmFusionScorer, TokenDecoder,
};
use crate::error::{DecodeError, Result};
use crate::filters::{ApplyTimestampRules, BoostTokens, FilterPipeline, SuppressBlank, SuppressTokens};
use crate::inference::{CachedInference, CleanupGuard, Inference, Precision, WhisperModel};
use crate::lm::ArpaModel;
use crate::numeric::softmax;
use crate::ranker::{MaximumLikelihoodRanker, SequenceRanker};
use crate::tokenizer::Tokenizer;

pub use compression::compression_ratio;
pub use language::{detect_language, LanguageDetection};
pub use options::{DecodingOptions, OutOfCandidate, Prompt, SuppressList, Task};
pub use result::DecodingResult;

/// Language assumed until detection overwrites it.
const PLACEHOLDER_LANGUAGE: &str = "en";

// ---------------------------------------------------------------------------
// DecodingTask
// ---------------------------------------------------------------------------

/// One configured decoding run over a batch of audio segments.
pub struct DecodingTask<'m> {
    model: &'m dyn WhisperModel,
    tokenizer: &'m dyn Tokenizer,
    options: DecodingOptions,

    n_group: usize,
    n_ctx: usize,
    sample_len: usize,
    initial_tokens: Vec<u32>,
    sample_begin: usize,
    sot_index: usize,

    inference: CachedInference<'m>,
    ranker: Box<dyn SequenceRanker>,
    decoder: Box<dyn TokenDecoder>,
    filters: FilterPipeline,
}

impl<'m> DecodingTask<'m> {
    /// Validate `options` and assemble the prefix, decoder and filters.
    ///
    /// Loads the n-gram model when LM fusion is enabled.
    pub fn new(
        model: &'m dyn WhisperModel,
        tokenizer: &'m dyn Tokenizer,
        options: DecodingOptions,
    ) -> Result<Self> {
        options.validate()?;
        let special = tokenizer.special_tokens();
        let dims = model.dims();

        let language = options.language.as_deref().unwrap_or(PLACEHOLDER_LANGUAGE);
        let sot_sequence = if options.without_timestamps {
            special.sot_sequence_including_notimestamps(language, options.task)?
        } else {
            special.sot_sequence(language, options.task)?
        };

        let n_group = options.n_group();
        let n_ctx = dims.n_text_ctx;
        let sample_len = options.sample_len.unwrap_or(n_ctx / 2);

        let initial_tokens = initial_tokens(tokenizer, &options, sot_sequence, n_ctx, sample_len);
        let sample_begin = initial_tokens.len();
        let sot_index = initial_tokens
            .iter()
            .position(|&t| t == special.sot)
            .ok_or_else(|| DecodeError::InvalidOptions("prefix lacks start-of-transcript".into()))?;

        let decoder = build_decoder(&options, special.eot, sample_begin)?;

        let mut filters = FilterPipeline::new();
        if options.suppress_blank {
            filters.push(SuppressBlank::new(tokenizer, sample_begin));
        }
        if let Some(suppress) = SuppressTokens::resolve(&options.suppress_tokens, tokenizer) {
            filters.push(suppress);
        }
        if let Some(boost) =
            BoostTokens::new(&options.hotwords, tokenizer, options.hotword_weight, sample_begin)
        {
            filters.push(boost);
        }
        if !options.without_timestamps {
            let precision = dims.timestamp_precision();
            let max_initial_index = options
                .initial_timestamp_bound()
                .map(|t| (t / precision).round_ties_even() as usize);
            filters.push(ApplyTimestampRules::new(special, sample_begin, max_initial_index));
        }

        log::debug!(
            "task: {} decoder, n_group={n_group}, sample_len={sample_len}, sample_begin={sample_begin}, filters={:?}",
            decoder.name(),
            filters.names()
        );

        Ok(Self {
            model,
            tokenizer,
            n_group,
            n_ctx,
            sample_len,
            sample_begin,
            sot_index,
            inference: CachedInference::new(model, initial_tokens.len()),
            initial_tokens,
            ranker: Box::new(MaximumLikelihoodRanker::new(options.length_penalty)),
            decoder,
            filters,
            options,
        })
    }

    /// The fixed prefix every hypothesis starts with.
    pub fn initial_tokens(&self) -> &[u32] {
        &self.initial_tokens
    }

    /// The inference boundary, for inspecting cache state.
    pub fn inference(&self) -> &CachedInference<'m> {
        &self.inference
    }

    /// Decode `mel` (`n_audio × n_mels × n_frames`, or already-encoded
    /// `n_audio × n_audio_ctx × n_audio_state` features).
    pub fn run(&mut self, mel: &Array3<f32>) -> Result<Vec<DecodingResult>> {
        self.decoder.reset();
        let n_audio = mel.len_of(Axis(0));

        let audio_features = self.audio_features(mel)?;
        let mut tokens = TokenBatch::repeat(&self.initial_tokens, n_audio);

        let (languages, language_probs) = self.detect_language(&audio_features, &mut tokens)?;
        if self.options.task == Task::LanguageId {
            return Ok(audio_features
                .outer_iter()
                .zip(languages)
                .enumerate()
                .map(|(a, (features, language))| {
                    let probs = language_probs.as_ref().and_then(|p| p.get(a).cloned());
                    DecodingResult::language_only(features.to_owned(), language, probs)
                })
                .collect());
        }

        let tokens = tokens.repeat_interleave(self.n_group);
        let row_audio: Vec<usize> = (0..n_audio)
            .flat_map(|a| std::iter::repeat(a).take(self.n_group))
            .collect();
        let grouped_features = audio_features.select(Axis(0), &row_audio);

        let (tokens, sum_logprobs, no_speech_probs) = self.main_loop(&grouped_features, tokens)?;

        let candidates = self
            .decoder
            .finalize(tokens.into_groups(self.n_group), &sum_logprobs)?;
        let eot = self.tokenizer.special_tokens().eot;
        let (sampled, scores): (Vec<Vec<Vec<u32>>>, Vec<Vec<f32>>) = candidates
            .into_iter()
            .map(|c| {
                let trimmed = c
                    .tokens
                    .into_iter()
                    .map(|seq| trim_sampled(seq, self.sample_begin, eot))
                    .collect();
                (trimmed, c.sum_logprobs)
            })
            .unzip();

        let selected = self.ranker.rank(&sampled, &scores);

        let mut chosen_tokens = Vec::with_capacity(n_audio);
        let mut texts = Vec::with_capacity(n_audio);
        let mut avg_logprobs = Vec::with_capacity(n_audio);
        for ((candidates, sums), &pick) in sampled.into_iter().zip(&scores).zip(&selected) {
            let (Some(seq), Some(&sum)) = (candidates.get(pick), sums.get(pick)) else {
                return Err(DecodeError::InconsistentResult(vec![candidates.len(), pick]));
            };
            texts.push(self.tokenizer.decode(seq).trim().to_string());
            avg_logprobs.push(sum / (seq.len() + 1) as f32);
            chosen_tokens.push(seq.clone());
        }
        let no_speech: Vec<f32> = no_speech_probs.into_iter().step_by(self.n_group).collect();

        let lengths = vec![
            texts.len(),
            languages.len(),
            chosen_tokens.len(),
            audio_features.len_of(Axis(0)),
            avg_logprobs.len(),
            no_speech.len(),
        ];
        if lengths.iter().any(|&l| l != n_audio) {
            return Err(DecodeError::InconsistentResult(lengths));
        }

        let mut results = Vec::with_capacity(n_audio);
        for (a, features) in audio_features.outer_iter().enumerate() {
            let text = std::mem::take(&mut texts[a]);
            results.push(DecodingResult {
                audio_features: features.to_owned(),
                language: languages[a].clone(),
                language_probs: language_probs.as_ref().and_then(|p| p.get(a).cloned()),
                tokens: std::mem::take(&mut chosen_tokens[a]),
                compression_ratio: compression_ratio(&text)?,
                text,
                avg_logprob: avg_logprobs[a],
                no_speech_prob: no_speech[a],
                temperature: self.options.temperature,
            });
        }
        Ok(results)
    }

    fn audio_features(&self, mel: &Array3<f32>) -> Result<Array3<f32>> {
        let dims = self.model.dims();
        let (n_audio, rows, cols) = mel.dim();
        let features = if (rows, cols) == (dims.n_audio_ctx, dims.n_audio_state) {
            log::trace!("task: audio features given, skipping the encoder");
            mel.clone()
        } else {
            let precision = if self.options.fp16 {
                Precision::Half
            } else {
                Precision::Full
            };
            self.model.encode_audio(mel, precision)?
        };
        if features.len_of(Axis(0)) != n_audio {
            return Err(DecodeError::Model(format!(
                "encoder returned {} rows for {n_audio} audio inputs",
                features.len_of(Axis(0))
            )));
        }
        Ok(features)
    }

    /// Detect languages when none is pinned or the task asks for it, writing
    /// the detected token into the prefix when none is pinned.
    #[allow(clippy::type_complexity)]
    fn detect_language(
        &self,
        audio_features: &Array3<f32>,
        tokens: &mut TokenBatch,
    ) -> Result<(Vec<String>, Option<Vec<std::collections::BTreeMap<String, f32>>>)> {
        let n_audio = audio_features.len_of(Axis(0));
        let pinned = self.options.language.clone();
        if pinned.is_some() && self.options.task != Task::LanguageId {
            return Ok((vec![pinned.unwrap_or_default(); n_audio], None));
        }

        let detection = detect_language(self.model, self.tokenizer, audio_features)?;
        if pinned.is_none() {
            let slot = self.sot_index + 1;
            if slot >= tokens.seq_len() {
                return Err(DecodeError::InvalidOptions(
                    "start sequence has no language slot".into(),
                ));
            }
            tokens.set_column(slot, &detection.tokens);
        }
        Ok((detection.codes, Some(detection.probs)))
    }

    fn main_loop(
        &mut self,
        audio_features: &Array3<f32>,
        mut tokens: TokenBatch,
    ) -> Result<(TokenBatch, Vec<f32>, Vec<f32>)> {
        let n_batch = tokens.n_rows();
        let mut sum_logprobs = vec![0.0_f32; n_batch];
        let mut no_speech_probs = vec![f32::NAN; n_batch];
        let no_speech = self.tokenizer.special_tokens().no_speech;

        let mut inference = CleanupGuard::new(&mut self.inference);
        let mut stop = "sample budget";
        for step in 0..self.sample_len {
            let logits = inference.logits(&tokens, audio_features)?;
            let (rows, positions, _) = logits.dim();
            if rows != n_batch || positions == 0 {
                return Err(DecodeError::Model(format!(
                    "forward pass returned shape {:?} for {n_batch} rows",
                    logits.shape()
                )));
            }

            if step == 0 {
                if let Some(ns) = no_speech {
                    if self.sot_index >= positions {
                        return Err(DecodeError::Model(format!(
                            "first forward pass returned {positions} positions, \
                             start-of-transcript is at {}",
                            self.sot_index
                        )));
                    }
                    for (r, prob) in no_speech_probs.iter_mut().enumerate() {
                        let at_sot = softmax(logits.slice(ndarray::s![r, self.sot_index, ..]));
                        *prob = at_sot.get(ns as usize).copied().unwrap_or(f32::NAN);
                    }
                }
            }

            let mut last = logits.index_axis(Axis(1), positions - 1).to_owned();
            self.filters.apply(&mut last, &tokens);

            let (next, completed) =
                self.decoder
                    .update(tokens, &last, &mut sum_logprobs, &mut *inference)?;
            tokens = next;

            if completed {
                stop = "completed";
                break;
            }
            if tokens.seq_len() > self.n_ctx {
                stop = "context window full";
                break;
            }
        }
        log::debug!(
            "task: sampling stopped ({stop}) at {} tokens",
            tokens.seq_len().saturating_sub(self.sample_begin)
        );
        Ok((tokens, sum_logprobs, no_speech_probs))
    }
}

// ---------------------------------------------------------------------------
// Construction helpers
// ---------------------------------------------------------------------------

fn prompt_tokens(tokenizer: &dyn Tokenizer, prompt: &Prompt) -> Vec<u32> {
    match prompt {
        Prompt::Text(text) => tokenizer.encode(&format!(" {}", text.trim())),
        Prompt::Tokens(tokens) => tokens.clone(),
    }
}

fn last_n(tokens: Vec<u32>, n: usize) -> Vec<u32> {
    let skip = tokens.len().saturating_sub(n);
    tokens.into_iter().skip(skip).collect()
}

/// `[sot_prev, prompt…] + sot_sequence + [prefix…]`, with the prompt kept
/// to `n_ctx / 2 - 1` tokens and the prefix to `n_ctx / 2 - sample_len`.
fn initial_tokens(
    tokenizer: &dyn Tokenizer,
    options: &DecodingOptions,
    sot_sequence: Vec<u32>,
    n_ctx: usize,
    sample_len: usize,
) -> Vec<u32> {
    let mut tokens = sot_sequence;

    if let Some(prefix) = &options.prefix {
        let max_prefix_len = (n_ctx / 2).saturating_sub(sample_len);
        tokens.extend(last_n(prompt_tokens(tokenizer, prefix), max_prefix_len));
    }

    if let Some(prompt) = &options.prompt {
        let max_prompt_len = (n_ctx / 2).saturating_sub(1);
        let mut with_prompt = vec![tokenizer.special_tokens().sot_prev];
        with_prompt.extend(last_n(prompt_tokens(tokenizer, prompt), max_prompt_len));
        with_prompt.extend(tokens);
        tokens = with_prompt;
    }

    tokens
}

fn build_decoder(
    options: &DecodingOptions,
    eot: u32,
    sample_begin: usize,
) -> Result<Box<dyn TokenDecoder>> {
    let Some(beam_size) = options.beam_size else {
        return Ok(Box::new(GreedyDecoder::new(
            options.temperature,
            eot,
            options.seed,
        )));
    };

    if !options.with_lm {
        return Ok(Box::new(BeamSearchDecoder::new(
            beam_size,
            eot,
            options.patience,
            AcousticScorer,
        )?));
    }

    let path = options
        .lm_path
        .as_deref()
        .ok_or_else(|| DecodeError::InvalidOptions("with_lm requires lm_path to be given".into()))?;
    let limit = CandidateLimit::from_options(options.select_candidates, options.out_of_candidate);
    match limit {
        CandidateLimit::FullVocabulary => {
            log::info!("task: LM fusion over the full vocabulary");
        }
        CandidateLimit::TopN { n, .. } => {
            log::info!("task: LM fusion over the top {n} acoustic candidates");
        }
    }
    let scorer = LmFusionScorer::new(
        ArpaModel::load(path)?,
        options.lm_alpha,
        options.lm_beta,
        sample_begin,
        eot,
        limit,
    );
    Ok(Box::new(BeamSearchDecoder::new(
        beam_size,
        eot,
        options.patience,
        scorer,
    )?))
}

/// Sampled span of a finished sequence: after the fixed prefix, before the
/// first end-of-text.
fn trim_sampled(sequence: Vec<u32>, sample_begin: usize, eot: u32) -> Vec<u32> {
    let sampled = sequence.get(sample_begin..).unwrap_or(&[]);
    let end = sampled.iter().position(|&t| t == eot).unwrap_or(sampled.len());
    sampled[..end].to_vec()
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Decode a single `n_mels × n_frames` spectrogram.
pub fn decode(
    model: &dyn WhisperModel,
    tokenizer: &dyn Tokenizer,
    mel: &ndarray::Array2<f32>,
    options: DecodingOptions,
) -> Result<DecodingResult> {
    let batch = mel.view().insert_axis(Axis(0)).to_owned();
    decode_batch(model, tokenizer, &batch, options)?
        .pop()
        .ok_or_else(|| DecodeError::InconsistentResult(vec![0]))
}

/// Decode a batch of spectrograms, one result per audio.
pub fn decode_batch(
    model: &dyn WhisperModel,
    tokenizer: &dyn Tokenizer,
    mel: &Array3<f32>,
    options: DecodingOptions,
) -> Result<Vec<DecodingResult>> {
    DecodingTask::new(model, tokenizer, options)?.run(mel)
}
