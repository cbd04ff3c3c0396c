//! Beam search with patience.

use std::collections::HashMap;
use std::time::Instant;

use ndarray::Array2;

use super::{Candidates, CandidateScorer, TokenDecoder};
use crate::batch::TokenBatch;
use crate::error::{DecodeError, Result};
use crate::inference::Inference;
use crate::numeric::{descending, log_softmax, top_k};

// ---------------------------------------------------------------------------
// FinishedSet
// ---------------------------------------------------------------------------

/// Insertion-ordered map from token sequence to score.
///
/// Re-inserting a sequence overwrites its score but keeps its position.
#[derive(Debug, Clone, Default)]
pub struct FinishedSet {
    entries: Vec<(Vec<u32>, f32)>,
    index: HashMap<Vec<u32>, usize>,
}

impl FinishedSet {
    /// Insert or overwrite.
    pub fn insert(&mut self, sequence: Vec<u32>, score: f32) {
        match self.index.get(&sequence) {
            Some(&i) => self.entries[i].1 = score,
            None => {
                self.index.insert(sequence.clone(), self.entries.len());
                self.entries.push((sequence, score));
            }
        }
    }

    /// Number of distinct sequences.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u32], f32)> {
        self.entries.iter().map(|(s, v)| (s.as_slice(), *v))
    }

    /// Entries sorted by descending score, ties in insertion order.
    fn sorted(self) -> Vec<(Vec<u32>, f32)> {
        let mut entries = self.entries;
        entries.sort_by(|a, b| descending(a.1, b.1));
        entries
    }

    fn into_candidates(self) -> Candidates {
        let (tokens, sum_logprobs) = self.entries.into_iter().unzip();
        Candidates {
            tokens,
            sum_logprobs,
        }
    }
}

/// Expansion candidate: score plus source row.
#[derive(Clone, Copy)]
struct Expansion {
    score: f32,
    source: usize,
}

// ---------------------------------------------------------------------------
// BeamSearchDecoder
// ---------------------------------------------------------------------------

/// Beam search over `beam_size` rows per audio.
pub struct BeamSearchDecoder<S: CandidateScorer> {
    beam_size: usize,
    eot: u32,
    max_candidates: usize,
    scorer: S,
    finished: Option<Vec<FinishedSet>>,
}

impl<S: CandidateScorer> BeamSearchDecoder<S> {
    /// `max_candidates = round(beam_size * patience)` (ties to even), which
    /// must be positive.
    pub fn new(beam_size: usize, eot: u32, patience: Option<f32>, scorer: S) -> Result<Self> {
        let patience = patience.unwrap_or(1.0);
        let max_candidates = (beam_size as f32 * patience).round_ties_even();
        if !(max_candidates >= 1.0) {
            return Err(DecodeError::InvalidBeam {
                beam_size,
                patience,
            });
        }
        Ok(Self {
            beam_size,
            eot,
            max_candidates: max_candidates as usize,
            scorer,
            finished: None,
        })
    }

    /// Finished sequences collected so far, per audio.
    pub fn finished(&self) -> &[FinishedSet] {
        self.finished.as_deref().unwrap_or(&[])
    }

    /// Cap on finished sequences per audio.
    pub fn max_candidates(&self) -> usize {
        self.max_candidates
    }
}

impl<S: CandidateScorer> TokenDecoder for BeamSearchDecoder<S> {
    fn name(&self) -> &'static str {
        "beam"
    }

    fn reset(&mut self) {
        self.finished = None;
    }

    fn update(
        &mut self,
        tokens: TokenBatch,
        logits: &Array2<f32>,
        sum_logprobs: &mut Vec<f32>,
        inference: &mut dyn Inference,
    ) -> Result<(TokenBatch, bool)> {
        let rows = tokens.n_rows();
        if rows % self.beam_size != 0 {
            return Err(DecodeError::BatchNotDivisible {
                rows,
                beam_size: self.beam_size,
            });
        }
        let n_audio = rows / self.beam_size;
        let finished = self
            .finished
            .get_or_insert_with(|| vec![FinishedSet::default(); n_audio]);

        let mut next_rows: Vec<Vec<u32>> = Vec::with_capacity(rows);
        let mut next_sums: Vec<f32> = Vec::with_capacity(rows);
        let mut source_indices: Vec<usize> = Vec::with_capacity(rows);
        let mut newly_finished: Vec<FinishedSet> = Vec::with_capacity(n_audio);

        for audio in 0..n_audio {
            let started = Instant::now();
            let mut order: Vec<Vec<u32>> = Vec::new();
            let mut expansions: HashMap<Vec<u32>, Expansion> = HashMap::new();

            for j in 0..self.beam_size {
                let idx = audio * self.beam_size + j;
                let prefix = tokens.row(idx);
                let logprobs = log_softmax(logits.row(idx));
                let scores = self.scorer.score_row(prefix, logprobs.view());

                for (token, score) in top_k(scores.view(), self.beam_size + 1) {
                    let mut sequence = prefix.to_vec();
                    sequence.push(token as u32);
                    let expansion = Expansion {
                        score: sum_logprobs[idx] + score,
                        source: idx,
                    };
                    if expansions.insert(sequence.clone(), expansion).is_none() {
                        order.push(sequence);
                    }
                }
            }

            order.sort_by(|a, b| descending(expansions[a].score, expansions[b].score));

            let mut finished_now = FinishedSet::default();
            let mut saved = 0;
            for sequence in order {
                let Expansion { score, source } = expansions[&sequence];
                if sequence.last() == Some(&self.eot) {
                    finished_now.insert(sequence, score);
                } else {
                    next_sums.push(score);
                    next_rows.push(sequence);
                    source_indices.push(source);
                    saved += 1;
                    if saved == self.beam_size {
                        break;
                    }
                }
            }
            newly_finished.push(finished_now);
            log::trace!(
                "beam: audio {audio} expanded with {} scorer in {:?}",
                self.scorer.name(),
                started.elapsed()
            );
        }

        inference.rearrange_cache(&source_indices)?;

        if finished.len() != newly_finished.len() {
            return Err(DecodeError::InconsistentResult(vec![
                finished.len(),
                newly_finished.len(),
            ]));
        }
        for (previous, newly) in finished.iter_mut().zip(newly_finished) {
            for (sequence, score) in newly.sorted() {
                if previous.len() >= self.max_candidates {
                    break;
                }
                previous.insert(sequence, score);
            }
        }

        let completed = finished.iter().all(|f| f.len() >= self.max_candidates);
        *sum_logprobs = next_sums;
        Ok((TokenBatch::from_rows(next_rows)?, completed))
    }

    fn finalize(
        &mut self,
        groups: Vec<Vec<Vec<u32>>>,
        sum_logprobs: &[f32],
    ) -> Result<Vec<Candidates>> {
        let mut finished = self
            .finished
            .take()
            .unwrap_or_else(|| vec![FinishedSet::default(); groups.len()]);
        if finished.len() != groups.len() {
            return Err(DecodeError::InconsistentResult(vec![
                finished.len(),
                groups.len(),
            ]));
        }

        // Padding stops at the candidate cap as well, so a patience below 1
        // never yields more than `max_candidates` sequences.
        let target = self.beam_size.min(self.max_candidates);
        let mut offset = 0;
        for (set, group) in finished.iter_mut().zip(&groups) {
            let scores = &sum_logprobs[offset..offset + group.len()];
            offset += group.len();
            if set.len() >= target {
                continue;
            }
            let mut rows: Vec<usize> = (0..group.len()).collect();
            rows.sort_by(|&a, &b| descending(scores[a], scores[b]));
            for j in rows {
                let mut sequence = group[j].clone();
                sequence.push(self.eot);
                set.insert(sequence, scores[j]);
                if set.len() >= target {
                    break;
                }
            }
        }

        Ok(finished.into_iter().map(FinishedSet::into_candidates).collect())
    }
}
