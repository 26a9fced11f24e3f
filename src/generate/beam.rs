use burn_core as burn;

use alloc::vec::Vec;
use burn::tensor::backend::Backend;

use super::{beam_step_inputs, expand_for_beams, host_log_probs};
use crate::cache::{GeneratorState, PastState};
use crate::error::{Result, WrapperError};
use crate::inputs::{int_to_vec, left_pad_to};
use crate::sequences::Sequences;
use crate::wrapper::{CausalLm, ModelWrapper};

/// Score given to the non-leading beams before the first step so they are not picked twice.
const INITIAL_BEAM_SCORE: f32 = -1.0e9;

#[derive(Clone, Debug)]
pub struct BeamSearchConfig {
    pub num_beams: usize,
    pub max_new_tokens: usize,
    pub eos_token: Option<i64>,
    /// Exponent on the generated length when ranking finished beams.
    pub length_penalty: f32,
    /// Hypotheses returned per prompt, best first. At most `num_beams`.
    pub num_return_sequences: usize,
    /// EOS is suppressed while the fed row (left-padded prompt plus generated
    /// tokens) is shorter than this.
    pub min_length: usize,
    /// Per-token switch over the vocabulary; `false` entries are never generated.
    pub vocab_mask: Option<Vec<bool>>,
    /// Stop a prompt as soon as it holds `num_beams` finished hypotheses.
    pub early_stopping: bool,
}

impl Default for BeamSearchConfig {
    fn default() -> Self {
        Self {
            num_beams: 4,
            max_new_tokens: 64,
            eos_token: None,
            length_penalty: 1.0,
            num_return_sequences: 1,
            min_length: 0,
            vocab_mask: None,
            early_stopping: false,
        }
    }
}

/// One finished hypothesis.
#[derive(Clone, Debug, PartialEq)]
pub struct BeamOutput {
    /// Prompt followed by the generated tokens, up to and including EOS.
    pub tokens: Vec<i64>,
    /// Sum of token log-probabilities divided by `generated_len ^ length_penalty`.
    pub score: f32,
}

#[derive(Clone, Copy)]
struct Candidate {
    score: f32,
    beam: usize,
    token: i64,
}

/// Best finished hypotheses of one prompt, sorted by score.
struct Hypotheses {
    best: Vec<BeamOutput>,
    capacity: usize,
    done: bool,
}

impl Hypotheses {
    fn new(capacity: usize) -> Self {
        Self {
            best: Vec::with_capacity(capacity + 1),
            capacity,
            done: false,
        }
    }

    fn add(&mut self, tokens: Vec<i64>, score: f32) {
        self.best.push(BeamOutput { tokens, score });
        self.best.sort_by(|x, y| {
            y.score
                .partial_cmp(&x.score)
                .unwrap_or(core::cmp::Ordering::Equal)
        });
        self.best.truncate(self.capacity);
    }

    /// Whether no live beam can still displace a kept hypothesis.
    fn is_done(&self, best_running: f32, generated: usize, cfg: &BeamSearchConfig) -> bool {
        if self.best.len() < self.capacity {
            return false;
        }
        if cfg.early_stopping {
            return true;
        }
        let worst = self.best.last().map(|h| h.score).unwrap_or(f32::NEG_INFINITY);
        worst >= normalized(best_running, generated, cfg.length_penalty)
    }
}

/// Beam search over a batch of prompts.
///
/// After every step the chosen source beams become the generator's
/// `input_seq_index`, so the wrapper reorders the cached state to follow them.
/// Returns `num_return_sequences` hypotheses per prompt, best first.
pub fn beam_search<B: Backend, M: CausalLm<B>>(
    wrapper: &ModelWrapper<B, M>,
    device: &B::Device,
    prompts: &[Vec<i64>],
    cfg: &BeamSearchConfig,
) -> Result<Vec<Vec<BeamOutput>>> {
    let nb = cfg.num_beams;
    if nb == 0 {
        return Err(WrapperError::InvalidConfig("num_beams must be positive".into()));
    }
    if cfg.num_return_sequences == 0 || cfg.num_return_sequences > nb {
        return Err(WrapperError::InvalidConfig(alloc::format!(
            "num_return_sequences must be in 1..={nb}, got {}",
            cfg.num_return_sequences
        )));
    }
    let pad = wrapper.config().pad_token;
    let filler = pad.id().or(cfg.eos_token).unwrap_or(0);
    let batch = prompts.len();
    let bb = batch * nb;
    let width = prompts.iter().map(|p| p.len()).max().unwrap_or(0);

    let padded = left_pad_to::<B>(prompts, width, pad, device)?;
    let mut input_ids = expand_for_beams(padded, nb);
    let mut sequences = Sequences::new(&rows_of(input_ids.clone(), width)?, width + cfg.max_new_tokens)?;

    let mut scores: Vec<f32> = (0..bb)
        .map(|slot| if slot % nb == 0 { 0.0 } else { INITIAL_BEAM_SCORE })
        .collect();
    let mut hyps: Vec<Hypotheses> = (0..batch).map(|_| Hypotheses::new(nb)).collect();
    let mut generated = 0usize;
    let mut past: Option<PastState<B>> = None;
    let mut state: Option<GeneratorState<B>> = None;

    for step in 0..cfg.max_new_tokens {
        let out = wrapper.forward(input_ids, past.take(), state.as_ref())?;
        let (mut log_probs, vocab) = host_log_probs(out.last_logits())?;
        suppress_tokens(&mut log_probs, vocab, sequences.sequence_length(), cfg)?;

        let mut beam_indices = Vec::with_capacity(bb);
        let mut next_tokens = Vec::with_capacity(bb);
        let mut next_scores = Vec::with_capacity(bb);
        for (b, prompt) in prompts.iter().enumerate() {
            if hyps[b].done {
                // Keep the slots in place; their tokens are never read back.
                for slot in b * nb..(b + 1) * nb {
                    beam_indices.push(slot as i64);
                    next_tokens.push(filler);
                    next_scores.push(scores[slot]);
                }
                continue;
            }

            let mut candidates = Vec::with_capacity(nb * vocab);
            for slot in b * nb..(b + 1) * nb {
                let row = &log_probs[slot * vocab..(slot + 1) * vocab];
                candidates.extend(row.iter().enumerate().map(|(tok, &lp)| Candidate {
                    score: scores[slot] + lp,
                    beam: slot,
                    token: tok as i64,
                }));
            }
            candidates.sort_by(|x, y| {
                y.score
                    .partial_cmp(&x.score)
                    .unwrap_or(core::cmp::Ordering::Equal)
            });

            let start = width - prompt.len();
            let mut chosen = 0;
            let mut best_running = f32::NEG_INFINITY;
            for (rank, c) in candidates.iter().enumerate() {
                if cfg.eos_token == Some(c.token) {
                    // EOS ranked below the beam width is not a hypothesis.
                    if rank < nb {
                        let mut tokens = sequences.sequence(c.beam)[start..].to_vec();
                        tokens.push(c.token);
                        hyps[b].add(tokens, normalized(c.score, generated + 1, cfg.length_penalty));
                    }
                    continue;
                }
                if chosen == 0 {
                    best_running = c.score;
                }
                beam_indices.push(c.beam as i64);
                next_tokens.push(c.token);
                next_scores.push(c.score);
                chosen += 1;
                if chosen == nb {
                    break;
                }
            }
            if chosen < nb {
                return Err(WrapperError::ShapeMismatch {
                    what: "beam candidates",
                    expected: nb,
                    actual: chosen,
                });
            }
            hyps[b].done = hyps[b].is_done(best_running, generated + 1, cfg);
        }

        sequences.append_next_tokens(&beam_indices, &next_tokens)?;
        scores = next_scores;
        generated += 1;
        log::debug!(
            "beam step {step}: prompts done {}/{}",
            hyps.iter().filter(|h| h.done).count(),
            batch
        );
        if hyps.iter().all(|h| h.done) {
            break;
        }

        state = Some(GeneratorState::from_host_index(beam_indices, device));
        past = out.present;
        input_ids = beam_step_inputs::<B>(&sequences, pad, device)?;
    }

    let mut outputs = Vec::with_capacity(batch);
    for (b, (prompt, mut h)) in prompts.iter().zip(hyps).enumerate() {
        if !h.done {
            let start = width - prompt.len();
            for slot in b * nb..(b + 1) * nb {
                let tokens = sequences.sequence(slot)[start..].to_vec();
                h.add(tokens, normalized(scores[slot], generated, cfg.length_penalty));
            }
        }
        h.best.truncate(cfg.num_return_sequences);
        outputs.push(h.best);
    }
    Ok(outputs)
}

/// Mask tokens the configuration forbids at this step, on host log-probabilities.
fn suppress_tokens(
    log_probs: &mut [f32],
    vocab: usize,
    seq_len: usize,
    cfg: &BeamSearchConfig,
) -> Result<()> {
    if let Some(mask) = &cfg.vocab_mask {
        if mask.len() != vocab {
            return Err(WrapperError::ShapeMismatch {
                what: "vocab_mask",
                expected: vocab,
                actual: mask.len(),
            });
        }
        for row in log_probs.chunks_mut(vocab) {
            for (lp, &allowed) in row.iter_mut().zip(mask) {
                if !allowed {
                    *lp = f32::NEG_INFINITY;
                }
            }
        }
    }
    if let Some(eos) = cfg.eos_token {
        if seq_len < cfg.min_length && (eos as usize) < vocab && eos >= 0 {
            for row in log_probs.chunks_mut(vocab) {
                row[eos as usize] = f32::NEG_INFINITY;
            }
        }
    }
    Ok(())
}

fn normalized(score: f32, generated: usize, length_penalty: f32) -> f32 {
    score / (generated.max(1) as f32).powf(length_penalty)
}

fn rows_of<B: Backend>(ids: burn::tensor::Tensor<B, 2, burn::tensor::Int>, width: usize) -> Result<Vec<Vec<i64>>> {
    let flat = int_to_vec(ids)?;
    Ok(flat.chunks(width).map(|c| c.to_vec()).collect())
}
