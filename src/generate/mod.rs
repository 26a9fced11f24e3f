use burn_core as burn;

use alloc::vec::Vec;
use burn::tensor::{backend::Backend, Int, Tensor, TensorData};

use crate::cache::{GeneratorState, PastState};
use crate::error::{Result, WrapperError};
use crate::inputs::{float_to_vec, int_to_vec, left_pad_to};
use crate::sampling::{log_softmax_rows, process_and_sample, SamplerConfig};
use crate::sequences::Sequences;
use crate::wrapper::{CausalLm, ModelWrapper};

pub mod beam;

pub use beam::{beam_search, BeamOutput, BeamSearchConfig};

/// Configuration for text generation.
#[derive(Clone, Debug)]
pub struct GenerationConfig {
    pub max_new_tokens: usize,
    pub eos_token: Option<i64>,
    pub sampler: SamplerConfig,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: 128,
            eos_token: None,
            sampler: SamplerConfig {
                temperature: 1.0,
                top_k: Some(50),
                repetition_penalty: None,
                frequency_penalty: None,
                presence_penalty: None,
            },
        }
    }
}

/// Repeat every row `num_beams` times: `[B, T] -> [B * num_beams, T]`.
pub fn expand_for_beams<B: Backend>(input_ids: Tensor<B, 2, Int>, num_beams: usize) -> Tensor<B, 2, Int> {
    if num_beams <= 1 {
        return input_ids;
    }
    let [batch, _] = input_ids.dims();
    let index: Vec<i64> = (0..batch as i64)
        .flat_map(|b| core::iter::repeat(b).take(num_beams))
        .collect();
    let device = input_ids.device();
    let index = Tensor::<B, 1, Int>::from_data(TensorData::new(index, [batch * num_beams]), &device);
    input_ids.select(0, index)
}

/// Generate tokens for a batch of prompts.
///
/// Prompts are left-padded so every row ends on its newest token. A row that
/// emits `eos_token` is retired: later steps drop it from the batch and the
/// cached state is pruned through the generator's `input_seq_index`.
/// Returns each prompt followed by its generated tokens.
pub fn generate<B: Backend, M: CausalLm<B>>(
    wrapper: &ModelWrapper<B, M>,
    device: &B::Device,
    prompts: &[Vec<i64>],
    cfg: &GenerationConfig,
) -> Result<Vec<Vec<i64>>> {
    let pad = wrapper.config().pad_token;
    let mut tokens: Vec<Vec<i64>> = prompts.to_vec();
    let mut width = prompts.iter().map(|p| p.len()).max().unwrap_or(0);
    let mut active: Vec<usize> = (0..prompts.len()).collect();
    let mut past: Option<PastState<B>> = None;
    let mut state: Option<GeneratorState<B>> = None;

    for step in 0..cfg.max_new_tokens {
        let rows: Vec<Vec<i64>> = active.iter().map(|&i| tokens[i].clone()).collect();
        let input_ids = left_pad_to::<B>(&rows, width, pad, device)?;
        let out = wrapper.forward(input_ids, past.take(), state.as_ref())?;

        let next = process_and_sample(out.last_logits(), Some(rows.as_slice()), cfg.sampler)?;
        let next = int_to_vec(next)?;

        let mut keep = Vec::with_capacity(active.len());
        for (slot, (&row, &tok)) in active.iter().zip(next.iter()).enumerate() {
            tokens[row].push(tok);
            if cfg.eos_token != Some(tok) {
                keep.push(slot);
            }
        }
        width += 1;
        log::debug!(
            "step {step}: batch={} retired={}",
            active.len(),
            active.len() - keep.len()
        );
        if keep.is_empty() {
            break;
        }

        active = keep.iter().map(|&slot| active[slot]).collect();
        let index = keep.into_iter().map(|slot| slot as i64).collect();
        state = Some(GeneratorState::from_host_index(index, device));
        past = out.present;
    }
    Ok(tokens)
}

pub(crate) fn beam_step_inputs<B: Backend>(
    sequences: &Sequences,
    pad: crate::config::PadToken,
    device: &B::Device,
) -> Result<Tensor<B, 2, Int>> {
    left_pad_to::<B>(&sequences.to_rows(), sequences.sequence_length(), pad, device)
}

pub(crate) fn host_log_probs<B: Backend>(logits: Tensor<B, 2>) -> Result<(Vec<f32>, usize)> {
    let [_, vocab] = logits.dims();
    if vocab == 0 {
        return Err(WrapperError::ShapeMismatch {
            what: "vocab size",
            expected: 1,
            actual: 0,
        });
    }
    Ok((float_to_vec(log_softmax_rows(logits))?, vocab))
}
