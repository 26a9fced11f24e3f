use burn_core as burn;

use alloc::boxed::Box;
use alloc::vec::Vec;
use burn::tensor::{backend::Backend, Int, Tensor, TensorData};
use burn_tensor::activation::{log_softmax, softmax};

use crate::error::{Result, WrapperError};
use crate::inputs::float_to_vec;

/// Basic logits processing configuration for sampling.
#[derive(Clone, Copy, Debug, Default)]
pub struct SamplerConfig {
    pub temperature: f32,             // <= 0.0 means greedy
    pub top_k: Option<usize>,         // keep top-k logits, mask others
    pub repetition_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
}

impl SamplerConfig {
    pub fn greedy() -> Self {
        Self::default()
    }
}

/// Apply temperature scaling to logits. No-op if `temperature <= 0` or `temperature == 1`.
pub fn apply_temperature<B: Backend>(logits: Tensor<B, 2>, temperature: f32) -> Tensor<B, 2> {
    if temperature > 0.0 && (temperature - 1.0).abs() > f32::EPSILON {
        logits.div_scalar(temperature)
    } else {
        logits
    }
}

/// Mask logits outside the top-k per row by setting them to -inf.
/// Sorts on the host.
pub fn apply_top_k<B: Backend>(logits: Tensor<B, 2>, k: usize) -> Result<Tensor<B, 2>> {
    if k == 0 {
        return Ok(logits);
    }
    let device = logits.device();
    let [b, v] = logits.dims();
    let data = float_to_vec(logits)?;
    let mut out: Vec<f32> = alloc::vec![f32::NEG_INFINITY; b * v];
    for bi in 0..b {
        let row = &data[bi * v..(bi + 1) * v];
        let mut idx: Vec<usize> = (0..v).collect();
        idx.sort_unstable_by(|&i, &j| row[j].partial_cmp(&row[i]).unwrap_or(core::cmp::Ordering::Equal));
        for &col in idx.iter().take(k.min(v)) {
            out[bi * v + col] = row[col];
        }
    }
    Ok(Tensor::<B, 2>::from_data(TensorData::new(out, [b, v]), &device))
}

/// Apply repetition, frequency and presence penalties using token history.
pub fn apply_penalties<B: Backend>(
    logits: Tensor<B, 2>,
    tokens_history: Option<&[Vec<i64>]>,
    repetition_penalty: Option<f32>,
    frequency_penalty: Option<f32>,
    presence_penalty: Option<f32>,
) -> Result<Tensor<B, 2>> {
    let Some(history) = tokens_history else {
        return Ok(logits);
    };
    if repetition_penalty.is_none() && frequency_penalty.is_none() && presence_penalty.is_none() {
        return Ok(logits);
    }
    let [b, v] = logits.dims();
    let device = logits.device();
    let mut out = float_to_vec(logits)?;
    let rep = repetition_penalty.unwrap_or(1.0);
    let freq = frequency_penalty.unwrap_or(0.0);
    let pres = presence_penalty.unwrap_or(0.0);

    for (bi, row_history) in history.iter().enumerate().take(b) {
        let mut counts = alloc::vec![0usize; v];
        for &tok in row_history {
            if tok >= 0 && (tok as usize) < v {
                counts[tok as usize] += 1;
            }
        }
        for (tok, &c) in counts.iter().enumerate() {
            if c == 0 {
                continue;
            }
            let idx = bi * v + tok;
            // Repetition penalty shrinks positive logits and pushes negative ones further down.
            if rep != 1.0 {
                let l = out[idx];
                out[idx] = if l > 0.0 { l / rep } else { l * rep };
            }
            out[idx] -= freq * c as f32 + pres;
        }
    }
    Ok(Tensor::<B, 2>::from_data(TensorData::new(out, [b, v]), &device))
}

/// Greedy sampling (argmax).
pub fn sample_greedy<B: Backend>(logits: Tensor<B, 2>) -> Tensor<B, 1, Int> {
    let [b, _v] = logits.dims();
    logits.argmax(1).reshape([b])
}

/// Multinomial sampling after softmax, on the host.
pub fn sample_multinomial<B: Backend>(logits: Tensor<B, 2>) -> Result<Tensor<B, 1, Int>> {
    use rand::distr::{weighted::WeightedIndex, Distribution};

    let [b, v] = logits.dims();
    let device = logits.device();
    let probs = float_to_vec(softmax(logits, 1))?;
    let mut rng = rand::rng();
    let mut out = alloc::vec![0i64; b];
    for (bi, slot) in out.iter_mut().enumerate() {
        let row = &probs[bi * v..(bi + 1) * v];
        let dist = WeightedIndex::new(row.iter().map(|&p| if p.is_finite() && p > 0.0 { p } else { 0.0 }))
            .map_err(|e| WrapperError::Data(alloc::format!("row {bi}: {e}")))?;
        *slot = dist.sample(&mut rng) as i64;
    }
    Ok(Tensor::<B, 1, Int>::from_data(TensorData::new(out, [b]), &device))
}

/// Row-wise log-probabilities, `[batch, vocab]`.
pub fn log_softmax_rows<B: Backend>(logits: Tensor<B, 2>) -> Tensor<B, 2> {
    log_softmax(logits, 1)
}

/// Apply typical processors to logits and sample next tokens.
pub fn process_and_sample<B: Backend>(
    logits: Tensor<B, 2>,
    tokens_history: Option<&[Vec<i64>]>,
    cfg: SamplerConfig,
) -> Result<Tensor<B, 1, Int>> {
    let mut list = ProcessorList::new();
    list.push(PenaltyProcessor {
        repetition_penalty: cfg.repetition_penalty,
        frequency_penalty: cfg.frequency_penalty,
        presence_penalty: cfg.presence_penalty,
    });
    if let Some(k) = cfg.top_k {
        list.push(TopKProcessor { k });
    }
    list.push(TemperatureProcessor { temperature: cfg.temperature });
    let l = list.apply(logits, tokens_history)?;
    if cfg.temperature <= 0.0 {
        Ok(sample_greedy(l))
    } else {
        sample_multinomial(l)
    }
}

/// A composable logits processor.
pub trait LogitsProcessor<B: Backend> {
    fn process(&self, logits: Tensor<B, 2>, history: Option<&[Vec<i64>]>) -> Result<Tensor<B, 2>>;
}

/// Applies processors in insertion order.
pub struct ProcessorList<B: Backend> {
    procs: Vec<Box<dyn LogitsProcessor<B>>>,
}

impl<B: Backend> Default for ProcessorList<B> {
    fn default() -> Self {
        Self { procs: Vec::new() }
    }
}

impl<B: Backend> ProcessorList<B> {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn push<P: LogitsProcessor<B> + 'static>(&mut self, p: P) {
        self.procs.push(Box::new(p));
    }
    pub fn len(&self) -> usize {
        self.procs.len()
    }
    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }
    pub fn apply(&self, mut logits: Tensor<B, 2>, history: Option<&[Vec<i64>]>) -> Result<Tensor<B, 2>> {
        for p in &self.procs {
            logits = p.process(logits, history)?;
        }
        Ok(logits)
    }
}

pub struct TemperatureProcessor {
    pub temperature: f32,
}
impl<B: Backend> LogitsProcessor<B> for TemperatureProcessor {
    fn process(&self, logits: Tensor<B, 2>, _history: Option<&[Vec<i64>]>) -> Result<Tensor<B, 2>> {
        Ok(apply_temperature(logits, self.temperature))
    }
}

pub struct TopKProcessor {
    pub k: usize,
}
impl<B: Backend> LogitsProcessor<B> for TopKProcessor {
    fn process(&self, logits: Tensor<B, 2>, _history: Option<&[Vec<i64>]>) -> Result<Tensor<B, 2>> {
        apply_top_k(logits, self.k)
    }
}

pub struct PenaltyProcessor {
    pub repetition_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
}
impl<B: Backend> LogitsProcessor<B> for PenaltyProcessor {
    fn process(&self, logits: Tensor<B, 2>, history: Option<&[Vec<i64>]>) -> Result<Tensor<B, 2>> {
        apply_penalties(
            logits,
            history,
            self.repetition_penalty,
            self.frequency_penalty,
            self.presence_penalty,
        )
    }
}
