use burn_core as burn;

use core::marker::PhantomData;

use burn::tensor::{backend::Backend, FloatDType, Int, Tensor};

use crate::cache::{GeneratorState, PastState};
use crate::config::WrapperConfig;
use crate::error::{Result, WrapperError};
use crate::inputs::{int_to_vec, preprocess_inputs, ModelInputs};

/// Output of one model step.
#[derive(Clone, Debug)]
pub struct ForwardOutput<B: Backend> {
    /// `[batch, seq, vocab]` logits for every fed position.
    pub logits: Tensor<B, 3>,
    /// Cache covering the full history after this step.
    pub present: Option<PastState<B>>,
}

impl<B: Backend> ForwardOutput<B> {
    /// Logits of the last fed position, `[batch, vocab]`.
    pub fn last_logits(&self) -> Tensor<B, 2> {
        let [b, t, v] = self.logits.dims();
        self.logits.clone().slice([0..b, t - 1..t, 0..v]).reshape([b, v])
    }
}

/// A decoder-only model that consumes prepared inputs.
///
/// Concrete models override [`CausalLm::forward`]; the provided body only reports
/// that no computation was supplied.
pub trait CausalLm<B: Backend> {
    fn forward(&self, inputs: ModelInputs<B>) -> Result<ForwardOutput<B>> {
        let _ = inputs;
        Err(WrapperError::ForwardUnimplemented {
            model: core::any::type_name::<Self>(),
        })
    }
}

/// Prepares inputs for a model across incremental decoding steps.
#[derive(Debug)]
pub struct ModelWrapper<B: Backend, M> {
    model: M,
    config: WrapperConfig,
    _backend: PhantomData<B>,
}

impl<B: Backend, M> ModelWrapper<B, M> {
    pub fn new(model: M, config: WrapperConfig) -> Self {
        let resolved = config.mask_dtype.resolve::<B>();
        if resolved != FloatDType::from(config.mask_dtype) {
            log::warn!(
                "{:?} attention masks are not supported on this backend, using {resolved:?}",
                config.mask_dtype
            );
        }
        Self {
            model,
            config,
            _backend: PhantomData,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn config(&self) -> &WrapperConfig {
        &self.config
    }

    pub fn into_model(self) -> M {
        self.model
    }

    /// Positions and attention mask for `input_ids` under the configured padding.
    pub fn preprocess_inputs(&self, input_ids: Tensor<B, 2, Int>) -> Result<ModelInputs<B>> {
        preprocess_inputs(input_ids, self.config.pad_token, self.config.mask_dtype)
    }

    /// Inputs for the next step.
    ///
    /// With no `past` this is the preprocessed full sequence. With `past`, only the
    /// newest token is fed, the attention mask keeps the whole history, and every
    /// cached layer is re-indexed by the generator's `input_seq_index`.
    pub fn get_model_inputs(
        &self,
        input_ids: Tensor<B, 2, Int>,
        past: Option<PastState<B>>,
        generator_state: Option<&GeneratorState<B>>,
    ) -> Result<ModelInputs<B>> {
        let inputs = self.preprocess_inputs(input_ids)?;
        let Some(past) = past else {
            return Ok(inputs);
        };

        let state = generator_state.ok_or(WrapperError::MissingSequenceIndex)?;
        let index = state
            .input_seq_index()
            .ok_or(WrapperError::MissingSequenceIndex)?
            .clone();
        let [len] = index.dims();
        if len != inputs.batch_size() {
            return Err(WrapperError::BatchMismatch {
                input: inputs.batch_size(),
                index: len,
            });
        }
        // A layerless cache has no rows to range-check against.
        if !past.is_empty() {
            check_index_range(&index, state.index_bounds(), past.batch_size())?;
        }

        log::debug!(
            "reindexing past: layers={} cached_batch={} -> batch={} history={}",
            past.num_layers(),
            past.batch_size(),
            inputs.batch_size(),
            inputs.history_len(),
        );
        let past = past.select_sequences(index);
        let mut inputs = inputs.last_token_only();
        inputs.past = Some(past);
        Ok(inputs)
    }
}

impl<B: Backend, M: CausalLm<B>> ModelWrapper<B, M> {
    /// Prepare inputs for this step and run the model on them.
    pub fn forward(
        &self,
        input_ids: Tensor<B, 2, Int>,
        model_state: Option<PastState<B>>,
        generator_state: Option<&GeneratorState<B>>,
    ) -> Result<ForwardOutput<B>> {
        let inputs = self.get_model_inputs(input_ids, model_state, generator_state)?;
        self.model.forward(inputs)
    }
}

fn check_index_range<B: Backend>(
    index: &Tensor<B, 1, Int>,
    bounds: Option<(i64, i64)>,
    cached_batch: usize,
) -> Result<()> {
    let out_of_range = |i: i64| i < 0 || i as usize >= cached_batch;
    let bad = match bounds {
        Some((lo, hi)) => [lo, hi].into_iter().find(|&i| out_of_range(i)),
        // Device-built indices are only read back in debug builds.
        None if cfg!(debug_assertions) => int_to_vec(index.clone())?
            .into_iter()
            .find(|&i| out_of_range(i)),
        None => None,
    };
    match bad {
        Some(index) => Err(WrapperError::SequenceIndexOutOfRange {
            index,
            batch: cached_batch,
        }),
        None => Ok(()),
    }
}
