use burn_core as burn;

use alloc::vec::Vec;
use burn::tensor::{backend::Backend, Int, Tensor, TensorData};

use crate::cache::PastState;
use crate::config::{MaskDType, PadToken};
use crate::error::{Result, WrapperError};

/// Tensors a decoder-only model consumes for one step.
#[derive(Clone, Debug)]
pub struct ModelInputs<B: Backend> {
    /// `[batch, seq]` token ids.
    pub input_ids: Tensor<B, 2, Int>,
    /// `[batch, seq]` positions within the unpadded prefix.
    pub position_ids: Tensor<B, 2, Int>,
    /// `[batch, history]` 1 for real tokens, 0 for padding.
    pub attention_mask: Tensor<B, 2>,
    pub past: Option<PastState<B>>,
}

impl<B: Backend> ModelInputs<B> {
    pub const INPUT_IDS: &'static str = "input_ids";
    pub const POSITION_IDS: &'static str = "position_ids";
    pub const ATTENTION_MASK: &'static str = "attention_mask";
    pub const PAST: &'static str = "past";

    /// Names of the entries present, in model-argument order.
    pub fn keys(&self) -> Vec<&'static str> {
        let mut keys = alloc::vec![Self::INPUT_IDS, Self::POSITION_IDS, Self::ATTENTION_MASK];
        if self.past.is_some() {
            keys.push(Self::PAST);
        }
        keys
    }

    pub fn batch_size(&self) -> usize {
        self.input_ids.dims()[0]
    }

    /// Number of new tokens fed this step.
    pub fn seq_len(&self) -> usize {
        self.input_ids.dims()[1]
    }

    /// Number of positions covered by the attention mask (cached plus new).
    pub fn history_len(&self) -> usize {
        self.attention_mask.dims()[1]
    }

    /// Keep only the last column of `input_ids` and `position_ids`.
    ///
    /// The attention mask keeps the whole history.
    pub fn last_token_only(mut self) -> Self {
        let [b, t] = self.input_ids.dims();
        if t > 1 {
            self.input_ids = self.input_ids.slice([0..b, t - 1..t]);
            self.position_ids = self.position_ids.slice([0..b, t - 1..t]);
        }
        self
    }
}

/// Derive positions and attention mask for a padded token batch.
///
/// Positions count non-pad tokens from the left, minus one, so leading pads
/// sit at position 0 together with the first real token.
pub fn preprocess_inputs<B: Backend>(
    input_ids: Tensor<B, 2, Int>,
    pad: PadToken,
    dtype: MaskDType,
) -> Result<ModelInputs<B>> {
    let [batch, seq] = input_ids.dims();
    if seq == 0 {
        return Err(WrapperError::EmptySequence);
    }
    if pad.is_disabled() && batch > 1 {
        return Err(WrapperError::PaddingDisabledBatch { batch });
    }

    let mask = input_ids.clone().equal_elem(pad.sentinel()).bool_not();
    let position_ids = mask.clone().int().cumsum(1).sub_scalar(1).clamp_min(0);
    let attention_mask = mask.float().cast(dtype.resolve::<B>());

    log::trace!("preprocessed batch={batch} seq={seq} pad={pad:?}");
    Ok(ModelInputs {
        input_ids,
        position_ids,
        attention_mask,
        past: None,
    })
}

/// Build a left-padded `[batch, max_len]` id tensor so every row ends on its newest token.
pub fn left_pad_batch<B: Backend>(
    rows: &[Vec<i64>],
    pad: PadToken,
    device: &B::Device,
) -> Result<Tensor<B, 2, Int>> {
    let width = rows.iter().map(|r| r.len()).max().unwrap_or(0);
    left_pad_to(rows, width, pad, device)
}

/// Left-pad every row to exactly `width` columns.
pub fn left_pad_to<B: Backend>(
    rows: &[Vec<i64>],
    width: usize,
    pad: PadToken,
    device: &B::Device,
) -> Result<Tensor<B, 2, Int>> {
    let batch = rows.len();
    if batch == 0 || width == 0 {
        return Err(WrapperError::EmptySequence);
    }
    if let Some(row) = rows.iter().find(|r| r.len() > width) {
        return Err(WrapperError::ShapeMismatch {
            what: "row length",
            expected: width,
            actual: row.len(),
        });
    }
    let ragged = rows.iter().any(|r| r.len() != width);
    let fill = match pad {
        PadToken::Id(id) => id,
        PadToken::Disabled if !ragged => 0,
        PadToken::Disabled => return Err(WrapperError::PaddingDisabledBatch { batch }),
    };
    let mut flat = Vec::with_capacity(batch * width);
    for row in rows {
        flat.extend(core::iter::repeat(fill).take(width - row.len()));
        flat.extend_from_slice(row);
    }
    Ok(Tensor::<B, 2, Int>::from_data(TensorData::new(flat, [batch, width]), device))
}

/// Copy an integer tensor to the host as `i64`.
pub fn int_to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D, Int>) -> Result<Vec<i64>> {
    tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| WrapperError::Data(alloc::format!("{e:?}")))
}

/// Copy a float tensor to the host as `f32`.
pub fn float_to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| WrapperError::Data(alloc::format!("{e:?}")))
}
