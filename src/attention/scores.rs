use burn_core as burn;

use burn::tensor::backend::Backend;
use burn::tensor::{Bool, Tensor};
use burn_nn::Dropout;
use burn_tensor::activation::softmax;

use crate::error::{Result, WrapperError};

/// Additive bias for masked positions. Small enough to stay finite in half precision.
pub const MASK_BIAS: f32 = -1.0e4;

/// Attention over the full history.
///
/// `q` is `[B, H, T, D]`, `k` and `v` are `[B, H, Tk, D]`, and `bias` broadcasts
/// over heads as `[B, 1, T, Tk]`. Dropout acts on the normalized weights.
pub fn attend<B: Backend>(
    q: Tensor<B, 4>,
    k: Tensor<B, 4>,
    v: Tensor<B, 4>,
    bias: Tensor<B, 4>,
    dropout: &Dropout,
) -> Tensor<B, 4> {
    let [_, _, _, head_dim] = q.dims();
    let scores = q.matmul(k.transpose()).mul_scalar(1.0 / (head_dim as f64).sqrt()) + bias;
    let weights = dropout.forward(softmax(scores, 3));
    weights.matmul(v)
}

/// Causal plus padding bias `[B, 1, T, Tk]` for `t_query` new tokens.
///
/// `attention_mask` is `[B, Tk]` over the whole history; the new tokens occupy
/// its last `t_query` columns, so query `i` may see keys `0..=Tk - t_query + i`.
pub fn causal_padding_bias<B: Backend>(
    attention_mask: Tensor<B, 2>,
    t_query: usize,
) -> Result<Tensor<B, 4>> {
    let [batch, t_key] = attention_mask.dims();
    if t_query > t_key {
        return Err(WrapperError::ShapeMismatch {
            what: "attention_mask width",
            expected: t_query,
            actual: t_key,
        });
    }
    let device = attention_mask.device();
    let past_len = t_key - t_query;

    let padding: Tensor<B, 4, Bool> = attention_mask
        .lower_elem(0.5)
        .reshape([batch, 1, 1, t_key])
        .repeat_dim(2, t_query);
    let future = Tensor::<B, 2, Bool>::tril_mask([t_query, t_key], past_len as i64, &device)
        .reshape([1, 1, t_query, t_key])
        .repeat_dim(0, batch);

    // Future keys rank below padding so all-padding rows never look ahead.
    Ok(Tensor::<B, 4>::zeros([batch, 1, t_query, t_key], &device)
        .mask_fill(padding, MASK_BIAS)
        .mask_fill(future, 2.0 * MASK_BIAS))
}
