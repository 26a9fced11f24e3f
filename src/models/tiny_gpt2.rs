use burn_core as burn;

use alloc::vec::Vec;
use burn::config::Config;
use burn::module::{Ignored, Module};
use burn::tensor::{backend::Backend, Tensor};
use burn_nn::{
    Dropout, DropoutConfig, Embedding, EmbeddingConfig, LayerNorm, LayerNormConfig, Linear,
    LinearConfig,
};
use burn_tensor::activation::gelu;

use crate::attention::{attend, causal_padding_bias};
use crate::cache::{split_layer, stack_layer, PastState};
use crate::error::{self, WrapperError};
use crate::inputs::ModelInputs;
use crate::wrapper::{CausalLm, ForwardOutput};

/// Configuration for a small GPT-2 style decoder.
#[derive(Config, Debug)]
pub struct TinyGpt2Config {
    pub vocab_size: usize,
    pub n_embd: usize,
    pub n_layer: usize,
    pub n_head: usize,
    #[config(default = 1024)]
    pub n_positions: usize,
    #[config(default = 1e-5)]
    pub layer_norm_epsilon: f64,
    #[config(default = 0.0)]
    pub dropout: f64,
}

#[derive(Debug, serde::Deserialize)]
struct Gpt2JsonConfig {
    pub vocab_size: usize,
    pub n_embd: usize,
    pub n_layer: usize,
    pub n_head: usize,
    #[serde(default)]
    pub n_positions: Option<usize>,
    #[serde(default)]
    pub layer_norm_epsilon: Option<f64>,
}

impl TinyGpt2Config {
    pub fn from_config_json(path: &std::path::Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let cfg: Gpt2JsonConfig = serde_json::from_str(&data)?;
        anyhow::ensure!(cfg.n_head > 0, "n_head must be positive");
        anyhow::ensure!(cfg.n_embd % cfg.n_head == 0, "n_embd must be a multiple of n_head");
        let mut out = TinyGpt2Config::new(cfg.vocab_size, cfg.n_embd, cfg.n_layer, cfg.n_head);
        if let Some(n) = cfg.n_positions {
            out = out.with_n_positions(n);
        }
        if let Some(eps) = cfg.layer_norm_epsilon {
            out = out.with_layer_norm_epsilon(eps);
        }
        Ok(out)
    }

    pub fn head_dim(&self) -> usize {
        self.n_embd / self.n_head
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> error::Result<TinyGpt2<B>> {
        if self.n_head == 0 || self.n_embd % self.n_head != 0 {
            return Err(WrapperError::InvalidConfig(alloc::format!(
                "n_embd ({}) must be a multiple of n_head ({})",
                self.n_embd, self.n_head
            )));
        }

        let wte = EmbeddingConfig::new(self.vocab_size, self.n_embd).init::<B>(device);
        let wpe = EmbeddingConfig::new(self.n_positions, self.n_embd).init::<B>(device);

        let mut blocks = Vec::with_capacity(self.n_layer);
        for _ in 0..self.n_layer {
            blocks.push(Gpt2Block {
                ln_1: LayerNormConfig::new(self.n_embd)
                    .with_epsilon(self.layer_norm_epsilon)
                    .init(device),
                c_attn: LinearConfig::new(self.n_embd, 3 * self.n_embd).init(device),
                c_proj: LinearConfig::new(self.n_embd, self.n_embd).init(device),
                ln_2: LayerNormConfig::new(self.n_embd)
                    .with_epsilon(self.layer_norm_epsilon)
                    .init(device),
                mlp_fc: LinearConfig::new(self.n_embd, 4 * self.n_embd).init(device),
                mlp_proj: LinearConfig::new(4 * self.n_embd, self.n_embd).init(device),
                dropout: DropoutConfig::new(self.dropout).init(),
                n_head: self.n_head,
            });
        }

        Ok(TinyGpt2 {
            wte,
            wpe,
            blocks,
            ln_f: LayerNormConfig::new(self.n_embd)
                .with_epsilon(self.layer_norm_epsilon)
                .init(device),
            lm_head: LinearConfig::new(self.n_embd, self.vocab_size)
                .with_bias(false)
                .init(device),
            cfg: Ignored(self.clone()),
        })
    }
}

#[derive(Module, Debug)]
pub struct Gpt2Block<B: Backend> {
    ln_1: LayerNorm<B>,
    c_attn: Linear<B>,
    c_proj: Linear<B>,
    ln_2: LayerNorm<B>,
    mlp_fc: Linear<B>,
    mlp_proj: Linear<B>,
    dropout: Dropout,
    n_head: usize,
}

impl<B: Backend> Gpt2Block<B> {
    /// Returns the new hidden state and this layer's cache over the full history.
    fn forward(
        &self,
        hidden: Tensor<B, 3>,
        bias: Tensor<B, 4>,
        past: Option<Tensor<B, 5>>,
    ) -> (Tensor<B, 3>, Tensor<B, 5>) {
        let [b, t, c] = hidden.dims();
        let h = self.n_head;
        let d = c / h;

        let qkv = self.c_attn.forward(self.ln_1.forward(hidden.clone()));
        let heads = |from: usize| {
            qkv.clone()
                .slice([0..b, 0..t, from..from + c])
                .reshape([b, t, h, d])
                .swap_dims(1, 2)
        };
        let q = heads(0);
        let mut k = heads(c);
        let mut v = heads(2 * c);

        if let Some(layer) = past {
            let (past_k, past_v) = split_layer(layer);
            k = Tensor::cat(alloc::vec![past_k, k], 2);
            v = Tensor::cat(alloc::vec![past_v, v], 2);
        }
        let present = stack_layer(k.clone(), v.clone());

        let context = attend(q, k, v, bias, &self.dropout)
            .swap_dims(1, 2)
            .reshape([b, t, c]);
        let hidden = hidden + self.dropout.forward(self.c_proj.forward(context));

        let up = gelu(self.mlp_fc.forward(self.ln_2.forward(hidden.clone())));
        let hidden = hidden + self.dropout.forward(self.mlp_proj.forward(up));
        (hidden, present)
    }
}

#[derive(Module, Debug)]
pub struct TinyGpt2<B: Backend> {
    wte: Embedding<B>,
    wpe: Embedding<B>,
    blocks: Vec<Gpt2Block<B>>,
    ln_f: LayerNorm<B>,
    lm_head: Linear<B>,
    cfg: Ignored<TinyGpt2Config>,
}

impl<B: Backend> TinyGpt2<B> {
    pub fn config(&self) -> &TinyGpt2Config {
        &self.cfg.0
    }
}

impl<B: Backend> CausalLm<B> for TinyGpt2<B> {
    fn forward(&self, inputs: ModelInputs<B>) -> error::Result<ForwardOutput<B>> {
        let t_query = inputs.seq_len();
        let past_len = inputs.past.as_ref().map(|p| p.seq_len()).unwrap_or(0);
        if inputs.history_len() != past_len + t_query {
            return Err(WrapperError::ShapeMismatch {
                what: "attention_mask width",
                expected: past_len + t_query,
                actual: inputs.history_len(),
            });
        }
        let mut past_layers: Vec<Option<Tensor<B, 5>>> = match inputs.past {
            Some(past) => {
                if past.num_layers() != self.blocks.len() {
                    return Err(WrapperError::ShapeMismatch {
                        what: "past layers",
                        expected: self.blocks.len(),
                        actual: past.num_layers(),
                    });
                }
                past.into_layers().into_iter().map(Some).collect()
            }
            None => (0..self.blocks.len()).map(|_| None).collect(),
        };

        let bias = causal_padding_bias(inputs.attention_mask, t_query)?;
        let mut hidden = self.wte.forward(inputs.input_ids) + self.wpe.forward(inputs.position_ids);

        let mut present = Vec::with_capacity(self.blocks.len());
        for (block, past) in self.blocks.iter().zip(past_layers.iter_mut()) {
            let (next, layer) = block.forward(hidden, bias.clone(), past.take());
            hidden = next;
            present.push(layer);
        }

        let logits = self.lm_head.forward(self.ln_f.forward(hidden));
        Ok(ForwardOutput {
            logits,
            present: Some(PastState::new(present)),
        })
    }
}
