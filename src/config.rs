use burn_core as burn;

use burn::config::Config;
use burn::tensor::{backend::Backend, Element, FloatDType};
use serde::{Deserialize, Serialize};

/// Padding convention for token batches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PadToken {
    /// No padding; a batch may hold a single sample only.
    Disabled,
    Id(i64),
}

impl PadToken {
    /// Legacy integer convention where `-1` means "no padding".
    pub fn from_id(id: i64) -> Self {
        if id == -1 {
            PadToken::Disabled
        } else {
            PadToken::Id(id)
        }
    }

    pub fn id(&self) -> Option<i64> {
        match *self {
            PadToken::Disabled => None,
            PadToken::Id(id) => Some(id),
        }
    }

    /// Value compared against token ids when building masks.
    pub fn sentinel(&self) -> i64 {
        self.id().unwrap_or(-1)
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, PadToken::Disabled)
    }
}

/// Float type of the attention mask handed to the model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaskDType {
    F32,
    F64,
    F16,
    BF16,
}

impl MaskDType {
    /// Parse a Hugging Face `torch_dtype` string.
    pub fn from_torch_dtype(name: &str) -> Option<Self> {
        match name {
            "float32" | "float" => Some(MaskDType::F32),
            "float64" | "double" => Some(MaskDType::F64),
            "float16" | "half" => Some(MaskDType::F16),
            "bfloat16" => Some(MaskDType::BF16),
            _ => None,
        }
    }

    /// Float type the mask is cast to on backend `B`.
    ///
    /// Half types need a backend whose float element is itself half precision.
    /// Full-precision backends such as `NdArray<f32>` cannot hold half tensors, so
    /// they keep their native float type.
    pub fn resolve<B: Backend>(self) -> FloatDType {
        let native: FloatDType = <B::FloatElem as Element>::dtype().into();
        match self {
            MaskDType::F16 | MaskDType::BF16
                if !matches!(native, FloatDType::F16 | FloatDType::BF16) =>
            {
                native
            }
            requested => requested.into(),
        }
    }
}

impl From<MaskDType> for FloatDType {
    fn from(value: MaskDType) -> Self {
        match value {
            MaskDType::F32 => FloatDType::F32,
            MaskDType::F64 => FloatDType::F64,
            MaskDType::F16 => FloatDType::F16,
            MaskDType::BF16 => FloatDType::BF16,
        }
    }
}

/// Input preparation settings shared by every step of a decode loop.
#[derive(Config, Debug)]
pub struct WrapperConfig {
    #[config(default = "PadToken::Id(0)")]
    pub pad_token: PadToken,
    #[config(default = "MaskDType::F32")]
    pub mask_dtype: MaskDType,
}

#[derive(Debug, Deserialize)]
struct HfWrapperJson {
    #[serde(default)]
    pad_token_id: Option<i64>,
    #[serde(default)]
    torch_dtype: Option<String>,
}

impl WrapperConfig {
    /// Build from a Hugging Face style `config.json`.
    ///
    /// A missing or null `pad_token_id` disables padding, as does `-1`.
    pub fn from_config_json(path: &std::path::Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let cfg: HfWrapperJson = serde_json::from_str(&data)
            .with_context(|| format!("parsing {}", path.display()))?;
        let pad_token = cfg.pad_token_id.map(PadToken::from_id).unwrap_or(PadToken::Disabled);
        if let PadToken::Id(id) = pad_token {
            anyhow::ensure!(id >= 0, "pad_token_id must be -1 or non-negative (got {id})");
        }
        let mask_dtype = match cfg.torch_dtype.as_deref() {
            None => MaskDType::F32,
            Some(name) => MaskDType::from_torch_dtype(name)
                .with_context(|| format!("unsupported torch_dtype {name:?}"))?,
        };
        Ok(WrapperConfig { pad_token, mask_dtype })
    }
}
