use burn_core as burn;

use alloc::vec::Vec;
use burn::tensor::{backend::Backend, Int, Tensor, TensorData};

/// Per-layer cached keys and values from earlier decoding steps.
///
/// Each layer is one tensor laid out `[2, batch, heads, seq, head_dim]`,
/// with keys at index 0 and values at index 1 of the leading dimension.
#[derive(Clone, Debug)]
pub struct PastState<B: Backend> {
    layers: Vec<Tensor<B, 5>>,
}

impl<B: Backend> PastState<B> {
    /// Dimension that indexes sequences in every layer tensor.
    pub const BATCH_DIM: usize = 1;
    /// Dimension that indexes cached positions in every layer tensor.
    pub const SEQ_DIM: usize = 3;

    pub fn new(layers: Vec<Tensor<B, 5>>) -> Self {
        Self { layers }
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Number of cached sequences, taken from the first layer.
    pub fn batch_size(&self) -> usize {
        self.layers.first().map(|l| l.dims()[Self::BATCH_DIM]).unwrap_or(0)
    }

    /// Number of cached positions, taken from the first layer.
    pub fn seq_len(&self) -> usize {
        self.layers.first().map(|l| l.dims()[Self::SEQ_DIM]).unwrap_or(0)
    }

    pub fn layer(&self, idx: usize) -> Option<&Tensor<B, 5>> {
        self.layers.get(idx)
    }

    pub fn layers(&self) -> &[Tensor<B, 5>] {
        &self.layers
    }

    pub fn into_layers(self) -> Vec<Tensor<B, 5>> {
        self.layers
    }

    /// Keep only the sequences named by `index`, in that order, in every layer.
    ///
    /// Entries may repeat (beam search forks a beam into several slots).
    pub fn select_sequences(self, index: Tensor<B, 1, Int>) -> Self {
        let layers = self
            .layers
            .into_iter()
            .map(|layer| layer.select(Self::BATCH_DIM, index.clone()))
            .collect();
        Self { layers }
    }
}

/// Split a layer tensor `[2, B, H, T, D]` into key and value `[B, H, T, D]`.
pub fn split_layer<B: Backend>(layer: Tensor<B, 5>) -> (Tensor<B, 4>, Tensor<B, 4>) {
    let [_, b, h, t, d] = layer.dims();
    let key = layer.clone().slice([0..1, 0..b, 0..h, 0..t, 0..d]).squeeze_dim::<4>(0);
    let value = layer.slice([1..2, 0..b, 0..h, 0..t, 0..d]).squeeze_dim::<4>(0);
    (key, value)
}

/// Stack key and value `[B, H, T, D]` into one layer tensor `[2, B, H, T, D]`.
pub fn stack_layer<B: Backend>(key: Tensor<B, 4>, value: Tensor<B, 4>) -> Tensor<B, 5> {
    Tensor::stack::<5>(alloc::vec![key, value], 0)
}

/// Bookkeeping owned by the decode loop and read by the input adapter.
#[derive(Clone, Debug)]
pub struct GeneratorState<B: Backend> {
    input_seq_index: Option<Tensor<B, 1, Int>>,
    /// Smallest and largest index entry, known when the index was built on the host.
    index_bounds: Option<(i64, i64)>,
}

impl<B: Backend> Default for GeneratorState<B> {
    fn default() -> Self {
        Self {
            input_seq_index: None,
            index_bounds: None,
        }
    }
}

impl<B: Backend> GeneratorState<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows of the previous step's batch that survive into this step.
    pub fn with_input_seq_index(mut self, index: Tensor<B, 1, Int>) -> Self {
        self.input_seq_index = Some(index);
        self.index_bounds = None;
        self
    }

    /// Same as [`with_input_seq_index`](Self::with_input_seq_index) from host values.
    ///
    /// The bounds are recorded here so later validation never reads the tensor back.
    pub fn from_host_index(index: Vec<i64>, device: &B::Device) -> Self {
        let bounds = index
            .iter()
            .fold(None, |acc: Option<(i64, i64)>, &i| match acc {
                None => Some((i, i)),
                Some((lo, hi)) => Some((lo.min(i), hi.max(i))),
            });
        let len = index.len();
        let tensor = Tensor::<B, 1, Int>::from_data(TensorData::new(index, [len]), device);
        Self {
            input_seq_index: Some(tensor),
            index_bounds: bounds,
        }
    }

    pub fn input_seq_index(&self) -> Option<&Tensor<B, 1, Int>> {
        self.input_seq_index.as_ref()
    }

    pub fn index_bounds(&self) -> Option<(i64, i64)> {
        self.index_bounds
    }

    /// Identity index over `batch` rows, on `device`.
    pub fn identity(batch: usize, device: &B::Device) -> Self {
        Self::from_host_index((0..batch as i64).collect(), device)
    }
}
