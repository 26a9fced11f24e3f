use burn_lm_wrapper::cache::{split_layer, stack_layer};
use burn_lm_wrapper::inputs::{float_to_vec, int_to_vec};
use burn_lm_wrapper::{
    CausalLm, GeneratorState, ModelWrapper, PadToken, PastState, WrapperConfig, WrapperError,
};
use burn_ndarray::NdArray;
use burn_tensor::backend::Backend;
use burn_tensor::{Int, Tensor, TensorData};

type TB = NdArray<f32>;

fn device() -> <TB as Backend>::Device {
    Default::default()
}

/// Model that keeps the default forward.
struct Bare;
impl CausalLm<TB> for Bare {}

fn wrapper() -> ModelWrapper<TB, Bare> {
    ModelWrapper::new(Bare, WrapperConfig::new().with_pad_token(PadToken::Id(0)))
}

fn ids(rows: &[&[i64]]) -> Tensor<TB, 2, Int> {
    let b = rows.len();
    let t = rows[0].len();
    let flat: Vec<i64> = rows.iter().flat_map(|r| r.iter().copied()).collect();
    Tensor::<TB, 2, Int>::from_data(TensorData::new(flat, [b, t]), &device())
}

fn index(values: &[i64]) -> Tensor<TB, 1, Int> {
    Tensor::<TB, 1, Int>::from_data(TensorData::new(values.to_vec(), [values.len()]), &device())
}

/// Past with `layers` layers of shape [2, batch, 1, seq, 1]; every entry of sequence `b`
/// holds `100 * layer + b` (keys) or `100 * layer + b + 50` (values).
fn labelled_past(layers: usize, batch: usize, seq: usize) -> PastState<TB> {
    let device = device();
    let layers = (0..layers)
        .map(|l| {
            let mut flat = Vec::with_capacity(2 * batch * seq);
            for kv in 0..2 {
                for b in 0..batch {
                    for _ in 0..seq {
                        flat.push((100 * l + b + 50 * kv) as f32);
                    }
                }
            }
            Tensor::<TB, 5>::from_data(TensorData::new(flat, [2, batch, 1, seq, 1]), &device)
        })
        .collect();
    PastState::new(layers)
}

#[test]
fn first_step_passes_preprocessed_inputs_through() {
    let w = wrapper();
    let input = ids(&[&[0, 3, 4], &[1, 2, 3]]);
    let expected = w.preprocess_inputs(input.clone()).unwrap();
    let got = w.get_model_inputs(input, None, None).unwrap();

    assert!(got.past.is_none());
    assert_eq!(
        int_to_vec(got.input_ids).unwrap(),
        int_to_vec(expected.input_ids).unwrap()
    );
    assert_eq!(
        int_to_vec(got.position_ids).unwrap(),
        int_to_vec(expected.position_ids).unwrap()
    );
    assert_eq!(
        float_to_vec(got.attention_mask).unwrap(),
        float_to_vec(expected.attention_mask).unwrap()
    );
}

#[test]
fn cached_step_feeds_only_the_newest_token() {
    let w = wrapper();
    let past = labelled_past(2, 2, 3);
    let state = GeneratorState::new().with_input_seq_index(index(&[0, 1]));
    let got = w
        .get_model_inputs(ids(&[&[0, 3, 4, 5], &[1, 2, 3, 4]]), Some(past), Some(&state))
        .unwrap();

    assert_eq!(got.input_ids.dims(), [2, 1]);
    assert_eq!(got.position_ids.dims(), [2, 1]);
    assert_eq!(got.attention_mask.dims(), [2, 4]);
    assert_eq!(int_to_vec(got.input_ids.clone()).unwrap(), vec![5, 4]);
    assert_eq!(int_to_vec(got.position_ids.clone()).unwrap(), vec![2, 3]);
    assert_eq!(
        float_to_vec(got.attention_mask.clone()).unwrap(),
        vec![0.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0]
    );
    assert_eq!(got.keys(), vec!["input_ids", "position_ids", "attention_mask", "past"]);
    assert_eq!(got.past.as_ref().map(|p| p.num_layers()), Some(2));
}

#[test]
fn cached_state_follows_the_active_sequence_index() {
    let w = wrapper();
    let past = labelled_past(2, 3, 2);
    let state = GeneratorState::new().with_input_seq_index(index(&[0, 2]));
    let got = w
        .get_model_inputs(ids(&[&[1, 2, 3], &[4, 5, 6]]), Some(past), Some(&state))
        .unwrap();

    let past = got.past.unwrap();
    assert_eq!(past.batch_size(), 2);
    assert_eq!(past.seq_len(), 2);
    for (l, layer) in past.into_layers().into_iter().enumerate() {
        assert_eq!(layer.dims(), [2, 2, 1, 2, 1]);
        let (k, v) = split_layer(layer);
        let base = (100 * l) as f32;
        assert_eq!(
            float_to_vec(k).unwrap(),
            vec![base, base, base + 2.0, base + 2.0]
        );
        assert_eq!(
            float_to_vec(v).unwrap(),
            vec![base + 50.0, base + 50.0, base + 52.0, base + 52.0]
        );
    }
}

#[test]
fn repeated_indices_fork_cached_sequences() {
    let past = labelled_past(1, 2, 1).select_sequences(index(&[1, 1, 0]));
    assert_eq!(past.batch_size(), 3);
    let (k, _) = split_layer(past.into_layers().remove(0));
    assert_eq!(float_to_vec(k).unwrap(), vec![1.0, 1.0, 0.0]);
}

#[test]
fn stack_and_split_are_inverse() {
    let device = device();
    let k = Tensor::<TB, 4>::from_data(TensorData::new(vec![1.0f32, 2.0, 3.0, 4.0], [2, 1, 2, 1]), &device);
    let v = k.clone().mul_scalar(10.0);
    let layer = stack_layer(k, v);
    assert_eq!(layer.dims(), [2, 2, 1, 2, 1]);
    let (k, v) = split_layer(layer);
    assert_eq!(float_to_vec(k).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(float_to_vec(v).unwrap(), vec![10.0, 20.0, 30.0, 40.0]);
}

#[test]
fn cached_step_without_index_fails() {
    let w = wrapper();
    let input = ids(&[&[1, 2]]);
    let err = w
        .get_model_inputs(input.clone(), Some(labelled_past(1, 1, 1)), None)
        .unwrap_err();
    assert_eq!(err, WrapperError::MissingSequenceIndex);

    let empty = GeneratorState::new();
    let err = w
        .get_model_inputs(input, Some(labelled_past(1, 1, 1)), Some(&empty))
        .unwrap_err();
    assert_eq!(err, WrapperError::MissingSequenceIndex);
}

#[test]
fn out_of_range_index_is_reported() {
    let w = wrapper();
    let state = GeneratorState::new().with_input_seq_index(index(&[0, 3]));
    let err = w
        .get_model_inputs(ids(&[&[1, 2], &[3, 4]]), Some(labelled_past(1, 3, 1)), Some(&state))
        .unwrap_err();
    assert_eq!(err, WrapperError::SequenceIndexOutOfRange { index: 3, batch: 3 });
}

#[test]
fn host_built_index_is_checked_without_reading_the_tensor() {
    let w = wrapper();
    let state = GeneratorState::<TB>::from_host_index(vec![2, -1], &device());
    assert_eq!(state.index_bounds(), Some((-1, 2)));
    let err = w
        .get_model_inputs(ids(&[&[1, 2], &[3, 4]]), Some(labelled_past(1, 3, 1)), Some(&state))
        .unwrap_err();
    assert_eq!(err, WrapperError::SequenceIndexOutOfRange { index: -1, batch: 3 });

    let state = GeneratorState::<TB>::from_host_index(vec![1, 4], &device());
    let err = w
        .get_model_inputs(ids(&[&[1, 2], &[3, 4]]), Some(labelled_past(1, 3, 1)), Some(&state))
        .unwrap_err();
    assert_eq!(err, WrapperError::SequenceIndexOutOfRange { index: 4, batch: 3 });
}

#[test]
fn layerless_cache_accepts_any_index() {
    let w = wrapper();
    let state = GeneratorState::<TB>::from_host_index(vec![0, 5], &device());
    let got = w
        .get_model_inputs(ids(&[&[1, 2], &[3, 4]]), Some(PastState::new(Vec::new())), Some(&state))
        .unwrap();
    assert!(got.past.as_ref().is_some_and(|p| p.is_empty()));
    assert_eq!(got.input_ids.dims(), [2, 1]);
}

#[test]
fn index_length_must_match_input_batch() {
    let w = wrapper();
    let state = GeneratorState::new().with_input_seq_index(index(&[0, 1, 2]));
    let err = w
        .get_model_inputs(ids(&[&[1, 2], &[3, 4]]), Some(labelled_past(1, 3, 1)), Some(&state))
        .unwrap_err();
    assert_eq!(err, WrapperError::BatchMismatch { input: 2, index: 3 });
}

#[test]
fn identity_state_keeps_every_sequence() {
    let state = GeneratorState::<TB>::identity(3, &device());
    let idx = state.input_seq_index().cloned().unwrap();
    assert_eq!(int_to_vec(idx).unwrap(), vec![0, 1, 2]);
    assert_eq!(state.index_bounds(), Some((0, 2)));
}

#[test]
fn default_forward_is_unimplemented() {
    let w = wrapper();
    let err = w.forward(ids(&[&[1, 2, 3]]), None, None).unwrap_err();
    assert!(matches!(err, WrapperError::ForwardUnimplemented { .. }));
}

#[test]
fn forward_reports_preprocessing_errors_first() {
    let w = ModelWrapper::<TB, Bare>::new(Bare, WrapperConfig::new().with_pad_token(PadToken::Disabled));
    let err = w.forward(ids(&[&[1, 2], &[3, 4]]), None, None).unwrap_err();
    assert_eq!(err, WrapperError::PaddingDisabledBatch { batch: 2 });
}
