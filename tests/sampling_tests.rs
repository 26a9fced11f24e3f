use burn_lm_wrapper::inputs::{float_to_vec, int_to_vec};
use burn_lm_wrapper::sampling::{
    apply_penalties, apply_temperature, apply_top_k, log_softmax_rows, process_and_sample,
    sample_greedy, sample_multinomial, ProcessorList, SamplerConfig, TemperatureProcessor,
    TopKProcessor,
};
use burn_ndarray::NdArray;
use burn_tensor::backend::Backend;
use burn_tensor::{Tensor, TensorData};

type TB = NdArray<f32>;

fn device() -> <TB as Backend>::Device {
    Default::default()
}

fn logits(rows: &[&[f32]]) -> Tensor<TB, 2> {
    let b = rows.len();
    let v = rows[0].len();
    let flat: Vec<f32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
    Tensor::<TB, 2>::from_data(TensorData::new(flat, [b, v]), &device())
}

#[test]
fn greedy_picks_row_maxima() {
    let out = sample_greedy(logits(&[&[0.1, 2.0, -1.0], &[3.0, 0.0, 1.0]]));
    assert_eq!(int_to_vec(out).unwrap(), vec![1, 0]);
}

#[test]
fn top_k_masks_the_tail() {
    let out = apply_top_k(logits(&[&[0.1, 2.0, -1.0, 1.5]]), 2).unwrap();
    let data = float_to_vec(out).unwrap();
    assert_eq!(data[1], 2.0);
    assert_eq!(data[3], 1.5);
    assert!(data[0].is_infinite() && data[0] < 0.0);
    assert!(data[2].is_infinite() && data[2] < 0.0);
}

#[test]
fn temperature_scales_and_skips_identity() {
    let out = apply_temperature(logits(&[&[2.0, 4.0]]), 2.0);
    assert_eq!(float_to_vec(out).unwrap(), vec![1.0, 2.0]);
    let same = apply_temperature(logits(&[&[2.0, 4.0]]), 1.0);
    assert_eq!(float_to_vec(same).unwrap(), vec![2.0, 4.0]);
}

#[test]
fn penalties_use_token_history() {
    let history = vec![vec![0i64, 0, 2]];
    let out = apply_penalties(
        logits(&[&[2.0, 1.0, -1.0]]),
        Some(history.as_slice()),
        Some(2.0),
        Some(0.5),
        Some(0.25),
    )
    .unwrap();
    // token 0: 2.0 / 2 - (0.5 * 2 + 0.25); token 2: -1.0 * 2 - (0.5 + 0.25)
    assert_eq!(float_to_vec(out).unwrap(), vec![-0.25, 1.0, -2.75]);
}

#[test]
fn penalties_without_history_are_noops() {
    let out = apply_penalties(logits(&[&[2.0, 1.0]]), None, Some(2.0), None, None).unwrap();
    assert_eq!(float_to_vec(out).unwrap(), vec![2.0, 1.0]);
}

#[test]
fn multinomial_respects_masked_logits() {
    let masked = apply_top_k(logits(&[&[0.0, 5.0, 0.0], &[9.0, 0.0, 0.0]]), 1).unwrap();
    let out = sample_multinomial(masked).unwrap();
    assert_eq!(int_to_vec(out).unwrap(), vec![1, 0]);
}

#[test]
fn log_softmax_rows_normalize() {
    let out = log_softmax_rows(logits(&[&[1.0, 1.0]]));
    let data = float_to_vec(out).unwrap();
    let expected = -(2.0f32).ln();
    assert!(data.iter().all(|x| (x - expected).abs() < 1e-6));
}

#[test]
fn processor_list_applies_in_order() {
    let mut list = ProcessorList::<TB>::new();
    assert!(list.is_empty());
    list.push(TopKProcessor { k: 1 });
    list.push(TemperatureProcessor { temperature: 2.0 });
    assert_eq!(list.len(), 2);
    let out = list.apply(logits(&[&[4.0, 1.0]]), None).unwrap();
    let data = float_to_vec(out).unwrap();
    assert_eq!(data[0], 2.0);
    assert!(data[1].is_infinite());
}

#[test]
fn process_and_sample_is_greedy_at_zero_temperature() {
    let history = vec![vec![1i64]];
    let cfg = SamplerConfig {
        repetition_penalty: Some(10.0),
        ..SamplerConfig::greedy()
    };
    // Token 1 leads until its repetition penalty applies.
    let out = process_and_sample(logits(&[&[1.0, 3.0, 0.5]]), Some(history.as_slice()), cfg).unwrap();
    assert_eq!(int_to_vec(out).unwrap(), vec![0]);
}
