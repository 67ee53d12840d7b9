mod common;

use common::*;
use rnn_rs::packing::{pack_weights, WeightsGroup};
use rnn_rs::{
    BackwardArgs, CellKind, Direction, ForwardArgs, GemmPolicy, PropKind, RnnDesc, RnnError,
    RnnPrimitive, WeightsFormat,
};

const KINDS: [CellKind; 4] = [
    CellKind::VanillaRnn,
    CellKind::VanillaLstm,
    CellKind::VanillaGru,
    CellKind::GruLinearBeforeReset,
];

fn variants(base: &RnnDesc) -> Vec<(&'static str, RnnDesc)> {
    vec![
        ("packed layer gemm", base.clone().with_layer_gemm(GemmPolicy::Packed)),
        ("packed iter gemm", base.clone().with_iter_gemm(GemmPolicy::Packed)),
        (
            "packed gemms",
            base.clone()
                .with_layer_gemm(GemmPolicy::Packed)
                .with_iter_gemm(GemmPolicy::Packed),
        ),
        ("copied weights", base.clone().with_copy_weights(true)),
        (
            "copied weights and bias",
            base.clone().with_copy_weights(true).with_copy_bias(true),
        ),
    ]
}

#[test]
fn every_strategy_matches_plain() {
    for (seed, kind) in KINDS.into_iter().enumerate() {
        let base = desc(kind, Direction::BidirectionalConcat, 2, 3, 2, 4, 4);
        let data = Data::random(&base, seed as u64);
        let loss = Loss::random(&base, seed as u64 + 10);
        let (plain_out, plain) = run_fwd_bwd(&base, &data, &loss);

        for (name, desc) in variants(&base) {
            let (out, grads) = run_fwd_bwd(&desc, &data, &loss);
            let what = |buf: &str| format!("{kind:?} {name} {buf}");
            assert_close(&out.dst_layer, &plain_out.dst_layer, 1e-5, &what("dst_layer"));
            assert_close(&out.dst_iter, &plain_out.dst_iter, 1e-5, &what("dst_iter"));
            assert_close(
                &grads.diff_weights_layer,
                &plain.diff_weights_layer,
                1e-5,
                &what("diff_weights_layer"),
            );
            assert_close(
                &grads.diff_weights_iter,
                &plain.diff_weights_iter,
                1e-5,
                &what("diff_weights_iter"),
            );
            assert_close(&grads.diff_bias, &plain.diff_bias, 1e-5, &what("diff_bias"));
            assert_close(
                &grads.diff_src_layer,
                &plain.diff_src_layer,
                1e-5,
                &what("diff_src_layer"),
            );
        }
    }
}

#[test]
fn caller_packed_weights_for_inference() {
    for (seed, kind) in KINDS.into_iter().enumerate() {
        let base = with_prop(
            &desc(kind, Direction::UnidirectionalLeft2Right, 2, 3, 2, 4, 4),
            PropKind::ForwardInference,
        );
        let data = Data::random(&base, seed as u64);
        let mut plain = RnnPrimitive::new(base.clone()).unwrap();
        let expected = run_fwd_with(&mut plain, &data);

        let rnn = conf(&base);
        let packed_data = Data {
            weights_layer: pack_weights(&rnn, WeightsGroup::Layer, &data.weights_layer),
            weights_iter: pack_weights(&rnn, WeightsGroup::Iter, &data.weights_iter),
            ..data.clone()
        };
        let packed_desc = base
            .with_weights_layer_format(WeightsFormat::Packed)
            .with_weights_iter_format(WeightsFormat::Packed);
        let mut packed = RnnPrimitive::new(packed_desc).unwrap();
        assert_eq!(packed.conf().weights_iter.scratch_size, 0);
        let out = run_fwd_with(&mut packed, &packed_data);
        assert_close(&out.dst_layer, &expected.dst_layer, 1e-5, "dst_layer");
        assert_close(&out.dst_iter, &expected.dst_iter, 1e-5, "dst_iter");
    }
}

#[test]
fn scratchpad_holds_what_the_strategy_needs() {
    let base = desc(CellKind::VanillaLstm, Direction::BidirectionalConcat, 2, 3, 2, 4, 4);
    assert_eq!(RnnPrimitive::new(base.clone()).unwrap().scratchpad_size(), 0);

    let copied = RnnPrimitive::new(base.clone().with_copy_weights(true)).unwrap();
    let weights = copied.layout().weights_iter;
    assert!(weights.len > 0);
    assert!(copied.scratchpad_size() >= weights.end());
    assert_eq!(copied.scratchpad_size(), copied.layout().bias.end());

    let inference = RnnPrimitive::new(with_prop(&base, PropKind::ForwardInference)).unwrap();
    assert_eq!(inference.workspace_size(), 0);
    assert!(inference.scratchpad_size() >= inference.layout().states.end());
}

#[test]
fn unsupported_configuration_is_reported() {
    let base = desc(CellKind::VanillaLstm, Direction::UnidirectionalLeft2Right, 1, 2, 1, 2, 2);
    let err = RnnPrimitive::new(base.clone().with_bias(false)).unwrap_err();
    assert!(matches!(err, RnnError::Unimplemented { .. }), "{err}");
    let err = RnnPrimitive::new(base.with_weights_iter_format(WeightsFormat::Packed)).unwrap_err();
    assert!(matches!(err, RnnError::Unimplemented { .. }), "{err}");
}

#[test]
fn misuse_at_execution_is_rejected() {
    let base = desc(CellKind::VanillaGru, Direction::UnidirectionalLeft2Right, 1, 2, 1, 2, 2);
    let data = Data::random(&base, 0);
    let rnn = conf(&base);
    let mut dst_layer = vec![0.0; rnn.dst_layer_len()];

    let mut fwd = RnnPrimitive::new(base.clone()).unwrap();
    let err = fwd
        .forward(ForwardArgs {
            src_layer: &data.src_layer,
            src_iter: None,
            weights_layer: &data.weights_layer,
            weights_iter: &data.weights_iter,
            bias: &data.bias,
            dst_layer: &mut dst_layer,
            dst_iter: None,
            workspace: None,
        })
        .unwrap_err();
    assert!(matches!(err, RnnError::InvalidArguments(_)), "{err}");

    let mut grads = Grads::zeros(&rnn);
    let mut workspace = vec![0.0; fwd.workspace_size()];
    let err = fwd
        .backward(BackwardArgs {
            weights_layer: &data.weights_layer,
            weights_iter: &data.weights_iter,
            diff_dst_layer: &dst_layer,
            diff_dst_iter: None,
            workspace: &mut workspace,
            diff_src_layer: &mut grads.diff_src_layer,
            diff_src_iter: None,
            diff_weights_layer: &mut grads.diff_weights_layer,
            diff_weights_iter: &mut grads.diff_weights_iter,
            diff_bias: &mut grads.diff_bias,
        })
        .unwrap_err();
    assert!(matches!(err, RnnError::InvalidArguments(_)), "{err}");

    let mut bwd = RnnPrimitive::new(with_prop(&base, PropKind::Backward)).unwrap();
    let err = bwd
        .forward(ForwardArgs {
            src_layer: &data.src_layer,
            src_iter: None,
            weights_layer: &data.weights_layer,
            weights_iter: &data.weights_iter,
            bias: &data.bias,
            dst_layer: &mut dst_layer,
            dst_iter: None,
            workspace: Some(&mut workspace),
        })
        .unwrap_err();
    assert!(matches!(err, RnnError::InvalidArguments(_)), "{err}");
}
