mod common;

use common::*;
use rnn_rs::layout::Segment;
use rnn_rs::{ActivationKind, CellKind, Direction, PropKind, RnnDesc, RnnPrimitive};

const EPS: f32 = 1e-2;

/// Central difference of the loss along every entry of one buffer.
fn numeric_grad(
    desc: &RnnDesc,
    data: &Data,
    loss: &Loss,
    pick: impl Fn(&mut Data) -> &mut Vec<f32>,
) -> Vec<f32> {
    let mut shifted = data.clone();
    let len = pick(&mut shifted).len();
    (0..len)
        .map(|k| {
            let x = pick(&mut shifted)[k];
            pick(&mut shifted)[k] = x + EPS;
            let plus = loss.eval(&run_fwd(desc, &shifted));
            pick(&mut shifted)[k] = x - EPS;
            let minus = loss.eval(&run_fwd(desc, &shifted));
            pick(&mut shifted)[k] = x;
            ((plus - minus) / (2.0 * EPS as f64)) as f32
        })
        .collect()
}

fn check_gradients(desc: RnnDesc, seed: u64) {
    let data = Data::random(&desc, seed);
    let loss = Loss::random(&desc, seed + 100);
    let (_, grads) = run_fwd_bwd(&desc, &data, &loss);

    let tol = 5e-3;
    let numeric = numeric_grad(&desc, &data, &loss, |d| &mut d.weights_layer);
    assert_close(&grads.diff_weights_layer, &numeric, tol, "diff_weights_layer");
    let numeric = numeric_grad(&desc, &data, &loss, |d| &mut d.weights_iter);
    assert_close(&grads.diff_weights_iter, &numeric, tol, "diff_weights_iter");
    let numeric = numeric_grad(&desc, &data, &loss, |d| &mut d.bias);
    assert_close(&grads.diff_bias, &numeric, tol, "diff_bias");
    let numeric = numeric_grad(&desc, &data, &loss, |d| &mut d.src_layer);
    assert_close(&grads.diff_src_layer, &numeric, tol, "diff_src_layer");
    let numeric = numeric_grad(&desc, &data, &loss, |d| &mut d.src_iter);
    assert_close(&grads.diff_src_iter, &numeric, tol, "diff_src_iter");
}

#[test]
fn vanilla_rnn_gradients() {
    let base = desc(CellKind::VanillaRnn, Direction::UnidirectionalLeft2Right, 2, 3, 2, 3, 3);
    check_gradients(base.clone(), 1);
    check_gradients(base.with_activation(ActivationKind::Logistic), 2);
}

/// Which side of the relu kink every saved pre-activation sits on.
fn relu_sides(gates: Segment, out: &FwdOut) -> Vec<bool> {
    out.workspace[gates.range()].iter().map(|&x| x > 0.0).collect()
}

type Pick = fn(&mut Data) -> &mut Vec<f32>;

/// small enough that few pre-activations change sides
const RELU_EPS: f32 = 1e-3;

#[test]
fn relu_gradients_away_from_the_kink() {
    for (alpha, seed) in [(0.1, 31), (0.0, 32)] {
        let desc = desc(CellKind::VanillaRnn, Direction::BidirectionalConcat, 2, 3, 2, 3, 3)
            .with_activation(ActivationKind::Relu)
            .with_alpha(alpha);
        let data = Data::random(&desc, seed);
        let loss = Loss::random(&desc, seed + 100);
        let (out, grads) = run_fwd_bwd(&desc, &data, &loss);
        let gates = RnnPrimitive::new(desc.clone()).unwrap().layout().gates;
        let sides = relu_sides(gates, &out);

        let buffers: [(&str, &[f32], Pick); 5] = [
            ("diff_weights_layer", &grads.diff_weights_layer, |d| &mut d.weights_layer),
            ("diff_weights_iter", &grads.diff_weights_iter, |d| &mut d.weights_iter),
            ("diff_bias", &grads.diff_bias, |d| &mut d.bias),
            ("diff_src_layer", &grads.diff_src_layer, |d| &mut d.src_layer),
            ("diff_src_iter", &grads.diff_src_iter, |d| &mut d.src_iter),
        ];
        let (mut checked, mut total) = (0, 0);
        for (what, analytic, pick) in buffers {
            let mut shifted = data.clone();
            for (k, &expected) in analytic.iter().enumerate() {
                total += 1;
                let x = pick(&mut shifted)[k];
                pick(&mut shifted)[k] = x + RELU_EPS;
                let plus = run_fwd(&desc, &shifted);
                pick(&mut shifted)[k] = x - RELU_EPS;
                let minus = run_fwd(&desc, &shifted);
                pick(&mut shifted)[k] = x;
                // a central difference across the kink says nothing
                if relu_sides(gates, &plus) != sides || relu_sides(gates, &minus) != sides {
                    continue;
                }
                let numeric =
                    ((loss.eval(&plus) - loss.eval(&minus)) / (2.0 * RELU_EPS as f64)) as f32;
                assert!(
                    (expected - numeric).abs() <= 5e-3 * (1.0 + numeric.abs()),
                    "alpha {alpha} {what}[{k}]: {expected} vs {numeric}"
                );
                checked += 1;
            }
        }
        assert!(2 * checked >= total, "only {checked} of {total} entries away from the kink");
    }
}

#[test]
fn lstm_gradients() {
    check_gradients(
        desc(CellKind::VanillaLstm, Direction::UnidirectionalLeft2Right, 2, 3, 2, 3, 3),
        3,
    );
    check_gradients(
        desc(CellKind::VanillaLstm, Direction::BidirectionalConcat, 1, 3, 2, 4, 3),
        4,
    );
}

#[test]
fn gru_gradients() {
    check_gradients(
        desc(CellKind::VanillaGru, Direction::UnidirectionalRight2Left, 2, 3, 2, 3, 3),
        5,
    );
    check_gradients(
        desc(CellKind::VanillaGru, Direction::BidirectionalSum, 1, 3, 2, 2, 3),
        6,
    );
}

#[test]
fn gru_linear_before_reset_gradients() {
    check_gradients(
        desc(CellKind::GruLinearBeforeReset, Direction::UnidirectionalLeft2Right, 2, 3, 2, 3, 3),
        7,
    );
    check_gradients(
        desc(CellKind::GruLinearBeforeReset, Direction::BidirectionalConcat, 1, 2, 1, 3, 2),
        8,
    );
}

#[test]
fn second_backward_call_accumulates() {
    let desc = desc(CellKind::VanillaLstm, Direction::BidirectionalConcat, 2, 3, 2, 3, 3);
    let data = Data::random(&desc, 9);
    let loss = Loss::random(&desc, 10);
    let (_, once) = run_fwd_bwd(&desc, &data, &loss);

    let mut bwd = RnnPrimitive::new(with_prop(&desc, PropKind::Backward)).unwrap();
    let mut grads = Grads::zeros(bwd.conf());
    for _ in 0..2 {
        // backward consumes the gate slots, every call needs a fresh forward
        let mut out = run_fwd(&desc, &data);
        run_bwd_into(&mut bwd, &data, &mut out.workspace, &loss, &mut grads);
    }

    let twice = |v: &[f32]| v.iter().map(|x| 2.0 * x).collect::<Vec<_>>();
    assert_close(&grads.diff_weights_layer, &twice(&once.diff_weights_layer), 1e-5, "diff_weights_layer");
    assert_close(&grads.diff_weights_iter, &twice(&once.diff_weights_iter), 1e-5, "diff_weights_iter");
    assert_close(&grads.diff_bias, &twice(&once.diff_bias), 1e-5, "diff_bias");
    // source gradients are overwritten, not accumulated
    assert_close(&grads.diff_src_layer, &once.diff_src_layer, 1e-5, "diff_src_layer");
}

#[test]
fn weight_gradients_are_sums_over_timesteps() {
    let n_iter = 4;
    let desc = desc(CellKind::VanillaLstm, Direction::UnidirectionalLeft2Right, 1, n_iter, 2, 3, 3);
    let data = Data::random(&desc, 11);
    let loss = Loss::random(&desc, 12);
    let (out, grads) = run_fwd_bwd(&desc, &data, &loss);

    let prim = RnnPrimitive::new(with_prop(&desc, PropKind::Backward)).unwrap();
    let (rnn, layout) = (prim.conf(), prim.layout());
    let ws = &out.workspace;
    let cols = rnn.gates_ld;

    let mut diff_w_layer = vec![0.0f32; rnn.slc * cols];
    let mut diff_w_iter = vec![0.0f32; rnn.sic * cols];
    let mut diff_bias = vec![0.0f32; cols];
    for iter in 0..n_iter {
        // contribution of this timestep alone, from its gate gradients
        let dg = &ws[layout.gates.offset + rnn.gates_off(0, 0, iter)..];
        let x = &ws[layout.states.offset + rnn.states_off(0, 0, iter + 1)..];
        let h = &ws[layout.states.offset + rnn.states_off(1, 0, iter)..];
        for b in 0..rnn.mb {
            let dg = &dg[b * rnn.gates_ws_ld..][..cols];
            for (db, g) in diff_bias.iter_mut().zip(dg) {
                *db += g;
            }
            for i in 0..rnn.slc {
                let xi = x[b * rnn.states_ws_ld + i];
                for (dw, g) in diff_w_layer[i * cols..][..cols].iter_mut().zip(dg) {
                    *dw += xi * g;
                }
            }
            for i in 0..rnn.sic {
                let hi = h[b * rnn.states_ws_ld + i];
                for (dw, g) in diff_w_iter[i * cols..][..cols].iter_mut().zip(dg) {
                    *dw += hi * g;
                }
            }
        }
    }

    assert_close(&grads.diff_weights_layer, &diff_w_layer, 1e-5, "diff_weights_layer");
    assert_close(&grads.diff_weights_iter, &diff_w_iter, 1e-5, "diff_weights_iter");
    assert_close(&grads.diff_bias, &diff_bias, 1e-5, "diff_bias");
}
