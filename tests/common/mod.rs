#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rnn_rs::{
    BackwardArgs, CellKind, Direction, ForwardArgs, PropKind, RnnConf, RnnDesc, RnnPrimitive,
};

pub fn desc(
    cell_kind: CellKind,
    direction: Direction,
    n_layer: usize,
    n_iter: usize,
    mb: usize,
    slc: usize,
    dic: usize,
) -> RnnDesc {
    RnnDesc::new(
        cell_kind,
        PropKind::ForwardTraining,
        direction,
        n_layer,
        n_iter,
        mb,
        slc,
        dic,
        dic,
    )
}

pub fn with_prop(desc: &RnnDesc, prop_kind: PropKind) -> RnnDesc {
    let mut desc = desc.clone();
    desc.prop_kind = prop_kind;
    desc
}

pub fn conf(desc: &RnnDesc) -> RnnConf {
    RnnConf::init(desc.clone()).unwrap()
}

pub fn random(rng: &mut StdRng, len: usize, scale: f32) -> Vec<f32> {
    (0..len).map(|_| rng.gen_range(-scale..scale)).collect()
}

/// Inputs and parameters of one problem.
#[derive(Clone, Debug)]
pub struct Data {
    pub src_layer: Vec<f32>,
    pub src_iter: Vec<f32>,
    pub weights_layer: Vec<f32>,
    pub weights_iter: Vec<f32>,
    pub bias: Vec<f32>,
}

impl Data {
    pub fn random(desc: &RnnDesc, seed: u64) -> Self {
        let rnn = conf(desc);
        let mut rng = StdRng::seed_from_u64(seed);
        Self {
            src_layer: random(&mut rng, rnn.src_layer_len(), 1.0),
            src_iter: random(&mut rng, rnn.src_iter_len(), 0.5),
            weights_layer: random(&mut rng, rnn.weights_layer_len(), 0.6),
            weights_iter: random(&mut rng, rnn.weights_iter_len(), 0.6),
            bias: random(&mut rng, rnn.bias_len(), 0.3),
        }
    }
}

pub struct FwdOut {
    pub dst_layer: Vec<f32>,
    pub dst_iter: Vec<f32>,
    pub workspace: Vec<f32>,
}

pub fn run_fwd_with(prim: &mut RnnPrimitive, data: &Data) -> FwdOut {
    let rnn = prim.conf().clone();
    let mut out = FwdOut {
        dst_layer: vec![0.0; rnn.dst_layer_len()],
        dst_iter: vec![0.0; rnn.dst_iter_len()],
        workspace: vec![0.0; prim.workspace_size()],
    };
    let workspace = rnn.is_training.then_some(out.workspace.as_mut_slice());
    prim.forward(ForwardArgs {
        src_layer: &data.src_layer,
        src_iter: Some(&data.src_iter),
        weights_layer: &data.weights_layer,
        weights_iter: &data.weights_iter,
        bias: &data.bias,
        dst_layer: &mut out.dst_layer,
        dst_iter: Some(&mut out.dst_iter),
        workspace,
    })
    .unwrap();
    out
}

pub fn run_fwd(desc: &RnnDesc, data: &Data) -> FwdOut {
    let mut prim = RnnPrimitive::new(with_prop(desc, PropKind::ForwardTraining)).unwrap();
    run_fwd_with(&mut prim, data)
}

#[derive(Clone, Debug)]
pub struct Grads {
    pub diff_src_layer: Vec<f32>,
    pub diff_src_iter: Vec<f32>,
    pub diff_weights_layer: Vec<f32>,
    pub diff_weights_iter: Vec<f32>,
    pub diff_bias: Vec<f32>,
}

impl Grads {
    pub fn zeros(rnn: &RnnConf) -> Self {
        Self {
            diff_src_layer: vec![0.0; rnn.src_layer_len()],
            diff_src_iter: vec![0.0; rnn.src_iter_len()],
            diff_weights_layer: vec![0.0; rnn.weights_layer_len()],
            diff_weights_iter: vec![0.0; rnn.weights_iter_len()],
            diff_bias: vec![0.0; rnn.bias_len()],
        }
    }
}

/// Random projections defining `loss = <proj_layer, dst_layer> + <proj_iter, dst_iter>`.
pub struct Loss {
    pub proj_layer: Vec<f32>,
    pub proj_iter: Vec<f32>,
}

impl Loss {
    pub fn random(desc: &RnnDesc, seed: u64) -> Self {
        let rnn = conf(desc);
        let mut rng = StdRng::seed_from_u64(seed);
        Self {
            proj_layer: random(&mut rng, rnn.dst_layer_len(), 1.0),
            proj_iter: random(&mut rng, rnn.dst_iter_len(), 1.0),
        }
    }

    pub fn eval(&self, out: &FwdOut) -> f64 {
        let dot = |a: &[f32], b: &[f32]| a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum::<f64>();
        dot(&self.proj_layer, &out.dst_layer) + dot(&self.proj_iter, &out.dst_iter)
    }
}

/// Backward into `grads`, which is accumulated into.
pub fn run_bwd_into(
    prim: &mut RnnPrimitive,
    data: &Data,
    workspace: &mut [f32],
    loss: &Loss,
    grads: &mut Grads,
) {
    prim.backward(BackwardArgs {
        weights_layer: &data.weights_layer,
        weights_iter: &data.weights_iter,
        diff_dst_layer: &loss.proj_layer,
        diff_dst_iter: Some(&loss.proj_iter),
        workspace,
        diff_src_layer: &mut grads.diff_src_layer,
        diff_src_iter: Some(&mut grads.diff_src_iter),
        diff_weights_layer: &mut grads.diff_weights_layer,
        diff_weights_iter: &mut grads.diff_weights_iter,
        diff_bias: &mut grads.diff_bias,
    })
    .unwrap();
}

/// Forward training then backward of `loss`.
pub fn run_fwd_bwd(desc: &RnnDesc, data: &Data, loss: &Loss) -> (FwdOut, Grads) {
    let mut out = run_fwd(desc, data);
    let mut prim = RnnPrimitive::new(with_prop(desc, PropKind::Backward)).unwrap();
    let mut grads = Grads::zeros(prim.conf());
    run_bwd_into(&mut prim, data, &mut out.workspace, loss, &mut grads);
    (out, grads)
}

pub fn assert_close(actual: &[f32], expected: &[f32], tol: f32, what: &str) {
    assert_eq!(actual.len(), expected.len(), "{what}: length");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() <= tol * (1.0 + e.abs()),
            "{what}[{i}]: {a} vs {e}"
        );
    }
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
