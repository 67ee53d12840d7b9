use std::env;
use std::fs::File;
use std::io::BufReader;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use burn::config::Config;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;
use tracing_subscriber::EnvFilter;

use rnn_rs::config::*;
use rnn_rs::primitive::*;
use rnn_rs::utils::read_f32s;

struct Weights {
    layer: Vec<f32>,
    iter: Vec<f32>,
    bias: Vec<f32>,
}

fn random(rng: &mut StdRng, len: usize) -> Vec<f32> {
    (0..len).map(|_| rng.gen_range(-0.5..0.5)).collect()
}

fn default_desc() -> RnnDesc {
    RnnDesc::new(
        CellKind::VanillaLstm,
        PropKind::ForwardTraining,
        Direction::BidirectionalConcat,
        2,
        16,
        8,
        32,
        32,
        32,
    )
}

/// `model.bin` holds a header followed by the weights, bias last. Anything
/// else is read as a json `RnnDesc` and gets random weights.
fn load(path: Option<&str>, rng: &mut StdRng) -> Result<(RnnDesc, Weights)> {
    let desc = match path {
        Some(path) if path.ends_with(".bin") => {
            let mut input = BufReader::new(
                File::open(path).with_context(|| format!("should be able to open {path}"))?,
            );
            let desc = RnnDesc::from_binary(&mut input)?;
            let rnn = RnnConf::init(desc.clone())?;
            let weights = Weights {
                layer: read_f32s(&mut input, rnn.weights_layer_len())?,
                iter: read_f32s(&mut input, rnn.weights_iter_len())?,
                bias: read_f32s(&mut input, rnn.bias_len())?,
            };
            return Ok((desc, weights));
        }
        Some(path) => RnnDesc::load(path).map_err(|err| anyhow!("loading {path}: {err:?}"))?,
        None => default_desc(),
    };
    let rnn = RnnConf::init(desc.clone())?;
    let weights = Weights {
        layer: random(rng, rnn.weights_layer_len()),
        iter: random(rng, rnn.weights_iter_len()),
        bias: random(rng, rnn.bias_len()),
    };
    Ok((desc, weights))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut rng = StdRng::seed_from_u64(0);
    let path = env::args().nth(1);
    let (desc, weights) = load(path.as_deref(), &mut rng)?;

    let mut fwd_desc = desc.clone();
    fwd_desc.prop_kind = PropKind::ForwardTraining;
    let mut bwd_desc = desc;
    bwd_desc.prop_kind = PropKind::Backward;
    let mut fwd = RnnPrimitive::new(fwd_desc)?;
    let mut bwd = RnnPrimitive::new(bwd_desc)?;
    let rnn = fwd.conf().clone();

    println!("{}", serde_json::to_string_pretty(fwd.layout())?);

    let src_layer = random(&mut rng, rnn.src_layer_len());
    let src_iter = random(&mut rng, rnn.src_iter_len());
    let mut dst_layer = vec![0.0; rnn.dst_layer_len()];
    let mut dst_iter = vec![0.0; rnn.dst_iter_len()];
    let mut workspace = vec![0.0; fwd.workspace_size()];

    let now = Instant::now();
    fwd.forward(ForwardArgs {
        src_layer: &src_layer,
        src_iter: Some(&src_iter),
        weights_layer: &weights.layer,
        weights_iter: &weights.iter,
        bias: &weights.bias,
        dst_layer: &mut dst_layer,
        dst_iter: Some(&mut dst_iter),
        workspace: Some(&mut workspace),
    })?;
    let fwd_time = now.elapsed();

    // gradients of sum(dst_layer)
    let diff_dst_layer = vec![1.0; rnn.dst_layer_len()];
    let mut diff_src_layer = vec![0.0; rnn.src_layer_len()];
    let mut diff_src_iter = vec![0.0; rnn.src_iter_len()];
    let mut diff_weights_layer = vec![0.0; rnn.weights_layer_len()];
    let mut diff_weights_iter = vec![0.0; rnn.weights_iter_len()];
    let mut diff_bias = vec![0.0; rnn.bias_len()];

    let now = Instant::now();
    bwd.backward(BackwardArgs {
        weights_layer: &weights.layer,
        weights_iter: &weights.iter,
        diff_dst_layer: &diff_dst_layer,
        diff_dst_iter: None,
        workspace: &mut workspace,
        diff_src_layer: &mut diff_src_layer,
        diff_src_iter: Some(&mut diff_src_iter),
        diff_weights_layer: &mut diff_weights_layer,
        diff_weights_iter: &mut diff_weights_iter,
        diff_bias: &mut diff_bias,
    })?;
    let bwd_time = now.elapsed();

    let norm = |v: &[f32]| v.iter().map(|x| x * x).sum::<f32>().sqrt();
    info!(
        dst_layer = norm(&dst_layer),
        diff_weights_layer = norm(&diff_weights_layer),
        diff_weights_iter = norm(&diff_weights_iter),
        diff_bias = norm(&diff_bias),
        "norms"
    );
    println!("\nforward ran in {:?}, backward in {:?}", fwd_time, bwd_time);
    println!("sum(dst_layer) = {}", dst_layer.iter().sum::<f32>());
    Ok(())
}
