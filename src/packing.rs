//! Weight and bias preparation.
//!
//! Turns the caller's `ldigo` weights into one [`WeightsRef`] per
//! (layer, direction, part), reading either the caller's buffer directly or
//! a copy/packed panel written into the scratchpad.

use serde::Serialize;

use crate::config::{RnnConf, WeightsGroupConf};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PackStrategy {
    /// point into the caller buffer
    Assign,
    /// copy into scratch with a better leading dimension
    Copy,
    /// pack into scratch for the packed gemm
    Pack,
    /// the caller buffer is already packed
    AssignPacked,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WeightsGroup {
    Layer,
    Iter,
}

impl RnnConf {
    pub fn weights_group(&self, group: WeightsGroup) -> &WeightsGroupConf {
        match group {
            WeightsGroup::Layer => &self.weights_layer,
            WeightsGroup::Iter => &self.weights_iter,
        }
    }
}

/// Matrix operand of one weight part as handed to the gemm.
#[derive(Clone, Copy, Debug)]
pub struct WeightsRef<'a> {
    pub data: &'a [f32],
    /// ignored by the packed gemm
    pub ld: usize,
}

/// Per (layer, direction, part) weight operands, fixed for one execute call.
#[derive(Debug)]
pub struct WeightsPtrs<'a> {
    n_dir: usize,
    n_parts: usize,
    ptrs: Vec<WeightsRef<'a>>,
}

impl<'a> WeightsPtrs<'a> {
    /// all parts of one cell
    pub fn cell(&self, lay: usize, dir: usize) -> &[WeightsRef<'a>] {
        let start = (lay * self.n_dir + dir) * self.n_parts;
        &self.ptrs[start..start + self.n_parts]
    }
}

/// Resolve the operands of one weight group with the strategy picked at
/// initialization. `scratch` is the group's scratchpad segment.
pub fn prepare_weights<'a>(
    rnn: &RnnConf,
    group: WeightsGroup,
    w: &'a [f32],
    scratch: &'a mut [f32],
) -> WeightsPtrs<'a> {
    let wg = rnn.weights_group(group);
    debug_assert!(scratch.len() >= wg.scratch_size);
    match wg.strategy {
        PackStrategy::Assign => assign_weights(rnn, wg, w, wg.ld),
        PackStrategy::Copy => {
            copy_weights(rnn, wg, w, scratch);
            let scratch: &'a [f32] = scratch;
            assign_weights(rnn, wg, scratch, wg.ld)
        }
        PackStrategy::Pack => {
            pack_into(rnn, wg, w, scratch);
            let scratch: &'a [f32] = scratch;
            assign_packed_weights(rnn, wg, scratch)
        }
        PackStrategy::AssignPacked => assign_packed_weights(rnn, wg, w),
    }
}

/// Pack a whole `ldigo` weight group the way a packed primitive expects it.
/// The result can be passed back as caller packed weights.
pub fn pack_weights(rnn: &RnnConf, group: WeightsGroup, w: &[f32]) -> Vec<f32> {
    let wg = rnn.weights_group(group);
    let mut packed = vec![0.0; rnn.n_layer * rnn.n_dir * wg.pack_size()];
    pack_into(rnn, wg, w, &mut packed);
    packed
}

fn assign_weights<'a>(
    rnn: &RnnConf,
    wg: &WeightsGroupConf,
    w: &'a [f32],
    ld: usize,
) -> WeightsPtrs<'a> {
    let mut ptrs = Vec::with_capacity(rnn.n_layer * rnn.n_dir * wg.n_parts());
    for cell in 0..rnn.n_layer * rnn.n_dir {
        let base = cell * wg.ic * ld;
        for part in 0..wg.n_parts() {
            let off = base + wg.part_gate_start(part) * rnn.dic;
            ptrs.push(WeightsRef {
                data: &w[off..base + wg.ic * ld],
                ld,
            });
        }
    }
    WeightsPtrs {
        n_dir: rnn.n_dir,
        n_parts: wg.n_parts(),
        ptrs,
    }
}

fn copy_weights(rnn: &RnnConf, wg: &WeightsGroupConf, w: &[f32], scratch: &mut [f32]) {
    let row = rnn.n_gates * rnn.dic;
    let src_rows = w.chunks_exact(row);
    let dst_rows = scratch.chunks_exact_mut(wg.ld);
    for (src, dst) in src_rows.zip(dst_rows).take(rnn.n_layer * rnn.n_dir * wg.ic) {
        dst[..row].copy_from_slice(src);
        dst[row..].fill(0.0);
    }
}

/// Forward primitives multiply `x * W`, so a part is packed as the dense
/// `ic x width` block of `W`. Backward primitives multiply `dG * W^T`, so the
/// part is packed transposed, `width x ic`.
fn pack_into(rnn: &RnnConf, wg: &WeightsGroupConf, w: &[f32], packed: &mut [f32]) {
    let row = rnn.n_gates * rnn.dic;
    let mut off = 0;
    for cell in 0..rnn.n_layer * rnn.n_dir {
        let src = &w[cell * wg.ic * row..(cell + 1) * wg.ic * row];
        for (part, gates) in wg.gates_per_part.iter().enumerate() {
            let col0 = wg.part_gate_start(part) * rnn.dic;
            let width = gates * rnn.dic;
            let panel = &mut packed[off..off + wg.ic * width];
            for i in 0..wg.ic {
                for j in 0..width {
                    let v = src[i * row + col0 + j];
                    if rnn.is_fwd {
                        panel[i * width + j] = v;
                    } else {
                        panel[j * wg.ic + i] = v;
                    }
                }
            }
            off += wg.ic * width;
        }
    }
}

fn assign_packed_weights<'a>(
    rnn: &RnnConf,
    wg: &WeightsGroupConf,
    packed: &'a [f32],
) -> WeightsPtrs<'a> {
    let mut ptrs = Vec::with_capacity(rnn.n_layer * rnn.n_dir * wg.n_parts());
    let mut off = 0;
    for _ in 0..rnn.n_layer * rnn.n_dir {
        for (part, size) in wg.part_pack_size.iter().enumerate() {
            let width = wg.gates_per_part[part] * rnn.dic;
            let ld = if rnn.is_fwd { width } else { wg.ic };
            ptrs.push(WeightsRef {
                data: &packed[off..off + size],
                ld,
            });
            off += size;
        }
    }
    WeightsPtrs {
        n_dir: rnn.n_dir,
        n_parts: wg.n_parts(),
        ptrs,
    }
}

/// One bias block `[n_bias][dic]` per (layer, direction), optionally copied
/// into the scratchpad bias segment.
pub fn prepare_bias<'a>(rnn: &RnnConf, b: &'a [f32], scratch: &'a mut [f32]) -> Vec<&'a [f32]> {
    let block = rnn.n_bias * rnn.dic;
    let n_cells = rnn.n_layer * rnn.n_dir;
    let bias: &'a [f32] = if rnn.copy_bias {
        scratch[..n_cells * block].copy_from_slice(&b[..n_cells * block]);
        scratch
    } else {
        b
    };
    bias.chunks_exact(block).take(n_cells).collect()
}
