//! Moves between caller buffers and the state tensors of the workspace.
//!
//! Reversed directions keep their own time order inside the workspace, the
//! copies translate through [`RnnConf::seq_pos`].

use crate::config::{Direction, RnnConf};

impl RnnConf {
    fn state_row(&self, block: usize, s: usize, i: usize) -> usize {
        block + s * self.state_slot() + i * self.states_ws_ld
    }

    /// column of direction `dir` in the layer output
    fn dst_col(&self, dir: usize) -> usize {
        match self.direction {
            Direction::BidirectionalConcat => dir * self.dic,
            _ => 0,
        }
    }
}

/// `src_layer` into the layer 0 row of the states.
pub fn copy_init_layer_fwd(rnn: &RnnConf, states: &mut [f32], src_layer: &[f32]) {
    debug_assert!(src_layer.len() >= rnn.src_layer_len());
    for dir in 0..rnn.n_dir {
        for iter in 0..rnn.n_iter {
            let block = rnn.states_off(0, dir, iter + 1);
            let pos = rnn.seq_pos(dir, iter);
            for i in 0..rnn.mb {
                let src = &src_layer[(pos * rnn.mb + i) * rnn.slc..][..rnn.slc];
                let row = rnn.state_row(block, 0, i);
                states[row..row + rnn.slc].copy_from_slice(src);
            }
        }
    }
}

/// `src_iter`, or zeros, into timestep 0 of every layer.
pub fn copy_init_iter_fwd(rnn: &RnnConf, states: &mut [f32], src_iter: Option<&[f32]>) {
    if let Some(src_iter) = src_iter {
        debug_assert!(src_iter.len() >= rnn.src_iter_len());
    }
    let mut src_rows = src_iter.map(|s| s.chunks_exact(rnn.sic));
    for lay in 0..rnn.n_layer {
        for dir in 0..rnn.n_dir {
            let block = rnn.states_off(lay + 1, dir, 0);
            for s in 0..rnn.n_states {
                for i in 0..rnn.mb {
                    let row = rnn.state_row(block, s, i);
                    let dst = &mut states[row..row + rnn.sic];
                    match src_rows.as_mut().and_then(|rows| rows.next()) {
                        Some(src) => dst.copy_from_slice(src),
                        None => dst.fill(0.0),
                    }
                }
            }
        }
    }
}

/// Last layer outputs into `dst_layer`, concatenated or summed over
/// directions.
pub fn copy_res_layer_fwd(rnn: &RnnConf, states: &[f32], dst_layer: &mut [f32]) {
    debug_assert!(dst_layer.len() >= rnn.dst_layer_len());
    let sum = rnn.direction == Direction::BidirectionalSum;
    for dir in 0..rnn.n_dir {
        for iter in 0..rnn.n_iter {
            let block = rnn.states_off(rnn.n_layer, dir, iter + 1);
            let pos = rnn.seq_pos(dir, iter);
            for i in 0..rnn.mb {
                let row = rnn.state_row(block, 0, i);
                let src = &states[row..row + rnn.dic];
                let col = (pos * rnn.mb + i) * rnn.dlc + rnn.dst_col(dir);
                let dst = &mut dst_layer[col..col + rnn.dic];
                if sum && dir > 0 {
                    dst.iter_mut().zip(src).for_each(|(d, s)| *d += s);
                } else {
                    dst.copy_from_slice(src);
                }
            }
        }
    }
}

/// Final states of every layer into `dst_iter`.
pub fn copy_res_iter_fwd(rnn: &RnnConf, states: &[f32], dst_iter: Option<&mut [f32]>) {
    let Some(dst_iter) = dst_iter else {
        return;
    };
    debug_assert!(dst_iter.len() >= rnn.dst_iter_len());
    let mut dst_rows = dst_iter.chunks_exact_mut(rnn.dic);
    for lay in 0..rnn.n_layer {
        for dir in 0..rnn.n_dir {
            let block = rnn.states_off(lay + 1, dir, rnn.n_iter);
            for s in 0..rnn.n_states {
                for i in 0..rnn.mb {
                    let row = rnn.state_row(block, s, i);
                    if let Some(dst) = dst_rows.next() {
                        dst.copy_from_slice(&states[row..row + rnn.dic]);
                    }
                }
            }
        }
    }
}

/// `diff_dst_layer` into the input gradient slot above the last layer. With
/// summed directions both stacks see the whole gradient.
pub fn copy_init_layer_bwd(rnn: &RnnConf, diff_states: &mut [f32], diff_dst_layer: &[f32]) {
    debug_assert!(diff_dst_layer.len() >= rnn.dst_layer_len());
    for dir in 0..rnn.n_dir {
        for iter in 0..rnn.n_iter {
            let block = rnn.diff_states_off(rnn.n_layer, dir, iter);
            let pos = rnn.seq_pos(dir, iter);
            for i in 0..rnn.mb {
                let col = (pos * rnn.mb + i) * rnn.dlc + rnn.dst_col(dir);
                let src = &diff_dst_layer[col..col + rnn.dic];
                let row = rnn.state_row(block, rnn.n_states, i);
                diff_states[row..row + rnn.dic].copy_from_slice(src);
            }
        }
    }
}

/// `diff_dst_iter`, or zeros, into the last timestep of every layer.
pub fn copy_init_iter_bwd(rnn: &RnnConf, diff_states: &mut [f32], diff_dst_iter: Option<&[f32]>) {
    if let Some(diff_dst_iter) = diff_dst_iter {
        debug_assert!(diff_dst_iter.len() >= rnn.dst_iter_len());
    }
    let mut src_rows = diff_dst_iter.map(|s| s.chunks_exact(rnn.dic));
    for lay in 0..rnn.n_layer {
        for dir in 0..rnn.n_dir {
            let block = rnn.diff_states_off(lay, dir, rnn.n_iter);
            for s in 0..rnn.n_states {
                for i in 0..rnn.mb {
                    let row = rnn.state_row(block, s, i);
                    let dst = &mut diff_states[row..row + rnn.dic];
                    match src_rows.as_mut().and_then(|rows| rows.next()) {
                        Some(src) => dst.copy_from_slice(src),
                        None => dst.fill(0.0),
                    }
                }
            }
        }
    }
}

/// Input gradients of layer 0 into `diff_src_layer`, summed over
/// directions.
pub fn copy_res_layer_bwd(rnn: &RnnConf, diff_states: &[f32], diff_src_layer: &mut [f32]) {
    debug_assert!(diff_src_layer.len() >= rnn.src_layer_len());
    for dir in 0..rnn.n_dir {
        for iter in 0..rnn.n_iter {
            let block = rnn.diff_states_off(0, dir, iter);
            let pos = rnn.seq_pos(dir, iter);
            for i in 0..rnn.mb {
                let row = rnn.state_row(block, rnn.n_states, i);
                let src = &diff_states[row..row + rnn.slc];
                let dst = &mut diff_src_layer[(pos * rnn.mb + i) * rnn.slc..][..rnn.slc];
                if dir > 0 {
                    dst.iter_mut().zip(src).for_each(|(d, s)| *d += s);
                } else {
                    dst.copy_from_slice(src);
                }
            }
        }
    }
}

/// Gradients of the initial states into `diff_src_iter`.
pub fn copy_res_iter_bwd(rnn: &RnnConf, diff_states: &[f32], diff_src_iter: Option<&mut [f32]>) {
    let Some(diff_src_iter) = diff_src_iter else {
        return;
    };
    debug_assert!(diff_src_iter.len() >= rnn.src_iter_len());
    let mut dst_rows = diff_src_iter.chunks_exact_mut(rnn.sic);
    for lay in 0..rnn.n_layer {
        for dir in 0..rnn.n_dir {
            let block = rnn.diff_states_off(lay, dir, 0);
            for s in 0..rnn.n_states {
                for i in 0..rnn.mb {
                    let row = rnn.state_row(block, s, i);
                    if let Some(dst) = dst_rows.next() {
                        dst.copy_from_slice(&diff_states[row..row + rnn.sic]);
                    }
                }
            }
        }
    }
}
