//! Walks the (layer, direction, timestep) grid in dependency order.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::cell::{CellBwd, CellFunc, CellFwd};
use crate::config::RnnConf;
use crate::error::Result;
use crate::packing::WeightsPtrs;
use crate::state::WsViews;

/// Order in which the directions of one layer run. Directions share no
/// state, any order gives the same result.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionSchedule {
    #[default]
    InOrder,
    Reversed,
}

impl DirectionSchedule {
    pub fn dirs(self, n_dir: usize) -> Vec<usize> {
        match self {
            Self::InOrder => (0..n_dir).collect(),
            Self::Reversed => (0..n_dir).rev().collect(),
        }
    }
}

/// Prepared weights and bias of one call.
pub struct Params<'a> {
    pub w_layer: WeightsPtrs<'a>,
    pub w_iter: WeightsPtrs<'a>,
    /// one `[n_bias][dic]` block per (layer, direction)
    pub bias: Vec<&'a [f32]>,
}

/// Gradient accumulators, laid out like the weights and bias.
pub struct DiffParams<'a> {
    pub weights_layer: &'a mut [f32],
    pub weights_iter: &'a mut [f32],
    pub bias: &'a mut [f32],
}

/// Layers bottom up, timesteps front to back.
pub fn linear_execution_fwd(
    rnn: &RnnConf,
    cell_func: CellFunc,
    schedule: DirectionSchedule,
    ws: &mut WsViews<'_>,
    cell: &mut [f32],
    params: &Params<'_>,
) -> Result<()> {
    let block = rnn.states_block();
    for lay in 0..rnn.n_layer {
        for dir in schedule.dirs(rnn.n_dir) {
            for iter in 0..rnn.n_iter {
                trace!(lay, dir, iter, "forward cell");
                let write = rnn.states_off(lay + 1, dir, iter + 1);
                let (done, rest) = ws.states.split_at_mut(write);
                let grid_off = rnn.grid_off(lay, dir, iter);
                cell_func.fwd(
                    rnn,
                    CellFwd {
                        gates: &mut ws.gates[rnn.gates_off(lay, dir, iter)..][..rnn.gates_slot()],
                        cell: &mut *cell,
                        grid: ws
                            .grid
                            .get_mut(grid_off..grid_off + rnn.ws_per_cell)
                            .unwrap_or_default(),
                        states_t_l: &mut rest[..block],
                        states_t_lm1: &done[rnn.states_off(lay, dir, iter + 1)..][..block],
                        states_tm1_l: &done[rnn.states_off(lay + 1, dir, iter)..][..block],
                        w_layer: params.w_layer.cell(lay, dir),
                        w_iter: params.w_iter.cell(lay, dir),
                        bias: params.bias[lay * rnn.n_dir + dir],
                    },
                )?;
            }
        }
    }
    Ok(())
}

/// Layers top down, timesteps back to front. Gate slots are replaced by
/// their gradients.
pub fn linear_execution_bwd(
    rnn: &RnnConf,
    cell_func: CellFunc,
    schedule: DirectionSchedule,
    ws: &mut WsViews<'_>,
    cell: &mut [f32],
    params: &Params<'_>,
    diff: &mut DiffParams<'_>,
) -> Result<()> {
    let block = rnn.states_block();
    let diff_block = rnn.diff_states_block();
    let w_layer_size = rnn.slc * rnn.diff_weights_layer_ld;
    let w_iter_size = rnn.sic * rnn.diff_weights_iter_ld;
    let bias_size = rnn.n_bias * rnn.dic;
    let states: &[f32] = ws.states;

    for lay in (0..rnn.n_layer).rev() {
        for dir in schedule.dirs(rnn.n_dir) {
            let c = lay * rnn.n_dir + dir;
            for iter in (0..rnn.n_iter).rev() {
                trace!(lay, dir, iter, "backward cell");
                let write = rnn.diff_states_off(lay, dir, iter);
                let (head, later) = ws.diff_states.split_at_mut(write + diff_block);
                let later_off = |off: usize| off - (write + diff_block);
                let grid_off = rnn.grid_off(lay, dir, iter);
                cell_func.bwd(
                    rnn,
                    CellBwd {
                        gates: &mut ws.gates[rnn.gates_off(lay, dir, iter)..][..rnn.gates_slot()],
                        cell: &mut *cell,
                        grid: ws
                            .grid
                            .get(grid_off..grid_off + rnn.ws_per_cell)
                            .unwrap_or_default(),
                        states_t_l: &states[rnn.states_off(lay + 1, dir, iter + 1)..][..block],
                        states_t_lm1: &states[rnn.states_off(lay, dir, iter + 1)..][..block],
                        states_tm1_l: &states[rnn.states_off(lay + 1, dir, iter)..][..block],
                        diff_t_l: &mut head[write..],
                        diff_t_lp1: &later[later_off(rnn.diff_states_off(lay + 1, dir, iter))..]
                            [..diff_block],
                        diff_tp1_l: &later[later_off(rnn.diff_states_off(lay, dir, iter + 1))..]
                            [..diff_block],
                        w_layer: params.w_layer.cell(lay, dir),
                        w_iter: params.w_iter.cell(lay, dir),
                        diff_w_layer: &mut diff.weights_layer[c * w_layer_size..][..w_layer_size],
                        diff_w_iter: &mut diff.weights_iter[c * w_iter_size..][..w_iter_size],
                        diff_bias: &mut diff.bias[c * bias_size..][..bias_size],
                    },
                )?;
            }
        }
    }
    Ok(())
}
