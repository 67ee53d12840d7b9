//! Typed views over the workspace and scratchpad, and the index arithmetic
//! of the grid tensors living inside them.

use crate::config::{Direction, RnnConf};
use crate::layout::{Segment, WorkspaceLayout};

/// Mandatory segments of one call.
pub struct WsViews<'a> {
    /// (layer, dir, iter) slots of `[mb][gates_ws_ld]`
    pub gates: &'a mut [f32],
    /// (layer, dir, iter) blocks of `[n_states][mb][states_ws_ld]`
    pub states: &'a mut [f32],
    /// (layer, dir, iter) blocks of `[n_states + 1][mb][states_ws_ld]`,
    /// the extra state is the gradient towards the layer input
    pub diff_states: &'a mut [f32],
    /// (layer, dir, iter) slots of `[mb][dic]`
    pub grid: &'a mut [f32],
}

/// Optional segments of one call.
pub struct ScratchViews<'a> {
    pub cell: &'a mut [f32],
    pub weights_layer: &'a mut [f32],
    pub weights_iter: &'a mut [f32],
    pub bias: &'a mut [f32],
}

/// Split `buf` into the given ascending, non overlapping segments.
pub fn carve<'a, const N: usize>(
    mut buf: &'a mut [f32],
    segs: [Segment; N],
) -> [&'a mut [f32]; N] {
    let mut base = 0;
    segs.map(|seg| {
        debug_assert!(seg.offset >= base);
        let rest = std::mem::take(&mut buf);
        let (_, rest) = rest.split_at_mut(seg.offset - base);
        let (mine, rest) = rest.split_at_mut(seg.len);
        buf = rest;
        base = seg.end();
        mine
    })
}

impl WorkspaceLayout {
    /// `ws` holds the mandatory segments, `scratch` the optional ones.
    pub fn views<'a>(
        &self,
        ws: &'a mut [f32],
        scratch: &'a mut [f32],
    ) -> (WsViews<'a>, ScratchViews<'a>) {
        let [gates, states, diff_states, grid] = carve(ws, self.mandatory());
        let [cell, weights_layer, weights_iter, bias] = carve(scratch, self.optional());
        (
            WsViews {
                gates,
                states,
                diff_states,
                grid,
            },
            ScratchViews {
                cell,
                weights_layer,
                weights_iter,
                bias,
            },
        )
    }
}

impl RnnConf {
    pub fn gates_slot(&self) -> usize {
        self.mb * self.gates_ws_ld
    }

    /// Without a workspace every cell reuses slot 0.
    pub fn gates_off(&self, lay: usize, dir: usize, iter: usize) -> usize {
        if self.use_workspace {
            ((lay * self.n_dir + dir) * self.n_iter + iter) * self.gates_slot()
        } else {
            0
        }
    }

    pub fn state_slot(&self) -> usize {
        self.mb * self.states_ws_ld
    }

    pub fn states_block(&self) -> usize {
        self.n_states * self.state_slot()
    }

    /// `lay` in `0..=n_layer` where 0 is the layer input, `iter` in
    /// `0..=n_iter` where 0 is the initial state.
    pub fn states_off(&self, lay: usize, dir: usize, iter: usize) -> usize {
        ((lay * self.n_dir + dir) * (self.n_iter + 1) + iter) * self.states_block()
    }

    pub fn diff_states_block(&self) -> usize {
        (self.n_states + 1) * self.state_slot()
    }

    pub fn diff_states_off(&self, lay: usize, dir: usize, iter: usize) -> usize {
        ((lay * self.n_dir + dir) * (self.n_iter + 1) + iter) * self.diff_states_block()
    }

    pub fn grid_off(&self, lay: usize, dir: usize, iter: usize) -> usize {
        ((lay * self.n_dir + dir) * self.n_iter + iter) * self.ws_per_cell
    }

    /// whether direction `dir` walks the sequence back to front
    pub fn dir_is_reversed(&self, dir: usize) -> bool {
        match self.direction {
            Direction::UnidirectionalLeft2Right => false,
            Direction::UnidirectionalRight2Left => true,
            Direction::BidirectionalConcat | Direction::BidirectionalSum => dir == 1,
        }
    }

    /// sequence position stored at timestep `iter` of direction `dir`
    pub fn seq_pos(&self, dir: usize, iter: usize) -> usize {
        if self.dir_is_reversed(dir) {
            self.n_iter - 1 - iter
        } else {
            iter
        }
    }

    pub fn src_layer_len(&self) -> usize {
        self.n_iter * self.mb * self.slc
    }

    pub fn src_iter_len(&self) -> usize {
        self.n_layer * self.n_dir * self.n_states * self.mb * self.sic
    }

    pub fn dst_layer_len(&self) -> usize {
        self.n_iter * self.mb * self.dlc
    }

    pub fn dst_iter_len(&self) -> usize {
        self.n_layer * self.n_dir * self.n_states * self.mb * self.dic
    }

    pub fn weights_layer_len(&self) -> usize {
        self.n_layer * self.n_dir * self.slc * self.gates_ld
    }

    pub fn weights_iter_len(&self) -> usize {
        self.n_layer * self.n_dir * self.sic * self.gates_ld
    }

    pub fn bias_len(&self) -> usize {
        self.n_layer * self.n_dir * self.n_bias * self.dic
    }
}
