use std::ops::Range;

use serde::Serialize;

use crate::config::RnnConf;
use crate::utils::rnd_up;

/// floats per 4K page, every segment starts on one
pub const PAGE_FLOATS: usize = 4096 / std::mem::size_of::<f32>();

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub offset: usize,
    pub len: usize,
}

impl Segment {
    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.end()
    }
}

/// Named float ranges inside the workspace and the scratchpad.
///
/// Mandatory segments are relative to the start of the workspace when
/// training, otherwise to the start of the scratchpad. Optional segments are
/// relative to `scratch_base` inside the scratchpad.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WorkspaceLayout {
    /// gate pre-activations, then activations, then gate gradients
    pub gates: Segment,
    /// `[n_layer + 1][n_dir][n_iter + 1][n_states][mb][states_ws_ld]`
    pub states: Segment,
    /// `[n_layer + 1][n_dir][n_iter + 1][n_states + 1][mb][states_ws_ld]`
    pub diff_states: Segment,
    /// per cell terms a backward pass needs besides gates and states
    pub grid: Segment,
    /// per call cell temporaries
    pub cell: Segment,
    pub weights_layer: Segment,
    pub weights_iter: Segment,
    pub bias: Segment,
    pub scratch_base: usize,
    pub workspace_size: usize,
    pub scratchpad_size: usize,
}

struct Booker {
    offset: usize,
}

impl Booker {
    fn book(&mut self, len: usize) -> Segment {
        let offset = rnd_up(self.offset, PAGE_FLOATS);
        self.offset = offset + len;
        Segment { offset, len }
    }
}

impl WorkspaceLayout {
    pub fn new(rnn: &RnnConf) -> Self {
        let mut mandatory = Booker { offset: 0 };
        let gates = mandatory.book(rnn.ws_gates_size);
        let states = mandatory.book(rnn.ws_states_size);
        let diff_states = mandatory.book(rnn.ws_diff_states_size);
        let grid = mandatory.book(rnn.ws_grid_comp_size);

        let (workspace_size, scratch_base) = if rnn.use_workspace {
            (mandatory.offset, 0)
        } else {
            (0, rnd_up(mandatory.offset, PAGE_FLOATS))
        };

        let mut optional = Booker { offset: 0 };
        let cell = optional.book(rnn.ws_cell_comp_size);
        let weights_layer = optional.book(rnn.weights_layer.scratch_size);
        let weights_iter = optional.book(rnn.weights_iter.scratch_size);
        let bias = optional.book(rnn.ws_bias_size);

        Self {
            gates,
            states,
            diff_states,
            grid,
            cell,
            weights_layer,
            weights_iter,
            bias,
            scratch_base,
            workspace_size,
            scratchpad_size: scratch_base + optional.offset,
        }
    }

    pub fn mandatory(&self) -> [Segment; 4] {
        [self.gates, self.states, self.diff_states, self.grid]
    }

    pub fn optional(&self) -> [Segment; 4] {
        [self.cell, self.weights_layer, self.weights_iter, self.bias]
    }

    pub fn segments(&self) -> [(&'static str, Segment); 8] {
        [
            ("gates", self.gates),
            ("states", self.states),
            ("diff_states", self.diff_states),
            ("grid", self.grid),
            ("cell", self.cell),
            ("weights_layer", self.weights_layer),
            ("weights_iter", self.weights_iter),
            ("bias", self.bias),
        ]
    }
}
