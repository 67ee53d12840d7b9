//! The rnn primitive: configuration, layout and cell function resolved once,
//! then any number of execute calls.

use tracing::{debug, debug_span};

use crate::cell::CellFunc;
use crate::config::{RnnConf, RnnDesc};
use crate::copy::*;
use crate::error::{Result, RnnError};
use crate::grid::{
    linear_execution_bwd, linear_execution_fwd, DiffParams, DirectionSchedule, Params,
};
use crate::layout::WorkspaceLayout;
use crate::packing::{prepare_bias, prepare_weights, WeightsGroup};

/// Buffers of a forward call, dense row-major.
pub struct ForwardArgs<'a> {
    /// `[n_iter][mb][slc]`
    pub src_layer: &'a [f32],
    /// `[n_layer][n_dir][n_states][mb][sic]`, zeros when absent
    pub src_iter: Option<&'a [f32]>,
    /// `[n_layer][n_dir][slc][n_gates][dic]`, or packed
    pub weights_layer: &'a [f32],
    /// `[n_layer][n_dir][sic][n_gates][dic]`, or packed
    pub weights_iter: &'a [f32],
    /// `[n_layer][n_dir][n_bias][dic]`
    pub bias: &'a [f32],
    /// `[n_iter][mb][dlc]`
    pub dst_layer: &'a mut [f32],
    /// `[n_layer][n_dir][n_states][mb][dic]`
    pub dst_iter: Option<&'a mut [f32]>,
    /// required for forward training, kept for the backward call
    pub workspace: Option<&'a mut [f32]>,
}

/// Buffers of a backward call. The weight and bias gradients are added to,
/// the source gradients are overwritten.
pub struct BackwardArgs<'a> {
    pub weights_layer: &'a [f32],
    pub weights_iter: &'a [f32],
    pub diff_dst_layer: &'a [f32],
    pub diff_dst_iter: Option<&'a [f32]>,
    /// filled by a forward training call of the same configuration, gate
    /// slots hold the gate gradients afterwards
    pub workspace: &'a mut [f32],
    pub diff_src_layer: &'a mut [f32],
    pub diff_src_iter: Option<&'a mut [f32]>,
    pub diff_weights_layer: &'a mut [f32],
    pub diff_weights_iter: &'a mut [f32],
    pub diff_bias: &'a mut [f32],
}

#[derive(Debug)]
pub struct RnnPrimitive {
    conf: RnnConf,
    layout: WorkspaceLayout,
    cell_func: CellFunc,
    schedule: DirectionSchedule,
    scratchpad: Vec<f32>,
}

impl RnnPrimitive {
    /// Fails with [`RnnError::Unimplemented`] for configurations the engine
    /// does not run.
    pub fn new(desc: RnnDesc) -> Result<Self> {
        let conf = RnnConf::init(desc)?;
        let layout = WorkspaceLayout::new(&conf);
        let cell_func = CellFunc::new(&conf);
        debug!(
            cell = ?conf.cell_kind,
            prop = ?conf.prop_kind,
            direction = ?conf.direction,
            workspace = layout.workspace_size,
            scratchpad = layout.scratchpad_size,
            "rnn primitive"
        );
        Ok(Self {
            scratchpad: vec![0.0; layout.scratchpad_size],
            conf,
            layout,
            cell_func,
            schedule: DirectionSchedule::default(),
        })
    }

    pub fn with_direction_schedule(mut self, schedule: DirectionSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn conf(&self) -> &RnnConf {
        &self.conf
    }

    pub fn layout(&self) -> &WorkspaceLayout {
        &self.layout
    }

    /// floats the caller must provide for training, 0 for inference
    pub fn workspace_size(&self) -> usize {
        self.layout.workspace_size
    }

    pub fn scratchpad_size(&self) -> usize {
        self.layout.scratchpad_size
    }

    pub fn forward(&mut self, args: ForwardArgs<'_>) -> Result<()> {
        let rnn = &self.conf;
        if !rnn.is_fwd {
            return Err(RnnError::InvalidArguments(
                "forward called on a backward primitive".into(),
            ));
        }
        let _span =
            debug_span!("rnn_forward", cell = ?rnn.cell_kind, n_iter = rnn.n_iter).entered();
        debug_assert!(args.src_layer.len() >= rnn.src_layer_len());
        debug_assert!(args.bias.len() >= rnn.bias_len());

        let (head, tail) = self.scratchpad.split_at_mut(self.layout.scratch_base);
        let ws_buf: &mut [f32] = if rnn.use_workspace {
            match args.workspace {
                Some(ws) => {
                    debug_assert!(ws.len() >= self.layout.workspace_size);
                    ws
                }
                None => {
                    return Err(RnnError::InvalidArguments(
                        "forward training needs a workspace".into(),
                    ))
                }
            }
        } else {
            head
        };
        let (mut ws, scratch) = self.layout.views(ws_buf, tail);

        let params = Params {
            w_layer: prepare_weights(
                rnn,
                WeightsGroup::Layer,
                args.weights_layer,
                scratch.weights_layer,
            ),
            w_iter: prepare_weights(
                rnn,
                WeightsGroup::Iter,
                args.weights_iter,
                scratch.weights_iter,
            ),
            bias: prepare_bias(rnn, args.bias, scratch.bias),
        };

        copy_init_layer_fwd(rnn, ws.states, args.src_layer);
        copy_init_iter_fwd(rnn, ws.states, args.src_iter);
        linear_execution_fwd(
            rnn,
            self.cell_func,
            self.schedule,
            &mut ws,
            scratch.cell,
            &params,
        )?;
        copy_res_layer_fwd(rnn, ws.states, args.dst_layer);
        copy_res_iter_fwd(rnn, ws.states, args.dst_iter);
        Ok(())
    }

    pub fn backward(&mut self, args: BackwardArgs<'_>) -> Result<()> {
        let rnn = &self.conf;
        if rnn.is_fwd {
            return Err(RnnError::InvalidArguments(
                "backward called on a forward primitive".into(),
            ));
        }
        let _span =
            debug_span!("rnn_backward", cell = ?rnn.cell_kind, n_iter = rnn.n_iter).entered();
        debug_assert!(args.workspace.len() >= self.layout.workspace_size);
        debug_assert!(args.diff_src_layer.len() >= rnn.src_layer_len());
        debug_assert!(args.diff_weights_layer.len() >= rnn.weights_layer_len());
        debug_assert!(args.diff_weights_iter.len() >= rnn.weights_iter_len());
        debug_assert!(args.diff_bias.len() >= rnn.bias_len());

        let (mut ws, scratch) = self.layout.views(args.workspace, &mut self.scratchpad);

        let params = Params {
            w_layer: prepare_weights(
                rnn,
                WeightsGroup::Layer,
                args.weights_layer,
                scratch.weights_layer,
            ),
            w_iter: prepare_weights(
                rnn,
                WeightsGroup::Iter,
                args.weights_iter,
                scratch.weights_iter,
            ),
            bias: Vec::new(),
        };
        let mut diff = DiffParams {
            weights_layer: args.diff_weights_layer,
            weights_iter: args.diff_weights_iter,
            bias: args.diff_bias,
        };

        ws.diff_states.fill(0.0);
        copy_init_layer_bwd(rnn, ws.diff_states, args.diff_dst_layer);
        copy_init_iter_bwd(rnn, ws.diff_states, args.diff_dst_iter);
        linear_execution_bwd(
            rnn,
            self.cell_func,
            self.schedule,
            &mut ws,
            scratch.cell,
            &params,
            &mut diff,
        )?;
        copy_res_layer_bwd(rnn, ws.diff_states, args.diff_src_layer);
        copy_res_iter_bwd(rnn, ws.diff_states, args.diff_src_iter);
        Ok(())
    }
}
