//! One (layer, direction, timestep) step: the two gemms around the
//! elementwise kernel, plus weight and bias gradients going backward.

use crate::config::{CellKind, RnnConf};
use crate::elemwise::{self, Activation};
use crate::error::Result;
use crate::gemm::{gemm, Trans};
use crate::packing::WeightsRef;

/// Update rule of the primitive, resolved once at construction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CellFunc {
    Rnn(Activation),
    Lstm,
    Gru,
    GruLbr,
}

impl CellFunc {
    pub fn new(rnn: &RnnConf) -> Self {
        match rnn.cell_kind {
            CellKind::VanillaRnn => Self::Rnn(Activation::new(rnn.activation, rnn.alpha)),
            CellKind::VanillaLstm => Self::Lstm,
            CellKind::VanillaGru => Self::Gru,
            CellKind::GruLinearBeforeReset => Self::GruLbr,
        }
    }
}

/// Buffers of one forward cell.
pub struct CellFwd<'a> {
    /// gate slot of the cell
    pub gates: &'a mut [f32],
    /// linear-before-reset scratch, empty otherwise
    pub cell: &'a mut [f32],
    /// grid slot of the cell, empty unless linear-before-reset and training
    pub grid: &'a mut [f32],
    pub states_t_l: &'a mut [f32],
    pub states_t_lm1: &'a [f32],
    pub states_tm1_l: &'a [f32],
    pub w_layer: &'a [WeightsRef<'a>],
    pub w_iter: &'a [WeightsRef<'a>],
    pub bias: &'a [f32],
}

/// Buffers of one backward cell. Gradients of weights and bias are the
/// (layer, direction) blocks and are accumulated into.
pub struct CellBwd<'a> {
    pub gates: &'a mut [f32],
    pub cell: &'a mut [f32],
    pub grid: &'a [f32],
    pub states_t_l: &'a [f32],
    pub states_t_lm1: &'a [f32],
    pub states_tm1_l: &'a [f32],
    pub diff_t_l: &'a mut [f32],
    pub diff_t_lp1: &'a [f32],
    pub diff_tp1_l: &'a [f32],
    pub w_layer: &'a [WeightsRef<'a>],
    pub w_iter: &'a [WeightsRef<'a>],
    pub diff_w_layer: &'a mut [f32],
    pub diff_w_iter: &'a mut [f32],
    pub diff_bias: &'a mut [f32],
}

impl CellFunc {
    pub fn fwd(&self, rnn: &RnnConf, mut c: CellFwd<'_>) -> Result<()> {
        match *self {
            Self::Rnn(act) => {
                gates_gemm_fwd(rnn, &mut c)?;
                elemwise::rnn_fwd(rnn, act, c.gates, c.states_t_l, c.bias);
            }
            Self::Lstm => {
                gates_gemm_fwd(rnn, &mut c)?;
                elemwise::lstm_fwd(rnn, c.gates, c.states_t_l, c.states_tm1_l, c.bias);
            }
            Self::Gru => gru_fwd(rnn, c)?,
            Self::GruLbr => gru_lbr_fwd(rnn, c)?,
        }
        Ok(())
    }

    pub fn bwd(&self, rnn: &RnnConf, c: CellBwd<'_>) -> Result<()> {
        match *self {
            Self::Rnn(act) => {
                elemwise::rnn_bwd(rnn, act, c.gates, c.diff_t_lp1, c.diff_tp1_l);
                common_bwd(rnn, c)
            }
            Self::Lstm => {
                elemwise::lstm_bwd(
                    rnn,
                    c.gates,
                    c.states_t_l,
                    c.states_tm1_l,
                    c.diff_t_l,
                    c.diff_t_lp1,
                    c.diff_tp1_l,
                );
                common_bwd(rnn, c)
            }
            Self::Gru => gru_bwd(rnn, c),
            Self::GruLbr => gru_lbr_bwd(rnn, c),
        }
    }
}

/// `gates = x * W_layer + h * W_iter` over all gates
fn gates_gemm_fwd(rnn: &RnnConf, c: &mut CellFwd<'_>) -> Result<()> {
    let (wl, wi) = (&rnn.weights_layer, &rnn.weights_iter);
    wl.gemm.gemm(
        Trans::N,
        Trans::N,
        rnn.mb,
        rnn.gates_ld,
        rnn.slc,
        1.0,
        c.states_t_lm1,
        rnn.states_ws_ld,
        c.w_layer[0].data,
        c.w_layer[0].ld,
        0.0,
        c.gates,
        rnn.gates_ws_ld,
    )?;
    wi.gemm.gemm(
        Trans::N,
        Trans::N,
        rnn.mb,
        rnn.gates_ld,
        rnn.sic,
        1.0,
        c.states_tm1_l,
        rnn.states_ws_ld,
        c.w_iter[0].data,
        c.w_iter[0].ld,
        1.0,
        c.gates,
        rnn.gates_ws_ld,
    )
}

fn gru_fwd(rnn: &RnnConf, c: CellFwd<'_>) -> Result<()> {
    let (wl, wi) = (&rnn.weights_layer, &rnn.weights_iter);
    let dic = rnn.dic;
    wl.gemm.gemm(
        Trans::N,
        Trans::N,
        rnn.mb,
        rnn.gates_ld,
        rnn.slc,
        1.0,
        c.states_t_lm1,
        rnn.states_ws_ld,
        c.w_layer[0].data,
        c.w_layer[0].ld,
        0.0,
        c.gates,
        rnn.gates_ws_ld,
    )?;
    wi.gemm.gemm(
        Trans::N,
        Trans::N,
        rnn.mb,
        2 * dic,
        rnn.sic,
        1.0,
        c.states_tm1_l,
        rnn.states_ws_ld,
        c.w_iter[0].data,
        c.w_iter[0].ld,
        1.0,
        c.gates,
        rnn.gates_ws_ld,
    )?;
    elemwise::gru_part1_fwd(rnn, c.gates, c.states_t_l, c.states_tm1_l, c.bias);
    // candidate reads the reset state staged in states_t_l
    wi.gemm.gemm(
        Trans::N,
        Trans::N,
        rnn.mb,
        dic,
        rnn.sic,
        1.0,
        c.states_t_l,
        rnn.states_ws_ld,
        c.w_iter[1].data,
        c.w_iter[1].ld,
        1.0,
        &mut c.gates[2 * dic..],
        rnn.gates_ws_ld,
    )?;
    elemwise::gru_part2_fwd(rnn, c.gates, c.states_t_l, c.states_tm1_l, c.bias);
    Ok(())
}

fn gru_lbr_fwd(rnn: &RnnConf, c: CellFwd<'_>) -> Result<()> {
    let (wl, wi) = (&rnn.weights_layer, &rnn.weights_iter);
    wl.gemm.gemm(
        Trans::N,
        Trans::N,
        rnn.mb,
        rnn.gates_ld,
        rnn.slc,
        1.0,
        c.states_t_lm1,
        rnn.states_ws_ld,
        c.w_layer[0].data,
        c.w_layer[0].ld,
        0.0,
        c.gates,
        rnn.gates_ws_ld,
    )?;
    wi.gemm.gemm(
        Trans::N,
        Trans::N,
        rnn.mb,
        rnn.gates_ld,
        rnn.sic,
        1.0,
        c.states_tm1_l,
        rnn.states_ws_ld,
        c.w_iter[0].data,
        c.w_iter[0].ld,
        0.0,
        c.cell,
        rnn.gates_ws_ld,
    )?;
    elemwise::gru_lbr_fwd(
        rnn,
        c.gates,
        c.cell,
        c.grid,
        c.states_t_l,
        c.states_tm1_l,
        c.bias,
    );
    Ok(())
}

/// Input side of every backward cell: `d_x = dG * W_layer^T`, then the
/// weight gradients of both groups and the bias gradient of the first
/// `n_gates` rows.
fn layer_bwd(rnn: &RnnConf, c: &mut CellBwd<'_>, iter_parts: &[(usize, usize)]) -> Result<()> {
    let wl = &rnn.weights_layer;
    let input_slot = rnn.n_states * rnn.state_slot();
    wl.gemm.gemm(
        Trans::N,
        Trans::T,
        rnn.mb,
        rnn.slc,
        rnn.gates_ld,
        1.0,
        c.gates,
        rnn.gates_ws_ld,
        c.w_layer[0].data,
        c.w_layer[0].ld,
        0.0,
        &mut c.diff_t_l[input_slot..],
        rnn.states_ws_ld,
    )?;
    gemm(
        Trans::T,
        Trans::N,
        rnn.slc,
        rnn.gates_ld,
        rnn.mb,
        1.0,
        c.states_t_lm1,
        rnn.states_ws_ld,
        c.gates,
        rnn.gates_ws_ld,
        1.0,
        c.diff_w_layer,
        rnn.diff_weights_layer_ld,
    )?;
    // iteration weight gradient, over the gate columns driven by h_prev
    for &(col, width) in iter_parts {
        gemm(
            Trans::T,
            Trans::N,
            rnn.sic,
            width,
            rnn.mb,
            1.0,
            c.states_tm1_l,
            rnn.states_ws_ld,
            &c.gates[col..],
            rnn.gates_ws_ld,
            1.0,
            &mut c.diff_w_iter[col..],
            rnn.diff_weights_iter_ld,
        )?;
    }
    gates_reduction(rnn, c.gates, c.diff_bias);
    Ok(())
}

/// `diff_bias[g][j] += sum_i gates[i][g][j]`
fn gates_reduction(rnn: &RnnConf, gates: &[f32], diff_bias: &mut [f32]) {
    for row in gates.chunks(rnn.gates_ws_ld).take(rnn.mb) {
        for (db, g) in diff_bias[..rnn.gates_ld].iter_mut().zip(row) {
            *db += g;
        }
    }
}

fn common_bwd(rnn: &RnnConf, mut c: CellBwd<'_>) -> Result<()> {
    let wi = &rnn.weights_iter;
    wi.gemm.gemm(
        Trans::N,
        Trans::T,
        rnn.mb,
        rnn.sic,
        rnn.gates_ld,
        1.0,
        c.gates,
        rnn.gates_ws_ld,
        c.w_iter[0].data,
        c.w_iter[0].ld,
        0.0,
        c.diff_t_l,
        rnn.states_ws_ld,
    )?;
    layer_bwd(rnn, &mut c, &[(0, rnn.gates_ld)])
}

fn gru_bwd(rnn: &RnnConf, mut c: CellBwd<'_>) -> Result<()> {
    let wi = &rnn.weights_iter;
    let dic = rnn.dic;
    let input_slot = rnn.n_states * rnn.state_slot();

    elemwise::gru_part1_bwd(
        rnn,
        c.gates,
        c.states_tm1_l,
        c.diff_t_l,
        c.diff_t_lp1,
        c.diff_tp1_l,
    );
    // d(r * h) into the input gradient slot, overwritten by d_x below
    wi.gemm.gemm(
        Trans::N,
        Trans::T,
        rnn.mb,
        rnn.sic,
        dic,
        1.0,
        &c.gates[2 * dic..],
        rnn.gates_ws_ld,
        c.w_iter[1].data,
        c.w_iter[1].ld,
        0.0,
        &mut c.diff_t_l[input_slot..],
        rnn.states_ws_ld,
    )?;
    elemwise::gru_part2_bwd(rnn, c.gates, c.states_tm1_l, c.diff_t_l);
    // the candidate's recurrent input was r * h, now staged in the same slot
    gemm(
        Trans::T,
        Trans::N,
        rnn.sic,
        dic,
        rnn.mb,
        1.0,
        &c.diff_t_l[input_slot..],
        rnn.states_ws_ld,
        &c.gates[2 * dic..],
        rnn.gates_ws_ld,
        1.0,
        &mut c.diff_w_iter[2 * dic..],
        rnn.diff_weights_iter_ld,
    )?;
    wi.gemm.gemm(
        Trans::N,
        Trans::T,
        rnn.mb,
        rnn.sic,
        2 * dic,
        1.0,
        c.gates,
        rnn.gates_ws_ld,
        c.w_iter[0].data,
        c.w_iter[0].ld,
        1.0,
        c.diff_t_l,
        rnn.states_ws_ld,
    )?;
    layer_bwd(rnn, &mut c, &[(0, 2 * dic)])
}

fn gru_lbr_bwd(rnn: &RnnConf, mut c: CellBwd<'_>) -> Result<()> {
    let wi = &rnn.weights_iter;
    let dic = rnn.dic;

    elemwise::gru_lbr_bwd(
        rnn,
        c.gates,
        c.cell,
        c.grid,
        c.states_tm1_l,
        c.diff_t_l,
        c.diff_t_lp1,
        c.diff_tp1_l,
    );
    wi.gemm.gemm(
        Trans::N,
        Trans::T,
        rnn.mb,
        rnn.sic,
        rnn.gates_ld,
        1.0,
        c.cell,
        rnn.gates_ws_ld,
        c.w_iter[0].data,
        c.w_iter[0].ld,
        1.0,
        c.diff_t_l,
        rnn.states_ws_ld,
    )?;
    gemm(
        Trans::T,
        Trans::N,
        rnn.sic,
        rnn.gates_ld,
        rnn.mb,
        1.0,
        c.states_tm1_l,
        rnn.states_ws_ld,
        c.cell,
        rnn.gates_ws_ld,
        1.0,
        c.diff_w_iter,
        rnn.diff_weights_iter_ld,
    )?;
    // recurrent candidate bias, the fourth row
    for row in c.cell.chunks(rnn.gates_ws_ld).take(rnn.mb) {
        let db = &mut c.diff_bias[3 * dic..4 * dic];
        for (db, g) in db.iter_mut().zip(&row[2 * dic..3 * dic]) {
            *db += g;
        }
    }
    layer_bwd(rnn, &mut c, &[])
}
