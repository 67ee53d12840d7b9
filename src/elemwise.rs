//! Per cell kind gate nonlinearities and state updates.
//!
//! Every kernel touches only the gate slot, state blocks, cell scratch and
//! grid slot of the one cell it is called for. Gate slots are
//! `[mb][gates_ws_ld]` with gate `g` in columns `g * dic..(g + 1) * dic`,
//! state blocks are `[n_states][mb][states_ws_ld]`.
//!
//! Forward kernels leave the activated gates in the gate slot, backward
//! kernels replace them with the gate gradients.

use crate::config::{ActivationKind, RnnConf};

pub fn logistic(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// derivative of logistic through its output
pub fn x_m_square(y: f32) -> f32 {
    y - y * y
}

/// derivative of tanh through its output
pub fn one_m_square(y: f32) -> f32 {
    1.0 - y * y
}

/// Activation of a vanilla rnn cell, picked once per primitive.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Activation {
    pub kind: ActivationKind,
    /// negative slope of relu
    pub alpha: f32,
}

impl Activation {
    pub fn new(kind: ActivationKind, alpha: f32) -> Self {
        Self { kind, alpha }
    }

    pub fn fwd(&self, x: f32) -> f32 {
        match self.kind {
            ActivationKind::Relu if x > 0.0 => x,
            ActivationKind::Relu => self.alpha * x,
            ActivationKind::Tanh => x.tanh(),
            ActivationKind::Logistic => logistic(x),
        }
    }

    /// Derivative at the point whose forward output is `y`.
    pub fn bwd(&self, y: f32) -> f32 {
        match self.kind {
            ActivationKind::Relu if y > 0.0 => 1.0,
            ActivationKind::Relu => self.alpha,
            ActivationKind::Tanh => one_m_square(y),
            ActivationKind::Logistic => x_m_square(y),
        }
    }
}

struct Idx {
    dic: usize,
    gates_ld: usize,
    states_ld: usize,
    state_slot: usize,
}

impl Idx {
    fn new(rnn: &RnnConf) -> Self {
        Self {
            dic: rnn.dic,
            gates_ld: rnn.gates_ws_ld,
            states_ld: rnn.states_ws_ld,
            state_slot: rnn.state_slot(),
        }
    }

    fn gate(&self, i: usize, gate: usize, j: usize) -> usize {
        i * self.gates_ld + gate * self.dic + j
    }

    fn state(&self, s: usize, i: usize, j: usize) -> usize {
        s * self.state_slot + i * self.states_ld + j
    }

    fn bias(&self, gate: usize, j: usize) -> usize {
        gate * self.dic + j
    }

    fn grid(&self, i: usize, j: usize) -> usize {
        i * self.dic + j
    }
}

pub fn rnn_fwd(
    rnn: &RnnConf,
    act: Activation,
    gates: &mut [f32],
    states_t_l: &mut [f32],
    bias: &[f32],
) {
    let ix = Idx::new(rnn);
    for i in 0..rnn.mb {
        for j in 0..rnn.dic {
            let h = act.fwd(gates[ix.gate(i, 0, j)] + bias[ix.bias(0, j)]);
            gates[ix.gate(i, 0, j)] = h;
            states_t_l[ix.state(0, i, j)] = h;
        }
    }
}

pub fn rnn_bwd(
    rnn: &RnnConf,
    act: Activation,
    gates: &mut [f32],
    diff_t_lp1: &[f32],
    diff_tp1_l: &[f32],
) {
    let ix = Idx::new(rnn);
    for i in 0..rnn.mb {
        for j in 0..rnn.dic {
            let dh = diff_tp1_l[ix.state(0, i, j)] + diff_t_lp1[ix.state(rnn.n_states, i, j)];
            let g = ix.gate(i, 0, j);
            gates[g] = dh * act.bwd(gates[g]);
        }
    }
}

/// Gates in order input, forget, candidate, output. State 0 is h, 1 is c.
pub fn lstm_fwd(
    rnn: &RnnConf,
    gates: &mut [f32],
    states_t_l: &mut [f32],
    states_tm1_l: &[f32],
    bias: &[f32],
) {
    let ix = Idx::new(rnn);
    for i in 0..rnn.mb {
        for j in 0..rnn.dic {
            let g0 = logistic(gates[ix.gate(i, 0, j)] + bias[ix.bias(0, j)]);
            let g1 = logistic(gates[ix.gate(i, 1, j)] + bias[ix.bias(1, j)]);
            let g2 = (gates[ix.gate(i, 2, j)] + bias[ix.bias(2, j)]).tanh();
            let g3 = logistic(gates[ix.gate(i, 3, j)] + bias[ix.bias(3, j)]);
            gates[ix.gate(i, 0, j)] = g0;
            gates[ix.gate(i, 1, j)] = g1;
            gates[ix.gate(i, 2, j)] = g2;
            gates[ix.gate(i, 3, j)] = g3;

            let c = g1 * states_tm1_l[ix.state(1, i, j)] + g0 * g2;
            states_t_l[ix.state(1, i, j)] = c;
            states_t_l[ix.state(0, i, j)] = g3 * c.tanh();
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub fn lstm_bwd(
    rnn: &RnnConf,
    gates: &mut [f32],
    states_t_l: &[f32],
    states_tm1_l: &[f32],
    diff_t_l: &mut [f32],
    diff_t_lp1: &[f32],
    diff_tp1_l: &[f32],
) {
    let ix = Idx::new(rnn);
    for i in 0..rnn.mb {
        for j in 0..rnn.dic {
            let (g0, g1, g2, g3) = (
                gates[ix.gate(i, 0, j)],
                gates[ix.gate(i, 1, j)],
                gates[ix.gate(i, 2, j)],
                gates[ix.gate(i, 3, j)],
            );
            let tanh_c = states_t_l[ix.state(1, i, j)].tanh();
            let c_prev = states_tm1_l[ix.state(1, i, j)];

            let dh = diff_tp1_l[ix.state(0, i, j)] + diff_t_lp1[ix.state(rnn.n_states, i, j)];
            let dc = diff_tp1_l[ix.state(1, i, j)] + one_m_square(tanh_c) * g3 * dh;

            gates[ix.gate(i, 0, j)] = g2 * dc * x_m_square(g0);
            gates[ix.gate(i, 1, j)] = c_prev * dc * x_m_square(g1);
            gates[ix.gate(i, 2, j)] = g0 * dc * one_m_square(g2);
            gates[ix.gate(i, 3, j)] = tanh_c * dh * x_m_square(g3);

            diff_t_l[ix.state(1, i, j)] = dc * g1;
        }
    }
}

/// Update and reset gates, then the reset previous state `r * h` staged in
/// the output state block for the candidate's recurrent gemm.
pub fn gru_part1_fwd(
    rnn: &RnnConf,
    gates: &mut [f32],
    states_t_l: &mut [f32],
    states_tm1_l: &[f32],
    bias: &[f32],
) {
    let ix = Idx::new(rnn);
    for i in 0..rnn.mb {
        for j in 0..rnn.dic {
            let u = logistic(gates[ix.gate(i, 0, j)] + bias[ix.bias(0, j)]);
            let r = logistic(gates[ix.gate(i, 1, j)] + bias[ix.bias(1, j)]);
            gates[ix.gate(i, 0, j)] = u;
            gates[ix.gate(i, 1, j)] = r;
            states_t_l[ix.state(0, i, j)] = states_tm1_l[ix.state(0, i, j)] * r;
        }
    }
}

/// Candidate and the blend `u * h_prev + (1 - u) * c`.
pub fn gru_part2_fwd(
    rnn: &RnnConf,
    gates: &mut [f32],
    states_t_l: &mut [f32],
    states_tm1_l: &[f32],
    bias: &[f32],
) {
    let ix = Idx::new(rnn);
    for i in 0..rnn.mb {
        for j in 0..rnn.dic {
            let c = (gates[ix.gate(i, 2, j)] + bias[ix.bias(2, j)]).tanh();
            gates[ix.gate(i, 2, j)] = c;
            let u = gates[ix.gate(i, 0, j)];
            states_t_l[ix.state(0, i, j)] = u * states_tm1_l[ix.state(0, i, j)] + (1.0 - u) * c;
        }
    }
}

/// Update and candidate gradients, and the direct `u * dh` path into the
/// previous state.
pub fn gru_part1_bwd(
    rnn: &RnnConf,
    gates: &mut [f32],
    states_tm1_l: &[f32],
    diff_t_l: &mut [f32],
    diff_t_lp1: &[f32],
    diff_tp1_l: &[f32],
) {
    let ix = Idx::new(rnn);
    for i in 0..rnn.mb {
        for j in 0..rnn.dic {
            let h = states_tm1_l[ix.state(0, i, j)];
            let u = gates[ix.gate(i, 0, j)];
            let c = gates[ix.gate(i, 2, j)];
            let dh = diff_tp1_l[ix.state(0, i, j)] + diff_t_lp1[ix.state(rnn.n_states, i, j)];

            gates[ix.gate(i, 0, j)] = (h - c) * dh * x_m_square(u);
            gates[ix.gate(i, 2, j)] = (1.0 - u) * dh * one_m_square(c);
            diff_t_l[ix.state(0, i, j)] = dh * u;
        }
    }
}

/// Expects `d(r * h)` in the input gradient slot of `diff_t_l`. Produces the
/// reset gradient, adds `d(r * h) * r` to the state gradient and leaves
/// `r * h` in that slot for the candidate's weight gradient.
pub fn gru_part2_bwd(rnn: &RnnConf, gates: &mut [f32], states_tm1_l: &[f32], diff_t_l: &mut [f32]) {
    let ix = Idx::new(rnn);
    let scratch = rnn.n_states;
    for i in 0..rnn.mb {
        for j in 0..rnn.dic {
            let h = states_tm1_l[ix.state(0, i, j)];
            let r = gates[ix.gate(i, 1, j)];
            let dhr = diff_t_l[ix.state(scratch, i, j)];

            diff_t_l[ix.state(0, i, j)] += dhr * r;
            gates[ix.gate(i, 1, j)] = dhr * h * x_m_square(r);
            diff_t_l[ix.state(scratch, i, j)] = r * h;
        }
    }
}

/// `cell` holds `h_prev * W_iter` for all three gates. Bias row 3 is the
/// candidate's recurrent bias, the sum `Wh_c + b3` is kept in `grid` when
/// training.
pub fn gru_lbr_fwd(
    rnn: &RnnConf,
    gates: &mut [f32],
    cell: &[f32],
    grid: &mut [f32],
    states_t_l: &mut [f32],
    states_tm1_l: &[f32],
    bias: &[f32],
) {
    let ix = Idx::new(rnn);
    for i in 0..rnn.mb {
        for j in 0..rnn.dic {
            let wh_b = cell[ix.gate(i, 2, j)] + bias[ix.bias(3, j)];
            let a = |g: usize| {
                gates[ix.gate(i, g, j)] + cell[ix.gate(i, g, j)] + bias[ix.bias(g, j)]
            };
            let (u, r) = (logistic(a(0)), logistic(a(1)));
            let c = (gates[ix.gate(i, 2, j)] + r * wh_b + bias[ix.bias(2, j)]).tanh();
            gates[ix.gate(i, 0, j)] = u;
            gates[ix.gate(i, 1, j)] = r;
            gates[ix.gate(i, 2, j)] = c;
            if rnn.is_training {
                grid[ix.grid(i, j)] = wh_b;
            }
            states_t_l[ix.state(0, i, j)] = u * states_tm1_l[ix.state(0, i, j)] + (1.0 - u) * c;
        }
    }
}

/// Leaves the input side gate gradients in `gates` and the recurrent side
/// ones, where the candidate is scaled by the reset gate, in `cell`.
#[allow(clippy::too_many_arguments)]
pub fn gru_lbr_bwd(
    rnn: &RnnConf,
    gates: &mut [f32],
    cell: &mut [f32],
    grid: &[f32],
    states_tm1_l: &[f32],
    diff_t_l: &mut [f32],
    diff_t_lp1: &[f32],
    diff_tp1_l: &[f32],
) {
    let ix = Idx::new(rnn);
    for i in 0..rnn.mb {
        for j in 0..rnn.dic {
            let h = states_tm1_l[ix.state(0, i, j)];
            let wh_b = grid[ix.grid(i, j)];
            let (u, r, c) = (
                gates[ix.gate(i, 0, j)],
                gates[ix.gate(i, 1, j)],
                gates[ix.gate(i, 2, j)],
            );
            let dh = diff_tp1_l[ix.state(0, i, j)] + diff_t_lp1[ix.state(rnn.n_states, i, j)];

            let du = (h - c) * dh * x_m_square(u);
            let dc = (1.0 - u) * dh * one_m_square(c);
            let dr = wh_b * dc * x_m_square(r);
            diff_t_l[ix.state(0, i, j)] = dh * u;

            gates[ix.gate(i, 0, j)] = du;
            gates[ix.gate(i, 1, j)] = dr;
            gates[ix.gate(i, 2, j)] = dc;
            cell[ix.gate(i, 0, j)] = du;
            cell[ix.gate(i, 1, j)] = dr;
            cell[ix.gate(i, 2, j)] = dc * r;
        }
    }
}
