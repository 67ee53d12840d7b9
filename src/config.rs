use std::io::{BufReader, Read};

use anyhow::bail;
use burn::config::Config;
use serde::{Deserialize, Serialize};

use crate::error::{self, RnnError};
use crate::gemm::GemmKind;
use crate::packing::PackStrategy;
use crate::utils::*;

/// Recurrent update rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellKind {
    VanillaRnn,
    VanillaLstm,
    VanillaGru,
    /// GRU whose reset gate is applied after the recurrent linear transform
    /// of the candidate.
    GruLinearBeforeReset,
}

impl CellKind {
    pub fn n_gates(self) -> usize {
        match self {
            Self::VanillaRnn => 1,
            Self::VanillaLstm => 4,
            Self::VanillaGru | Self::GruLinearBeforeReset => 3,
        }
    }

    pub fn n_states(self) -> usize {
        match self {
            Self::VanillaLstm => 2,
            _ => 1,
        }
    }

    fn from_code(code: i32) -> anyhow::Result<Self> {
        Ok(match code {
            0 => Self::VanillaRnn,
            1 => Self::VanillaLstm,
            2 => Self::VanillaGru,
            3 => Self::GruLinearBeforeReset,
            _ => bail!("unknown cell kind {code}"),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationKind {
    Relu,
    Tanh,
    Logistic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropKind {
    ForwardTraining,
    ForwardInference,
    Backward,
}

impl PropKind {
    fn from_code(code: i32) -> anyhow::Result<Self> {
        Ok(match code {
            0 => Self::ForwardTraining,
            1 => Self::ForwardInference,
            2 => Self::Backward,
            _ => bail!("unknown propagation kind {code}"),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    UnidirectionalLeft2Right,
    UnidirectionalRight2Left,
    BidirectionalConcat,
    BidirectionalSum,
}

impl Direction {
    fn from_code(code: i32) -> anyhow::Result<Self> {
        Ok(match code {
            0 => Self::UnidirectionalLeft2Right,
            1 => Self::UnidirectionalRight2Left,
            2 => Self::BidirectionalConcat,
            3 => Self::BidirectionalSum,
            _ => bail!("unknown direction {code}"),
        })
    }
}

/// Layout of a weights buffer handed in by the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightsFormat {
    /// `[layer][dir][input channel][gate][output channel]`
    Ldigo,
    /// already produced by [`crate::packing::pack_weights`]
    Packed,
}

/// Which matrix multiply a weight group should go through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GemmPolicy {
    Plain,
    Packed,
}

/// Fully resolved description of one rnn primitive.
#[derive(Debug, Config)]
pub struct RnnDesc {
    pub cell_kind: CellKind,
    pub prop_kind: PropKind,
    pub direction: Direction,
    pub n_layer: usize,
    pub n_iter: usize,
    /// minibatch
    pub mb: usize,
    /// source layer channels
    pub slc: usize,
    /// source iteration channels
    pub sic: usize,
    /// destination iteration channels, the hidden size
    pub dic: usize,
    /// only read by vanilla rnn cells
    #[config(default = "ActivationKind::Tanh")]
    pub activation: ActivationKind,
    /// negative slope of relu, must not be negative since the derivative is
    /// picked from the sign of the saved output
    #[config(default = 0.0)]
    pub alpha: f32,
    #[config(default = true)]
    pub bias: bool,
    #[config(default = "WeightsFormat::Ldigo")]
    pub weights_layer_format: WeightsFormat,
    #[config(default = "WeightsFormat::Ldigo")]
    pub weights_iter_format: WeightsFormat,
    #[config(default = "GemmPolicy::Plain")]
    pub layer_gemm: GemmPolicy,
    #[config(default = "GemmPolicy::Plain")]
    pub iter_gemm: GemmPolicy,
    /// copy plain weights to scratch with a cache friendly leading dimension
    #[config(default = false)]
    pub copy_weights: bool,
    #[config(default = false)]
    pub copy_bias: bool,
}

impl RnnDesc {
    /// Header layout: cell kind, prop kind, direction, n_layer, n_iter, mb,
    /// slc, sic, dic, all little endian i32.
    pub fn from_binary<R: Read>(input: &mut BufReader<R>) -> anyhow::Result<Self> {
        let cell_kind = CellKind::from_code(read_i32(input)?)?;
        let prop_kind = PropKind::from_code(read_i32(input)?)?;
        let direction = Direction::from_code(read_i32(input)?)?;

        let mut dims = [0usize; 6];
        for dim in dims.iter_mut() {
            *dim = read_dim(input)?;
        }
        let [n_layer, n_iter, mb, slc, sic, dic] = dims;

        Ok(Self::new(
            cell_kind, prop_kind, direction, n_layer, n_iter, mb, slc, sic, dic,
        ))
    }
}

/// we want leading dimensions 64-byte aligned, and not divisible by 256
/// floats to avoid 4K aliasing
pub fn get_good_ld(dim: usize) -> usize {
    let ld = rnd_up(dim, 64 / std::mem::size_of::<f32>());
    if ld % 256 == 0 {
        ld + 64 / std::mem::size_of::<f32>()
    } else {
        ld
    }
}

/// How one weight group (layer or iteration weights) reaches the gemm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeightsGroupConf {
    /// input channels of the group, slc or sic
    pub ic: usize,
    /// leading dimension of the unpacked matrix the gemm reads
    pub ld: usize,
    pub strategy: PackStrategy,
    pub gemm: GemmKind,
    pub gates_per_part: Vec<usize>,
    /// floats per packed part of one (layer, direction)
    pub part_pack_size: Vec<usize>,
    /// floats this group needs in the scratchpad
    pub scratch_size: usize,
}

impl WeightsGroupConf {
    fn new(
        desc: &RnnDesc,
        n_dir: usize,
        ic: usize,
        gates_per_part: Vec<usize>,
        format: WeightsFormat,
        policy: GemmPolicy,
    ) -> Self {
        let n_gates = desc.cell_kind.n_gates();
        let (strategy, gemm) = match (format, policy) {
            (WeightsFormat::Packed, _) => (PackStrategy::AssignPacked, GemmKind::Packed),
            (WeightsFormat::Ldigo, GemmPolicy::Packed) => (PackStrategy::Pack, GemmKind::Packed),
            (WeightsFormat::Ldigo, GemmPolicy::Plain) if desc.copy_weights => {
                (PackStrategy::Copy, GemmKind::Plain)
            }
            (WeightsFormat::Ldigo, GemmPolicy::Plain) => (PackStrategy::Assign, GemmKind::Plain),
        };
        let ld = match strategy {
            PackStrategy::Copy => get_good_ld(n_gates * desc.dic),
            _ => n_gates * desc.dic,
        };
        let part_pack_size: Vec<usize> = gates_per_part
            .iter()
            .map(|gates| ic * gates * desc.dic)
            .collect();

        let n_cells = desc.n_layer * n_dir;
        let scratch_size = match strategy {
            PackStrategy::Assign | PackStrategy::AssignPacked => 0,
            PackStrategy::Copy => n_cells * ic * ld,
            PackStrategy::Pack => n_cells * part_pack_size.iter().sum::<usize>(),
        };

        Self {
            ic,
            ld,
            strategy,
            gemm,
            gates_per_part,
            part_pack_size,
            scratch_size,
        }
    }

    pub fn n_parts(&self) -> usize {
        self.gates_per_part.len()
    }

    /// first gate covered by `part`
    pub fn part_gate_start(&self, part: usize) -> usize {
        self.gates_per_part[..part].iter().sum()
    }

    /// floats of one packed (layer, direction)
    pub fn pack_size(&self) -> usize {
        self.part_pack_size.iter().sum()
    }
}

/// Everything derived from an [`RnnDesc`] once, before execution.
#[derive(Debug, Clone, Shrinkwrap)]
pub struct RnnConf {
    #[shrinkwrap(main_field)]
    pub desc: RnnDesc,
    pub n_dir: usize,
    pub n_gates: usize,
    pub n_states: usize,
    pub n_bias: usize,
    /// destination layer channels
    pub dlc: usize,
    pub is_fwd: bool,
    pub is_training: bool,
    pub is_lbr: bool,
    /// mandatory segments persist in a caller workspace
    pub use_workspace: bool,
    pub gates_ld: usize,
    pub gates_ws_ld: usize,
    pub states_ws_ld: usize,
    pub weights_layer: WeightsGroupConf,
    pub weights_iter: WeightsGroupConf,
    pub diff_weights_layer_ld: usize,
    pub diff_weights_iter_ld: usize,
    pub ws_per_cell: usize,
    pub ws_gates_size: usize,
    pub ws_states_size: usize,
    pub ws_diff_states_size: usize,
    pub ws_grid_comp_size: usize,
    pub ws_cell_comp_size: usize,
    pub ws_bias_size: usize,
}

impl RnnConf {
    pub fn init(desc: RnnDesc) -> error::Result<Self> {
        check_supported(&desc)?;

        let cell_kind = desc.cell_kind;
        let n_dir = match desc.direction {
            Direction::UnidirectionalLeft2Right | Direction::UnidirectionalRight2Left => 1,
            Direction::BidirectionalConcat | Direction::BidirectionalSum => 2,
        };
        let n_gates = cell_kind.n_gates();
        let n_states = cell_kind.n_states();
        let is_lbr = cell_kind == CellKind::GruLinearBeforeReset;
        let n_bias = n_gates + is_lbr as usize;
        let dlc = match desc.direction {
            Direction::BidirectionalConcat => 2 * desc.dic,
            _ => desc.dic,
        };
        let is_fwd = desc.prop_kind != PropKind::Backward;
        let is_training = desc.prop_kind != PropKind::ForwardInference;
        let use_workspace = is_training;

        let gates_ld = n_gates * desc.dic;
        let gates_ws_ld = get_good_ld(gates_ld);
        let states_ws_ld = get_good_ld(desc.slc.max(desc.sic).max(desc.dic));

        let weights_layer = WeightsGroupConf::new(
            &desc,
            n_dir,
            desc.slc,
            vec![n_gates],
            desc.weights_layer_format,
            desc.layer_gemm,
        );
        // the gru candidate needs the reset gate before its recurrent gemm
        let iter_parts = match cell_kind {
            CellKind::VanillaGru => vec![2, 1],
            _ => vec![n_gates],
        };
        let weights_iter = WeightsGroupConf::new(
            &desc,
            n_dir,
            desc.sic,
            iter_parts,
            desc.weights_iter_format,
            desc.iter_gemm,
        );

        let (n_layer, n_iter, mb, dic) = (desc.n_layer, desc.n_iter, desc.mb, desc.dic);
        let n_cells = n_layer * n_dir * n_iter;
        let ws_per_cell = mb * dic;
        let ws_gates_size = if use_workspace { n_cells } else { 1 } * mb * gates_ws_ld;
        let ws_states_size = (n_layer + 1) * n_dir * (n_iter + 1) * n_states * mb * states_ws_ld;
        let ws_diff_states_size = if is_training {
            (n_layer + 1) * n_dir * (n_iter + 1) * (n_states + 1) * mb * states_ws_ld
        } else {
            0
        };
        let ws_grid_comp_size = if is_lbr && is_training {
            n_cells * ws_per_cell
        } else {
            0
        };
        let ws_cell_comp_size = if is_lbr { mb * gates_ws_ld } else { 0 };
        let ws_bias_size = if desc.copy_bias {
            n_layer * n_dir * n_bias * dic
        } else {
            0
        };

        Ok(Self {
            n_dir,
            n_gates,
            n_states,
            n_bias,
            dlc,
            is_fwd,
            is_training,
            is_lbr,
            use_workspace,
            gates_ld,
            gates_ws_ld,
            states_ws_ld,
            weights_layer,
            weights_iter,
            diff_weights_layer_ld: gates_ld,
            diff_weights_iter_ld: gates_ld,
            ws_per_cell,
            ws_gates_size,
            ws_states_size,
            ws_diff_states_size,
            ws_grid_comp_size,
            ws_cell_comp_size,
            ws_bias_size,
            desc,
        })
    }
}

fn check_supported(desc: &RnnDesc) -> error::Result<()> {
    if !desc.bias {
        return Err(RnnError::unimplemented("bias is required"));
    }
    let dims = [
        ("n_layer", desc.n_layer),
        ("n_iter", desc.n_iter),
        ("mb", desc.mb),
        ("slc", desc.slc),
        ("sic", desc.sic),
        ("dic", desc.dic),
    ];
    if let Some((name, _)) = dims.iter().find(|(_, dim)| *dim == 0) {
        return Err(RnnError::unimplemented(format!("{name} is zero")));
    }
    if desc.sic != desc.dic {
        return Err(RnnError::unimplemented(format!(
            "sic ({}) must match dic ({})",
            desc.sic, desc.dic
        )));
    }
    if desc.n_layer > 1 && desc.slc != desc.dic {
        return Err(RnnError::unimplemented(format!(
            "stacked layers need slc ({}) to match dic ({})",
            desc.slc, desc.dic
        )));
    }
    if desc.activation == ActivationKind::Relu && desc.alpha < 0.0 {
        return Err(RnnError::unimplemented(format!(
            "relu slope ({}) must not be negative",
            desc.alpha
        )));
    }
    let prepacked = desc.weights_layer_format == WeightsFormat::Packed
        || desc.weights_iter_format == WeightsFormat::Packed;
    if prepacked && desc.prop_kind != PropKind::ForwardInference {
        return Err(RnnError::unimplemented(
            "packed weights are only accepted for forward inference",
        ));
    }
    Ok(())
}
