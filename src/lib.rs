pub mod cell;
pub mod config;
pub mod copy;
pub mod elemwise;
pub mod error;
pub mod gemm;
pub mod grid;
pub mod layout;
pub mod packing;
pub mod primitive;
pub mod state;
pub mod utils;

pub use config::{
    ActivationKind, CellKind, Direction, GemmPolicy, PropKind, RnnConf, RnnDesc, WeightsFormat,
};
pub use error::{Result, RnnError};
pub use grid::DirectionSchedule;
pub use primitive::{BackwardArgs, ForwardArgs, RnnPrimitive};

#[macro_use]
extern crate shrinkwraprs;
