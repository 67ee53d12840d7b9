//! Single precision matrix multiply over strided row-major buffers.
//!
//! `c = alpha * op(a) * op(b) + beta * c` where `op(a)` is `m x k`, `op(b)`
//! is `k x n` and `c` is `m x n`. Leading dimensions are row strides.

use ndarray::linalg::general_mat_mul;
use ndarray::{ArrayView2, ArrayViewMut2, ShapeBuilder};
use serde::Serialize;

use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trans {
    N,
    T,
}

/// The two interchangeable gemm backends, chosen once per weight group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum GemmKind {
    /// `b` is a strided matrix read through `trans_b` and `ldb`
    Plain,
    /// `b` is a dense `k x n` panel from [`crate::packing`], already in the
    /// orientation of `op(b)`, so `trans_b` and `ldb` are ignored
    Packed,
}

impl GemmKind {
    #[allow(clippy::too_many_arguments)]
    pub fn gemm(
        self,
        trans_a: Trans,
        trans_b: Trans,
        m: usize,
        n: usize,
        k: usize,
        alpha: f32,
        a: &[f32],
        lda: usize,
        b: &[f32],
        ldb: usize,
        beta: f32,
        c: &mut [f32],
        ldc: usize,
    ) -> Result<()> {
        let a = operand(a, trans_a, m, k, lda)?;
        let b = match self {
            Self::Plain => operand(b, trans_b, k, n, ldb)?,
            Self::Packed => view(b, k, n, n)?,
        };
        let mut c = ArrayViewMut2::from_shape((m, n).strides((ldc, 1)), c)?;
        general_mat_mul(alpha, &a, &b, beta, &mut c);
        Ok(())
    }
}

/// plain gemm, used for the weight gradients
#[allow(clippy::too_many_arguments)]
pub fn gemm(
    trans_a: Trans,
    trans_b: Trans,
    m: usize,
    n: usize,
    k: usize,
    alpha: f32,
    a: &[f32],
    lda: usize,
    b: &[f32],
    ldb: usize,
    beta: f32,
    c: &mut [f32],
    ldc: usize,
) -> Result<()> {
    GemmKind::Plain.gemm(trans_a, trans_b, m, n, k, alpha, a, lda, b, ldb, beta, c, ldc)
}

fn view(data: &[f32], rows: usize, cols: usize, ld: usize) -> Result<ArrayView2<'_, f32>> {
    debug_assert!(ld >= cols || rows <= 1);
    Ok(ArrayView2::from_shape((rows, cols).strides((ld, 1)), data)?)
}

/// `rows x cols` view of `op(data)`
fn operand(
    data: &[f32],
    trans: Trans,
    rows: usize,
    cols: usize,
    ld: usize,
) -> Result<ArrayView2<'_, f32>> {
    match trans {
        Trans::N => view(data, rows, cols, ld),
        Trans::T => Ok(view(data, cols, rows, ld)?.reversed_axes()),
    }
}
