use anyhow::{ensure, Result};
use std::io::Read;

pub fn read_i32<R: Read>(r: &mut R) -> Result<i32> {
    let mut i_buffer = [0u8; std::mem::size_of::<i32>()];
    r.read_exact(&mut i_buffer)?;
    Ok(i32::from_le_bytes(i_buffer))
}

pub fn read_f32<R: Read>(r: &mut R) -> Result<f32> {
    let mut f_buffer = [0u8; std::mem::size_of::<f32>()];
    r.read_exact(&mut f_buffer)?;
    Ok(f32::from_le_bytes(f_buffer))
}

/// read `len` little endian floats, e.g. one weight tensor of a model file
pub fn read_f32s<R: Read>(r: &mut R, len: usize) -> Result<Vec<f32>> {
    let mut values = Vec::with_capacity(len);
    for _ in 0..len {
        values.push(read_f32(r)?);
    }
    Ok(values)
}

/// read a dimension from the header, rejecting negative values
pub fn read_dim<R: Read>(r: &mut R) -> Result<usize> {
    let x = read_i32(r)?;
    ensure!(x >= 0, "dimension should be non negative, got {x}");
    Ok(x as usize)
}

pub fn rnd_up(x: usize, m: usize) -> usize {
    x.div_ceil(m) * m
}
