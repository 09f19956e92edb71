//! Safe wrapper around the `matrixmultiply` SGEMM kernel.
//!
//! Computes `C = alpha * A * B + beta * C` where A is `m × k`, B is `k × n` and
//! C is `m × n`, each described by a slice plus (row stride, column stride).
//! Strides let callers multiply by a transpose without copying.

/// Stride pair of a matrix view: (row stride, column stride).
pub type Strides = (usize, usize);

fn check_extent(name: &str, len: usize, rows: usize, cols: usize, strides: Strides) {
    if rows == 0 || cols == 0 {
        return;
    }
    let last = (rows - 1) * strides.0 + (cols - 1) * strides.1;
    assert!(
        last < len,
        "gemm operand {} out of bounds: needs index {}, slice has {}",
        name,
        last,
        len
    );
}

#[allow(clippy::too_many_arguments)]
pub fn gemm(
    m: usize,
    k: usize,
    n: usize,
    alpha: f32,
    a: &[f32],
    a_strides: Strides,
    b: &[f32],
    b_strides: Strides,
    beta: f32,
    c: &mut [f32],
    c_strides: Strides,
) {
    if m == 0 || n == 0 {
        return;
    }
    check_extent("a", a.len(), m, k, a_strides);
    check_extent("b", b.len(), k, n, b_strides);
    check_extent("c", c.len(), m, n, c_strides);

    // SAFETY: the extents above guarantee every index touched by the kernel
    // lies inside the corresponding slice, and `c` is uniquely borrowed.
    unsafe {
        matrixmultiply::sgemm(
            m,
            k,
            n,
            alpha,
            a.as_ptr(),
            a_strides.0 as isize,
            a_strides.1 as isize,
            b.as_ptr(),
            b_strides.0 as isize,
            b_strides.1 as isize,
            beta,
            c.as_mut_ptr(),
            c_strides.0 as isize,
            c_strides.1 as isize,
        );
    }
}
