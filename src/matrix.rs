//! Small fixed-size linear algebra used by keypoint refinement.
//!
//! Matrices are row-major arrays: `m[row][column]`. The 3x3 inverse is
//! computed through minors, cofactors and the adjugate rather than a general
//! solver. The [`Invert3`] trait is the seam for swapping in another backend.

pub type Matrix2 = [[f64; 2]; 2];
pub type Matrix3 = [[f64; 3]; 3];
pub type Vector3 = [f64; 3];

/// Relative tolerance below which a determinant is treated as zero.
///
/// The determinant is compared against `SINGULAR_TOLERANCE * n^3` where `n`
/// is the largest absolute entry, so the test does not depend on the
/// magnitude of the DoG response.
pub const SINGULAR_TOLERANCE: f64 = 1e-12;

pub fn determinant2(m: &Matrix2) -> f64 {
    m[0][0] * m[1][1] - m[0][1] * m[1][0]
}

pub fn trace2(m: &Matrix2) -> f64 {
    m[0][0] + m[1][1]
}

/// The 2x2 matrix left after deleting `row` and `column`.
pub fn minor_matrix(m: &Matrix3, row: usize, column: usize) -> Matrix2 {
    let mut out = [[0.0; 2]; 2];
    let rows = (0..3).filter(|&r| r != row);
    for (out_row, r) in out.iter_mut().zip(rows) {
        let columns = (0..3).filter(|&c| c != column);
        for (cell, c) in out_row.iter_mut().zip(columns) {
            *cell = m[r][c];
        }
    }
    out
}

pub fn minor(m: &Matrix3, row: usize, column: usize) -> f64 {
    determinant2(&minor_matrix(m, row, column))
}

pub fn cofactor_matrix(m: &Matrix3) -> Matrix3 {
    let mut out = [[0.0; 3]; 3];
    for (r, out_row) in out.iter_mut().enumerate() {
        for (c, cell) in out_row.iter_mut().enumerate() {
            let sign = if (r + c) % 2 == 0 { 1.0 } else { -1.0 };
            *cell = sign * minor(m, r, c);
        }
    }
    out
}

pub fn transpose(m: &Matrix3) -> Matrix3 {
    let mut out = [[0.0; 3]; 3];
    for (r, row) in m.iter().enumerate() {
        for (c, &value) in row.iter().enumerate() {
            out[c][r] = value;
        }
    }
    out
}

pub fn adjugate(m: &Matrix3) -> Matrix3 {
    transpose(&cofactor_matrix(m))
}

/// Cofactor expansion along the first row.
pub fn determinant3(m: &Matrix3) -> f64 {
    (0..3)
        .map(|c| {
            let sign = if c % 2 == 0 { 1.0 } else { -1.0 };
            sign * m[0][c] * minor(m, 0, c)
        })
        .sum()
}

pub fn scale(m: &Matrix3, factor: f64) -> Matrix3 {
    m.map(|row| row.map(|value| value * factor))
}

pub fn mul_vector(m: &Matrix3, v: &Vector3) -> Vector3 {
    m.map(|row| dot(&row, v))
}

pub fn dot(a: &Vector3, b: &Vector3) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Whether `det` is numerically zero relative to the entries of `m`.
pub fn is_singular(m: &Matrix3, det: f64) -> bool {
    let norm = m.iter().flatten().fold(0.0f64, |acc, v| acc.max(v.abs()));
    !det.is_finite() || det.abs() <= SINGULAR_TOLERANCE * norm.powi(3)
}

/// A 3x3 inversion backend.
pub trait Invert3 {
    /// Returns `None` when `m` is singular.
    fn invert(&self, m: &Matrix3) -> Option<Matrix3>;
}

/// Inverse as `adjugate(m) / det(m)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Cofactor;

impl Invert3 for Cofactor {
    fn invert(&self, m: &Matrix3) -> Option<Matrix3> {
        let det = determinant3(m);
        if is_singular(m, det) {
            return None;
        }
        Some(scale(&adjugate(m), det.recip()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_matrix_near(a: &Matrix3, b: &Matrix3) {
        for (ra, rb) in a.iter().zip(b.iter()) {
            for (x, y) in ra.iter().zip(rb.iter()) {
                assert!((x - y).abs() < 1e-12, "{a:?} != {b:?}");
            }
        }
    }

    #[test]
    fn determinant2_known() {
        assert_eq!(determinant2(&[[3.0, 8.0], [4.0, 6.0]]), -14.0);
    }

    #[test]
    fn minor_matrix_skips_row_and_column() {
        let m = [[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]];
        assert_eq!(minor_matrix(&m, 0, 0), [[5.0, 6.0], [8.0, 9.0]]);
        assert_eq!(minor_matrix(&m, 1, 2), [[1.0, 2.0], [7.0, 8.0]]);
        assert_eq!(minor(&m, 2, 1), 1.0 * 6.0 - 3.0 * 4.0);
    }

    #[test]
    fn determinant3_known() {
        let m = [[6.0, 1.0, 1.0], [4.0, -2.0, 5.0], [2.0, 8.0, 7.0]];
        assert!((determinant3(&m) - -306.0).abs() < 1e-12);
    }

    #[test]
    fn cofactors_and_adjugate() {
        let m = [[1.0, 2.0, 3.0], [0.0, 4.0, 5.0], [1.0, 0.0, 6.0]];
        let cofactors = cofactor_matrix(&m);
        assert_matrix_near(
            &cofactors,
            &[[24.0, 5.0, -4.0], [-12.0, 3.0, 2.0], [-2.0, -5.0, 4.0]],
        );
        assert_matrix_near(&adjugate(&m), &transpose(&cofactors));
    }

    #[test]
    fn inverse_times_matrix_is_identity() {
        let m = [[2.0, -1.0, 0.0], [-1.0, 2.0, -1.0], [0.0, -1.0, 2.0]];
        let inv = Cofactor.invert(&m).unwrap();
        let mut product = [[0.0; 3]; 3];
        for r in 0..3 {
            for c in 0..3 {
                product[r][c] = (0..3).map(|k| m[r][k] * inv[k][c]).sum();
            }
        }
        assert_matrix_near(
            &product,
            &[[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        );
    }

    #[test]
    fn singular_matrix_has_no_inverse() {
        let m = [[1.0, 2.0, 3.0], [2.0, 4.0, 6.0], [0.0, 1.0, 1.0]];
        assert!(Cofactor.invert(&m).is_none());
        assert!(Cofactor.invert(&[[0.0; 3]; 3]).is_none());
    }

    #[test]
    fn tiny_but_regular_matrix_is_invertible() {
        let m = scale(&[[2.0, 0.0, 0.0], [0.0, 3.0, 0.0], [0.0, 0.0, 4.0]], 1e-4);
        let inv = Cofactor.invert(&m).unwrap();
        assert!((inv[0][0] - 5000.0).abs() < 1e-6);
    }

    #[test]
    fn vector_ops() {
        let m = [[1.0, 0.0, 2.0], [0.0, 1.0, 0.0], [3.0, 0.0, 1.0]];
        assert_eq!(mul_vector(&m, &[1.0, 2.0, 3.0]), [7.0, 2.0, 6.0]);
        assert_eq!(dot(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]), 32.0);
        assert_eq!(trace2(&[[1.5, 9.0], [9.0, 2.5]]), 4.0);
    }
}
