//! Symmetric eigendecomposition
//!
//! Cyclic Jacobi rotations. Slow compared to LAPACK but fully deterministic,
//! which keeps fitted drift models reproducible run to run.

use ndarray::{Array1, Array2};

use crate::error::{DriftError, Result};

const MAX_SWEEPS: usize = 100;
const TOLERANCE: f64 = 1e-12;

/// Eigenvalues and eigenvectors of a symmetric matrix
#[derive(Debug, Clone)]
pub struct SymmetricEigen {
    /// Eigenvalues in descending order
    pub values: Array1<f64>,
    /// Eigenvectors as columns, matching `values`
    pub vectors: Array2<f64>,
}

/// Decompose a symmetric matrix into eigenvalues and eigenvectors
///
/// Eigenvalues are sorted in descending order. Each eigenvector's sign is
/// fixed so its largest-magnitude entry is positive.
pub fn symmetric_eigen(matrix: &Array2<f64>) -> Result<SymmetricEigen> {
    let (rows, cols) = matrix.dim();
    if rows != cols {
        return Err(DriftError::Numerical(format!(
            "eigendecomposition needs a square matrix, got {}x{}",
            rows, cols
        )));
    }

    let n = rows;
    let mut a = matrix.clone();
    let mut v = Array2::<f64>::eye(n);

    let norm = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let threshold = TOLERANCE * norm.max(f64::MIN_POSITIVE);

    let mut converged = n < 2;
    for _ in 0..MAX_SWEEPS {
        if off_diagonal_norm(&a) <= threshold {
            converged = true;
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[[p, q]];
                if apq == 0.0 {
                    continue;
                }

                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                rotate(&mut a, &mut v, p, q, c, s);
            }
        }
    }

    if !converged && off_diagonal_norm(&a) > threshold {
        return Err(DriftError::Numerical(format!(
            "Jacobi eigendecomposition did not converge after {} sweeps",
            MAX_SWEEPS
        )));
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| a[[j, j]].total_cmp(&a[[i, i]]));

    let values = order.iter().map(|&i| a[[i, i]]).collect::<Array1<f64>>();
    let mut vectors = Array2::<f64>::zeros((n, n));
    for (dst, &src) in order.iter().enumerate() {
        let mut column = v.column(src).to_owned();
        fix_sign(&mut column);
        vectors.column_mut(dst).assign(&column);
    }

    Ok(SymmetricEigen { values, vectors })
}

/// Apply the rotation `Jᵀ A J` and accumulate `V J`
fn rotate(a: &mut Array2<f64>, v: &mut Array2<f64>, p: usize, q: usize, c: f64, s: f64) {
    let n = a.nrows();

    for k in 0..n {
        let akp = a[[k, p]];
        let akq = a[[k, q]];
        a[[k, p]] = c * akp - s * akq;
        a[[k, q]] = s * akp + c * akq;
    }
    for k in 0..n {
        let apk = a[[p, k]];
        let aqk = a[[q, k]];
        a[[p, k]] = c * apk - s * aqk;
        a[[q, k]] = s * apk + c * aqk;
    }
    for k in 0..n {
        let vkp = v[[k, p]];
        let vkq = v[[k, q]];
        v[[k, p]] = c * vkp - s * vkq;
        v[[k, q]] = s * vkp + c * vkq;
    }
}

fn off_diagonal_norm(a: &Array2<f64>) -> f64 {
    let n = a.nrows();
    let mut sum = 0.0;
    for p in 0..n {
        for q in (p + 1)..n {
            sum += 2.0 * a[[p, q]] * a[[p, q]];
        }
    }
    sum.sqrt()
}

/// Flip a vector so its largest-magnitude entry is positive
pub fn fix_sign(vector: &mut Array1<f64>) {
    let pivot = vector
        .iter()
        .copied()
        .fold(0.0_f64, |best, x| if x.abs() > best.abs() { x } else { best });
    if pivot < 0.0 {
        vector.mapv_inplace(|x| -x);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Axis};

    #[test]
    fn test_two_by_two() {
        let m = array![[2.0, 1.0], [1.0, 2.0]];
        let eig = symmetric_eigen(&m).unwrap();

        assert!((eig.values[0] - 3.0).abs() < 1e-10);
        assert!((eig.values[1] - 1.0).abs() < 1e-10);

        let first = eig.vectors.column(0);
        assert!((first[0] - first[1]).abs() < 1e-10);
        assert!(first[0] > 0.0);
    }

    #[test]
    fn test_reconstructs_eigenpairs() {
        let m = array![
            [4.0, 1.0, -2.0, 2.0],
            [1.0, 2.0, 0.0, 1.0],
            [-2.0, 0.0, 3.0, -2.0],
            [2.0, 1.0, -2.0, -1.0]
        ];
        let eig = symmetric_eigen(&m).unwrap();

        for i in 0..4 {
            let vec = eig.vectors.column(i);
            let lhs = m.dot(&vec);
            let rhs = &vec * eig.values[i];
            for (l, r) in lhs.iter().zip(rhs.iter()) {
                assert!((l - r).abs() < 1e-9, "A v != lambda v for pair {}", i);
            }
        }

        for w in eig.values.windows(2) {
            assert!(w[0] >= w[1]);
        }

        // Orthonormal columns
        let gram = eig.vectors.t().dot(&eig.vectors);
        for ((i, j), value) in gram.indexed_iter() {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert!((value - expected).abs() < 1e-9);
        }
        assert_eq!(gram.len_of(Axis(0)), 4);
    }

    #[test]
    fn test_diagonal_is_already_converged() {
        let m = array![[1.0, 0.0], [0.0, 5.0]];
        let eig = symmetric_eigen(&m).unwrap();
        assert_eq!(eig.values.to_vec(), vec![5.0, 1.0]);
    }

    #[test]
    fn test_rejects_non_square() {
        let m = Array2::<f64>::zeros((2, 3));
        assert!(symmetric_eigen(&m).is_err());
    }

    #[test]
    fn test_fix_sign() {
        let mut v = array![0.1, -0.9, 0.3];
        fix_sign(&mut v);
        assert!(v[1] > 0.0);
        assert!(v[0] < 0.0);
    }
}
