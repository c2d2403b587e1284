//! Jacobi-preconditioned BiCGStab on a CSR matrix.
use crate::Solver::errors::BackendError;
use crate::Solver::linear_backend::{LinearSolver, Triplet, check_triplets};
use log::{debug, trace};

/// Compressed sparse rows built from coordinate entries
#[derive(Debug, Clone, Default)]
pub struct CsrMatrix {
    pub row_ptr: Vec<usize>,
    pub col_idx: Vec<usize>,
    pub values: Vec<f64>,
}

impl CsrMatrix {
    pub fn from_triplets(size: usize, triplets: &[Triplet]) -> Self {
        let mut sorted: Vec<Triplet> = triplets.to_vec();
        sorted.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        let mut row_ptr = vec![0; size + 1];
        let mut col_idx = Vec::with_capacity(sorted.len());
        let mut values: Vec<f64> = Vec::with_capacity(sorted.len());
        let mut last: Option<(usize, usize)> = None;
        for (i, j, v) in sorted {
            if last == Some((i, j)) {
                if let Some(tail) = values.last_mut() {
                    *tail += v;
                }
                continue;
            }
            col_idx.push(j);
            values.push(v);
            row_ptr[i + 1] += 1;
            last = Some((i, j));
        }
        for i in 0..size {
            row_ptr[i + 1] += row_ptr[i];
        }
        Self {
            row_ptr,
            col_idx,
            values,
        }
    }

    pub fn mul_vec(&self, x: &[f64], y: &mut [f64]) {
        for (i, yi) in y.iter_mut().enumerate() {
            *yi = (self.row_ptr[i]..self.row_ptr[i + 1])
                .map(|k| self.values[k] * x[self.col_idx[k]])
                .sum();
        }
    }

    pub fn diagonal(&self, size: usize) -> Vec<f64> {
        (0..size)
            .map(|i| {
                (self.row_ptr[i]..self.row_ptr[i + 1])
                    .find(|&k| self.col_idx[k] == i)
                    .map_or(0.0, |k| self.values[k])
            })
            .collect()
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm2(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

#[derive(Debug, Clone)]
pub struct BiCgStab {
    pub rtol: f64,
    pub atol: f64,
    pub max_iter: usize,
    size: usize,
    matrix: CsrMatrix,
    inv_diag: Vec<f64>,
    rhs: Vec<f64>,
    x: Vec<f64>,
}

impl BiCgStab {
    pub fn new(rtol: f64, atol: f64, max_iter: usize) -> Self {
        Self {
            rtol,
            atol,
            max_iter,
            size: 0,
            matrix: CsrMatrix::default(),
            inv_diag: Vec::new(),
            rhs: Vec::new(),
            x: Vec::new(),
        }
    }

    fn precondition(&self, r: &[f64], z: &mut [f64]) {
        for ((zi, ri), d) in z.iter_mut().zip(r).zip(&self.inv_diag) {
            *zi = ri * d;
        }
    }
}

impl LinearSolver for BiCgStab {
    fn init(&mut self, size: usize) {
        self.size = size;
        self.rhs = vec![0.0; size];
        self.x = vec![0.0; size];
    }

    fn assemble(&mut self, triplets: &[Triplet], rhs: &[f64]) -> Result<(), BackendError> {
        check_triplets(self.size, triplets, rhs)?;
        self.matrix = CsrMatrix::from_triplets(self.size, triplets);
        self.inv_diag = self
            .matrix
            .diagonal(self.size)
            .into_iter()
            .map(|d| if d.abs() > f64::MIN_POSITIVE { 1.0 / d } else { 1.0 })
            .collect();
        self.rhs.copy_from_slice(rhs);
        Ok(())
    }

    fn solve(&mut self) -> Result<(), BackendError> {
        let n = self.size;
        let breakdown = 1e-300;
        let mut x = vec![0.0; n];
        let mut r = self.rhs.clone();
        let initial_norm = norm2(&r);
        if initial_norm <= self.atol {
            self.x = x;
            return Ok(());
        }
        let r0 = r.clone();
        let (mut p, mut v) = (vec![0.0; n], vec![0.0; n]);
        let (mut s, mut t) = (vec![0.0; n], vec![0.0; n]);
        let (mut zp, mut zs) = (vec![0.0; n], vec![0.0; n]);
        let (mut rho_old, mut alpha, mut omega) = (1.0, 1.0, 1.0);
        let mut res_norm = initial_norm;
        let mut converged = false;

        for iter in 0..self.max_iter {
            let rho = dot(&r0, &r);
            if rho.abs() < breakdown {
                return Err(BackendError::NotConverged {
                    iterations: iter,
                    residual: res_norm,
                });
            }
            let beta = if iter == 0 {
                0.0
            } else {
                (rho / rho_old) * (alpha / omega)
            };
            rho_old = rho;
            for i in 0..n {
                p[i] = r[i] + beta * (p[i] - omega * v[i]);
            }
            self.precondition(&p, &mut zp);
            self.matrix.mul_vec(&zp, &mut v);
            let r0v = dot(&r0, &v);
            if r0v.abs() < breakdown {
                return Err(BackendError::NotConverged {
                    iterations: iter,
                    residual: res_norm,
                });
            }
            alpha = rho / r0v;
            for i in 0..n {
                s[i] = r[i] - alpha * v[i];
            }
            let s_norm = norm2(&s);
            if s_norm < self.atol || s_norm / initial_norm < self.rtol {
                for i in 0..n {
                    x[i] += alpha * zp[i];
                }
                res_norm = s_norm;
                converged = true;
                debug!("BiCGStab converged in {} iterations", iter + 1);
                break;
            }
            self.precondition(&s, &mut zs);
            self.matrix.mul_vec(&zs, &mut t);
            let tt = dot(&t, &t);
            omega = if tt.abs() < breakdown { 1.0 } else { dot(&t, &s) / tt };
            for i in 0..n {
                x[i] += alpha * zp[i] + omega * zs[i];
                r[i] = s[i] - omega * t[i];
            }
            res_norm = norm2(&r);
            trace!("BiCGStab iter {}: residual = {:.6e}", iter + 1, res_norm);
            if res_norm < self.atol || res_norm / initial_norm < self.rtol {
                converged = true;
                debug!("BiCGStab converged in {} iterations", iter + 1);
                break;
            }
            if omega.abs() < breakdown {
                break;
            }
        }
        if !converged {
            return Err(BackendError::NotConverged {
                iterations: self.max_iter,
                residual: res_norm,
            });
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(BackendError::NonFinite);
        }
        self.x = x;
        Ok(())
    }

    fn solution(&self) -> &[f64] {
        &self.x
    }

    fn size(&self) -> usize {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csr_merges_duplicates() {
        let csr = CsrMatrix::from_triplets(2, &[(1, 1, 2.0), (0, 0, 1.0), (1, 1, 3.0), (1, 0, -1.0)]);
        assert_eq!(csr.row_ptr, vec![0, 1, 3]);
        assert_eq!(csr.col_idx, vec![0, 0, 1]);
        assert_eq!(csr.values, vec![1.0, -1.0, 5.0]);
        assert_eq!(csr.diagonal(2), vec![1.0, 5.0]);
        let mut y = [0.0; 2];
        csr.mul_vec(&[1.0, 2.0], &mut y);
        assert_eq!(y, [1.0, 9.0]);
    }

    #[test]
    fn test_iteration_cap_reported() {
        // tridiagonal system that needs more than one iteration
        let n = 20;
        let mut triplets = Vec::new();
        for i in 0..n {
            triplets.push((i, i, 2.0));
            if i > 0 {
                triplets.push((i, i - 1, -1.0));
            }
            if i + 1 < n {
                triplets.push((i, i + 1, -1.0));
            }
        }
        let mut solver = BiCgStab::new(1e-14, 1e-300, 1);
        solver.init(n);
        solver.assemble(&triplets, &vec![1.0; n]).unwrap();
        assert!(matches!(
            solver.solve(),
            Err(BackendError::NotConverged { .. })
        ));
    }
}
