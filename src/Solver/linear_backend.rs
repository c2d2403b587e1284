//! Linear system round trip of one Newton iteration: `init`, `assemble` (coordinate form),
//! `solve`, `solution`.
use crate::Solver::bicgstab::BiCgStab;
use crate::Solver::errors::BackendError;
use crate::Solver::solver_settings::BackendKind;
use enum_dispatch::enum_dispatch;
use log::debug;
use nalgebra::{DMatrix, DVector};

/// Matrix entry `(row, col, value)`; repeated positions are summed
pub type Triplet = (usize, usize, f64);

#[enum_dispatch]
pub trait LinearSolver {
    fn init(&mut self, size: usize);
    fn assemble(&mut self, triplets: &[Triplet], rhs: &[f64]) -> Result<(), BackendError>;
    fn solve(&mut self) -> Result<(), BackendError>;
    fn solution(&self) -> &[f64];
    fn size(&self) -> usize;
}

#[derive(Debug, Clone)]
#[enum_dispatch(LinearSolver)]
pub enum LinearBackend {
    DenseLu(DenseLu),
    BiCgStab(BiCgStab),
}

pub fn create_backend(kind: &BackendKind) -> LinearBackend {
    match kind {
        BackendKind::DenseLu => LinearBackend::DenseLu(DenseLu::new()),
        BackendKind::BiCgStab {
            rtol,
            atol,
            max_iter,
        } => LinearBackend::BiCgStab(BiCgStab::new(*rtol, *atol, *max_iter)),
    }
}

pub(crate) fn check_triplets(
    size: usize,
    triplets: &[Triplet],
    rhs: &[f64],
) -> Result<(), BackendError> {
    if rhs.len() != size {
        return Err(BackendError::Dimension(format!(
            "rhs has {} entries, system size is {}",
            rhs.len(),
            size
        )));
    }
    if let Some(&(i, j, _)) = triplets.iter().find(|(i, j, _)| *i >= size || *j >= size) {
        return Err(BackendError::Dimension(format!(
            "entry ({}, {}) outside a {}x{} system",
            i, j, size, size
        )));
    }
    Ok(())
}

/// nalgebra LU with partial pivoting
#[derive(Debug, Clone)]
pub struct DenseLu {
    matrix: DMatrix<f64>,
    rhs: DVector<f64>,
    x: Vec<f64>,
}

impl DenseLu {
    pub fn new() -> Self {
        Self {
            matrix: DMatrix::zeros(0, 0),
            rhs: DVector::zeros(0),
            x: Vec::new(),
        }
    }
}

impl Default for DenseLu {
    fn default() -> Self {
        Self::new()
    }
}

impl LinearSolver for DenseLu {
    fn init(&mut self, size: usize) {
        self.matrix = DMatrix::zeros(size, size);
        self.rhs = DVector::zeros(size);
        self.x = vec![0.0; size];
    }

    fn assemble(&mut self, triplets: &[Triplet], rhs: &[f64]) -> Result<(), BackendError> {
        let size = self.size();
        check_triplets(size, triplets, rhs)?;
        self.matrix.fill(0.0);
        for &(i, j, v) in triplets {
            self.matrix[(i, j)] += v;
        }
        self.rhs.copy_from_slice(rhs);
        Ok(())
    }

    fn solve(&mut self) -> Result<(), BackendError> {
        let lu = self.matrix.clone().lu();
        let x = lu.solve(&self.rhs).ok_or(BackendError::Singular)?;
        if x.iter().any(|v| !v.is_finite()) {
            return Err(BackendError::NonFinite);
        }
        self.x = x.iter().copied().collect();
        debug!("dense LU solved a {} system", self.x.len());
        Ok(())
    }

    fn solution(&self) -> &[f64] {
        &self.x
    }

    fn size(&self) -> usize {
        self.rhs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn nonsymmetric() -> (Vec<Triplet>, Vec<f64>) {
        let triplets = vec![
            (0, 0, 4.0),
            (0, 1, -1.0),
            (1, 0, -2.0),
            (1, 1, 5.0),
            (1, 2, -1.0),
            (2, 1, -0.5),
            (2, 2, 3.0),
            // split entry, summed on assembly
            (2, 2, 1.0),
        ];
        (triplets, vec![3.0, 2.0, 3.5])
    }

    #[test]
    fn test_backends_agree() {
        let (triplets, rhs) = nonsymmetric();
        let mut dense = create_backend(&BackendKind::DenseLu);
        let mut iterative = create_backend(&BackendKind::BiCgStab {
            rtol: 1e-12,
            atol: 1e-14,
            max_iter: 100,
        });
        for backend in [&mut dense, &mut iterative] {
            backend.init(3);
            backend.assemble(&triplets, &rhs).unwrap();
            backend.solve().unwrap();
        }
        // exact solution (1, 1, 1)
        for (a, b) in dense.solution().iter().zip(iterative.solution()) {
            assert_relative_eq!(*a, 1.0, epsilon = 1e-12);
            assert_relative_eq!(*b, 1.0, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_singular_matrix_reported() {
        let mut lu = DenseLu::new();
        lu.init(2);
        lu.assemble(&[(0, 0, 1.0), (0, 1, 2.0), (1, 0, 2.0), (1, 1, 4.0)], &[1.0, 2.0])
            .unwrap();
        assert_eq!(lu.solve(), Err(BackendError::Singular));
    }

    #[test]
    fn test_dimension_checked() {
        let mut lu = DenseLu::new();
        lu.init(2);
        assert!(matches!(
            lu.assemble(&[(2, 0, 1.0)], &[0.0, 0.0]),
            Err(BackendError::Dimension(_))
        ));
        assert!(lu.assemble(&[(0, 0, 1.0)], &[0.0]).is_err());
    }
}
