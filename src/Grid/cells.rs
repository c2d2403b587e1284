//! Grid cells with three time layers of a [`Variable`] tuple.
use crate::Grid::variables::Variable;

/// Position of a cell with respect to the grid boundaries.
/// Ghost cells carry zero volume and only hold a boundary condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    Middle,
    /// left ghost column: the wellbore
    Well,
    Right,
    Top,
    Bottom,
}

#[allow(non_snake_case)]
#[derive(Debug, Clone, PartialEq)]
pub struct Cell<V: Variable> {
    pub num: usize,
    pub r: f64,
    pub phi: f64,
    pub z: f64,
    pub hr: f64,
    pub hphi: f64,
    pub hz: f64,
    pub V: f64,
    pub kind: CellKind,
    /// skeleton layer the cell belongs to
    pub layer: usize,
    pub u_prev: V,
    pub u_iter: V,
    pub u_next: V,
}

impl<V: Variable> Cell<V> {
    pub fn is_ghost(&self) -> bool {
        self.kind != CellKind::Middle
    }

    pub fn set_all_layers(&mut self, value: V) {
        self.u_prev = value.clone();
        self.u_iter = value.clone();
        self.u_next = value;
    }
}

/// `u_iter = u_next` for every cell, done at the start of a Newton iteration
pub fn copy_iter_layer<V: Variable>(cells: &mut [Cell<V>]) {
    for cell in cells.iter_mut() {
        cell.u_iter = cell.u_next.clone();
    }
}

/// Commit of a time step: `u_prev = u_iter = u_next`
pub fn copy_time_layer<V: Variable>(cells: &mut [Cell<V>]) {
    for cell in cells.iter_mut() {
        cell.u_prev = cell.u_next.clone();
        cell.u_iter = cell.u_next.clone();
    }
}

/// Drop the work of a rejected step: `u_next = u_iter = u_prev`
pub fn revert_time_layer<V: Variable>(cells: &mut [Cell<V>]) {
    for cell in cells.iter_mut() {
        cell.u_next = cell.u_prev.clone();
        cell.u_iter = cell.u_prev.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Grid::variables::VarOil;

    fn cell(p: f64) -> Cell<VarOil> {
        Cell {
            num: 0,
            r: 1.0,
            phi: 0.0,
            z: 0.0,
            hr: 1.0,
            hphi: 1.0,
            hz: 1.0,
            V: 1.0,
            kind: CellKind::Middle,
            layer: 0,
            u_prev: VarOil { p },
            u_iter: VarOil { p },
            u_next: VarOil { p },
        }
    }

    #[test]
    fn test_commit_is_idempotent() {
        let mut cells = vec![cell(1.0), cell(2.0)];
        cells[0].u_next.p = 5.0;
        copy_time_layer(&mut cells);
        let once = cells.clone();
        copy_time_layer(&mut cells);
        assert_eq!(once, cells);
        assert_eq!(cells[0].u_prev.p, 5.0);
        assert_eq!(cells[0].u_iter.p, 5.0);
    }

    #[test]
    fn test_revert_drops_iteration_state() {
        let mut cells = vec![cell(1.0)];
        cells[0].u_next.p = 3.0;
        copy_iter_layer(&mut cells);
        cells[0].u_next.p = 4.0;
        revert_time_layer(&mut cells);
        assert_eq!(cells[0].u_next.p, 1.0);
        assert_eq!(cells[0].u_iter.p, 1.0);
    }
}
