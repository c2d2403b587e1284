//! Cylindrical grid around a vertical well.
//!
//! Radial spacing is logarithmic between the well radius and the outer radius, vertical spacing
//! is uniform inside each skeleton layer. Index layout is
//! `idx = k * (nr + 2) * (nz + 2) + i * (nz + 2) + j` with `i` radial, `j` vertical (from the top)
//! and `k` angular. Ghost cells occupy `i = 0` (well), `i = nr + 1`, `j = 0` and `j = nz + 1`.
use crate::Grid::cells::{Cell, CellKind};
use crate::Grid::variables::Variable;
use std::f64::consts::PI;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum GridError {
    #[error("invalid grid dimensions: {0}")]
    Dimensions(String),
    #[error("well radius {r_w} must be positive and smaller than outer radius {r_e}")]
    Radii { r_w: f64, r_e: f64 },
    #[error("layers hold {layers} vertical cells but the grid has nz = {nz}")]
    LayerMismatch { layers: usize, nz: usize },
    #[error("perforation interval [{top}, {bottom}] does not intersect the reservoir")]
    EmptyPerforation { top: f64, bottom: f64 },
}

/// One skeleton layer as seen by the grid (dimensionless height and permeabilities).
#[derive(Debug, Clone, PartialEq)]
pub struct GridLayer {
    pub height: f64,
    pub cells_z: usize,
    pub perm_r: f64,
    pub perm_z: f64,
}

/// Cell indices in the order the equations read them: the cell itself first, then neighbours.
pub type Stencil = Vec<usize>;

#[derive(Debug, Clone)]
pub struct CylGrid {
    pub r_w: f64,
    pub r_e: f64,
    pub nr: usize,
    pub nz: usize,
    pub nphi: usize,
    pub layers: Vec<GridLayer>,
    stencils: Vec<Stencil>,
}

impl CylGrid {
    pub fn build(
        r_w: f64,
        r_e: f64,
        nr: usize,
        nz: usize,
        nphi: usize,
        layers: Vec<GridLayer>,
    ) -> Result<Self, GridError> {
        if nr == 0 || nz == 0 || nphi == 0 {
            return Err(GridError::Dimensions(format!(
                "nr = {nr}, nz = {nz}, nphi = {nphi}; all must be positive"
            )));
        }
        // two angular cells would see the same neighbour on both sides
        if nphi == 2 {
            return Err(GridError::Dimensions(
                "nphi must be 1 or at least 3".to_string(),
            ));
        }
        if !(r_w > 0.0 && r_e > r_w) {
            return Err(GridError::Radii { r_w, r_e });
        }
        let layers_nz: usize = layers.iter().map(|l| l.cells_z).sum();
        if layers_nz != nz {
            return Err(GridError::LayerMismatch {
                layers: layers_nz,
                nz,
            });
        }
        if layers.iter().any(|l| l.height <= 0.0 || l.cells_z == 0) {
            return Err(GridError::Dimensions(
                "every layer needs a positive height and at least one cell".to_string(),
            ));
        }
        let mut grid = CylGrid {
            r_w,
            r_e,
            nr,
            nz,
            nphi,
            layers,
            stencils: Vec::new(),
        };
        grid.stencils = (0..grid.cells_num()).map(|idx| grid.make_stencil(idx)).collect();
        Ok(grid)
    }

    pub fn cells_num(&self) -> usize {
        (self.nr + 2) * (self.nz + 2) * self.nphi
    }

    pub fn idx(&self, i: usize, j: usize, k: usize) -> usize {
        k * (self.nr + 2) * (self.nz + 2) + i * (self.nz + 2) + j
    }

    pub fn coords(&self, idx: usize) -> (usize, usize, usize) {
        let plane = (self.nr + 2) * (self.nz + 2);
        let k = idx / plane;
        let rest = idx % plane;
        (rest / (self.nz + 2), rest % (self.nz + 2), k)
    }

    pub fn kind(&self, idx: usize) -> CellKind {
        let (i, j, _) = self.coords(idx);
        if i == 0 {
            CellKind::Well
        } else if i == self.nr + 1 {
            CellKind::Right
        } else if j == 0 {
            CellKind::Top
        } else if j == self.nz + 1 {
            CellKind::Bottom
        } else {
            CellKind::Middle
        }
    }

    pub fn stencil(&self, idx: usize) -> &[usize] {
        &self.stencils[idx]
    }

    /// Left ghost (wellbore) cell of row `j` in angular sector `k_phi`
    pub fn well_cell(&self, k_phi: usize, j: usize) -> usize {
        self.idx(0, j, k_phi)
    }

    fn make_stencil(&self, idx: usize) -> Stencil {
        let (i, j, k) = self.coords(idx);
        match self.kind(idx) {
            CellKind::Well => vec![idx, self.idx(1, j, k)],
            CellKind::Right => vec![idx, self.idx(self.nr, j, k)],
            CellKind::Top => vec![idx, self.idx(i, 1, k)],
            CellKind::Bottom => vec![idx, self.idx(i, self.nz, k)],
            CellKind::Middle => {
                let mut st = vec![
                    idx,
                    self.idx(i - 1, j, k),
                    self.idx(i + 1, j, k),
                    self.idx(i, j - 1, k),
                    self.idx(i, j + 1, k),
                ];
                if self.nphi > 1 {
                    let prev = (k + self.nphi - 1) % self.nphi;
                    let next = (k + 1) % self.nphi;
                    st.push(self.idx(i, j, prev));
                    st.push(self.idx(i, j, next));
                }
                st
            }
        }
    }

    /// Radial faces of the logarithmic grid, `nr + 1` values from `r_w` to `r_e`
    fn radial_faces(&self) -> Vec<f64> {
        let ratio = self.r_e / self.r_w;
        (0..=self.nr)
            .map(|i| self.r_w * ratio.powf(i as f64 / self.nr as f64))
            .collect()
    }

    /// `(layer, z centre, hz)` of every vertical row, ghosts included
    fn vertical_rows(&self) -> Vec<(usize, f64, f64)> {
        let mut rows = Vec::with_capacity(self.nz + 2);
        rows.push((0, 0.0, 0.0));
        let mut top = 0.0;
        for (l, layer) in self.layers.iter().enumerate() {
            let hz = layer.height / layer.cells_z as f64;
            for c in 0..layer.cells_z {
                rows.push((l, top + hz * (c as f64 + 0.5), hz));
            }
            top += layer.height;
        }
        rows.push((self.layers.len() - 1, top, 0.0));
        rows
    }

    pub fn total_height(&self) -> f64 {
        self.layers.iter().map(|l| l.height).sum()
    }

    /// Creates the cell store with default variables; values are set by the model later.
    pub fn make_cells<V: Variable>(&self) -> Vec<Cell<V>> {
        let faces = self.radial_faces();
        let rows = self.vertical_rows();
        let hphi = 2.0 * PI / self.nphi as f64;
        let mut cells = Vec::with_capacity(self.cells_num());
        for idx in 0..self.cells_num() {
            let (i, j, k) = self.coords(idx);
            let (r, hr) = if i == 0 {
                (self.r_w, 0.0)
            } else if i == self.nr + 1 {
                (self.r_e, 0.0)
            } else {
                let hr = faces[i] - faces[i - 1];
                (faces[i - 1] + hr / 2.0, hr)
            };
            let (layer, z, hz) = rows[j];
            let kind = self.kind(idx);
            let volume = if kind == CellKind::Middle {
                hphi * r * hr * hz
            } else {
                0.0
            };
            cells.push(Cell {
                num: idx,
                r,
                phi: hphi * (k as f64 + 0.5),
                z,
                hr,
                hphi,
                hz,
                V: volume,
                kind,
                layer,
                u_prev: V::default(),
                u_iter: V::default(),
                u_next: V::default(),
            });
        }
        cells
    }

    /// Geometric transmissibility `k A / d` between two adjacent cells.
    /// Zero when the face has no area (ghost rows) or the centres coincide.
    pub fn trans<V: Variable>(&self, a: &Cell<V>, b: &Cell<V>) -> f64 {
        let (ia, ja, ka) = self.coords(a.num);
        let (ib, jb, kb) = self.coords(b.num);
        let (area, dist, perm) = if ja == jb && ka == kb {
            let (inner, outer) = if ia < ib { (a, b) } else { (b, a) };
            let r_face = inner.r + inner.hr / 2.0;
            let hz = inner.hz.min(outer.hz);
            let perm = harmonic(self.layers[a.layer].perm_r, self.layers[b.layer].perm_r);
            (r_face * a.hphi * hz, outer.r - inner.r, perm)
        } else if ia == ib && ka == kb {
            let hr = a.hr.max(b.hr);
            let perm = harmonic(self.layers[a.layer].perm_z, self.layers[b.layer].perm_z);
            (a.r * hr * a.hphi, (a.z - b.z).abs(), perm)
        } else {
            let perm = harmonic(self.layers[a.layer].perm_r, self.layers[b.layer].perm_r);
            (a.hr * a.hz, a.r * a.hphi, perm)
        };
        if dist <= 0.0 || area <= 0.0 {
            0.0
        } else {
            perm * area / dist
        }
    }

    /// Well ghost cells touched by the perforation interval `[top, bottom]` (depth from the
    /// reservoir top) with the perforated height each one represents.
    pub fn perforated_cells(&self, top: f64, bottom: f64) -> Result<Vec<(usize, f64)>, GridError> {
        let rows = self.vertical_rows();
        let sector = 1.0 / self.nphi as f64;
        let mut result = Vec::new();
        for k in 0..self.nphi {
            for (j, &(_, z, hz)) in rows.iter().enumerate().take(self.nz + 1).skip(1) {
                let overlap = (z + hz / 2.0).min(bottom) - (z - hz / 2.0).max(top);
                if overlap > 0.0 {
                    result.push((self.well_cell(k, j), overlap * sector));
                }
            }
        }
        if result.is_empty() {
            return Err(GridError::EmptyPerforation { top, bottom });
        }
        Ok(result)
    }
}

fn harmonic(a: f64, b: f64) -> f64 {
    if a + b > 0.0 { 2.0 * a * b / (a + b) } else { 0.0 }
}
