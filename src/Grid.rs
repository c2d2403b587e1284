//! # Grid Module
//!
//! Cell storage and adjacency for cylindrical reservoir grids.
//!
//! The grid owns every cell in one contiguous `Vec`; neighbours are plain indices into that
//! vector, handed out by [`cyl_grid::CylGrid::stencil`]. Each cell carries three time layers of
//! its variable tuple:
//!
//! | Layer | Written by | When |
//! |-------|-----------|------|
//! | `u_prev` | time-marching driver | once per committed time step |
//! | `u_iter` | Newton solver | at the start of each Newton iteration |
//! | `u_next` | Newton solver, phase reconciliation | during the iteration |
//!
//! ## Geometry
//! `(nr + 2) x (nz + 2) x nphi` cells with zero-volume ghost cells on the well side, the outer
//! boundary, the top and the bottom. `nz == 1, nphi == 1` gives the radial 1D case,
//! `nphi == 1` the RZ case and `nphi >= 3` a periodic 3D cylindrical grid.
pub mod cells;
pub mod cyl_grid;
pub mod variables;
