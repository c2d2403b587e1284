#[allow(non_snake_case)]
pub mod Grid;
#[allow(non_snake_case)]
pub mod Models;
#[allow(non_snake_case)]
pub mod Solver;
#[allow(non_snake_case)]
pub mod Utils;
