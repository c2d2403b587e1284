//! Snapshots, well history and the end-of-run summary.
use crate::Grid::variables::Variable;
use crate::Models::model_api::{ControlMode, ReservoirModel};
use crate::Solver::errors::SimError;
use log::info;
use prettytable::{Cell, Row, Table, row};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Receives the cell state once per accepted step and once at the end of the run.
pub trait Snapshotter {
    fn snapshot<M: ReservoirModel>(&mut self, step: usize, model: &M) -> Result<(), SimError>;
}

#[derive(Debug, Clone, Default)]
pub struct NoSnapshots;

impl Snapshotter for NoSnapshots {
    fn snapshot<M: ReservoirModel>(&mut self, _step: usize, _model: &M) -> Result<(), SimError> {
        Ok(())
    }
}

/// Dimensionless pressure and saturation of every cell
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub step: usize,
    pub p: Vec<f64>,
    pub s: Vec<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct MemorySnapshots {
    pub frames: Vec<Frame>,
}

impl Snapshotter for MemorySnapshots {
    fn snapshot<M: ReservoirModel>(&mut self, step: usize, model: &M) -> Result<(), SimError> {
        self.frames.push(Frame {
            step,
            p: model.cells().iter().map(|c| c.u_next.pressure()).collect(),
            s: model.cells().iter().map(|c| c.u_next.saturation()).collect(),
        });
        Ok(())
    }
}

/// Columnar `snap_<step>.dat`: r [m], z [m], phi, p [bar], s, p_bub [bar], SATUR
#[derive(Debug, Clone)]
pub struct DatSnapshotter {
    pub dir: PathBuf,
}

impl DatSnapshotter {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

impl Snapshotter for DatSnapshotter {
    fn snapshot<M: ReservoirModel>(&mut self, step: usize, model: &M) -> Result<(), SimError> {
        let scales = model.scales();
        let path = self.dir.join(format!("snap_{}.dat", step));
        let mut out = BufWriter::new(File::create(path)?);
        for cell in model.cells() {
            let v = &cell.u_next;
            let p_bub = v.bubble_pressure().unwrap_or(0.0);
            writeln!(
                out,
                "{}\t{}\t{}\t{}\t{}\t{}\t{}",
                cell.r * scales.R_dim,
                cell.z * scales.R_dim,
                cell.phi,
                scales.pressure_to_bar(v.pressure()),
                v.saturation(),
                scales.pressure_to_bar(p_bub),
                u8::from(v.is_saturated())
            )?;
        }
        out.flush()?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub t_hours: f64,
    /// mean wellbore pressure over the perforated cells, bar
    pub p_well: f64,
    pub s_well: f64,
    /// per perforated cell, m³/day
    pub rates: Vec<f64>,
}

/// Well pressure, saturation and per-cell rates over time
#[derive(Debug, Clone, Default)]
pub struct WellHistory {
    pub records: Vec<HistoryRecord>,
}

impl WellHistory {
    pub fn record<M: ReservoirModel>(&mut self, model: &M, t: f64) {
        let scales = *model.scales();
        let well = model.well();
        let n = well.q_cell.len().max(1) as f64;
        let mut p = 0.0;
        let mut s = 0.0;
        let mut rates = Vec::with_capacity(well.q_cell.len());
        for (&idx, &q) in &well.q_cell {
            let v = &model.cells()[idx].u_next;
            p += v.pressure();
            s += v.saturation();
            let q = match well.control {
                ControlMode::Rate => q,
                ControlMode::Bhp => model.get_rate(idx),
            };
            rates.push(scales.rate_to_m3_per_day(q));
        }
        self.records.push(HistoryRecord {
            t_hours: scales.time_to_hours(t),
            p_well: scales.pressure_to_bar(p / n),
            s_well: s / n,
            rates,
        });
    }

    /// `P_dyn.dat`, `S_dyn.dat`, `q_cells.dat` in `dir`
    pub fn write<P: AsRef<Path>>(&self, dir: P) -> Result<(), SimError> {
        let dir = dir.as_ref();
        let mut p_out = BufWriter::new(File::create(dir.join("P_dyn.dat"))?);
        let mut s_out = BufWriter::new(File::create(dir.join("S_dyn.dat"))?);
        let mut q_out = BufWriter::new(File::create(dir.join("q_cells.dat"))?);
        for rec in &self.records {
            writeln!(p_out, "{}\t{}", rec.t_hours, rec.p_well)?;
            writeln!(s_out, "{}\t{}", rec.t_hours, rec.s_well)?;
            let rates: Vec<String> = rec.rates.iter().map(|q| q.to_string()).collect();
            writeln!(q_out, "{}\t{}", rec.t_hours, rates.join("\t"))?;
        }
        p_out.flush()?;
        s_out.flush()?;
        q_out.flush()?;
        info!("well history written to {}", dir.display());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunSummary {
    pub steps: usize,
    pub rejected_steps: usize,
    pub newton_iterations: usize,
    pub unconverged_newton: usize,
    pub balance_runs: usize,
    pub balance_not_converged: usize,
    /// balancing sensitivity solves that hit the Newton iteration cap
    pub unconverged_trials: usize,
    pub final_time_hours: f64,
    pub final_well_pressure_bar: f64,
    pub final_rate_m3_day: f64,
}

impl RunSummary {
    pub fn table(&self) -> Table {
        let mut table = Table::new();
        table.add_row(row!["quantity", "value"]);
        let rows: Vec<(&str, String)> = vec![
            ("accepted steps", self.steps.to_string()),
            ("rejected steps", self.rejected_steps.to_string()),
            ("Newton iterations", self.newton_iterations.to_string()),
            ("unconverged Newton solves", self.unconverged_newton.to_string()),
            ("rate balancing runs", self.balance_runs.to_string()),
            ("unconverged balancing", self.balance_not_converged.to_string()),
            ("unconverged trial solves", self.unconverged_trials.to_string()),
            ("final time, h", format!("{:.4}", self.final_time_hours)),
            ("well pressure, bar", format!("{:.4}", self.final_well_pressure_bar)),
            ("total rate, m3/day", format!("{:.4}", self.final_rate_m3_day)),
        ];
        for (name, value) in rows {
            table.add_row(Row::new(vec![Cell::new(name), Cell::new(&value)]));
        }
        table
    }

    pub fn print(&self) {
        self.table().printstd();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Models::oil_rz::OilRZ;
    use crate::Models::props::Properties;
    use std::fs;
    use tempfile::tempdir;

    fn model() -> OilRZ {
        let mut m = OilRZ::new(&Properties::two_layer_demo()).unwrap();
        m.set_initial_state();
        m.set_period(0).unwrap();
        m
    }

    #[test]
    fn test_history_files() {
        let dir = tempdir().expect("Failed to create temp dir");
        let model = model();
        let mut history = WellHistory::default();
        history.record(&model, 0.0);
        history.record(&model, 2.0);
        assert_eq!(history.records[1].t_hours, 2.0);
        assert!((history.records[0].p_well - 200.0).abs() < 1e-9);
        let total: f64 = history.records[0].rates.iter().sum();
        assert!((total - 50.0).abs() < 1e-9);
        history.write(dir.path()).unwrap();
        let p = fs::read_to_string(dir.path().join("P_dyn.dat")).unwrap();
        assert_eq!(p.lines().count(), 2);
        let q = fs::read_to_string(dir.path().join("q_cells.dat")).unwrap();
        assert_eq!(q.lines().next().unwrap().split('\t').count(), 3);
    }

    #[test]
    fn test_snapshotters() {
        let dir = tempdir().expect("Failed to create temp dir");
        let model = model();
        let mut dat = DatSnapshotter::new(dir.path());
        dat.snapshot(3, &model).unwrap();
        let content = fs::read_to_string(dir.path().join("snap_3.dat")).unwrap();
        assert_eq!(content.lines().count(), model.cells().len());

        let mut mem = MemorySnapshots::default();
        mem.snapshot(0, &model).unwrap();
        assert_eq!(mem.frames[0].p.len(), model.cells().len());
    }

    #[test]
    fn test_summary_table() {
        let summary = RunSummary {
            steps: 4,
            ..Default::default()
        };
        assert_eq!(summary.table().len(), 11);
    }
}
