//! usage: ResFlow [task_file] [output_dir]
//!
//! Without a task file the two-layer demo runs with default solver settings.
use ResFlow::Models::gas_oil_rz::GasOilRZ;
use ResFlow::Models::model_api::ReservoirModel;
use ResFlow::Models::oil_rz::OilRZ;
use ResFlow::Models::props::Properties;
use ResFlow::Models::task_parser::parse_task_file;
use ResFlow::Solver::driver::Simulation;
use ResFlow::Solver::errors::SimError;
use ResFlow::Solver::output::{DatSnapshotter, NoSnapshots, RunSummary};
use ResFlow::Solver::solver_settings::SolverSettings;
use ResFlow::Utils::logger::{init_logger, parse_level};
use RustedSciThe::command_interpreter::task_parser::DocumentMap;
use log::{error, info};
use std::path::PathBuf;

fn run_model<M: ReservoirModel>(
    model: M,
    settings: SolverSettings,
    output: Option<PathBuf>,
) -> Result<RunSummary, SimError> {
    match output {
        Some(dir) => {
            std::fs::create_dir_all(&dir)?;
            if settings.write_snaps {
                let snaps = DatSnapshotter::new(&dir);
                Simulation::new(model, settings, snaps)?
                    .with_output_dir(dir)
                    .start()
            } else {
                Simulation::new(model, settings, NoSnapshots)?
                    .with_output_dir(dir)
                    .start()
            }
        }
        None => Simulation::new(model, settings, NoSnapshots)?.start(),
    }
}

fn run(
    doc: Option<DocumentMap>,
    settings: SolverSettings,
    output: Option<PathBuf>,
) -> Result<RunSummary, SimError> {
    let props = match doc {
        Some(doc) => Properties::from_document(&doc)?,
        None => {
            info!("no task file given, running the two-layer demo");
            Properties::two_layer_demo()
        }
    };
    if props.gas.is_some() && props.pvt.is_some() {
        run_model(GasOilRZ::new(&props)?, settings, output)
    } else {
        run_model(OilRZ::new(&props)?, settings, output)
    }
}

/// Task file and its logging keys, read before the logger exists
fn load_task(task: Option<PathBuf>) -> Result<(Option<DocumentMap>, SolverSettings), SimError> {
    match task {
        Some(path) => {
            let doc = parse_task_file(Some(path))?;
            let settings = SolverSettings::from_document(&doc)?;
            Ok((Some(doc), settings))
        }
        None => Ok((None, SolverSettings::default())),
    }
}

pub fn main() {
    let mut args = std::env::args().skip(1);
    let task = args.next().map(PathBuf::from);
    let output = args.next().map(PathBuf::from);
    let task_name = task.as_ref().map(|p| p.display().to_string());
    let (doc, settings) = match load_task(task) {
        Ok(loaded) => loaded,
        Err(e) => {
            init_logger(parse_level("info"), None);
            error!("cannot read the task file: {}", e);
            std::process::exit(1);
        }
    };
    init_logger(
        parse_level(settings.log_level.as_deref().unwrap_or("info")),
        settings.log_file.as_deref(),
    );
    if let Some(name) = task_name {
        info!("loaded task file {}", name);
    }
    if let Err(e) = run(doc, settings, output) {
        error!("simulation failed: {}", e);
        std::process::exit(1);
    }
}
