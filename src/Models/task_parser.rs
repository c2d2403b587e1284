//! # Scenario task files
//!
//! Plain-text scenario description read with RustedSciThe's `DocumentParser`: a section name on
//! its own line followed by `key: value` lines.
//!
//! ```text
//! grid
//! r_w: 0.1
//! r_e: 1000.0
//! cells_num_r: 20
//! cells_num_z: 2
//! cells_num_phi: 1
//! perforations: [0.0, 10.0]
//! right_boundary: ConstantPressure
//! schedule
//! end_times: [259200.0, 345600.0]
//! controls: rate, rate
//! values: [50.0, 0.0]
//! time
//! ht_init: 100.0
//! ht_min: 100.0
//! ht_max: 100000.0
//! initial
//! p: 20000000.0
//! s_o: 1.0
//! p_bub: 12000000.0
//! oil
//! visc: 1.0
//! b_ref: 1.2
//! compressibility: 1e-9
//! layer0
//! height: 5.0
//! cells_z: 1
//! perm_r: 50.0
//! perm_z: 5.0
//! porosity: 0.2
//! compressibility: 5e-10
//! ```
//!
//! Optional sections: `gas` (same keys as `oil`), `pvt`, `solver_settings`
//! (see `Solver::solver_settings`). Layers are numbered `layer0`, `layer1`, ... and sorted by
//! their number. `perforations` is a flat list of `top, bottom` pairs. Schedule `controls` are
//! `rate` (value in m³/day) or `bhp` (value in Pa).
//!
//! Numbers written without a decimal point come back from the parser as integers, so every
//! float getter accepts both.
use crate::Models::model_api::ModelError;
use crate::Models::props::{
    BlackOilPvt, FluidProps, InitialState, Period, Properties, RightBoundary, SkeletonProps,
    TimeProps, WellControl,
};
use RustedSciThe::command_interpreter::task_parser::{DocumentMap, DocumentParser, Value};
use log::info;
use regex::Regex;
use std::collections::HashMap;
use std::fmt::Write;
use std::path::PathBuf;

pub type Section = HashMap<String, Option<Vec<Value>>>;

pub fn section<'a>(doc: &'a DocumentMap, name: &str) -> Result<&'a Section, ModelError> {
    doc.get(name)
        .ok_or_else(|| ModelError::TaskFile(format!("missing section `{}`", name)))
}

fn values<'a>(sec: &'a Section, key: &str) -> Result<&'a Vec<Value>, ModelError> {
    match sec.get(key) {
        Some(Some(v)) if !v.is_empty() => Ok(v),
        _ => Err(ModelError::TaskFile(format!("missing value for `{}`", key))),
    }
}

fn value_as_f64(v: &Value) -> Option<f64> {
    v.as_float().or_else(|| v.as_usize().map(|u| u as f64))
}

pub fn get_f64(sec: &Section, key: &str) -> Result<f64, ModelError> {
    value_as_f64(&values(sec, key)?[0])
        .ok_or_else(|| ModelError::TaskFile(format!("`{}` is not a number", key)))
}

pub fn get_usize(sec: &Section, key: &str) -> Result<usize, ModelError> {
    let v = &values(sec, key)?[0];
    v.as_usize()
        .or_else(|| v.as_float().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as usize))
        .ok_or_else(|| ModelError::TaskFile(format!("`{}` is not a non-negative integer", key)))
}

pub fn get_bool(sec: &Section, key: &str) -> Result<bool, ModelError> {
    values(sec, key)?[0]
        .as_boolean()
        .ok_or_else(|| ModelError::TaskFile(format!("`{}` is not a boolean", key)))
}

pub fn get_string(sec: &Section, key: &str) -> Result<String, ModelError> {
    values(sec, key)?[0]
        .as_string()
        .cloned()
        .ok_or_else(|| ModelError::TaskFile(format!("`{}` is not a string", key)))
}

/// Accepts `[a, b, c]` as well as `a, b, c`
pub fn get_vec(sec: &Section, key: &str) -> Result<Vec<f64>, ModelError> {
    let vals = values(sec, key)?;
    if let Some(vector) = vals[0].as_vector() {
        return Ok(vector.clone());
    }
    vals.iter()
        .map(|v| {
            value_as_f64(v)
                .ok_or_else(|| ModelError::TaskFile(format!("`{}` is not a list of numbers", key)))
        })
        .collect()
}

pub fn get_strings(sec: &Section, key: &str) -> Result<Vec<String>, ModelError> {
    values(sec, key)?
        .iter()
        .map(|v| {
            v.as_string()
                .cloned()
                .ok_or_else(|| ModelError::TaskFile(format!("`{}` is not a list of names", key)))
        })
        .collect()
}

pub fn parse_task_str(content: &str) -> Result<DocumentMap, ModelError> {
    let mut parser = DocumentParser::new(content.to_string());
    let _ = parser.parse_document();
    parser
        .get_result()
        .cloned()
        .ok_or_else(|| ModelError::TaskFile("no result after parsing".to_string()))
}

pub fn parse_task_file(path: Option<PathBuf>) -> Result<DocumentMap, ModelError> {
    let mut parser = DocumentParser::new(String::new());
    parser.setting_from_file(path).map_err(ModelError::TaskFile)?;
    let _ = parser.parse_document();
    parser
        .get_result()
        .cloned()
        .ok_or_else(|| ModelError::TaskFile("no result after parsing".to_string()))
}

fn fluid_from_section(sec: &Section) -> Result<FluidProps, ModelError> {
    Ok(FluidProps {
        visc: get_f64(sec, "visc")?,
        b_ref: get_f64(sec, "b_ref")?,
        compressibility: get_f64(sec, "compressibility")?,
    })
}

fn layers_from_document(doc: &DocumentMap) -> Result<Vec<SkeletonProps>, ModelError> {
    let re = Regex::new(r"^layer(\d+)$").map_err(|e| ModelError::TaskFile(e.to_string()))?;
    let mut numbered: Vec<(usize, &Section)> = doc
        .iter()
        .filter_map(|(name, sec)| {
            re.captures(name)
                .and_then(|c| c[1].parse::<usize>().ok())
                .map(|n| (n, sec))
        })
        .collect();
    numbered.sort_by_key(|(n, _)| *n);
    numbered
        .into_iter()
        .map(|(_, sec)| {
            Ok(SkeletonProps {
                height: get_f64(sec, "height")?,
                cells_z: get_usize(sec, "cells_z")?,
                perm_r: get_f64(sec, "perm_r")?,
                perm_z: get_f64(sec, "perm_z")?,
                porosity: get_f64(sec, "porosity")?,
                compressibility: get_f64(sec, "compressibility")?,
            })
        })
        .collect()
}

fn schedule_from_section(sec: &Section) -> Result<Vec<Period>, ModelError> {
    let end_times = get_vec(sec, "end_times")?;
    let controls = get_strings(sec, "controls")?;
    let vals = get_vec(sec, "values")?;
    if end_times.len() != controls.len() || end_times.len() != vals.len() {
        return Err(ModelError::TaskFile(format!(
            "schedule lists differ in length: {} end times, {} controls, {} values",
            end_times.len(),
            controls.len(),
            vals.len()
        )));
    }
    end_times
        .iter()
        .zip(controls.iter().zip(vals.iter()))
        .map(|(&end_time, (control, &value))| {
            let control = match control.to_lowercase().as_str() {
                "rate" => WellControl::Rate(value),
                "bhp" => WellControl::Bhp(value),
                other => {
                    return Err(ModelError::TaskFile(format!(
                        "unknown well control `{}`",
                        other
                    )));
                }
            };
            Ok(Period { end_time, control })
        })
        .collect()
}

impl Properties {
    pub fn from_document(doc: &DocumentMap) -> Result<Self, ModelError> {
        let grid = section(doc, "grid")?;
        let perf = get_vec(grid, "perforations")?;
        if perf.len() % 2 != 0 {
            return Err(ModelError::TaskFile(
                "perforations must be top, bottom pairs".to_string(),
            ));
        }
        let right_boundary = match grid.get("right_boundary") {
            Some(Some(_)) => match get_string(grid, "right_boundary")?.as_str() {
                "ConstantPressure" => RightBoundary::ConstantPressure,
                "NoFlow" => RightBoundary::NoFlow,
                other => {
                    return Err(ModelError::TaskFile(format!(
                        "unknown right boundary `{}`",
                        other
                    )));
                }
            },
            _ => RightBoundary::default(),
        };
        let time = section(doc, "time")?;
        let initial = section(doc, "initial")?;
        let pvt = match doc.get("pvt") {
            Some(sec) => Some(BlackOilPvt {
                rs_slope: get_f64(sec, "rs_slope")?,
                b_o_slope: get_f64(sec, "b_o_slope")?,
                b_g_coef: get_f64(sec, "b_g_coef")?,
                n_o: get_f64(sec, "n_o")?,
                n_g: get_f64(sec, "n_g")?,
                s_or: get_f64(sec, "s_or")?,
                s_gc: get_f64(sec, "s_gc")?,
            }),
            None => None,
        };
        let props = Properties {
            r_w: get_f64(grid, "r_w")?,
            r_e: get_f64(grid, "r_e")?,
            cells_num_r: get_usize(grid, "cells_num_r")?,
            cells_num_z: get_usize(grid, "cells_num_z")?,
            cells_num_phi: get_usize(grid, "cells_num_phi")?,
            perforations: perf.chunks(2).map(|c| [c[0], c[1]]).collect(),
            schedule: schedule_from_section(section(doc, "schedule")?)?,
            right_boundary,
            time: TimeProps {
                ht_init: get_f64(time, "ht_init")?,
                ht_min: get_f64(time, "ht_min")?,
                ht_max: get_f64(time, "ht_max")?,
            },
            initial: InitialState {
                p: get_f64(initial, "p")?,
                s_o: get_f64(initial, "s_o")?,
                p_bub: get_f64(initial, "p_bub")?,
            },
            layers: layers_from_document(doc)?,
            oil: fluid_from_section(section(doc, "oil")?)?,
            gas: doc.get("gas").map(fluid_from_section).transpose()?,
            pvt,
        };
        props.validate()?;
        info!("task file processed!");
        Ok(props)
    }

    pub fn from_task_str(content: &str) -> Result<Self, ModelError> {
        Self::from_document(&parse_task_str(content)?)
    }

    pub fn from_task_file(path: PathBuf) -> Result<Self, ModelError> {
        Self::from_document(&parse_task_file(Some(path))?)
    }

    /// Renders the properties in task-file form
    pub fn to_task_string(&self) -> String {
        let mut s = String::new();
        let perf: Vec<f64> = self.perforations.iter().flat_map(|p| p.iter().copied()).collect();
        let _ = writeln!(s, "grid");
        let _ = writeln!(s, "r_w: {:?}", self.r_w);
        let _ = writeln!(s, "r_e: {:?}", self.r_e);
        let _ = writeln!(s, "cells_num_r: {}", self.cells_num_r);
        let _ = writeln!(s, "cells_num_z: {}", self.cells_num_z);
        let _ = writeln!(s, "cells_num_phi: {}", self.cells_num_phi);
        let _ = writeln!(s, "perforations: {:?}", perf);
        let _ = writeln!(s, "right_boundary: {:?}", self.right_boundary);
        let _ = writeln!(s, "schedule");
        let ends: Vec<f64> = self.schedule.iter().map(|p| p.end_time).collect();
        let (controls, vals): (Vec<&str>, Vec<f64>) = self
            .schedule
            .iter()
            .map(|p| match p.control {
                WellControl::Rate(q) => ("rate", q),
                WellControl::Bhp(pwf) => ("bhp", pwf),
            })
            .unzip();
        let _ = writeln!(s, "end_times: {:?}", ends);
        let _ = writeln!(s, "controls: {}", controls.join(", "));
        let _ = writeln!(s, "values: {:?}", vals);
        let _ = writeln!(s, "time");
        let _ = writeln!(s, "ht_init: {:?}", self.time.ht_init);
        let _ = writeln!(s, "ht_min: {:?}", self.time.ht_min);
        let _ = writeln!(s, "ht_max: {:?}", self.time.ht_max);
        let _ = writeln!(s, "initial");
        let _ = writeln!(s, "p: {:?}", self.initial.p);
        let _ = writeln!(s, "s_o: {:?}", self.initial.s_o);
        let _ = writeln!(s, "p_bub: {:?}", self.initial.p_bub);
        let mut fluid = |name: &str, f: &FluidProps| {
            let _ = writeln!(s, "{}", name);
            let _ = writeln!(s, "visc: {:?}", f.visc);
            let _ = writeln!(s, "b_ref: {:?}", f.b_ref);
            let _ = writeln!(s, "compressibility: {:?}", f.compressibility);
        };
        fluid("oil", &self.oil);
        if let Some(gas) = &self.gas {
            fluid("gas", gas);
        }
        if let Some(pvt) = &self.pvt {
            let _ = writeln!(s, "pvt");
            let _ = writeln!(s, "rs_slope: {:?}", pvt.rs_slope);
            let _ = writeln!(s, "b_o_slope: {:?}", pvt.b_o_slope);
            let _ = writeln!(s, "b_g_coef: {:?}", pvt.b_g_coef);
            let _ = writeln!(s, "n_o: {:?}", pvt.n_o);
            let _ = writeln!(s, "n_g: {:?}", pvt.n_g);
            let _ = writeln!(s, "s_or: {:?}", pvt.s_or);
            let _ = writeln!(s, "s_gc: {:?}", pvt.s_gc);
        }
        for (i, layer) in self.layers.iter().enumerate() {
            let _ = writeln!(s, "layer{}", i);
            let _ = writeln!(s, "height: {:?}", layer.height);
            let _ = writeln!(s, "cells_z: {}", layer.cells_z);
            let _ = writeln!(s, "perm_r: {:?}", layer.perm_r);
            let _ = writeln!(s, "perm_z: {:?}", layer.perm_z);
            let _ = writeln!(s, "porosity: {:?}", layer.porosity);
            let _ = writeln!(s, "compressibility: {:?}", layer.compressibility);
        }
        s
    }
}
