// loratrace: Reconstruction of per-packet delivery outcomes from ns-3 LoRaWAN traces
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! Parsing of the `sim-settings.txt` companion file written next to every
//! trace file. The file is plain text with `key = value` lines plus a couple
//! of free-form lines for the data-rate assignment method; all values are
//! extracted by pattern search. A missing key is fatal for the trace file.

use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

use crate::records::TraceError;

lazy_static! {
    static ref N_GATEWAYS: Regex = Regex::new(r"nGateways = ([0-9]+)").unwrap();
    static ref N_END_DEVICES: Regex = Regex::new(r"nEndDevices = ([0-9]+)").unwrap();
    static ref TOTAL_TIME: Regex = Regex::new(r"totalTime = ([0-9]+)").unwrap();
    static ref US_CONFIRMED_DATA: Regex = Regex::new(r"usConfirmedData = ([0-1])").unwrap();
    static ref US_DATA_PERIOD: Regex = Regex::new(r"usDataPeriod = ([0-9]+)").unwrap();
    static ref SEED: Regex = Regex::new(r"seed = ([0-9]+)").unwrap();
    static ref DR_CALC_METHOD: Regex =
        Regex::new(r"Data rate assignment method index: ([0-9]+)").unwrap();
    static ref DR_CALC_PER_LIMIT: Regex = Regex::new(r"PER limit = (\d+\.\d+)").unwrap();
    static ref DR_CALC_FIXED_DR: Regex =
        Regex::new(r"Fixed Data Rate Index = ([0-9]+)").unwrap();
}

/// Settings of one simulation run, attached to every output row for its trace
/// file. Parsed once per file, immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimSettings {
    pub n_gateways: u32,
    pub n_end_devices: u32,
    pub total_time: u64,
    /// 1 if end devices send confirmed upstream data, 0 otherwise.
    pub us_confirmed_data: u8,
    /// Upstream data period in seconds.
    pub us_data_period: u64,
    pub seed: u64,
    /// Data-rate assignment method index used by the simulator.
    pub dr_calc_method: u8,
    /// Numeric parameter of the assignment method: the PER limit for method 0,
    /// the fixed data-rate index for method 2, -1 otherwise.
    pub dr_calc_method_misc: f64,
}

fn search<T: FromStr>(
    re: &Regex,
    contents: &str,
    key: &'static str,
) -> Result<T, TraceError> {
    re.captures(contents)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .ok_or(TraceError::MissingSetting(key))
}

impl SimSettings {
    /// Extract all settings from the file contents.
    pub fn parse(contents: &str) -> Result<Self, TraceError> {
        let dr_calc_method: u8 = search(&DR_CALC_METHOD, contents, "drCalcMethod")?;
        let dr_calc_method_misc = match dr_calc_method {
            0 => search(&DR_CALC_PER_LIMIT, contents, "PER limit")?,
            2 => search::<u64>(&DR_CALC_FIXED_DR, contents, "Fixed Data Rate Index")? as f64,
            _ => -1.0,
        };

        Ok(Self {
            n_gateways: search(&N_GATEWAYS, contents, "nGateways")?,
            n_end_devices: search(&N_END_DEVICES, contents, "nEndDevices")?,
            total_time: search(&TOTAL_TIME, contents, "totalTime")?,
            us_confirmed_data: search(&US_CONFIRMED_DATA, contents, "usConfirmedData")?,
            us_data_period: search(&US_DATA_PERIOD, contents, "usDataPeriod")?,
            seed: search(&SEED, contents, "seed")?,
            dr_calc_method,
            dr_calc_method_misc,
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::parse(&contents)
    }
}

/// Derive the settings file path from a trace path by replacing the fixed
/// trace suffix (e.g. `trace-phy-tx.csv`) with `sim-settings.txt`.
pub fn settings_path(trace_path: &Path, trace_suffix: &str) -> PathBuf {
    let name = trace_path
        .file_name()
        .map(|n| n.to_string_lossy().replace(trace_suffix, "sim-settings.txt"))
        .unwrap_or_else(|| "sim-settings.txt".to_string());
    trace_path.with_file_name(name)
}
