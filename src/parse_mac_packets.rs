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
//! Process ns-3 LoRaWAN MAC packet trace CSV files and append per-run and
//! per-node summaries to shared output CSVs.

use std::{fs::File, path::PathBuf};

use anyhow::Context;
use clap::Parser;

use loratrace::{
    mac, report,
    settings::{self, SimSettings},
};

const TRACE_SUFFIX: &str = "trace-mac-packets.csv";

#[derive(Debug, Parser)]
#[command(about = "Process ns-3 LoRaWAN MAC packet trace CSV files")]
struct Args {
    /// The trace CSV files to be parsed.
    csv_files: Vec<PathBuf>,
    /// The per-run output CSV file, appended to across runs.
    #[arg(long, default_value = "parse_mac_packets_per_simulation.csv")]
    output_file_simulation: PathBuf,
    /// The per-node output CSV file, appended to across runs.
    #[arg(long, default_value = "parse_mac_packets_per_enddevice.csv")]
    output_file_enddevices: PathBuf,
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();

    for path in &args.csv_files {
        log::info!("parsing MAC packet trace {}", path.display());

        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let analysis =
            mac::analyze(file).with_context(|| format!("processing {}", path.display()))?;
        analysis.log_summary();

        let settings_file = settings::settings_path(path, TRACE_SUFFIX);
        let settings = SimSettings::from_file(&settings_file)
            .with_context(|| format!("reading {}", settings_file.display()))?;

        log::info!(
            "appending per-run output to {}",
            args.output_file_simulation.display()
        );
        report::append_rows(
            &args.output_file_simulation,
            [report::mac_run_row(&analysis, &settings)],
        )?;

        log::info!(
            "appending per-node output to {}",
            args.output_file_enddevices.display()
        );
        report::append_rows(
            &args.output_file_enddevices,
            report::mac_node_rows(&analysis, &settings),
        )?;
    }

    Ok(())
}
