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
//! Process ns-3 LoRaWAN network-server downstream message trace CSV files and
//! report acknowledgment-cycle statistics.

use std::{fs::File, path::PathBuf};

use anyhow::Context;
use clap::Parser;

use loratrace::nsds;

#[derive(Debug, Parser)]
#[command(about = "Process ns-3 LoRaWAN network-server downstream message trace CSV files")]
struct Args {
    /// The trace CSV files to be parsed.
    csv_files: Vec<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();

    for path in &args.csv_files {
        log::info!("parsing NS downstream message trace {}", path.display());

        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let analysis =
            nsds::analyze(file).with_context(|| format!("processing {}", path.display()))?;
        analysis.log_summary();
    }

    Ok(())
}
