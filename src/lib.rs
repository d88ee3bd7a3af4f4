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
//! Library for post-processing event traces of ns-3 LoRaWAN simulation runs.
//!
//! The raw traces are CSV files of discrete PHY/MAC/network-server events, each
//! carrying an opaque correlation key shared by all records of one logical
//! transmission or message. The engines in [`phy`], [`mac`] and [`nsds`]
//! regroup these records per key, classify the outcome of every aggregate
//! (delivered, not delivered, dropped and why) and fold the classifications
//! into per-node and per-run statistics that [`report`] appends to persistent
//! CSV files.

pub mod mac;
pub mod node;
pub mod nsds;
pub mod phy;
pub mod records;
pub mod report;
pub mod settings;
pub mod stats;

pub use records::TraceError;

pub mod prelude {
    pub use super::{
        mac::MacAnalysis,
        node::{DeviceType, NodeId},
        nsds::NsDsAnalysis,
        phy::{PhyAnalysis, RxPolicy},
        records::TraceError,
        settings::SimSettings,
    };
}
