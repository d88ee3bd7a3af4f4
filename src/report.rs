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
//! Append-only CSV reporting.
//!
//! The output files accumulate rows from many simulation runs; each file gets
//! its literal header exactly once, when it is first created. Column order
//! and presence are a compatibility contract, downstream tooling parses by
//! position.

use std::{fs::OpenOptions, path::Path};

use serde::Serialize;

use crate::{
    mac::MacAnalysis,
    node::NodeId,
    phy::PhyAnalysis,
    records::TraceError,
    settings::SimSettings,
    stats::DirectionStats,
};

/// Serialize `rows` to `path`, appending. The header row is written only if
/// the file does not exist yet.
pub fn append_rows<S: Serialize>(
    path: impl AsRef<Path>,
    rows: impl IntoIterator<Item = S>,
) -> Result<(), TraceError> {
    let path = path.as_ref();
    let write_header = !path.exists();
    let file = OpenOptions::new().append(true).create(true).open(path)?;
    let mut csv = csv::WriterBuilder::new()
        .has_headers(write_header)
        .from_writer(file);
    for row in rows {
        csv.serialize(row)?;
    }
    csv.flush()?;
    Ok(())
}

/// Per-node PHY delivery ratio row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhyNodeRow {
    #[serde(rename = "dataPeriod")]
    pub data_period: u64,
    #[serde(rename = "gatewayCount")]
    pub gateway_count: u32,
    #[serde(rename = "deviceCount")]
    pub device_count: u32,
    pub seed: u64,
    #[serde(rename = "nodeId")]
    pub node_id: NodeId,
    pub delivered: u64,
    pub sent: u64,
    pub ratio: f64,
}

/// Build the per-node PHY rows: one row per node that sent at least one
/// transmission, in node-id order.
pub fn phy_node_rows(analysis: &PhyAnalysis, settings: &SimSettings) -> Vec<PhyNodeRow> {
    analysis
        .nodes
        .iter()
        .filter(|(_, node)| node.sent > 0)
        .map(|(id, node)| PhyNodeRow {
            data_period: settings.us_data_period,
            gateway_count: settings.n_gateways,
            device_count: settings.n_end_devices,
            seed: settings.seed,
            node_id: id,
            delivered: node.delivered,
            sent: node.sent,
            ratio: node.delivered as f64 / node.sent as f64,
        })
        .collect()
}

/// Per-run MAC summary row. The 57-column layout is a compatibility contract
/// with the spreadsheet tooling consuming these files.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MacRunRow {
    #[serde(rename = "nGateways")]
    pub n_gateways: u32,
    #[serde(rename = "nEndDevices")]
    pub n_end_devices: u32,
    #[serde(rename = "totalTime")]
    pub total_time: u64,
    #[serde(rename = "drCalcMethod")]
    pub dr_calc_method: u8,
    #[serde(rename = "drCalcMethodMisc")]
    pub dr_calc_method_misc: f64,
    pub seed: u64,
    #[serde(rename = "usConfirmedData")]
    pub us_confirmed_data: u8,
    #[serde(rename = "usDataPeriod")]
    pub us_data_period: u64,
    #[serde(rename = "usDelivered")]
    pub us_delivered: u64,
    #[serde(rename = "usPackets")]
    pub us_packets: u64,
    #[serde(rename = "usPdr")]
    pub us_pdr: f64,
    #[serde(rename = "usSent")]
    pub us_sent: u64,
    #[serde(rename = "usReceived")]
    pub us_received: u64,
    #[serde(rename = "usSent0")]
    pub us_sent0: u64,
    #[serde(rename = "usSent1")]
    pub us_sent1: u64,
    #[serde(rename = "usSent2")]
    pub us_sent2: u64,
    #[serde(rename = "usSent3")]
    pub us_sent3: u64,
    #[serde(rename = "usSent4")]
    pub us_sent4: u64,
    #[serde(rename = "usReceived0")]
    pub us_received0: u64,
    #[serde(rename = "usReceived1")]
    pub us_received1: u64,
    #[serde(rename = "usReceived2")]
    pub us_received2: u64,
    #[serde(rename = "usReceived3")]
    pub us_received3: u64,
    #[serde(rename = "usReceived4")]
    pub us_received4: u64,
    #[serde(rename = "usSentTries0")]
    pub us_sent_tries0: u64,
    #[serde(rename = "usSentTries1")]
    pub us_sent_tries1: u64,
    #[serde(rename = "usSentTries2")]
    pub us_sent_tries2: u64,
    #[serde(rename = "usSentTries3")]
    pub us_sent_tries3: u64,
    #[serde(rename = "usSentTries4")]
    pub us_sent_tries4: u64,
    #[serde(rename = "usSent1Received0")]
    pub us_sent1_received0: u64,
    #[serde(rename = "usSent1Received1")]
    pub us_sent1_received1: u64,
    #[serde(rename = "usSent2Received0")]
    pub us_sent2_received0: u64,
    #[serde(rename = "usSent2Received1")]
    pub us_sent2_received1: u64,
    #[serde(rename = "usSent2Received2")]
    pub us_sent2_received2: u64,
    #[serde(rename = "usSent3Received0")]
    pub us_sent3_received0: u64,
    #[serde(rename = "usSent3Received1")]
    pub us_sent3_received1: u64,
    #[serde(rename = "usSent3Received2")]
    pub us_sent3_received2: u64,
    #[serde(rename = "usSent3Received3")]
    pub us_sent3_received3: u64,
    #[serde(rename = "usSent4Received0")]
    pub us_sent4_received0: u64,
    #[serde(rename = "usSent4Received1")]
    pub us_sent4_received1: u64,
    #[serde(rename = "usSent4Received2")]
    pub us_sent4_received2: u64,
    #[serde(rename = "usSent4Received3")]
    pub us_sent4_received3: u64,
    #[serde(rename = "usSent4Received4")]
    pub us_sent4_received4: u64,
    #[serde(rename = "dsSent0")]
    pub ds_sent0: u64,
    #[serde(rename = "dsSent1")]
    pub ds_sent1: u64,
    #[serde(rename = "dsSent2")]
    pub ds_sent2: u64,
    #[serde(rename = "dsSent3")]
    pub ds_sent3: u64,
    #[serde(rename = "dsSent4")]
    pub ds_sent4: u64,
    #[serde(rename = "dsReceived0")]
    pub ds_received0: u64,
    #[serde(rename = "dsReceived1")]
    pub ds_received1: u64,
    #[serde(rename = "dsReceived2")]
    pub ds_received2: u64,
    #[serde(rename = "dsReceived3")]
    pub ds_received3: u64,
    #[serde(rename = "dsReceived4")]
    pub ds_received4: u64,
    #[serde(rename = "dsSentTries0")]
    pub ds_sent_tries0: u64,
    #[serde(rename = "dsSentTries1")]
    pub ds_sent_tries1: u64,
    #[serde(rename = "dsSentTries2")]
    pub ds_sent_tries2: u64,
    #[serde(rename = "dsSentTries3")]
    pub ds_sent_tries3: u64,
    #[serde(rename = "dsSentTries4")]
    pub ds_sent_tries4: u64,
}

/// Fold the MAC analysis of one trace file into its per-run summary row.
pub fn mac_run_row(analysis: &MacAnalysis, settings: &SimSettings) -> MacRunRow {
    let us: &DirectionStats = &analysis.upstream;
    let ds: &DirectionStats = &analysis.downstream;
    MacRunRow {
        n_gateways: settings.n_gateways,
        n_end_devices: settings.n_end_devices,
        total_time: settings.total_time,
        dr_calc_method: settings.dr_calc_method,
        dr_calc_method_misc: settings.dr_calc_method_misc,
        seed: settings.seed,
        us_confirmed_data: settings.us_confirmed_data,
        us_data_period: settings.us_data_period,
        us_delivered: us.delivered,
        us_packets: us.packets,
        us_pdr: us.pdr(),
        us_sent: us.sent,
        us_received: us.received,
        us_sent0: us.sent_hist.bin(0),
        us_sent1: us.sent_hist.bin(1),
        us_sent2: us.sent_hist.bin(2),
        us_sent3: us.sent_hist.bin(3),
        us_sent4: us.sent_hist.bin(4),
        us_received0: us.received_hist.bin(0),
        us_received1: us.received_hist.bin(1),
        us_received2: us.received_hist.bin(2),
        us_received3: us.received_hist.bin(3),
        us_received4: us.received_hist.bin(4),
        us_sent_tries0: us.sent_tries_hist.bin(0),
        us_sent_tries1: us.sent_tries_hist.bin(1),
        us_sent_tries2: us.sent_tries_hist.bin(2),
        us_sent_tries3: us.sent_tries_hist.bin(3),
        us_sent_tries4: us.sent_tries_hist.bin(4),
        us_sent1_received0: us.sent_vs_received.cell(1, 0),
        us_sent1_received1: us.sent_vs_received.cell(1, 1),
        us_sent2_received0: us.sent_vs_received.cell(2, 0),
        us_sent2_received1: us.sent_vs_received.cell(2, 1),
        us_sent2_received2: us.sent_vs_received.cell(2, 2),
        us_sent3_received0: us.sent_vs_received.cell(3, 0),
        us_sent3_received1: us.sent_vs_received.cell(3, 1),
        us_sent3_received2: us.sent_vs_received.cell(3, 2),
        us_sent3_received3: us.sent_vs_received.cell(3, 3),
        us_sent4_received0: us.sent_vs_received.cell(4, 0),
        us_sent4_received1: us.sent_vs_received.cell(4, 1),
        us_sent4_received2: us.sent_vs_received.cell(4, 2),
        us_sent4_received3: us.sent_vs_received.cell(4, 3),
        us_sent4_received4: us.sent_vs_received.cell(4, 4),
        ds_sent0: ds.sent_hist.bin(0),
        ds_sent1: ds.sent_hist.bin(1),
        ds_sent2: ds.sent_hist.bin(2),
        ds_sent3: ds.sent_hist.bin(3),
        ds_sent4: ds.sent_hist.bin(4),
        ds_received0: ds.received_hist.bin(0),
        ds_received1: ds.received_hist.bin(1),
        ds_received2: ds.received_hist.bin(2),
        ds_received3: ds.received_hist.bin(3),
        ds_received4: ds.received_hist.bin(4),
        ds_sent_tries0: ds.sent_tries_hist.bin(0),
        ds_sent_tries1: ds.sent_tries_hist.bin(1),
        ds_sent_tries2: ds.sent_tries_hist.bin(2),
        ds_sent_tries3: ds.sent_tries_hist.bin(3),
        ds_sent_tries4: ds.sent_tries_hist.bin(4),
    }
}

/// Per-node MAC summary row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MacNodeRow {
    #[serde(rename = "nGateways")]
    pub n_gateways: u32,
    #[serde(rename = "nEndDevices")]
    pub n_end_devices: u32,
    #[serde(rename = "totalTime")]
    pub total_time: u64,
    #[serde(rename = "drCalcMethod")]
    pub dr_calc_method: u8,
    #[serde(rename = "drCalcMethodMisc")]
    pub dr_calc_method_misc: f64,
    pub seed: u64,
    #[serde(rename = "usConfirmedData")]
    pub us_confirmed_data: u8,
    #[serde(rename = "usDataPeriod")]
    pub us_data_period: u64,
    #[serde(rename = "nodeId")]
    pub node_id: NodeId,
    pub delivered: u64,
    pub generated: u64,
    pub ratio: f64,
    pub sent: u64,
    pub received: u64,
}

/// Build the per-node MAC rows: one row per node that generated at least one
/// packet, in node-id order.
pub fn mac_node_rows(analysis: &MacAnalysis, settings: &SimSettings) -> Vec<MacNodeRow> {
    analysis
        .nodes
        .iter()
        .filter(|(_, node)| node.generated > 0)
        .map(|(id, node)| MacNodeRow {
            n_gateways: settings.n_gateways,
            n_end_devices: settings.n_end_devices,
            total_time: settings.total_time,
            dr_calc_method: settings.dr_calc_method,
            dr_calc_method_misc: settings.dr_calc_method_misc,
            seed: settings.seed,
            us_confirmed_data: settings.us_confirmed_data,
            us_data_period: settings.us_data_period,
            node_id: id,
            delivered: node.delivered,
            generated: node.generated,
            ratio: node.delivered as f64 / node.generated as f64,
            sent: node.sent,
            received: node.received,
        })
        .collect()
}
