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
//! Reconstruction of MAC-layer packets and their retransmission history.
//!
//! A MAC packet is keyed by its content hash and may be transmitted several
//! times before the MAC gives up (`MacTxDrop`) or succeeds (`MacTxOk`, with a
//! `MacSentPkt` record carrying the number of tries). Classification derives
//! per-direction and per-node delivery statistics.

use std::{collections::HashMap, io};

use itertools::Itertools;

use crate::{
    node::{DeviceType, NodeId, NodeTable},
    records::{trace_reader, MacEvent, MacRecord, TraceError},
    stats::DirectionStats,
};

/// Fraction of the observed time span after which an unresolved packet is
/// considered an expected artifact of trace truncation.
pub const TRACE_TAIL_FRACTION: f64 = 0.99;

/// A `MacSentPkt` entry: the reporting node and the total number of
/// transmissions the packet took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentPktEntry {
    pub node: NodeId,
    pub transmissions: u8,
}

/// One reconstructed MAC packet: node ids per trace source in input order,
/// plus the timestamp of the packet's first record for the end-of-trace
/// heuristic.
#[derive(Debug, Clone, PartialEq)]
pub struct MacPacket {
    pub first_time: f64,
    pub tx: Vec<NodeId>,
    pub tx_ok: Vec<NodeId>,
    pub tx_drop: Vec<NodeId>,
    pub rx: Vec<NodeId>,
    pub rx_drop: Vec<NodeId>,
    pub sent_pkt: Vec<SentPktEntry>,
}

impl MacPacket {
    fn new(first_time: f64) -> Self {
        Self {
            first_time,
            tx: Vec::new(),
            tx_ok: Vec::new(),
            tx_drop: Vec::new(),
            rx: Vec::new(),
            rx_drop: Vec::new(),
            sent_pkt: Vec::new(),
        }
    }

    fn push(&mut self, event: &MacEvent) {
        match *event {
            MacEvent::Tx { node } => self.tx.push(node),
            MacEvent::TxOk { node } => self.tx_ok.push(node),
            MacEvent::TxDrop { node } => self.tx_drop.push(node),
            MacEvent::Rx { node } => self.rx.push(node),
            MacEvent::RxDrop { node } => self.rx_drop.push(node),
            MacEvent::SentPkt {
                node,
                transmissions,
            } => self.sent_pkt.push(SentPktEntry {
                node,
                transmissions,
            }),
        }
    }
}

/// Result of classifying one MAC packet trace file.
#[derive(Debug, Default)]
pub struct MacAnalysis {
    pub nodes: NodeTable,
    pub packets: HashMap<String, MacPacket>,
    pub upstream: DirectionStats,
    pub downstream: DirectionStats,
    /// Largest timestamp seen anywhere in the file.
    pub last_time: f64,
}

impl MacAnalysis {
    pub fn log_summary(&self) {
        for (name, stats) in [("upstream", &self.upstream), ("downstream", &self.downstream)] {
            log::info!(
                "{name}: {} packets, {} delivered, {} undelivered, PDR {:.4}, \
                 {} sent, {} received, {} tries",
                stats.packets,
                stats.delivered,
                stats.undelivered,
                stats.pdr(),
                stats.sent,
                stats.received,
                stats.sent_tries,
            );
            for (what, hist) in [
                ("sent", &stats.sent_hist),
                ("received", &stats.received_hist),
                ("sent tries", &stats.sent_tries_hist),
            ] {
                log::info!(
                    "{name} {what} per packet: {} (sum {}, weighted {})",
                    hist.bins().iter().join("\t"),
                    hist.total(),
                    hist.weighted_total(),
                );
            }
            log::info!(
                "{name} transmissions never received: {}",
                stats.sent_not_received
            );
        }
    }
}

/// Parse and classify one MAC packet trace.
pub fn analyze<R: io::Read>(input: R) -> Result<MacAnalysis, TraceError> {
    let mut analysis = ingest(input)?;
    classify(&mut analysis);
    Ok(analysis)
}

fn ingest<R: io::Read>(input: R) -> Result<MacAnalysis, TraceError> {
    let mut analysis = MacAnalysis::default();

    let mut reader = trace_reader(input);
    for row in reader.records() {
        let row = row?;
        let record = MacRecord::from_row(&row)?;
        analysis.nodes.observe(record.node, record.device_type);
        analysis.last_time = analysis.last_time.max(record.time);
        analysis
            .packets
            .entry(record.key)
            .or_insert_with(|| MacPacket::new(record.time))
            .push(&record.event);
    }

    Ok(analysis)
}

fn classify(analysis: &mut MacAnalysis) {
    let keys = analysis.packets.keys().cloned().sorted().collect_vec();

    for key in keys {
        let Some(packet) = analysis.packets.get(&key) else {
            continue;
        };

        if packet.tx.iter().unique().count() != 1 {
            log::warn!(
                "key {key}: skipping MAC packet, not exactly one transmitter in MacTx: {packet:?}"
            );
            continue;
        }
        if packet.rx.iter().unique().count() > 4 {
            log::warn!(
                "key {key}: skipping MAC packet, more than 4 distinct receivers: {packet:?}"
            );
            continue;
        }

        let nr_sent = packet.tx.len();
        let nr_received = packet.rx.len();
        let nr_rx_dropped = packet.rx_drop.len();
        let tx_node = packet.tx[0];

        // a packet either succeeded (MacTxOk) or the MAC gave up (MacTxDrop);
        // anything else is only expected right at the end of the trace
        let (delivered, sent_tries) = if packet.tx_ok.len() == 1 {
            let Some(sent_pkt) = packet.sent_pkt.first() else {
                log::warn!("key {key}: skipping delivered packet without MacSentPkt: {packet:?}");
                continue;
            };
            let tries = sent_pkt.transmissions as usize;
            if tries != nr_sent {
                log::error!(
                    "key {key}: skipping packet, MacSentPkt reports {tries} transmissions \
                     but {nr_sent} MacTx records exist: {packet:?}"
                );
                continue;
            }
            (true, tries)
        } else if packet.tx_drop.len() == 1 {
            (false, 0)
        } else {
            let fraction = if analysis.last_time > 0.0 {
                packet.first_time / analysis.last_time
            } else {
                1.0
            };
            if fraction < TRACE_TAIL_FRACTION {
                log::warn!(
                    "key {key}: unresolved packet at {:.1}/{:.1}s, skipping: {packet:?}",
                    packet.first_time,
                    analysis.last_time
                );
            }
            continue;
        };

        let Some(direction) = analysis.nodes.device_type(tx_node) else {
            continue;
        };
        let stats = match direction {
            DeviceType::EndDevice => &mut analysis.upstream,
            DeviceType::Gateway => &mut analysis.downstream,
        };

        stats.packets += 1;
        stats.sent += nr_sent as u64;
        stats.received += nr_received as u64;
        stats.sent_tries += sent_tries as u64;
        if delivered {
            stats.delivered += 1;
            stats.sent_tries_hist.record(sent_tries);
        } else {
            stats.undelivered += 1;
        }
        stats.sent_hist.record(nr_sent);
        stats.received_hist.record(nr_received);
        stats.sent_vs_received.record(nr_sent, nr_received);
        stats.sent_not_received += (nr_sent as u64).saturating_sub(nr_received as u64);

        if let Some(node) = analysis.nodes.get_mut(tx_node) {
            node.generated += 1;
            node.sent += nr_sent as u64;
            node.received += nr_received as u64;
            node.dropped += nr_rx_dropped as u64;
            if delivered {
                node.delivered += 1;
            } else {
                node.not_delivered += 1;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const HEADER: &str =
        "time,deviceType,nodeId,msgType,len,traceSource,packetHex,pad,nTransmissions";

    fn trace(rows: &[String]) -> String {
        let mut out = String::from(HEADER);
        for row in rows {
            out.push('\n');
            out.push_str(row);
        }
        out
    }

    fn event(t: f64, dt: u8, node: u32, source: &str, key: &str) -> String {
        format!("{t},{dt},{node},0,0,{source},{key},aa")
    }

    fn sent_pkt(t: f64, dt: u8, node: u32, key: &str, tries: u8) -> String {
        format!("{t},{dt},{node},0,0,MacSentPkt,{key},aa,{tries}")
    }

    fn run(rows: &[String]) -> MacAnalysis {
        analyze(trace(rows).as_bytes()).unwrap()
    }

    #[test]
    fn delivered_upstream_packet_with_retransmission() {
        let a = run(&[
            event(10.0, 1, 1, "MacTx", "p1"),
            event(20.0, 1, 1, "MacTx", "p1"),
            event(20.5, 0, 2, "MacRx", "p1"),
            event(21.0, 1, 1, "MacTxOk", "p1"),
            sent_pkt(21.0, 1, 1, "p1", 2),
            // a late record pushes the observed span well past p1
            event(5000.0, 1, 3, "MacTx", "p2"),
            event(5000.0, 1, 3, "MacTxOk", "p2"),
            sent_pkt(5000.0, 1, 3, "p2", 1),
        ]);
        assert_eq!(a.upstream.packets, 2);
        assert_eq!(a.upstream.delivered, 2);
        assert_eq!(a.upstream.sent, 3);
        assert_eq!(a.upstream.received, 1);
        assert_eq!(a.upstream.sent_tries_hist.bin(2), 1);
        assert_eq!(a.upstream.sent_tries_hist.bin(1), 1);
        assert_eq!(a.upstream.sent_hist.bin(2), 1);
        assert_eq!(a.upstream.sent_vs_received.cell(2, 1), 1);
        // p1 lost one of its two transmissions, p2's single transmission was
        // never received at all
        assert_eq!(a.upstream.sent_not_received, 2);

        let node = a.nodes.get(1).unwrap();
        assert_eq!(node.generated, 1);
        assert_eq!(node.sent, 2);
        assert_eq!(node.received, 1);
        assert_eq!(node.delivered, 1);
    }

    #[test]
    fn dropped_packet_is_undelivered() {
        let a = run(&[
            event(10.0, 1, 1, "MacTx", "p1"),
            event(20.0, 1, 1, "MacTx", "p1"),
            event(21.0, 1, 1, "MacTxDrop", "p1"),
            event(5000.0, 1, 3, "MacTx", "p2"),
            event(5000.0, 1, 3, "MacTxOk", "p2"),
            sent_pkt(5000.0, 1, 3, "p2", 1),
        ]);
        assert_eq!(a.upstream.undelivered, 1);
        assert_eq!(a.nodes.get(1).unwrap().not_delivered, 1);
        // no tries are known for a dropped packet
        assert_eq!(a.upstream.sent_tries_hist.total(), 1);
    }

    #[test]
    fn downstream_direction_from_transmitter_type() {
        let a = run(&[
            event(10.0, 0, 9, "MacTx", "p1"),
            event(11.0, 0, 9, "MacTxOk", "p1"),
            sent_pkt(11.0, 0, 9, "p1", 1),
        ]);
        assert_eq!(a.downstream.packets, 1);
        assert_eq!(a.upstream.packets, 0);
    }

    #[test]
    fn two_transmitters_excluded() {
        let a = run(&[
            event(10.0, 1, 1, "MacTx", "p1"),
            event(10.0, 1, 2, "MacTx", "p1"),
            event(11.0, 1, 1, "MacTxOk", "p1"),
            sent_pkt(11.0, 1, 1, "p1", 2),
        ]);
        assert_eq!(a.upstream.packets, 0);
        assert_eq!(a.nodes.get(1).unwrap().generated, 0);
        assert_eq!(a.nodes.get(2).unwrap().generated, 0);
    }

    #[test]
    fn unresolved_packet_near_trace_end_is_silently_skipped() {
        let a = run(&[
            event(1.0, 1, 1, "MacTx", "p1"),
            event(1.5, 1, 1, "MacTxOk", "p1"),
            sent_pkt(1.5, 1, 1, "p1", 1),
            // in flight at 99.5% of the observed span
            event(99.5, 1, 2, "MacTx", "p2"),
            event(100.0, 1, 1, "MacRx", "p3x"),
        ]);
        assert_eq!(a.upstream.packets, 1);
        assert!(a.packets.contains_key("p2"));
    }

    #[test]
    fn unresolved_packet_early_is_skipped_too() {
        // same outcome, but logged as an anomaly
        let a = run(&[
            event(1.0, 1, 1, "MacTx", "p1"),
            event(5000.0, 1, 2, "MacTx", "p2"),
            event(5000.0, 1, 2, "MacTxOk", "p2"),
            sent_pkt(5000.0, 1, 2, "p2", 1),
        ]);
        assert_eq!(a.upstream.packets, 1);
        assert_eq!(a.nodes.get(1).unwrap().generated, 0);
    }

    #[test]
    fn try_count_mismatch_excludes_packet() {
        let a = run(&[
            event(10.0, 1, 1, "MacTx", "p1"),
            event(11.0, 1, 1, "MacTxOk", "p1"),
            sent_pkt(11.0, 1, 1, "p1", 3),
        ]);
        assert_eq!(a.upstream.packets, 0);
    }

    #[test]
    fn delivered_without_sent_pkt_excluded() {
        let a = run(&[
            event(10.0, 1, 1, "MacTx", "p1"),
            event(11.0, 1, 1, "MacTxOk", "p1"),
        ]);
        assert_eq!(a.upstream.packets, 0);
    }

    #[test]
    fn rx_drops_counted_on_transmitter() {
        let a = run(&[
            event(10.0, 1, 1, "MacTx", "p1"),
            event(10.5, 0, 2, "MacRxDrop", "p1"),
            event(11.0, 1, 1, "MacTxDrop", "p1"),
        ]);
        assert_eq!(a.nodes.get(1).unwrap().dropped, 1);
    }
}
