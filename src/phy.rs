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
//! Reconstruction and classification of PHY-layer transmissions.
//!
//! Each transmission is identified by its PhyTraceIdTag. All records sharing a
//! tag are folded into one [`Transmission`] aggregate; classification is a
//! post-pass over the completed grouping, since the trace gives no explicit
//! end-of-transmission marker.

use std::{collections::HashMap, io};

use itertools::Itertools;
use strum::IntoEnumIterator;

use crate::{
    node::{NodeId, NodeTable},
    records::{trace_reader, DropReason, PhyEvent, PhyRecord, TraceError},
    stats::{DropReasonTally, NUM_DATA_RATES},
};

/// A `PhyTxBegin` entry: the sending node together with its channel and
/// data-rate choice for this transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxStart {
    pub node: NodeId,
    pub channel: u8,
    pub data_rate: u8,
}

/// A `PhyRxDrop` entry: the reporting node and its reason code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxDropEntry {
    pub node: NodeId,
    pub reason: DropReason,
}

/// One reconstructed PHY transmission: the node ids reported per trace
/// source, in input order. Exactly one node may ever appear in `tx_begin`;
/// more than one means the trace itself is defective.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Transmission {
    pub tx_begin: Vec<TxStart>,
    pub rx_begin: Vec<NodeId>,
    pub tx_end: Vec<NodeId>,
    pub rx_end: Vec<NodeId>,
    pub rx_drop: Vec<RxDropEntry>,
    pub tx_drop: Vec<NodeId>,
    pub delivered: bool,
}

impl Transmission {
    fn push(&mut self, event: &PhyEvent) {
        match *event {
            PhyEvent::TxBegin {
                node,
                channel,
                data_rate,
            } => self.tx_begin.push(TxStart {
                node,
                channel,
                data_rate,
            }),
            PhyEvent::RxBegin { node } => self.rx_begin.push(node),
            PhyEvent::TxEnd { node } => self.tx_end.push(node),
            PhyEvent::RxEnd { node } => self.rx_end.push(node),
            PhyEvent::RxDrop { node, reason } => {
                self.rx_drop.push(RxDropEntry { node, reason })
            }
            PhyEvent::TxDrop { node } => self.tx_drop.push(node),
        }
    }
}

/// How strictly the delivery search treats a receiver that finished reception.
///
/// The reference tooling shipped both variants with no documented reason for
/// the divergence, so the choice is a parameter of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxPolicy {
    /// The accepted receiver must have finished receiving *and* must not
    /// appear in the RxDrop list.
    Strict,
    /// Finishing reception is enough; a later drop by the same receiver is
    /// ignored.
    Lenient,
}

/// Result of classifying one PHY trace file.
#[derive(Debug, Default)]
pub struct PhyAnalysis {
    pub nodes: NodeTable,
    /// Surviving aggregates after classification. Truncation artifacts are
    /// removed; defective aggregates (bad sender count) are kept but excluded
    /// from all counters.
    pub transmissions: HashMap<String, Transmission>,
    pub delivered: u64,
    pub undelivered: u64,
    pub drops: DropReasonTally,
}

impl PhyAnalysis {
    /// Fraction of surviving transmissions that were delivered.
    pub fn delivery_ratio(&self) -> f64 {
        if self.transmissions.is_empty() {
            0.0
        } else {
            self.delivered as f64 / self.transmissions.len() as f64
        }
    }

    /// Log the run-level summary: delivery ratio, drop reasons, and the
    /// per-reason breakdown by data-rate index.
    pub fn log_summary(&self) {
        log::info!(
            "PHY delivery ratio: {}/{} = {:.2}%, undelivered = {}",
            self.delivered,
            self.transmissions.len(),
            self.delivery_ratio() * 100.0,
            self.undelivered
        );

        log::info!("PHY drop reasons ({} drops total):", self.drops.total());
        for reason in DropReason::iter() {
            log::info!(
                "  0x{:02x} ({}) = {}",
                reason.code(),
                reason,
                self.drops.count(reason)
            );
        }

        log::info!("drops per data-rate index for every drop reason:");
        for reason in DropReason::iter() {
            let per_rate = (0..NUM_DATA_RATES as u8)
                .map(|dr| format!("{dr}:{}", self.drops.count_at_rate(reason, dr)))
                .join("\t");
            log::info!("  0x{:02x}\t{per_rate}", reason.code());
        }
    }
}

/// Parse and classify one PHY transmission trace.
pub fn analyze<R: io::Read>(input: R, policy: RxPolicy) -> Result<PhyAnalysis, TraceError> {
    let mut analysis = ingest(input)?;
    classify(&mut analysis, policy)?;
    Ok(analysis)
}

/// Fold the record stream into per-key aggregates and the lazily-built node
/// table. Pure grouping, no validation.
fn ingest<R: io::Read>(input: R) -> Result<PhyAnalysis, TraceError> {
    let mut analysis = PhyAnalysis::default();

    let mut reader = trace_reader(input);
    for row in reader.records() {
        let row = row?;
        let record = PhyRecord::from_row(&row)?;
        analysis.nodes.observe(record.node, record.device_type);
        analysis
            .transmissions
            .entry(record.key)
            .or_default()
            .push(&record.event);
    }

    Ok(analysis)
}

/// Classify every aggregate of the completed grouping.
fn classify(analysis: &mut PhyAnalysis, policy: RxPolicy) -> Result<(), TraceError> {
    // iterate over a sorted snapshot of the keys so that log output and the
    // removal of discarded aggregates are deterministic
    let keys = analysis.transmissions.keys().cloned().sorted().collect_vec();

    for key in keys {
        let Some(mut tx) = analysis.transmissions.remove(&key) else {
            continue;
        };

        // exactly one sender, or the aggregate is a defect of the trace and
        // contributes to no statistics at all
        if tx.tx_begin.len() != 1 {
            log::warn!(
                "key {key}: skipping transmission, {} nodes in PhyTxBegin: {tx:?}",
                tx.tx_begin.len()
            );
            analysis.transmissions.insert(key, tx);
            continue;
        }
        let sender = tx.tx_begin[0];

        // did the sender finish transmitting?
        if !(tx.tx_end.len() == 1 && tx.tx_end[0] == sender.node) {
            if tx.tx_drop.contains(&sender.node) {
                // aborted transmissions were never implemented in the
                // reference tooling; fail the file rather than miscount
                return Err(TraceError::TxAbortUnimplemented { key });
            }
            // no terminal event at all: an artifact of the trace ending
            // mid-transmission. Drop the aggregate entirely.
            log::warn!(
                "key {key}: sender {} in neither PhyTxEnd nor PhyTxDrop, discarding: {tx:?}",
                sender.node
            );
            continue;
        }

        let Some(sender_node) = analysis.nodes.get_mut(sender.node) else {
            continue;
        };
        sender_node.sent += 1;
        let expected_rx_type = sender_node.device_type.opposite();

        // scan receivers in input order; the first one of the expected device
        // type that satisfies the full success chain wins. A candidate that
        // began receiving but fails the later checks does not end the search,
        // another receiver may still have captured the transmission.
        let mut any_receiver = false;
        let mut suitable_receiver = false;
        let mut receiver_finished = false;
        let mut delivered = false;
        for &rx in &tx.rx_begin {
            any_receiver = true;
            if analysis.nodes.device_type(rx) != Some(expected_rx_type) {
                continue;
            }
            suitable_receiver = true;
            if !tx.rx_end.contains(&rx) {
                continue;
            }
            receiver_finished = true;
            if policy == RxPolicy::Strict && tx.rx_drop.iter().any(|d| d.node == rx) {
                continue;
            }
            delivered = true;
            break;
        }

        if delivered {
            tx.delivered = true;
            analysis.delivered += 1;
            if let Some(n) = analysis.nodes.get_mut(sender.node) {
                n.delivered += 1;
            }
        } else {
            analysis.undelivered += 1;
            if let Some(n) = analysis.nodes.get_mut(sender.node) {
                n.not_delivered += 1;
            }

            // record every drop reported by a receiver of the expected type,
            // keyed by the data rate the sender chose
            for drop in &tx.rx_drop {
                if analysis.nodes.device_type(drop.node) == Some(expected_rx_type) {
                    if let Some(n) = analysis.nodes.get_mut(sender.node) {
                        n.drop_reasons.push(drop.reason);
                    }
                    analysis.drops.record(drop.reason, sender.data_rate);
                }
            }

            if !any_receiver {
                log::debug!("key {key}: not delivered, no node started receiving");
            } else if !suitable_receiver {
                log::warn!(
                    "key {key}: not delivered, no receiver of type {expected_rx_type}: {tx:?}"
                );
            } else if !receiver_finished {
                log::warn!(
                    "key {key}: not delivered, no suitable receiver reached PhyRxEnd: {tx:?}"
                );
            } else {
                log::debug!("key {key}: not delivered, the receiver dropped the packet");
            }
        }

        analysis.transmissions.insert(key, tx);
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::node::DeviceType;

    const HEADER: &str =
        "time,deviceType,nodeId,msgType,len,traceSource,phyTraceId,packetHex,pad,misc1,misc2";

    fn trace(rows: &[String]) -> String {
        let mut out = String::from(HEADER);
        for row in rows {
            out.push('\n');
            out.push_str(row);
        }
        out
    }

    fn tx_begin(t: f64, dt: u8, node: u32, key: &str, channel: u8, dr: u8) -> String {
        format!("{t},{dt},{node},0,0,PhyTxBegin,{key},aa,0,{channel},{dr}")
    }

    fn event(t: f64, dt: u8, node: u32, source: &str, key: &str) -> String {
        format!("{t},{dt},{node},0,0,{source},{key},aa")
    }

    fn rx_drop(t: f64, dt: u8, node: u32, key: &str, reason: u8) -> String {
        format!("{t},{dt},{node},0,0,PhyRxDrop,{key},aa,0,{reason}")
    }

    fn run(rows: &[String], policy: RxPolicy) -> PhyAnalysis {
        analyze(trace(rows).as_bytes(), policy).unwrap()
    }

    #[test]
    fn no_receiver_counts_as_not_delivered() {
        // scenario A: completed transmission that nobody started receiving
        let a = run(
            &[
                tx_begin(1.0, 1, 1, "k1", 0, 2),
                event(1.1, 1, 1, "PhyTxEnd", "k1"),
            ],
            RxPolicy::Strict,
        );
        let node = a.nodes.get(1).unwrap();
        assert_eq!(node.sent, 1);
        assert_eq!(node.delivered, 0);
        assert_eq!(node.not_delivered, 1);
        assert_eq!(a.undelivered, 1);
        assert!(!a.transmissions["k1"].delivered);
    }

    #[test]
    fn gateway_receiver_delivers() {
        // scenario B: end device sends, gateway finishes reception
        let a = run(
            &[
                tx_begin(1.0, 1, 1, "k1", 0, 2),
                event(1.1, 1, 1, "PhyTxEnd", "k1"),
                event(1.0, 0, 2, "PhyRxBegin", "k1"),
                event(1.1, 0, 2, "PhyRxEnd", "k1"),
            ],
            RxPolicy::Strict,
        );
        assert!(a.transmissions["k1"].delivered);
        assert_eq!(a.delivered, 1);
        assert_eq!(a.nodes.get(1).unwrap().delivered, 1);
        assert_eq!(a.nodes.get(1).unwrap().not_delivered, 0);
    }

    #[test]
    fn dropped_by_receiver_strict_vs_lenient() {
        // scenario C: the only qualifying receiver also dropped the packet
        let rows = [
            tx_begin(1.0, 1, 1, "k1", 0, 3),
            event(1.1, 1, 1, "PhyTxEnd", "k1"),
            event(1.0, 0, 2, "PhyRxBegin", "k1"),
            event(1.1, 0, 2, "PhyRxEnd", "k1"),
            rx_drop(1.1, 0, 2, "k1", 2),
        ];

        let strict = run(&rows, RxPolicy::Strict);
        assert!(!strict.transmissions["k1"].delivered);
        assert_eq!(strict.nodes.get(1).unwrap().not_delivered, 1);
        // tallied once, at the sender's data rate
        assert_eq!(strict.drops.count(DropReason::NotInRxState), 1);
        assert_eq!(strict.drops.count_at_rate(DropReason::NotInRxState, 3), 1);
        assert_eq!(
            strict.nodes.get(1).unwrap().drop_reasons,
            vec![DropReason::NotInRxState]
        );

        let lenient = run(&rows, RxPolicy::Lenient);
        assert!(lenient.transmissions["k1"].delivered);
        assert_eq!(lenient.drops.total(), 0);
    }

    #[test]
    fn multiple_senders_excluded_entirely() {
        // scenario D: two distinct nodes in PhyTxBegin
        let a = run(
            &[
                tx_begin(1.0, 1, 1, "k1", 0, 2),
                tx_begin(1.0, 1, 2, "k1", 0, 2),
                event(1.1, 1, 1, "PhyTxEnd", "k1"),
            ],
            RxPolicy::Strict,
        );
        assert_eq!(a.nodes.get(1).unwrap().sent, 0);
        assert_eq!(a.nodes.get(2).unwrap().sent, 0);
        assert_eq!(a.delivered + a.undelivered, 0);
        // the defective aggregate stays visible for inspection
        assert!(a.transmissions.contains_key("k1"));
    }

    #[test]
    fn truncated_transmission_is_discarded() {
        // no PhyTxEnd and no PhyTxDrop: trace ended mid-transmission
        let a = run(&[tx_begin(99.0, 1, 1, "k1", 0, 2)], RxPolicy::Strict);
        assert!(!a.transmissions.contains_key("k1"));
        assert_eq!(a.nodes.get(1).unwrap().sent, 0);
        assert_eq!(a.undelivered, 0);
    }

    #[test]
    fn aborted_transmission_is_fatal() {
        let res = analyze(
            trace(&[
                tx_begin(1.0, 1, 1, "k1", 0, 2),
                event(1.1, 1, 1, "PhyTxDrop", "k1"),
            ])
            .as_bytes(),
            RxPolicy::Strict,
        );
        // known limitation: abort accounting is unimplemented and must fail
        // the file instead of producing skewed statistics
        assert!(matches!(
            res,
            Err(TraceError::TxAbortUnimplemented { key }) if key == "k1"
        ));
    }

    #[test]
    fn search_continues_past_failed_candidate() {
        // node 2 began receiving but dropped; node 3 succeeds afterwards
        let a = run(
            &[
                tx_begin(1.0, 1, 1, "k1", 0, 2),
                event(1.1, 1, 1, "PhyTxEnd", "k1"),
                event(1.0, 0, 2, "PhyRxBegin", "k1"),
                event(1.1, 0, 2, "PhyRxEnd", "k1"),
                rx_drop(1.1, 0, 2, "k1", 1),
                event(1.0, 0, 3, "PhyRxBegin", "k1"),
                event(1.1, 0, 3, "PhyRxEnd", "k1"),
            ],
            RxPolicy::Strict,
        );
        assert!(a.transmissions["k1"].delivered);
        assert_eq!(a.nodes.get(1).unwrap().delivered, 1);
        // delivered transmissions record no drop reasons
        assert_eq!(a.drops.total(), 0);
    }

    #[test]
    fn receiver_of_same_type_does_not_count() {
        // another end device overhearing the uplink is not a delivery
        let a = run(
            &[
                tx_begin(1.0, 1, 1, "k1", 0, 2),
                event(1.1, 1, 1, "PhyTxEnd", "k1"),
                event(1.0, 1, 5, "PhyRxBegin", "k1"),
                event(1.1, 1, 5, "PhyRxEnd", "k1"),
            ],
            RxPolicy::Strict,
        );
        assert!(!a.transmissions["k1"].delivered);
        assert_eq!(a.nodes.get(1).unwrap().not_delivered, 1);
    }

    #[test]
    fn drops_by_wrong_device_type_not_tallied() {
        let a = run(
            &[
                tx_begin(1.0, 1, 1, "k1", 0, 2),
                event(1.1, 1, 1, "PhyTxEnd", "k1"),
                rx_drop(1.1, 1, 5, "k1", 1),
            ],
            RxPolicy::Strict,
        );
        assert_eq!(a.undelivered, 1);
        assert_eq!(a.drops.total(), 0);
        assert!(a.nodes.get(1).unwrap().drop_reasons.is_empty());
    }

    #[test]
    fn sent_splits_into_delivered_and_not_delivered() {
        let a = run(
            &[
                // delivered
                tx_begin(1.0, 1, 1, "k1", 0, 2),
                event(1.1, 1, 1, "PhyTxEnd", "k1"),
                event(1.0, 0, 9, "PhyRxBegin", "k1"),
                event(1.1, 0, 9, "PhyRxEnd", "k1"),
                // lost
                tx_begin(2.0, 1, 1, "k2", 0, 2),
                event(2.1, 1, 1, "PhyTxEnd", "k2"),
                // truncated, must not count at all
                tx_begin(3.0, 1, 1, "k3", 0, 2),
            ],
            RxPolicy::Strict,
        );
        let node = a.nodes.get(1).unwrap();
        assert_eq!(node.sent, 2);
        assert_eq!(node.sent, node.delivered + node.not_delivered);
        assert_eq!(a.transmissions.len(), 2);
    }

    #[test]
    fn tally_grand_total_matches_qualifying_drops() {
        let a = run(
            &[
                tx_begin(1.0, 1, 1, "k1", 0, 0),
                event(1.1, 1, 1, "PhyTxEnd", "k1"),
                rx_drop(1.1, 0, 2, "k1", 1),
                rx_drop(1.1, 0, 3, "k1", 0),
                tx_begin(2.0, 1, 4, "k2", 0, 5),
                event(2.1, 1, 4, "PhyTxEnd", "k2"),
                rx_drop(2.1, 0, 2, "k2", 1),
            ],
            RxPolicy::Strict,
        );
        assert_eq!(a.drops.total(), 3);
        assert_eq!(a.drops.total_by_rate(), 3);
        assert_eq!(a.drops.count_at_rate(DropReason::SinrTooLow, 0), 1);
        assert_eq!(a.drops.count_at_rate(DropReason::SinrTooLow, 5), 1);
        assert_eq!(a.drops.count_at_rate(DropReason::PhyBusyRx, 0), 1);
    }

    #[test]
    fn device_types_recorded_from_trace() {
        let a = run(
            &[
                tx_begin(1.0, 1, 1, "k1", 0, 2),
                event(1.1, 1, 1, "PhyTxEnd", "k1"),
                event(1.0, 0, 2, "PhyRxBegin", "k1"),
            ],
            RxPolicy::Strict,
        );
        assert_eq!(a.nodes.device_type(1), Some(DeviceType::EndDevice));
        assert_eq!(a.nodes.device_type(2), Some(DeviceType::Gateway));
    }
}
