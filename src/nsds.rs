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
//! Reconstruction of network-server downstream message cycles.
//!
//! A downstream message is transmitted up to a fixed number of times across
//! the end device's receive windows until the network server either sees the
//! acknowledgment (`DSMsgAckd`) or gives up (`DSMsgDrop`). Zero-length control
//! acknowledgments are filtered out during ingestion.

use std::{collections::HashMap, io};

use itertools::Itertools;

use crate::{
    mac::TRACE_TAIL_FRACTION,
    node::NodeId,
    records::{trace_reader, NsDsEvent, NsDsRecord, TraceError},
    stats::BoundedHistogram,
};

/// A `DSMsgTx` entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DsTxEntry {
    pub time: f64,
    pub node: NodeId,
    pub tx_remaining: u8,
    pub receive_window: u8,
}

/// A `DSMsgAckd` or `DSMsgDrop` entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DsTerminalEntry {
    pub time: f64,
    pub node: NodeId,
    pub tx_remaining: u8,
}

/// One reconstructed downstream message cycle, keyed by the packet hex.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DsMessage {
    pub tx: Vec<DsTxEntry>,
    pub ackd: Vec<DsTerminalEntry>,
    pub dropped: Vec<DsTerminalEntry>,
}

impl DsMessage {
    fn push(&mut self, time: f64, event: &NsDsEvent) {
        match *event {
            NsDsEvent::Tx {
                node,
                tx_remaining,
                receive_window,
            } => self.tx.push(DsTxEntry {
                time,
                node,
                tx_remaining,
                receive_window,
            }),
            NsDsEvent::Ackd { node, tx_remaining } => self.ackd.push(DsTerminalEntry {
                time,
                node,
                tx_remaining,
            }),
            NsDsEvent::Drop { node, tx_remaining } => self.dropped.push(DsTerminalEntry {
                time,
                node,
                tx_remaining,
            }),
        }
    }
}

/// Aggregate statistics over all resolved downstream message cycles.
#[derive(Debug, Default)]
pub struct NsDsAnalysis {
    pub messages: HashMap<String, DsMessage>,
    /// Transmit events of resolved messages.
    pub total_tx: u64,
    /// Resolved messages (each was transmitted at least once).
    pub unique_tx: u64,
    pub acked: u64,
    pub dropped: u64,
    pub sent_rw1: u64,
    pub sent_rw2: u64,
    /// Remaining transmit budget at the time of acknowledgment.
    pub acked_tx_remaining: BoundedHistogram,
    pub last_time: f64,
}

impl NsDsAnalysis {
    /// Fraction of unique messages that were acknowledged.
    pub fn pdr(&self) -> f64 {
        if self.unique_tx == 0 {
            0.0
        } else {
            self.acked as f64 / self.unique_tx as f64
        }
    }

    /// Fraction of unique messages that were not given up on.
    pub fn pdr_not_dropped(&self) -> f64 {
        if self.unique_tx == 0 {
            0.0
        } else {
            (self.unique_tx - self.dropped) as f64 / self.unique_tx as f64
        }
    }

    pub fn log_summary(&self) {
        log::info!(
            "downstream messages sent by the network server: {} total / {} unique",
            self.total_tx,
            self.unique_tx
        );
        log::info!(
            "sent in RW1/RW2: {}/{}, acked: {}, dropped: {}",
            self.sent_rw1,
            self.sent_rw2,
            self.acked,
            self.dropped
        );
        log::info!(
            "PDR: {:.4} (acked) / {:.4} (not dropped)",
            self.pdr(),
            self.pdr_not_dropped()
        );
        if self.unique_tx > 0 {
            log::info!(
                "average transmissions per unique message: {:.4}",
                self.total_tx as f64 / self.unique_tx as f64
            );
        }
        if self.acked > 0 {
            log::info!(
                "average transmissions per acked message: {:.4}",
                self.total_tx as f64 / self.acked as f64
            );
        }
        log::info!(
            "remaining transmit budget at acknowledgment: {}",
            self.acked_tx_remaining.bins().iter().join("\t")
        );
    }
}

/// Parse and classify one downstream message trace.
pub fn analyze<R: io::Read>(input: R) -> Result<NsDsAnalysis, TraceError> {
    let mut analysis = ingest(input)?;
    classify(&mut analysis)?;
    Ok(analysis)
}

fn ingest<R: io::Read>(input: R) -> Result<NsDsAnalysis, TraceError> {
    let mut analysis = NsDsAnalysis::default();

    let mut reader = trace_reader(input);
    for row in reader.records() {
        let row = row?;
        let Some(record) = NsDsRecord::from_row(&row)? else {
            continue;
        };
        analysis.last_time = analysis.last_time.max(record.time);
        analysis
            .messages
            .entry(record.key)
            .or_default()
            .push(record.time, &record.event);
    }

    Ok(analysis)
}

fn classify(analysis: &mut NsDsAnalysis) -> Result<(), TraceError> {
    let keys = analysis.messages.keys().cloned().sorted().collect_vec();

    for key in keys {
        let Some(msg) = analysis.messages.get(&key) else {
            continue;
        };

        let Some(first_tx) = msg.tx.first() else {
            log::warn!("key {key}: message without any DSMsgTx event, skipping: {msg:?}");
            continue;
        };

        // the network server records exactly one terminal event per message
        if msg.ackd.len() > 1 {
            return Err(TraceError::AckCycleContract {
                key,
                what: "DSMsgAckd",
                count: msg.ackd.len(),
            });
        }
        if msg.dropped.len() > 1 {
            return Err(TraceError::AckCycleContract {
                key,
                what: "DSMsgDrop",
                count: msg.dropped.len(),
            });
        }

        // still in flight at the end of the trace?
        if msg.ackd.is_empty() && msg.dropped.is_empty() {
            let fraction = if analysis.last_time > 0.0 {
                first_tx.time / analysis.last_time
            } else {
                1.0
            };
            if fraction < TRACE_TAIL_FRACTION {
                log::warn!(
                    "key {key}: unresolved message at {:.1}/{:.1}s, skipping: {msg:?}",
                    first_tx.time,
                    analysis.last_time
                );
            }
            continue;
        }

        for tx in &msg.tx {
            // receive_window is validated to {1, 2} at ingestion
            match tx.receive_window {
                1 => analysis.sent_rw1 += 1,
                _ => analysis.sent_rw2 += 1,
            }
        }

        if let Some(ack) = msg.ackd.first() {
            analysis.acked += 1;
            analysis.acked_tx_remaining.record(ack.tx_remaining as usize);
        }
        analysis.dropped += msg.dropped.len() as u64;

        analysis.total_tx += msg.tx.len() as u64;
        analysis.unique_tx += 1;
    }

    Ok(())
}
