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
//! Typed decoding of the raw trace rows.
//!
//! The simulator emits comma-delimited, pipe-quoted CSV with a fixed column
//! layout per trace kind. Columns are positional and the trailing auxiliary
//! columns depend on the trace source of the row, so rows are decoded from
//! [`csv::StringRecord`]s into tagged event variants carrying exactly the
//! fields their trace source produces.

use std::{io, str::FromStr};

use crate::node::{DeviceType, NodeId};

/// Errors raised while ingesting or classifying a trace file.
///
/// The recoverable trace anomalies (malformed aggregates, truncation
/// artifacts) never surface here; they are logged and excluded by the engines.
/// Every variant of this enum is fatal for the file being processed, and the
/// batch drivers abort the whole batch on it.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("line {line}: row has {found} columns, expected at least {expected}")]
    MalformedRow {
        line: u64,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: cannot parse {field} from {value:?}")]
    InvalidField {
        line: u64,
        field: &'static str,
        value: String,
    },
    #[error("line {line}: unknown trace source {value:?}")]
    UnknownTraceSource { line: u64, value: String },
    #[error("line {line}: device type {value} outside {{0, 1}}")]
    InvalidDeviceType { line: u64, value: u8 },
    #[error("line {line}: drop reason {value} outside the known codes 0x00..=0x05")]
    DropReasonOutOfRange { line: u64, value: u8 },
    #[error("line {line}: data rate index {value} outside 0..=5")]
    DataRateOutOfRange { line: u64, value: u8 },
    #[error("key {key}: transmission aborted without completion; abort accounting is not implemented")]
    TxAbortUnimplemented { key: String },
    #[error("key {key}: {count} {what} events for one message, the trace contract allows at most one")]
    AckCycleContract {
        key: String,
        what: &'static str,
        count: usize,
    },
    #[error("key {key}: zero-length downstream message has type {msg_type}, expected unconfirmed data down (3)")]
    UnexpectedControlMessage { key: String, msg_type: u8 },
    #[error("line {line}: receive window {window} outside {{1, 2}}")]
    InvalidReceiveWindow { line: u64, window: u8 },
    #[error("settings file is missing key {0:?}")]
    MissingSetting(&'static str),
}

/// Reason code reported by a PHY when it drops a reception, as defined by the
/// ns-3 LoRaWAN module.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumIter,
)]
pub enum DropReason {
    PhyBusyRx,
    SinrTooLow,
    NotInRxState,
    PacketDestroyed,
    Aborted,
    PacketAborted,
}

impl DropReason {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::PhyBusyRx),
            1 => Some(Self::SinrTooLow),
            2 => Some(Self::NotInRxState),
            3 => Some(Self::PacketDestroyed),
            4 => Some(Self::Aborted),
            5 => Some(Self::PacketAborted),
            _ => None,
        }
    }

    /// Position of this reason in the fixed-size tallies.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Open a trace CSV for reading: comma-delimited, pipe-quoted, one header row
/// that is discarded, and a variable number of trailing auxiliary columns.
pub fn trace_reader<R: io::Read>(input: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .quote(b'|')
        .flexible(true)
        .from_reader(input)
}

fn field<'r>(
    row: &'r csv::StringRecord,
    idx: usize,
    line: u64,
) -> Result<&'r str, TraceError> {
    row.get(idx).ok_or(TraceError::MalformedRow {
        line,
        expected: idx + 1,
        found: row.len(),
    })
}

fn parse_field<T: FromStr>(
    row: &csv::StringRecord,
    idx: usize,
    name: &'static str,
    line: u64,
) -> Result<T, TraceError> {
    let raw = field(row, idx, line)?;
    raw.trim().parse().map_err(|_| TraceError::InvalidField {
        line,
        field: name,
        value: raw.to_string(),
    })
}

fn parse_device_type(
    row: &csv::StringRecord,
    idx: usize,
    line: u64,
) -> Result<DeviceType, TraceError> {
    let code: u8 = parse_field(row, idx, "deviceType", line)?;
    DeviceType::from_code(code).ok_or(TraceError::InvalidDeviceType { line, value: code })
}

fn parse_data_rate(
    row: &csv::StringRecord,
    idx: usize,
    line: u64,
) -> Result<u8, TraceError> {
    let value: u8 = parse_field(row, idx, "dataRateIndex", line)?;
    if value as usize >= crate::stats::NUM_DATA_RATES {
        return Err(TraceError::DataRateOutOfRange { line, value });
    }
    Ok(value)
}

/// Line number of a row for diagnostics; 0 if the reader has no position.
pub fn row_line(row: &csv::StringRecord) -> u64 {
    row.position().map(|p| p.line()).unwrap_or_default()
}

/// Event vocabulary of the PHY transmission trace (`trace-phy-tx.csv`).
///
/// Column layout: time=0, deviceType=1, nodeId=2, traceSource=5,
/// PhyTraceIdTag=6. `PhyTxBegin` rows additionally carry the channel index
/// (9) and data-rate index (10); `PhyRxDrop` rows carry the drop reason (9).
#[derive(Debug, Clone, PartialEq)]
pub enum PhyEvent {
    TxBegin {
        node: NodeId,
        channel: u8,
        data_rate: u8,
    },
    RxBegin {
        node: NodeId,
    },
    TxEnd {
        node: NodeId,
    },
    RxEnd {
        node: NodeId,
    },
    RxDrop {
        node: NodeId,
        reason: DropReason,
    },
    TxDrop {
        node: NodeId,
    },
}

/// One decoded row of the PHY transmission trace.
#[derive(Debug, Clone, PartialEq)]
pub struct PhyRecord {
    pub time: f64,
    pub device_type: DeviceType,
    pub node: NodeId,
    /// PhyTraceIdTag correlating all records of one transmission.
    pub key: String,
    pub event: PhyEvent,
}

impl PhyRecord {
    pub fn from_row(row: &csv::StringRecord) -> Result<Self, TraceError> {
        let line = row_line(row);
        let time: f64 = parse_field(row, 0, "timestamp", line)?;
        let device_type = parse_device_type(row, 1, line)?;
        let node: NodeId = parse_field(row, 2, "nodeId", line)?;
        let source = field(row, 5, line)?;
        let key = field(row, 6, line)?.to_string();

        let event = match source {
            "PhyTxBegin" => PhyEvent::TxBegin {
                node,
                channel: parse_field(row, 9, "channelIndex", line)?,
                data_rate: parse_data_rate(row, 10, line)?,
            },
            "PhyRxBegin" => PhyEvent::RxBegin { node },
            "PhyTxEnd" => PhyEvent::TxEnd { node },
            "PhyRxEnd" => PhyEvent::RxEnd { node },
            "PhyRxDrop" => {
                let code: u8 = parse_field(row, 9, "dropReason", line)?;
                let reason = DropReason::from_code(code)
                    .ok_or(TraceError::DropReasonOutOfRange { line, value: code })?;
                PhyEvent::RxDrop { node, reason }
            }
            "PhyTxDrop" => PhyEvent::TxDrop { node },
            other => {
                return Err(TraceError::UnknownTraceSource {
                    line,
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            time,
            device_type,
            node,
            key,
            event,
        })
    }
}

/// Event vocabulary of the MAC packet trace (`trace-mac-packets.csv`).
///
/// Same leading layout as the PHY trace; `MacSentPkt` rows additionally carry
/// the total transmission count of the packet (column 8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacEvent {
    Tx { node: NodeId },
    TxOk { node: NodeId },
    TxDrop { node: NodeId },
    Rx { node: NodeId },
    RxDrop { node: NodeId },
    SentPkt { node: NodeId, transmissions: u8 },
}

/// One decoded row of the MAC packet trace.
#[derive(Debug, Clone, PartialEq)]
pub struct MacRecord {
    pub time: f64,
    pub device_type: DeviceType,
    pub node: NodeId,
    /// Packet content hash correlating all records of one MAC packet.
    pub key: String,
    pub event: MacEvent,
}

impl MacRecord {
    pub fn from_row(row: &csv::StringRecord) -> Result<Self, TraceError> {
        let line = row_line(row);
        let time: f64 = parse_field(row, 0, "timestamp", line)?;
        let device_type = parse_device_type(row, 1, line)?;
        let node: NodeId = parse_field(row, 2, "nodeId", line)?;
        let source = field(row, 5, line)?;
        let key = field(row, 6, line)?.to_string();

        let event = match source {
            "MacTx" => MacEvent::Tx { node },
            "MacTxOk" => MacEvent::TxOk { node },
            "MacTxDrop" => MacEvent::TxDrop { node },
            "MacRx" => MacEvent::Rx { node },
            "MacRxDrop" => MacEvent::RxDrop { node },
            "MacSentPkt" => MacEvent::SentPkt {
                node,
                transmissions: parse_field(row, 8, "nTransmissions", line)?,
            },
            other => {
                return Err(TraceError::UnknownTraceSource {
                    line,
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            time,
            device_type,
            node,
            key,
            event,
        })
    }
}

/// Event vocabulary of the network-server downstream message trace.
///
/// This trace uses a different layout: time=0, traceSource=1, nodeId=2,
/// msgType=3, txRemaining=4, packetHex=5 (the correlation key),
/// packetLength=6, and for `DSMsgTx` the receive window (7).
#[derive(Debug, Clone, PartialEq)]
pub enum NsDsEvent {
    Tx {
        node: NodeId,
        tx_remaining: u8,
        /// Receive window used for this downstream attempt, 1 or 2.
        receive_window: u8,
    },
    Ackd {
        node: NodeId,
        tx_remaining: u8,
    },
    Drop {
        node: NodeId,
        tx_remaining: u8,
    },
}

/// One decoded row of the downstream message trace.
#[derive(Debug, Clone, PartialEq)]
pub struct NsDsRecord {
    pub time: f64,
    pub key: String,
    pub event: NsDsEvent,
}

impl NsDsRecord {
    /// Decode a row, returning `Ok(None)` for zero-length control
    /// acknowledgments. Those must always be unconfirmed data down messages
    /// (type 3); anything else is a schema violation.
    pub fn from_row(row: &csv::StringRecord) -> Result<Option<Self>, TraceError> {
        let line = row_line(row);
        let length: u64 = parse_field(row, 6, "packetLength", line)?;
        if length == 0 {
            let msg_type: u8 = parse_field(row, 3, "msgType", line)?;
            if msg_type != 3 {
                return Err(TraceError::UnexpectedControlMessage {
                    key: field(row, 5, line)?.to_string(),
                    msg_type,
                });
            }
            return Ok(None);
        }

        let time: f64 = parse_field(row, 0, "timestamp", line)?;
        let source = field(row, 1, line)?;
        let node: NodeId = parse_field(row, 2, "nodeId", line)?;
        let tx_remaining: u8 = parse_field(row, 4, "txRemaining", line)?;
        let key = field(row, 5, line)?.to_string();

        let event = match source {
            "DSMsgTx" => {
                let receive_window: u8 = parse_field(row, 7, "receiveWindow", line)?;
                if !matches!(receive_window, 1 | 2) {
                    return Err(TraceError::InvalidReceiveWindow {
                        line,
                        window: receive_window,
                    });
                }
                NsDsEvent::Tx {
                    node,
                    tx_remaining,
                    receive_window,
                }
            }
            "DSMsgAckd" => NsDsEvent::Ackd { node, tx_remaining },
            "DSMsgDrop" => NsDsEvent::Drop { node, tx_remaining },
            other => {
                return Err(TraceError::UnknownTraceSource {
                    line,
                    value: other.to_string(),
                })
            }
        };

        Ok(Some(Self { time, key, event }))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn record(row: &str) -> csv::StringRecord {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .quote(b'|')
            .flexible(true)
            .from_reader(row.as_bytes());
        rdr.records().next().unwrap().unwrap()
    }

    #[test]
    fn phy_tx_begin_row() {
        let row = record("12.5,1,42,0,0,PhyTxBegin,0xdead,beef,0,3,5");
        let rec = PhyRecord::from_row(&row).unwrap();
        assert_eq!(rec.time, 12.5);
        assert_eq!(rec.device_type, DeviceType::EndDevice);
        assert_eq!(rec.node, 42);
        assert_eq!(rec.key, "0xdead");
        assert_eq!(
            rec.event,
            PhyEvent::TxBegin {
                node: 42,
                channel: 3,
                data_rate: 5
            }
        );
    }

    #[test]
    fn phy_rx_drop_row() {
        let row = record("13.0,0,1,0,0,PhyRxDrop,0xdead,beef,0,2");
        let rec = PhyRecord::from_row(&row).unwrap();
        assert_eq!(
            rec.event,
            PhyEvent::RxDrop {
                node: 1,
                reason: DropReason::NotInRxState
            }
        );
    }

    #[test]
    fn phy_short_row_without_aux_columns() {
        let row = record("13.0,0,1,0,0,PhyRxEnd,0xdead");
        let rec = PhyRecord::from_row(&row).unwrap();
        assert_eq!(rec.event, PhyEvent::RxEnd { node: 1 });
    }

    #[test]
    fn phy_missing_aux_column_is_malformed() {
        let row = record("13.0,1,1,0,0,PhyTxBegin,0xdead,beef,0");
        assert!(matches!(
            PhyRecord::from_row(&row),
            Err(TraceError::MalformedRow { .. })
        ));
    }

    #[test]
    fn phy_bad_device_type() {
        let row = record("13.0,7,1,0,0,PhyRxEnd,0xdead");
        assert!(matches!(
            PhyRecord::from_row(&row),
            Err(TraceError::InvalidDeviceType { value: 7, .. })
        ));
    }

    #[test]
    fn phy_unknown_drop_reason() {
        let row = record("13.0,0,1,0,0,PhyRxDrop,0xdead,beef,0,9");
        assert!(matches!(
            PhyRecord::from_row(&row),
            Err(TraceError::DropReasonOutOfRange { value: 9, .. })
        ));
    }

    #[test]
    fn mac_sent_pkt_row() {
        let row = record("99.0,1,7,0,0,MacSentPkt,0xbeef,x,3");
        let rec = MacRecord::from_row(&row).unwrap();
        assert_eq!(
            rec.event,
            MacEvent::SentPkt {
                node: 7,
                transmissions: 3
            }
        );
    }

    #[test]
    fn nsds_tx_row() {
        let row = record("50.0,DSMsgTx,3,1,2,0xcafe,12,1");
        let rec = NsDsRecord::from_row(&row).unwrap().unwrap();
        assert_eq!(rec.key, "0xcafe");
        assert_eq!(
            rec.event,
            NsDsEvent::Tx {
                node: 3,
                tx_remaining: 2,
                receive_window: 1
            }
        );
    }

    #[test]
    fn nsds_zero_length_ack_is_skipped() {
        let row = record("50.0,DSMsgTx,3,3,2,0xcafe,0,1");
        assert!(NsDsRecord::from_row(&row).unwrap().is_none());
    }

    #[test]
    fn nsds_zero_length_with_wrong_type_is_fatal() {
        let row = record("50.0,DSMsgTx,3,1,2,0xcafe,0,1");
        assert!(matches!(
            NsDsRecord::from_row(&row),
            Err(TraceError::UnexpectedControlMessage { msg_type: 1, .. })
        ));
    }

    #[test]
    fn nsds_bad_receive_window() {
        let row = record("50.0,DSMsgTx,3,1,2,0xcafe,12,3");
        assert!(matches!(
            NsDsRecord::from_row(&row),
            Err(TraceError::InvalidReceiveWindow { window: 3, .. })
        ));
    }

    #[test]
    fn drop_reason_codes_round_trip() {
        for code in 0..6u8 {
            assert_eq!(DropReason::from_code(code).unwrap().code(), code);
        }
        assert_eq!(DropReason::from_code(6), None);
    }
}
