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
//! Fixed-size accumulators for the aggregate statistics. All bounds are part
//! of the output contract: 6 drop reasons, 6 data rates, histogram bins 0-4.

use crate::records::DropReason;

/// Number of PHY drop-reason codes (0x00..=0x05).
pub const NUM_DROP_REASONS: usize = 6;
/// Number of data-rate indices (0..=5).
pub const NUM_DATA_RATES: usize = 6;
/// Number of bins of the small count histograms (counts 0..=4).
pub const HIST_BINS: usize = 5;

/// Histogram over small per-packet counts (times sent, times received,
/// transmission tries). Counts above the last bin are clamped into it; the
/// reference tooling never saw LoRaWAN packets sent more than 4 times, but a
/// hostile trace must not crash the batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BoundedHistogram {
    bins: [u64; HIST_BINS],
}

impl BoundedHistogram {
    pub fn record(&mut self, value: usize) {
        let bin = if value >= HIST_BINS {
            log::warn!("histogram count {value} exceeds bin {}, clamping", HIST_BINS - 1);
            HIST_BINS - 1
        } else {
            value
        };
        self.bins[bin] += 1;
    }

    pub fn bin(&self, i: usize) -> u64 {
        self.bins[i]
    }

    pub fn bins(&self) -> &[u64; HIST_BINS] {
        &self.bins
    }

    pub fn total(&self) -> u64 {
        self.bins.iter().sum()
    }

    /// Sum of `bin * count`, i.e. the total number of underlying events.
    pub fn weighted_total(&self) -> u64 {
        self.bins
            .iter()
            .enumerate()
            .map(|(i, c)| i as u64 * c)
            .sum()
    }
}

/// Occurrence counts of PHY drop reasons, globally and broken down by the
/// data-rate index of the dropped transmission.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DropReasonTally {
    by_reason: [u64; NUM_DROP_REASONS],
    by_reason_and_rate: [[u64; NUM_DATA_RATES]; NUM_DROP_REASONS],
}

impl DropReasonTally {
    /// Record one qualifying drop. `data_rate` is the rate the sender chose
    /// for the dropped transmission and is validated at ingestion.
    pub fn record(&mut self, reason: DropReason, data_rate: u8) {
        self.by_reason[reason.index()] += 1;
        self.by_reason_and_rate[reason.index()][data_rate as usize] += 1;
    }

    pub fn count(&self, reason: DropReason) -> u64 {
        self.by_reason[reason.index()]
    }

    pub fn count_at_rate(&self, reason: DropReason, data_rate: u8) -> u64 {
        self.by_reason_and_rate[reason.index()][data_rate as usize]
    }

    /// Total number of recorded drops across all reasons.
    pub fn total(&self) -> u64 {
        self.by_reason.iter().sum()
    }

    /// Grand total of the per-rate breakdown; always equals `total()`.
    pub fn total_by_rate(&self) -> u64 {
        self.by_reason_and_rate.iter().flatten().sum()
    }
}

/// Joint distribution of how often a MAC packet was sent vs. how often it was
/// received. Only rows for 1..=4 sends are meaningful (a processed packet has
/// at least one transmitter) and the receive count never exceeds the send
/// count; out-of-range values are clamped.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SentReceivedTable {
    cells: [[u64; HIST_BINS]; HIST_BINS],
}

impl SentReceivedTable {
    pub fn record(&mut self, sent: usize, received: usize) {
        let sent = sent.clamp(1, HIST_BINS - 1);
        let received = received.min(sent);
        self.cells[sent][received] += 1;
    }

    pub fn cell(&self, sent: usize, received: usize) -> u64 {
        self.cells[sent][received]
    }
}

/// Aggregate MAC statistics for one traffic direction (upstream = end-device
/// originated, downstream = gateway originated).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DirectionStats {
    pub packets: u64,
    pub sent: u64,
    pub received: u64,
    pub delivered: u64,
    pub undelivered: u64,
    pub sent_tries: u64,
    pub sent_hist: BoundedHistogram,
    pub received_hist: BoundedHistogram,
    /// Transmission tries of delivered packets, per the MacSentPkt record.
    pub sent_tries_hist: BoundedHistogram,
    pub sent_vs_received: SentReceivedTable,
    /// Sum over packets of `max(sent - received, 0)`.
    pub sent_not_received: u64,
}

impl DirectionStats {
    pub fn pdr(&self) -> f64 {
        if self.packets == 0 {
            0.0
        } else {
            self.delivered as f64 / self.packets as f64
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn histogram_totals() {
        let mut h = BoundedHistogram::default();
        h.record(1);
        h.record(2);
        h.record(2);
        assert_eq!(h.bins(), &[0, 1, 2, 0, 0]);
        assert_eq!(h.total(), 3);
        assert_eq!(h.weighted_total(), 5);
    }

    #[test]
    fn histogram_clamps_overflow() {
        let mut h = BoundedHistogram::default();
        h.record(12);
        assert_eq!(h.bin(HIST_BINS - 1), 1);
        assert_eq!(h.total(), 1);
    }

    #[test]
    fn tally_totals_match() {
        let mut t = DropReasonTally::default();
        t.record(DropReason::SinrTooLow, 0);
        t.record(DropReason::SinrTooLow, 5);
        t.record(DropReason::PhyBusyRx, 2);
        assert_eq!(t.count(DropReason::SinrTooLow), 2);
        assert_eq!(t.count_at_rate(DropReason::SinrTooLow, 5), 1);
        assert_eq!(t.total(), 3);
        assert_eq!(t.total_by_rate(), t.total());
    }

    #[test]
    fn joint_table_clamps() {
        let mut t = SentReceivedTable::default();
        t.record(2, 1);
        t.record(9, 9);
        t.record(1, 3);
        assert_eq!(t.cell(2, 1), 1);
        assert_eq!(t.cell(4, 4), 1);
        assert_eq!(t.cell(1, 1), 1);
    }

    #[test]
    fn pdr_guards_empty_direction() {
        let stats = DirectionStats::default();
        assert_eq!(stats.pdr(), 0.0);
    }
}
