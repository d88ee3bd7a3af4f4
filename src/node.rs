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
//! Simulated devices and their running per-trace counters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::records::DropReason;

/// Stable identifier of a simulated device within one trace file.
pub type NodeId = u32;

/// Kind of simulated device, as encoded in the `deviceType` trace column.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Deserialize,
    Serialize,
    strum::Display,
    strum_macros::EnumString,
)]
pub enum DeviceType {
    Gateway,
    EndDevice,
}

impl DeviceType {
    /// Decode the numeric `deviceType` column. Any value outside `{0, 1}` is a
    /// schema violation handled by the caller.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Gateway),
            1 => Some(Self::EndDevice),
            _ => None,
        }
    }

    /// The device type expected to receive traffic sent by `self`: end-device
    /// uplinks are received by gateways and vice versa.
    pub fn opposite(self) -> Self {
        match self {
            Self::Gateway => Self::EndDevice,
            Self::EndDevice => Self::Gateway,
        }
    }
}

/// One simulated device with its running counters.
///
/// Created lazily the first time a trace record references the node id and
/// only valid for the duration of one trace file. The PHY engine uses the
/// transmission counters and `drop_reasons`; the MAC engine uses the packet
/// counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub device_type: DeviceType,
    pub sent: u64,
    pub delivered: u64,
    pub not_delivered: u64,
    pub received: u64,
    pub dropped: u64,
    pub generated: u64,
    /// Drop-reason codes observed for this node's own outbound traffic.
    pub drop_reasons: Vec<DropReason>,
}

impl Node {
    fn new(device_type: DeviceType) -> Self {
        Self {
            device_type,
            sent: 0,
            delivered: 0,
            not_delivered: 0,
            received: 0,
            dropped: 0,
            generated: 0,
            drop_reasons: Vec::new(),
        }
    }
}

/// All nodes observed in one trace file, keyed by node id.
///
/// Backed by a `BTreeMap` so that per-node output rows iterate in node-id
/// order and reprocessing a trace yields byte-identical output.
#[derive(Debug, Default, Clone)]
pub struct NodeTable(BTreeMap<NodeId, Node>);

impl NodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `id` appeared in the trace. The device type of the first
    /// sighting wins; the trace never changes a node's type.
    pub fn observe(&mut self, id: NodeId, device_type: DeviceType) {
        self.0.entry(id).or_insert_with(|| Node::new(device_type));
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.0.get(&id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.0.get_mut(&id)
    }

    pub fn device_type(&self, id: NodeId) -> Option<DeviceType> {
        self.0.get(&id).map(|n| n.device_type)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over all nodes in ascending node-id order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.0.iter().map(|(id, n)| (*id, n))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn device_type_codes() {
        assert_eq!(DeviceType::from_code(0), Some(DeviceType::Gateway));
        assert_eq!(DeviceType::from_code(1), Some(DeviceType::EndDevice));
        assert_eq!(DeviceType::from_code(2), None);
    }

    #[test]
    fn opposite_direction() {
        assert_eq!(DeviceType::Gateway.opposite(), DeviceType::EndDevice);
        assert_eq!(DeviceType::EndDevice.opposite(), DeviceType::Gateway);
    }

    #[test]
    fn first_sighting_wins() {
        let mut nodes = NodeTable::new();
        nodes.observe(7, DeviceType::EndDevice);
        nodes.observe(7, DeviceType::Gateway);
        assert_eq!(nodes.device_type(7), Some(DeviceType::EndDevice));
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn iteration_is_sorted() {
        let mut nodes = NodeTable::new();
        nodes.observe(3, DeviceType::EndDevice);
        nodes.observe(1, DeviceType::Gateway);
        nodes.observe(2, DeviceType::EndDevice);
        let ids: Vec<NodeId> = nodes.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
