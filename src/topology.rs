//! Bus topology (C4): logical-bus ↔ (bridge-index, physical-channel)
//! mapping, and per-bus last-seen state.

use crate::rom::Rom;

/// One logical bus: a channel on some bridge, indexed across the whole
/// driver rather than per-bridge.
#[derive(Clone, Debug, Default)]
pub struct LogicalBus {
    /// Seconds timestamp of the last device read on this bus.
    pub last_read_s: u64,
    /// Last ROM observed on this bus, if any.
    pub last_rom: Option<Rom>,
    pub ds18b20_count: u32,
    pub ds18s20_count: u32,
}

/// Maps logical bus indices to `(bridge index, physical channel)` pairs, with
/// an optional board-specific permutation of the physical channel number.
#[derive(Clone, Debug, Default)]
pub struct Topology {
    /// `[lo, hi)` logical-bus range owned by each bridge, in bridge order.
    ranges: Vec<(u8, u8)>,
    /// Board-specific physical-channel remap, defaulting to identity.
    remap: Option<[u8; 8]>,
}

impl Topology {
    pub fn new(remap: Option<[u8; 8]>) -> Topology {
        Topology { ranges: Vec::new(), remap }
    }

    /// Registers the next bridge, returning the `[lo, hi]` logical range it
    /// was assigned.
    pub fn push_bridge(&mut self, channel_count: u8) -> (u8, u8) {
        let lo = self.ranges.last().map_or(0, |&(_, hi)| hi);
        let hi = lo + channel_count - 1;
        self.ranges.push((lo, hi));
        (lo, hi)
    }

    fn remap_channel(&self, physical: u8) -> u8 {
        match self.remap {
            Some(table) => table[physical as usize],
            None => physical,
        }
    }

    /// Logical bus index → `(bridge index, physical channel)`.
    pub fn l2p(&self, logical: u8) -> Option<(usize, u8)> {
        for (bridge_idx, &(lo, hi)) in self.ranges.iter().enumerate() {
            if logical >= lo && logical <= hi {
                let offset = logical - lo;
                return Some((bridge_idx, self.remap_channel(offset)));
            }
        }
        None
    }

    /// `(bridge index, physical channel)` → logical bus index.
    pub fn p2l(&self, bridge_idx: usize, physical: u8) -> Option<u8> {
        let &(lo, _) = self.ranges.get(bridge_idx)?;
        let offset = self
            .remap
            .map_or(physical, |table| table.iter().position(|&p| p == physical).unwrap_or(physical as usize) as u8);
        Some(lo + offset)
    }

    pub fn bus_count(&self) -> u8 {
        self.ranges.last().map_or(0, |&(_, hi)| hi + 1)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn contiguous_ranges() {
        let mut topo = Topology::new(None);
        assert_eq!(topo.push_bridge(8), (0, 7));
        assert_eq!(topo.push_bridge(1), (8, 8));
        assert_eq!(topo.bus_count(), 9);
    }

    #[test]
    fn l2p_p2l_roundtrip() {
        let mut topo = Topology::new(None);
        topo.push_bridge(8);
        topo.push_bridge(1);
        assert_eq!(topo.l2p(8), Some((1, 0)));
        assert_eq!(topo.l2p(3), Some((0, 3)));
        assert_eq!(topo.p2l(0, 3), Some(3));
        assert_eq!(topo.p2l(1, 0), Some(8));
    }

    #[test]
    fn remap_permutes_physical() {
        let mut table = [0u8; 8];
        for (i, slot) in table.iter_mut().enumerate() {
            *slot = 7 - i as u8;
        }
        let mut topo = Topology::new(Some(table));
        topo.push_bridge(8);
        assert_eq!(topo.l2p(0), Some((0, 7)));
        assert_eq!(topo.l2p(7), Some((0, 0)));
    }
}
