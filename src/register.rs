//! Typed mirror of the DS248x bridge registers (C1). Pure data: no I/O lives
//! here, that is [`crate::bridge`]'s job.

use bitflags::bitflags;

bitflags! {
    /// STATUS register bitmap.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct Status: u8 {
        /// 1-Wire Busy.
        const OWB = 1 << 0;
        /// Presence Pulse Detected.
        const PPD = 1 << 1;
        const SD  = 1 << 2;
        /// Logic Level.
        const LL  = 1 << 3;
        /// ReSeT.
        const RST = 1 << 4;
        /// Single Bit Received.
        const SBR = 1 << 5;
        /// Triple Search Bit.
        const TSB = 1 << 6;
        /// DIRection taken by the last search triplet.
        const DIR = 1 << 7;
    }
}

bitflags! {
    /// CONFIG register low nibble; the upper nibble sent over the wire is
    /// always the bitwise complement of this one.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct Config: u8 {
        /// Active Pull-Up. Must read back as set at all times except during reset.
        const APU = 1 << 0;
        /// Pull-Down (DS2484 only).
        const PDN = 1 << 1;
        /// Strong Pull-Up.
        const SPU = 1 << 2;
        /// 1-Wire Speed (0 = standard, 1 = overdrive).
        const OWS = 1 << 3;
    }
}

impl Config {
    /// Driver default: standard speed, active pull-up on, strong pull-up and
    /// pull-down off.
    pub const DEFAULT: Config = Config::APU;

    /// Encodes this config for the wire: low nibble is the value, high
    /// nibble its bitwise complement.
    pub fn encode(self) -> u8 {
        let low = self.bits() & 0x0F;
        (!low << 4) | low
    }
}

/// Which physical bridge chip this instance is.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChipKind {
    /// DS2482-800: 8 channels, has a CHAN register, no port-adjust register.
    Ds2482_800,
    /// DS2484: 1 channel, has a port-adjust register, no CHAN register.
    Ds2484,
}

impl ChipKind {
    pub fn channel_count(self) -> u8 {
        match self {
            ChipKind::Ds2482_800 => 8,
            ChipKind::Ds2484 => 1,
        }
    }
}

/// Channel Number -> Selection byte (1's complement encoding), DS2482-800 only.
pub const N2S: [u8; 8] = [0xF0, 0xE1, 0xD2, 0xC3, 0xB4, 0xA5, 0x96, 0x87];
/// Channel Value (read back after select) -> Number translation, DS2482-800 only.
pub const V2N: [u8; 8] = [0xB8, 0xB1, 0xAA, 0xA3, 0x9C, 0x95, 0x8E, 0x87];

/// Port-adjust `VAL` field decode tables, DS2484 only: rise time, standard
/// strong-pull, weak-pull-up resistance and recovery time, indexed by the
/// 4-bit `VAL` field. Separate tables apply in overdrive (`OD=1`).
pub mod port_adjust {
    /// `tRSTL`/`tW1L` rise time, standard speed (µs *10).
    pub const TRSTL: [u8; 16] = [44, 46, 48, 50, 52, 54, 56, 58, 60, 62, 64, 66, 68, 70, 72, 74];
    /// `tMSP` standard speed, standard strength (µs *10).
    pub const TMSP0: [u8; 16] = [58, 58, 60, 62, 64, 66, 68, 70, 72, 74, 76, 76, 76, 76, 76, 76];
    /// `tMSP` overdrive speed, standard strength (µs *10).
    pub const TMSP1: [u8; 16] = [55, 55, 60, 65, 70, 75, 80, 85, 90, 95, 100, 105, 110, 110, 110, 110];
    /// `tW0L` standard speed (µs *10).
    pub const TWOL0: [u8; 16] = [52, 54, 56, 58, 60, 62, 64, 66, 68, 70, 70, 70, 70, 70, 70, 70];
    /// `tW0L` overdrive speed (µs *10).
    pub const TWOL1: [u8; 16] = [50, 55, 60, 65, 70, 75, 80, 85, 90, 95, 100, 100, 100, 100, 100, 100];
    /// `tREC0` recovery time (ns).
    pub const TREC0: [u16; 16] = [
        275, 275, 275, 275, 275, 275, 525, 775, 1025, 1275, 1525, 1775, 2025, 2275, 2525, 2525,
    ];
    /// Weak pull-up resistance (ohm).
    pub const RWPU: [u16; 16] = [
        500, 500, 500, 500, 500, 500, 1000, 1000, 1000, 1000, 1000, 1000, 1000, 1000, 1000, 1000,
    ];
}

/// Emits, via `log::debug!`, only the status bits that changed between two
/// observations.
pub fn report_status(prev: Status, cur: Status) {
    let changed = prev ^ cur;
    if changed.is_empty() {
        return;
    }
    log::debug!("status {prev:?} -> {cur:?} (changed: {changed:?})");
}

/// Emits, via `log::debug!`, only the config bits that changed between two
/// observations.
pub fn report_config(prev: Config, cur: Config) {
    let changed = prev ^ cur;
    if changed.is_empty() {
        return;
    }
    log::debug!("config {prev:?} -> {cur:?} (changed: {changed:?})");
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn config_encode_roundtrip() {
        let cfg = Config::APU | Config::SPU;
        let encoded = cfg.encode();
        assert_eq!(encoded & 0x0F, cfg.bits());
        assert_eq!((encoded >> 4) & 0x0F, !cfg.bits() & 0x0F);
    }

    #[test]
    fn status_bits_distinct() {
        assert_eq!(Status::OWB.bits(), 0b0000_0001);
        assert_eq!(Status::DIR.bits(), 0b1000_0000);
    }
}
