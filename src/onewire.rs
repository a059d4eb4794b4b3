//! The 1-Wire link layer (C3): reset/presence, bit/byte/block I/O,
//! addressing, speed/power control, and ROM-search (Maxim AN187) built atop
//! a selected, locked [`crate::bridge::BusGuard`].

use crate::{
    bridge::BridgeChip,
    crc8,
    error::{Error, Result},
    register::Status,
    rom::{Rom, search::SearchState},
};

/// Skip-ROM: address all devices on the bus at once.
pub const SKIP_ROM: u8 = 0xCC;
/// Match-ROM: address exactly one device by its 64-bit ROM.
pub const MATCH_ROM: u8 = 0x55;
/// Read-ROM: valid only when a single device is present.
pub const READ_ROM: u8 = 0x33;
/// Search-ROM: enumerate every device on the bus.
pub const SEARCH_ROM: u8 = 0xF0;
/// Conditional search: enumerate only devices in an alarm state.
pub const ALARM_SEARCH: u8 = 0xEC;

mod timing {
    pub const RESET: (u32, u32) = (1244, 153);
    pub const READ_BYTE: (u32, u32) = (583, 98);
    pub const WRITE_BYTE: (u32, u32) = (583, 98);
    pub const TRIPLET: (u32, u32) = (219, 33);
    pub const SINGLE_BIT: (u32, u32) = (73, 11);
}

fn pick(overdrive: bool, pair: (u32, u32)) -> u32 {
    if overdrive { pair.1 } else { pair.0 }
}

/// The 1-Wire link layer for one selected bus, generic over any
/// [`BridgeChip`] so tests can substitute a software mock for real hardware.
pub struct OneWire<'g, B> {
    bus: &'g mut B,
    overdrive: bool,
    search: SearchState,
}

impl<'g, B: BridgeChip> OneWire<'g, B> {
    pub fn new(bus: &'g mut B) -> Self {
        OneWire { bus, overdrive: false, search: SearchState::default() }
    }

    /// Issues a 1-Wire reset and returns whether a presence pulse was seen.
    pub fn reset(&mut self) -> Result<bool> {
        self.bus.reset_1w(pick(self.overdrive, timing::RESET))
    }

    pub fn touch_bit(&mut self, bit: bool) -> Result<bool> {
        self.bus.touch_bit(bit, pick(self.overdrive, timing::SINGLE_BIT))
    }

    pub fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.bus.write_byte(byte, pick(self.overdrive, timing::WRITE_BYTE))
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        self.bus.read_byte(pick(self.overdrive, timing::READ_BYTE))
    }

    pub fn write_block(&mut self, bytes: &[u8]) -> Result<()> {
        for &byte in bytes {
            self.write_byte(byte)?;
        }
        Ok(())
    }

    pub fn read_block(&mut self, buf: &mut [u8]) -> Result<()> {
        for byte in buf.iter_mut() {
            *byte = self.read_byte()?;
        }
        Ok(())
    }

    /// Sets the 1-Wire speed (standard or overdrive) on the bridge.
    pub fn ow_speed(&mut self, overdrive: bool) -> Result<()> {
        self.bus.set_speed(overdrive)?;
        self.overdrive = overdrive;
        Ok(())
    }

    /// Sets the pull-up level. Strong pull-up self-clears on the bridge's
    /// next bus event, so this is a single-shot request.
    pub fn ow_level(&mut self, strong: bool) -> Result<()> {
        self.bus.set_level(strong)
    }

    /// Skip-ROM or Match-ROM addressing.
    pub fn address(&mut self, rom: Option<&Rom>) -> Result<()> {
        match rom {
            None => self.write_byte(SKIP_ROM),
            Some(rom) => {
                self.write_byte(MATCH_ROM)?;
                self.write_block(&rom.0)
            }
        }
    }

    /// Canonical reset → presence-check → address → (optional strong
    /// pull-up) → command-byte sequence used by every device transaction.
    pub fn reset_command(&mut self, command: u8, rom: Option<&Rom>, strong_pullup: bool) -> Result<bool> {
        if !self.reset()? {
            return Ok(false);
        }
        self.address(rom)?;
        if strong_pullup {
            self.ow_level(true)?;
        }
        self.write_byte(command)?;
        Ok(true)
    }

    /// Issues Read-ROM; only valid with exactly one device on the bus.
    pub fn read_rom(&mut self) -> Result<Rom> {
        if !self.reset()? {
            return Err(Error::PresenceMissing);
        }
        self.write_byte(READ_ROM)?;
        let mut buf = [0u8; 8];
        self.read_block(&mut buf)?;
        let rom = Rom(buf);
        rom.check_crc()?;
        Ok(rom)
    }

    fn triplet(&mut self, direction: bool) -> Result<(bool, bool, bool)> {
        let status = self.bus.search_triplet(direction, pick(self.overdrive, timing::TRIPLET))?;
        Ok((status.contains(Status::SBR), status.contains(Status::TSB), status.contains(Status::DIR)))
    }

    /// Runs one step of the AN187 ROM-search algorithm, driven by the
    /// iterator's carried [`SearchState`]. `family`, when set, restricts the
    /// search to one family code (alarm-search is selected by `alarm`).
    fn search_step(&mut self, alarm: bool) -> Result<Option<Rom>> {
        if self.search.last_device {
            self.search.reset();
            return Ok(None);
        }
        if !self.reset()? {
            self.search.reset();
            return Ok(None);
        }
        self.write_byte(if alarm { ALARM_SEARCH } else { SEARCH_ROM })?;

        let mut last_zero = 0u8;
        let mut crc = 0u8;
        for bit_num in 1..=64u8 {
            let direction = self.search.direction_for_bit(bit_num);
            let (sbr, tsb, dir) = self.triplet(direction)?;
            if sbr && tsb {
                self.search.reset();
                return Ok(None);
            }
            if !sbr && !tsb && !dir {
                last_zero = bit_num;
                if bit_num <= 8 {
                    self.search.last_family_discrepancy = bit_num;
                }
            }
            self.search.set_bit(bit_num, dir);
            if bit_num % 8 == 0 {
                crc = crc8::calculate_with_initial(crc, &[self.search.rom.0[(bit_num / 8 - 1) as usize]]);
            }
        }

        if crc != 0 || self.search.rom.family_code() == 0 {
            self.search.reset();
            return Ok(None);
        }
        self.search.last_discrepancy = last_zero;
        if last_zero == 0 {
            self.search.last_device = true;
        }
        Ok(Some(self.search.rom))
    }

    /// Starts a fresh enumeration, optionally restricted to one family.
    pub fn first(&mut self, family: Option<u8>) -> Result<Option<Rom>> {
        self.search.reset();
        if let Some(family) = family {
            self.search.target_setup(family);
        } else {
            self.search.rom = Rom::ZERO;
            self.search.last_discrepancy = 0;
        }
        self.search_step(false)
    }

    /// Continues an enumeration previously started with [`Self::first`].
    pub fn next(&mut self) -> Result<Option<Rom>> {
        self.search_step(false)
    }

    /// Conditional search restricted to devices currently in an alarm state.
    pub fn next_alarm(&mut self) -> Result<Option<Rom>> {
        self.search_step(true)
    }

    /// Skips the remaining members of the family just found, so the next
    /// `next()` call moves on to a different family.
    pub fn family_skip(&mut self) {
        self.search.family_skip();
    }

    /// Re-searches with `rom` pinned and returns whether it still answers.
    pub fn verify(&mut self, rom: &Rom) -> Result<bool> {
        self.search.rom = *rom;
        self.search.last_discrepancy = 64;
        self.search.last_family_discrepancy = 0;
        self.search.last_device = false;
        Ok(self.search_step(false)?.as_ref() == Some(rom))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crc8;
    use std::cell::Cell;

    /// A single ideal 1-Wire device: always answers the triplet by forcing
    /// the direction to its own ROM bit, since no other device contends.
    struct OneDevice {
        rom: Rom,
        bit: Cell<u8>,
    }

    impl OneDevice {
        fn new(mut bytes: [u8; 8]) -> OneDevice {
            let crc = crc8::calculate(&bytes[..7]);
            bytes[7] = crc;
            OneDevice { rom: Rom(bytes), bit: Cell::new(0) }
        }
    }

    impl BridgeChip for OneDevice {
        fn reset_1w(&mut self, _delay_us: u32) -> Result<bool> {
            self.bit.set(0);
            Ok(true)
        }

        fn touch_bit(&mut self, _bit: bool, _delay_us: u32) -> Result<bool> {
            Ok(false)
        }

        fn read_byte(&mut self, _delay_us: u32) -> Result<u8> {
            Ok(0)
        }

        fn write_byte(&mut self, _byte: u8, _delay_us: u32) -> Result<()> {
            Ok(())
        }

        fn search_triplet(&mut self, _direction: bool, _delay_us: u32) -> Result<Status> {
            let bit_num = self.bit.get() + 1;
            self.bit.set(bit_num);
            let idx = (bit_num as usize - 1) / 8;
            let mask = 1u8 << ((bit_num - 1) % 8);
            let dir = self.rom.0[idx] & mask != 0;
            let mut status = Status::empty();
            status.set(Status::SBR, dir);
            status.set(Status::TSB, !dir);
            status.set(Status::DIR, dir);
            Ok(status)
        }

        fn set_speed(&mut self, _overdrive: bool) -> Result<()> {
            Ok(())
        }

        fn set_level(&mut self, _strong: bool) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn finds_single_device_then_terminates() {
        let mut device = OneDevice::new([0x28, 0x01, 0x4B, 0x46, 0x7F, 0xFF, 0x0D, 0x00]);
        let mut ow = OneWire::new(&mut device);
        let found = ow.first(None).unwrap().expect("device should be found");
        assert!(found.check_crc().is_ok());
        assert_eq!(found.family_code(), 0x28);
        assert!(ow.next().unwrap().is_none());
    }

    #[test]
    fn target_setup_restricts_family() {
        let mut device = OneDevice::new([0x28, 0x01, 0x4B, 0x46, 0x7F, 0xFF, 0x0D, 0x00]);
        let mut ow = OneWire::new(&mut device);
        let found = ow.first(Some(0x28)).unwrap().expect("device should be found");
        assert_eq!(found.family_code(), 0x28);
    }
}
