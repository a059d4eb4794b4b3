//! Thermometer pipeline (C6): per-device scratchpad I/O, resolution/alarm
//! writes, and the resolution-aware conversion delay rule. The 3-phase
//! parallel scheduler itself lives on [`crate::driver::Driver`], which owns
//! the bridges, timers, and endpoint table this module's helpers operate
//! through.

use crate::{
    bridge::BridgeChip,
    error::{Error, Result},
    onewire::OneWire,
    rom::{Family, Rom},
    scratchpad::{Scratchpad, encode_resolution},
};
use std::time::Duration;

pub const READ_SP: u8 = 0xBE;
pub const WRITE_SP: u8 = 0x4E;
pub const COPY_SP: u8 = 0x48;
pub const CONVERT_T: u8 = 0x44;
pub const RECALL_E2: u8 = 0xB8;
pub const READ_PSU: u8 = 0xB4;

/// One enumerated DS18x20 instance.
#[derive(Clone, Debug)]
pub struct Thermometer {
    pub rom: Rom,
    pub bridge_idx: usize,
    pub channel: u8,
    pub endpoint_idx: usize,
    pub scratchpad: Scratchpad,
    /// Resolution observed at the last successful scratchpad read, kept
    /// apart from `scratchpad`'s live config byte so reporting can flag
    /// the two disagreeing (§4.8).
    pub cached_resolution: u8,
    /// Power source observed at initialize time via `READ_PSU`: `true` if
    /// parasitic (bus-powered), `false` if externally powered.
    pub parasitic: bool,
}

impl Thermometer {
    pub fn family(&self) -> Family {
        self.rom.family().unwrap_or(Family::Ds18b20)
    }

    pub fn resolution(&self) -> u8 {
        self.scratchpad.resolution(self.family())
    }

    pub fn temperature_celsius(&self) -> f32 {
        self.scratchpad.temperature_celsius(self.family())
    }
}

/// Reads the full 9-byte scratchpad after a match-ROM addressed reset.
pub fn read_sp<B: BridgeChip>(link: &mut OneWire<'_, B>, rom: &Rom) -> Result<Scratchpad> {
    if !link.reset_command(READ_SP, Some(rom), false)? {
        return Err(Error::PresenceMissing);
    }
    let mut buf = [0u8; 9];
    link.read_block(&mut buf)?;
    Scratchpad::from_bytes(buf).map_err(Error::from)
}

/// Writes TH, TL, and (for family 0x28) the config byte into the volatile
/// scratchpad. Not persisted until [`copy_sp`].
pub fn write_sp<B: BridgeChip>(link: &mut OneWire<'_, B>, rom: &Rom, family: Family, scratchpad: &Scratchpad) -> Result<()> {
    if !link.reset_command(WRITE_SP, Some(rom), false)? {
        return Err(Error::PresenceMissing);
    }
    link.write_block(scratchpad.write_payload(family))
}

/// Commits TH, TL, and config from the scratchpad to EEPROM.
pub fn copy_sp<B: BridgeChip>(link: &mut OneWire<'_, B>, rom: &Rom) -> Result<()> {
    if !link.reset_command(COPY_SP, Some(rom), true)? {
        return Err(Error::PresenceMissing);
    }
    std::thread::sleep(Duration::from_millis(11));
    link.ow_level(false)
}

/// Recalls EEPROM-persisted TH/TL/config into the scratchpad, so a
/// subsequent [`read_sp`] reflects persisted values rather than whatever
/// the device powered on with.
pub fn recall_e2<B: BridgeChip>(link: &mut OneWire<'_, B>, rom: &Rom) -> Result<()> {
    if !link.reset_command(RECALL_E2, Some(rom), false)? {
        return Err(Error::PresenceMissing);
    }
    Ok(())
}

/// Reads the power-supply bit: `true` means externally powered, `false`
/// means parasitic.
pub fn read_power_supply<B: BridgeChip>(link: &mut OneWire<'_, B>, rom: &Rom) -> Result<bool> {
    if !link.reset_command(READ_PSU, Some(rom), false)? {
        return Err(Error::PresenceMissing);
    }
    link.touch_bit(true)
}

/// Initialize (§4.6): recall EEPROM, read the full scratchpad, and read the
/// power-supply bit for one freshly enumerated device. Returns the
/// scratchpad and whether the device is parasitically powered.
pub fn initialize<B: BridgeChip>(link: &mut OneWire<'_, B>, rom: &Rom) -> Result<(Scratchpad, bool)> {
    recall_e2(link, rom)?;
    let scratchpad = read_sp(link, rom)?;
    let external = read_power_supply(link, rom)?;
    Ok((scratchpad, !external))
}

/// Sets the cached resolution if `res` differs from the current value.
/// Only valid for family 0x28. Returns whether the scratchpad changed.
pub fn set_resolution(scratchpad: &mut Scratchpad, family: Family, res: u8) -> Result<bool> {
    if family != Family::Ds18b20 {
        return Err(Error::InvalidValue("resolution is only configurable for family 0x28"));
    }
    if !(9..=12).contains(&res) {
        return Err(Error::InvalidValue("resolution must be 9..=12"));
    }
    if scratchpad.resolution(family) == res {
        return Ok(false);
    }
    scratchpad.bytes[4] = encode_resolution(res);
    Ok(true)
}

/// Sets TH/TL alarm thresholds if either differs from the current values.
/// Returns whether the scratchpad changed.
pub fn set_alarms(scratchpad: &mut Scratchpad, lo: i8, hi: i8) -> Result<bool> {
    if scratchpad.alarm_low() == lo && scratchpad.alarm_high() == hi {
        return Ok(false);
    }
    scratchpad.bytes[2] = hi as u8;
    scratchpad.bytes[3] = lo as u8;
    Ok(true)
}

/// Resolution-aware conversion delay (§4.6). The fast path (`750ms/(4-res)`)
/// applies only when either a specific 0x28 device was addressed, or
/// skip-ROM was used and the bus carries only 0x28 devices. `res` is the
/// bit-width (9..=12); the formula runs on the 0..3 index `res - 9`.
pub fn calc_delay(addressed: Option<Family>, bus_is_all_ds18b20: bool, res: u8) -> Duration {
    let fast = match addressed {
        Some(Family::Ds18b20) => true,
        None => bus_is_all_ds18b20,
        _ => false,
    };
    if fast {
        let index = (res - 9) as u64;
        Duration::from_millis(750 / (4 - index))
    } else {
        Duration::from_millis(750)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn delay_fast_path_for_addressed_ds18b20() {
        assert_eq!(calc_delay(Some(Family::Ds18b20), false, 9), Duration::from_millis(187));
        assert_eq!(calc_delay(Some(Family::Ds18b20), false, 12), Duration::from_millis(750));
    }

    #[test]
    fn delay_full_when_mixed_family_on_bus() {
        assert_eq!(calc_delay(None, false, 9), Duration::from_millis(750));
    }

    #[test]
    fn delay_fast_path_for_skip_rom_pure_ds18b20_bus() {
        assert_eq!(calc_delay(None, true, 10), Duration::from_millis(250));
    }

    #[test]
    fn set_resolution_rejects_ds18s20() {
        let mut sp = Scratchpad::default();
        assert!(matches!(set_resolution(&mut sp, Family::Ds18s20, 10), Err(Error::InvalidValue(_))));
    }

    #[test]
    fn set_resolution_is_idempotent() {
        let mut sp = Scratchpad::default();
        assert!(set_resolution(&mut sp, Family::Ds18b20, 12).unwrap());
        assert!(!set_resolution(&mut sp, Family::Ds18b20, 12).unwrap());
    }

    #[test]
    fn set_alarms_is_idempotent() {
        let mut sp = Scratchpad::default();
        assert!(set_alarms(&mut sp, -10, 75).unwrap());
        assert!(!set_alarms(&mut sp, -10, 75).unwrap());
        assert!(set_alarms(&mut sp, -5, 75).unwrap());
    }
}
