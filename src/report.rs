//! Reporting (C8): human-readable state dumps for CLI and diagnostics.
//! Writers target `&mut dyn core::fmt::Write` rather than a proprietary
//! buffer type, so the same code renders into a `String` in tests.

use crate::{
    bridge::Bridge,
    register::{ChipKind, port_adjust},
    rom::Family,
    thermometer::Thermometer,
    topology::LogicalBus,
};
use core::fmt::{self, Write};
use embedded_hal::i2c::I2c;

pub fn report_bridge<I2C: I2c>(w: &mut dyn Write, idx: usize, bridge: &Bridge<I2C>) -> fmt::Result {
    writeln!(
        w,
        "bridge[{idx}] addr={:#04x} kind={:?} chan={} status={:?} config={:?} reset_ok={} reset_err={}",
        bridge.addr,
        bridge.kind,
        bridge.cur_chan(),
        bridge.status(),
        bridge.config(),
        bridge.reset_ok_count(),
        bridge.reset_err_count(),
    )
}

/// Decodes and prints the DS2484 port-adjust timings. No-op for an
/// 8-channel bridge, which has no port-adjust register.
pub fn report_port_adjust<I2C: I2c>(w: &mut dyn Write, idx: usize, bridge: &Bridge<I2C>) -> fmt::Result
where
    crate::error::Error: From<I2C::Error>,
{
    if bridge.kind != ChipKind::Ds2484 {
        return Ok(());
    }
    let raw = match bridge.read_port_adjust() {
        Ok(raw) => raw,
        Err(e) => return writeln!(w, "bridge[{idx}] port-adjust: read failed: {e}"),
    };
    let val = (raw[0] & 0x0F) as usize;
    let overdrive = raw[0] & 0x80 != 0;
    let rise = port_adjust::TRSTL[val];
    let pull = if overdrive { port_adjust::TMSP1[val] } else { port_adjust::TMSP0[val] };
    let recovery = port_adjust::TREC0[val];
    let weak = port_adjust::RWPU[val];
    writeln!(
        w,
        "bridge[{idx}] port-adjust: rise={rise} strong-pull={pull}({}) recovery={recovery}ns weak-pull={weak}ohm",
        if overdrive { "OD" } else { "std" },
    )
}

pub fn report_bus(w: &mut dyn Write, logical: u8, bus: &LogicalBus, now_s: u64) -> fmt::Result {
    let age = now_s.saturating_sub(bus.last_read_s);
    writeln!(
        w,
        "bus[{logical}] last_rom={:?} age={age}s ds18b20={} ds18s20={}",
        bus.last_rom, bus.ds18b20_count, bus.ds18s20_count
    )
}

pub fn report_thermometer(w: &mut dyn Write, idx: usize, thermometer: &Thermometer) -> fmt::Result {
    let family = thermometer.family();
    let live_resolution = thermometer.scratchpad.resolution(family);
    let consistent = family != Family::Ds18b20 || live_resolution == thermometer.cached_resolution;
    writeln!(
        w,
        "thermometer[{idx}] rom={:?} raw_c={} alarms=({},{}) res={}{}",
        thermometer.rom,
        thermometer.temperature_celsius(),
        thermometer.scratchpad.alarm_low(),
        thermometer.scratchpad.alarm_high(),
        thermometer.cached_resolution,
        if consistent { "" } else { " ERROR: Conf disagrees with cached Res" },
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{rom::Rom, scratchpad::Scratchpad};

    #[test]
    fn thermometer_report_flags_mismatch() {
        let mut thermometer = Thermometer {
            rom: Rom([0x28, 0, 0, 0, 0, 0, 0, 0]),
            bridge_idx: 0,
            channel: 0,
            endpoint_idx: 0,
            scratchpad: Scratchpad::default(),
            cached_resolution: 12,
            parasitic: false,
        };
        let mut out = String::new();
        report_thermometer(&mut out, 0, &thermometer).unwrap();
        assert!(out.contains("ERROR"));

        thermometer.cached_resolution = 9; // matches default scratchpad's decoded resolution
        let mut out = String::new();
        report_thermometer(&mut out, 0, &thermometer).unwrap();
        assert!(!out.contains("ERROR"));
    }
}
