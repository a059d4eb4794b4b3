//! Bridge I/O (C2): the write-delay-read primitive, command sequencing,
//! reset/identify, and bus select/release with per-bridge locking.

use crate::error::{Error, Result};
use crate::register::{ChipKind, Config, N2S, Status, V2N, report_config, report_status};
use embedded_hal::i2c::I2c;
use std::sync::{
    Mutex, MutexGuard,
    atomic::{AtomicU32, Ordering},
};
use std::time::Duration;

pub mod cmd {
    pub const DRST: u8 = 0xF0;
    pub const SRP: u8 = 0xE1;
    pub const WCFG: u8 = 0xD2;
    /// Channel-select on the DS2482-800, port-adjust on the DS2484.
    pub const CHSL_PADJ: u8 = 0xC3;
    pub const ONEWIRE_RESET: u8 = 0xB4;
    pub const WRITE_BYTE: u8 = 0xA5;
    pub const READ_BYTE: u8 = 0x96;
    pub const SINGLE_BIT: u8 = 0x87;
    pub const TRIPLET: u8 = 0x78;
}

/// Sentinel port-adjust readback that identifies a DS2484 (single-channel,
/// carries a port-adjust register): see SPEC_FULL.md §4.2 / Open Question (ii).
const PADJ_IDENTIFY_SENTINEL: u8 = 0b0000_0110;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Register {
    Stat,
    Data,
    Chan,
    Conf,
    Padj,
}

impl Register {
    fn index(self) -> u8 {
        match self {
            Register::Stat => 0,
            Register::Data => 1,
            Register::Chan => 2,
            Register::Conf => 3,
            Register::Padj => 4,
        }
    }
}

struct Inner<I2C> {
    i2c: I2C,
    status: Status,
    config: Config,
    cur_chan: u8,
    rptr: Register,
    prev_stat: [Status; 8],
}

/// One physical DS2482-800/DS2484 bridge chip.
pub struct Bridge<I2C> {
    pub addr: u8,
    pub kind: ChipKind,
    /// Contiguous range of logical bus indices `[lo, hi]` this bridge owns.
    pub lo: u8,
    pub hi: u8,
    inner: Mutex<Inner<I2C>>,
    reset_ok: AtomicU32,
    reset_err: AtomicU32,
}

impl<I2C> Bridge<I2C>
where
    I2C: I2c,
    Error: From<I2C::Error>,
{
    /// Probes the I²C address, resets the chip, and classifies it as a
    /// DS2482-800 or DS2484 (§4.2, Open Question (ii)).
    pub fn detect(mut i2c: I2C, addr: u8) -> Result<Bridge<I2C>> {
        raw_reset(&mut i2c, addr)?;

        // Try the port-adjust path first: only a DS2484 has this register.
        set_read_pointer(&mut i2c, addr, Register::Padj)?;
        let mut buf = [0u8; 5];
        i2c.read(addr, &mut buf)?;
        let kind = if buf[0] == PADJ_IDENTIFY_SENTINEL {
            ChipKind::Ds2484
        } else {
            // Fall back to channel-select: only a DS2482-800 echoes V2N[0].
            let mut tx = [cmd::CHSL_PADJ, N2S[0]];
            let echo = write_delay_read_raw(&mut i2c, addr, &mut tx, 0)?;
            if echo == V2N[0] {
                ChipKind::Ds2482_800
            } else {
                return Err(Error::InvalidWhoAmI);
            }
        };

        raw_reset(&mut i2c, addr)?;
        let bridge = Bridge {
            addr,
            kind,
            lo: 0,
            hi: 0,
            inner: Mutex::new(Inner {
                i2c,
                status: Status::empty(),
                config: Config::DEFAULT,
                cur_chan: 0,
                rptr: Register::Stat,
                prev_stat: [Status::empty(); 8],
            }),
            reset_ok: AtomicU32::new(0),
            reset_err: AtomicU32::new(0),
        };
        bridge.set_config(Config::DEFAULT)?;
        Ok(bridge)
    }

    pub fn reset_ok_count(&self) -> u32 {
        self.reset_ok.load(Ordering::Relaxed)
    }

    pub fn reset_err_count(&self) -> u32 {
        self.reset_err.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> Config {
        self.inner.lock().unwrap().config
    }

    pub fn status(&self) -> Status {
        self.inner.lock().unwrap().status
    }

    pub fn cur_chan(&self) -> u8 {
        self.inner.lock().unwrap().cur_chan
    }

    /// Reads the 5-byte port-adjust register (DS2484 only), for reporting.
    /// Read-only: tuning the port-adjust register is out of scope.
    pub fn read_port_adjust(&self) -> Result<[u8; 5]> {
        let mut inner = self.inner.lock().unwrap();
        set_read_pointer(&mut inner.i2c, self.addr, Register::Padj)?;
        let mut buf = [0u8; 5];
        inner.i2c.read(self.addr, &mut buf)?;
        inner.rptr = Register::Padj;
        Ok(buf)
    }

    /// Device reset: issues `DRST`, polls up to 20 times with a 10ms
    /// back-off for the `RST` bit, and clears the register mirrors.
    /// Returns whether the reset was confirmed.
    pub fn reset(&self) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        inner.i2c.write(self.addr, &[cmd::DRST])?;
        let mut confirmed = false;
        for _ in 0..20 {
            std::thread::sleep(Duration::from_millis(10));
            let mut buf = [0u8; 1];
            inner.i2c.read(self.addr, &mut buf)?;
            let status = Status::from_bits_truncate(buf[0]);
            inner.status = status;
            if status.contains(Status::RST) {
                confirmed = true;
                break;
            }
        }
        inner.rptr = Register::Stat;
        if confirmed {
            inner.config = Config::DEFAULT;
            inner.cur_chan = 0;
            inner.prev_stat = [Status::empty(); 8];
            self.reset_ok.fetch_add(1, Ordering::Relaxed);
            log::debug!("bridge {:#04x}: reset OK", self.addr);
        } else {
            self.reset_err.fetch_add(1, Ordering::Relaxed);
            log::warn!("bridge {:#04x}: reset not confirmed after 20 attempts", self.addr);
        }
        Ok(confirmed)
    }

    /// Writes the config register's low nibble (APU/PDN/SPU/OWS) and
    /// verifies the echo, per §4.2.
    pub fn set_config(&self, cfg: Config) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let mut tx = [cmd::WCFG, cfg.encode()];
        let echo = write_delay_read_raw(&mut inner.i2c, self.addr, &mut tx, 0)?;
        inner.rptr = Register::Conf;
        let low = echo & 0x0F;
        if low != cfg.bits() {
            let bit = mismatched_config_bit(Config::from_bits_truncate(low), cfg);
            drop(inner);
            self.reset()?;
            return Err(Error::ConfigEcho { written: cfg.bits(), bit });
        }
        let new = Config::from_bits_truncate(low);
        report_config(inner.config, new);
        inner.config = new;
        if !new.contains(Config::APU) {
            log::error!("bridge {:#04x}: APU=0 observed, possible corruption", self.addr);
        }
        Ok(())
    }

    /// Selects a channel on an 8-channel bridge and locks it for the
    /// duration of the returned guard. On a 1-channel bridge this is a
    /// lock-only no-op past channel 0.
    pub fn bus_select(&self, chan: u8) -> Result<BusGuard<'_, I2C>> {
        let mut inner = self.inner.lock().unwrap();
        if self.kind.channel_count() > 1 && inner.cur_chan != chan {
            let mut tx = [cmd::CHSL_PADJ, N2S[chan as usize]];
            let echo = write_delay_read_raw(&mut inner.i2c, self.addr, &mut tx, 0)?;
            inner.rptr = Register::Chan;
            if echo != V2N[chan as usize] {
                drop(inner);
                self.reset()?;
                return Err(Error::ChannelEcho { expected: V2N[chan as usize], got: echo });
            }
            inner.cur_chan = chan;
        }
        Ok(BusGuard { bridge: self, inner, channel: chan })
    }
}

fn mismatched_config_bit(got: Config, want: Config) -> &'static str {
    let diff = got ^ want;
    if diff.contains(Config::OWS) {
        "OWS"
    } else if diff.contains(Config::SPU) {
        "SPU"
    } else if diff.contains(Config::PDN) {
        "PDN"
    } else {
        "APU"
    }
}

fn raw_reset<I2C: I2c>(i2c: &mut I2C, addr: u8) -> Result<()>
where
    Error: From<I2C::Error>,
{
    i2c.write(addr, &[cmd::DRST])?;
    std::thread::sleep(Duration::from_millis(1));
    let mut buf = [0u8; 1];
    i2c.read(addr, &mut buf)?;
    Ok(())
}

fn set_read_pointer<I2C: I2c>(i2c: &mut I2C, addr: u8, reg: Register) -> Result<()>
where
    Error: From<I2C::Error>,
{
    let code = reg.index();
    i2c.write(addr, &[cmd::SRP, (!code << 4) | code])?;
    Ok(())
}

fn write_delay_read_raw<I2C: I2c>(i2c: &mut I2C, addr: u8, tx: &mut [u8], delay_us: u32) -> Result<u8>
where
    Error: From<I2C::Error>,
{
    i2c.write(addr, tx)?;
    if delay_us > 0 {
        std::thread::sleep(Duration::from_micros(delay_us as u64));
    }
    let mut buf = [0u8; 1];
    i2c.read(addr, &mut buf)?;
    Ok(buf[0])
}

/// The primitives the 1-Wire link layer needs from a selected bus. Lets
/// [`crate::onewire::OneWire`] be generic over a software mock in tests
/// instead of a real [`BusGuard`].
pub trait BridgeChip {
    fn reset_1w(&mut self, delay_us: u32) -> Result<bool>;
    fn touch_bit(&mut self, bit: bool, delay_us: u32) -> Result<bool>;
    fn read_byte(&mut self, delay_us: u32) -> Result<u8>;
    fn write_byte(&mut self, byte: u8, delay_us: u32) -> Result<()>;
    fn search_triplet(&mut self, direction: bool, delay_us: u32) -> Result<Status>;
    fn set_speed(&mut self, overdrive: bool) -> Result<()>;
    fn set_level(&mut self, strong: bool) -> Result<()>;
}

/// A selected, locked bus on a bridge. Releases the per-bridge mutex when
/// dropped, on every exit path including error returns — this is the
/// resolution of Open Question (i): the guard makes the invariant structural.
pub struct BusGuard<'a, I2C> {
    bridge: &'a Bridge<I2C>,
    inner: MutexGuard<'a, Inner<I2C>>,
    channel: u8,
}

impl<'a, I2C> BusGuard<'a, I2C>
where
    I2C: I2c,
    Error: From<I2C::Error>,
{
    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn logical_bus(&self) -> u8 {
        self.bridge.lo + self.channel
    }

    fn write_delay_read(&mut self, tx: &mut [u8], delay_us: u32, rptr: Register) -> Result<u8> {
        let addr = self.bridge.addr;
        let byte = write_delay_read_raw(&mut self.inner.i2c, addr, tx, delay_us)?;
        self.inner.rptr = rptr;
        if rptr == Register::Stat {
            let status = Status::from_bits_truncate(byte);
            if status.contains(Status::OWB) {
                return Err(Error::BridgeBusy);
            }
            let chan = self.channel as usize;
            report_status(self.inner.prev_stat[chan], status);
            self.inner.prev_stat[chan] = status;
            self.inner.status = status;
        }
        Ok(byte)
    }

    /// Issues the 1-Wire reset command and returns whether a presence pulse
    /// was observed. Clears strong pull-up first, since the bridge must not
    /// be asked to power a bus it's about to reset.
    pub fn reset_1w(&mut self, delay_us: u32) -> Result<bool> {
        if self.inner.config.contains(Config::SPU) {
            self.set_level_inner(false)?;
        }
        let mut tx = [cmd::ONEWIRE_RESET];
        let status = self.write_delay_read(&mut tx, delay_us, Register::Stat)?;
        Ok(Status::from_bits_truncate(status).contains(Status::PPD))
    }

    pub fn touch_bit(&mut self, bit: bool, delay_us: u32) -> Result<bool> {
        let mut tx = [cmd::SINGLE_BIT, if bit { 0x80 } else { 0x00 }];
        let status = self.write_delay_read(&mut tx, delay_us, Register::Stat)?;
        Ok(Status::from_bits_truncate(status).contains(Status::SBR))
    }

    pub fn write_byte(&mut self, byte: u8, delay_us: u32) -> Result<()> {
        let mut tx = [cmd::WRITE_BYTE, byte];
        self.write_delay_read(&mut tx, delay_us, Register::Stat)?;
        Ok(())
    }

    pub fn read_byte(&mut self, delay_us: u32) -> Result<u8> {
        let mut tx = [cmd::READ_BYTE];
        self.write_delay_read(&mut tx, delay_us, Register::Stat)?;
        set_read_pointer(&mut self.inner.i2c, self.bridge.addr, Register::Data)?;
        let mut buf = [0u8; 1];
        self.inner.i2c.read(self.bridge.addr, &mut buf)?;
        self.inner.rptr = Register::Data;
        Ok(buf[0])
    }

    /// One search-triplet step: returns the raw status byte, from which the
    /// link layer extracts `SBR`/`TSB`/`DIR`.
    pub fn search_triplet(&mut self, direction: bool, delay_us: u32) -> Result<Status> {
        let mut tx = [cmd::TRIPLET, if direction { 0x80 } else { 0x00 }];
        let status = self.write_delay_read(&mut tx, delay_us, Register::Stat)?;
        Ok(Status::from_bits_truncate(status))
    }

    pub fn set_speed(&mut self, overdrive: bool) -> Result<()> {
        let mut cfg = self.inner.config;
        cfg.set(Config::OWS, overdrive);
        self.write_config(cfg)
    }

    /// Raises or lowers the strong pull-up. The bridge self-clears this on
    /// the next bus event, so callers must treat it as single-shot (§4.3).
    pub fn set_level(&mut self, strong: bool) -> Result<()> {
        self.set_level_inner(strong)
    }

    fn set_level_inner(&mut self, strong: bool) -> Result<()> {
        let mut cfg = self.inner.config;
        cfg.set(Config::SPU, strong);
        self.write_config(cfg)
    }

    fn write_config(&mut self, cfg: Config) -> Result<()> {
        let mut tx = [cmd::WCFG, cfg.encode()];
        let echo = write_delay_read_raw(&mut self.inner.i2c, self.bridge.addr, &mut tx, 0)?;
        self.inner.rptr = Register::Conf;
        let low = echo & 0x0F;
        if low != cfg.bits() {
            let bit = mismatched_config_bit(Config::from_bits_truncate(low), cfg);
            return Err(Error::ConfigEcho { written: cfg.bits(), bit });
        }
        self.inner.config = Config::from_bits_truncate(low);
        Ok(())
    }
}

impl<'a, I2C> BridgeChip for BusGuard<'a, I2C>
where
    I2C: I2c,
    Error: From<I2C::Error>,
{
    fn reset_1w(&mut self, delay_us: u32) -> Result<bool> {
        BusGuard::reset_1w(self, delay_us)
    }

    fn touch_bit(&mut self, bit: bool, delay_us: u32) -> Result<bool> {
        BusGuard::touch_bit(self, bit, delay_us)
    }

    fn read_byte(&mut self, delay_us: u32) -> Result<u8> {
        BusGuard::read_byte(self, delay_us)
    }

    fn write_byte(&mut self, byte: u8, delay_us: u32) -> Result<()> {
        BusGuard::write_byte(self, byte, delay_us)
    }

    fn search_triplet(&mut self, direction: bool, delay_us: u32) -> Result<Status> {
        BusGuard::search_triplet(self, direction, delay_us)
    }

    fn set_speed(&mut self, overdrive: bool) -> Result<()> {
        BusGuard::set_speed(self, overdrive)
    }

    fn set_level(&mut self, strong: bool) -> Result<()> {
        BusGuard::set_level(self, strong)
    }
}
