use esp_idf_svc::sys::EspError;
use thiserror::Error;

/// Result
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Error
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    I2c(#[from] EspError),
    #[error("1-Wire bus busy (OWB set when idle was expected)")]
    BridgeBusy,
    #[error("config register echo mismatch on {bit} (wrote {written:#04x})")]
    ConfigEcho { written: u8, bit: &'static str },
    #[error("channel select echo mismatch: expected {expected:#04x}, bridge reports {got:#04x}")]
    ChannelEcho { expected: u8, got: u8 },
    #[error("no presence pulse on 1-Wire bus")]
    PresenceMissing,
    #[error(transparent)]
    Crc(#[from] CrcError),
    #[error("invalid value: {0}")]
    InvalidValue(&'static str),
    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),
    #[error("invalid mode syntax: {0}")]
    InvalidMode(&'static str),
    #[error("no memory available for enumeration")]
    NoMemory,
    #[error("invalid/unsupported 1-Wire device, family code {0:#04x}")]
    InvalidDevice(u8),
    #[error("bridge did not answer any known identification sequence")]
    InvalidWhoAmI,
}

/// The CRC-8 error, carrying the non-zero residue that was observed.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
#[error("unexpected CRC {{ crc={crc}, expected=0 }}")]
pub struct CrcError {
    pub crc: u8,
}
