//! Configuration grammar (C9, ambient): a small hand-written parser for
//! `mode /ow/ds18x20 <idx> <lo> <hi> <res> [persist]`. Five whitespace-
//! separated fields don't warrant a parser-combinator dependency.

use crate::error::{Error, Result};

/// One parsed `mode /ow/ds18x20 ...` command.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ModeCommand {
    /// `None` means the literal `count`: apply to every thermometer.
    pub index: Option<usize>,
    pub lo: i8,
    pub hi: i8,
    pub resolution: u8,
    pub persist: bool,
}

/// Parses one command line. Only the `/ow/ds18x20` path is recognised;
/// anything else is `InvalidMode`.
pub fn parse(line: &str) -> Result<ModeCommand> {
    let mut tokens = line.split_whitespace();
    match tokens.next() {
        Some("mode") => {}
        _ => return Err(Error::InvalidMode("expected leading \"mode\"")),
    }
    match tokens.next() {
        Some("/ow/ds18x20") => {}
        _ => return Err(Error::InvalidMode("unrecognised path, expected \"/ow/ds18x20\"")),
    }

    let index = match tokens.next() {
        Some("count") => None,
        Some(field) => Some(field.parse::<usize>().map_err(|_| Error::InvalidValue("idx must be a thermometer index or \"count\""))?),
        None => return Err(Error::InvalidMode("missing idx field")),
    };
    let lo = parse_i8(tokens.next().ok_or(Error::InvalidMode("missing lo field"))?)?;
    let hi = parse_i8(tokens.next().ok_or(Error::InvalidMode("missing hi field"))?)?;
    let resolution = tokens
        .next()
        .ok_or(Error::InvalidMode("missing res field"))?
        .parse::<u8>()
        .map_err(|_| Error::InvalidValue("res must be an integer"))?;
    if !(9..=12).contains(&resolution) {
        return Err(Error::InvalidValue("res must be in 9..=12"));
    }
    let persist = match tokens.next() {
        None => false,
        Some("0") => false,
        Some("1") => true,
        Some(_) => return Err(Error::InvalidValue("persist must be 0 or 1")),
    };
    if tokens.next().is_some() {
        return Err(Error::InvalidMode("too many fields"));
    }

    Ok(ModeCommand { index, lo, hi, resolution, persist })
}

fn parse_i8(field: &str) -> Result<i8> {
    let value: i32 = field.parse().map_err(|_| Error::InvalidValue("alarm threshold must be an integer"))?;
    i8::try_from(value).map_err(|_| Error::InvalidValue("alarm threshold must be in -128..=127"))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_full_command() {
        let cmd = parse("mode /ow/ds18x20 0 -10 75 11 1").unwrap();
        assert_eq!(cmd, ModeCommand { index: Some(0), lo: -10, hi: 75, resolution: 11, persist: true });
    }

    #[test]
    fn persist_defaults_to_false() {
        let cmd = parse("mode /ow/ds18x20 count -10 75 11").unwrap();
        assert_eq!(cmd.index, None);
        assert!(!cmd.persist);
    }

    #[test]
    fn rejects_unknown_path() {
        assert!(matches!(parse("mode /ow/ibutton 0"), Err(Error::InvalidMode(_))));
    }

    #[test]
    fn rejects_out_of_range_resolution() {
        assert!(matches!(parse("mode /ow/ds18x20 0 -10 75 13"), Err(Error::InvalidValue(_))));
    }

    #[test]
    fn rejects_out_of_range_alarm() {
        assert!(matches!(parse("mode /ow/ds18x20 0 -200 75 11"), Err(Error::InvalidValue(_))));
    }
}
