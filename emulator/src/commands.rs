//! Console grammar for the emulator.
//!
//! One command per line, keywords case-insensitive. Durations accept `us`,
//! `ms` or `s` suffixes and default to milliseconds.

use std::fmt;

use winnow::ascii::{Caseless, alpha1, dec_uint, float, space1};
use winnow::combinator::{alt, opt, preceded};
use winnow::error::ContextError;
use winnow::prelude::*;

/// A parsed console command.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Command<'a> {
    /// Advance simulated time by this many microseconds.
    Run(u64),
    /// Spin the synthetic wheel at this RPM; zero stops it.
    Rpm(u32),
    Trigger,
    Sync,
    Advance(f32),
    Dwell(u32),
    PulseWidth(u32),
    Status,
    Outputs,
    Log,
    Help(Option<&'a str>),
    Exit,
}

/// The line did not match any command.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SyntaxError {
    pub offset: usize,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognised input at column {}", self.offset + 1)
    }
}

impl std::error::Error for SyntaxError {}

/// Parses one console line.
pub fn parse(line: &str) -> Result<Command<'_>, SyntaxError> {
    command().parse(line.trim()).map_err(|error| SyntaxError {
        offset: error.offset(),
    })
}

fn command<'a>() -> impl Parser<&'a str, Command<'a>, ContextError> {
    move |input: &mut &'a str| {
        alt((
            preceded((Caseless("run"), space1), duration_us).map(Command::Run),
            preceded((Caseless("rpm"), space1), dec_uint).map(Command::Rpm),
            Caseless("trigger").value(Command::Trigger),
            Caseless("sync").value(Command::Sync),
            preceded((Caseless("advance"), space1), float).map(Command::Advance),
            preceded((Caseless("dwell"), space1), dec_uint).map(Command::Dwell),
            preceded((Caseless("pw"), space1), dec_uint).map(Command::PulseWidth),
            Caseless("status").value(Command::Status),
            Caseless("outputs").value(Command::Outputs),
            Caseless("log").value(Command::Log),
            preceded(Caseless("help"), opt(preceded(space1, alpha1))).map(Command::Help),
            alt((Caseless("exit"), Caseless("quit"))).value(Command::Exit),
        ))
        .parse_next(input)
    }
}

fn duration_us(input: &mut &str) -> Result<u64, ContextError> {
    let value: u64 = dec_uint.parse_next(input)?;
    let scale = opt(alt((
        Caseless("us").value(1_u64),
        Caseless("ms").value(1_000),
        Caseless("s").value(1_000_000),
    )))
    .parse_next(input)?;
    Ok(value.saturating_mul(scale.unwrap_or(1_000)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_accepts_units() {
        assert_eq!(parse("run 250us"), Ok(Command::Run(250)));
        assert_eq!(parse("run 20ms"), Ok(Command::Run(20_000)));
        assert_eq!(parse("run 2s"), Ok(Command::Run(2_000_000)));
        assert_eq!(parse("run 15"), Ok(Command::Run(15_000)));
    }

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(parse("RPM 3000"), Ok(Command::Rpm(3000)));
        assert_eq!(parse("  Status  "), Ok(Command::Status));
        assert_eq!(parse("QUIT"), Ok(Command::Exit));
    }

    #[test]
    fn calculation_overrides() {
        assert_eq!(parse("advance 12.5"), Ok(Command::Advance(12.5)));
        assert_eq!(parse("dwell 3000"), Ok(Command::Dwell(3000)));
        assert_eq!(parse("pw 4500"), Ok(Command::PulseWidth(4500)));
    }

    #[test]
    fn help_takes_optional_topic() {
        assert_eq!(parse("help"), Ok(Command::Help(None)));
        assert_eq!(parse("help rpm"), Ok(Command::Help(Some("rpm"))));
    }

    #[test]
    fn malformed_lines_are_rejected() {
        assert!(parse("rpm").is_err());
        assert!(parse("rpm fast").is_err());
        assert!(parse("status now").is_err());
        assert!(parse("launch").is_err());
    }
}
