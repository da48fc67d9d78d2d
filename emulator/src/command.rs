//! Line grammar for the bench console.

use std::fmt;

use ecu_core::sensors::Afr;
use winnow::ascii::{dec_int, dec_uint, space0, space1};
use winnow::combinator::{alt, eof, opt, preceded, terminated};
use winnow::error::ContextError;
use winnow::prelude::*;
use winnow::token::one_of;

/// One console command.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Rpm(u16),
    Map(u16),
    Tps(u8),
    Clt(i16),
    Vbatt(u16),
    /// `None` unplugs the wideband.
    Afr(Option<Afr>),
    Knock(u8),
    Fuel(bool),
    Spark(bool),
    /// Engine cycles to simulate.
    Run(u32),
    /// Milliseconds between sampling the next tooth and running the calculation.
    Late(u32),
    Status,
    Events,
    Help,
    Exit,
}

pub const HELP_TOPICS: &[(&str, &str)] = &[
    ("rpm", "rpm <n>            - crank speed; 0 stops the engine"),
    ("map", "map <kPa>          - manifold pressure"),
    ("tps", "tps <0-100>        - throttle position"),
    ("clt", "clt <degC>         - coolant temperature"),
    ("vbatt", "vbatt <mV>         - battery voltage"),
    ("afr", "afr <x.y|none>     - wideband reading"),
    ("knock", "knock <deg>        - retard requested by knock detection"),
    ("fuel", "fuel on|off        - injector enable"),
    ("spark", "spark on|off       - coil enable"),
    ("run", "run [cycles]       - simulate whole engine cycles"),
    ("late", "late <ms>          - deliver the next tooth after a delay"),
    ("status", "status             - last display frame and channel counters"),
    ("events", "events             - telemetry recorded since the last call"),
    ("help", "help               - this list"),
    ("exit", "exit               - close the session"),
];

/// Rejected console line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SyntaxError {
    pub column: usize,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "syntax error at column {}", self.column + 1)
    }
}

impl std::error::Error for SyntaxError {}

/// Parses one line; keywords are case-insensitive.
pub fn parse(line: &str) -> Result<Command, SyntaxError> {
    let line = line.trim().to_ascii_lowercase();
    terminated(command, (space0, eof))
        .parse(line.as_str())
        .map_err(|error| SyntaxError {
            column: error.offset(),
        })
}

fn command(input: &mut &str) -> Result<Command, ContextError> {
    alt((
        preceded(("rpm", space1), dec_uint).map(Command::Rpm),
        preceded(("map", space1), dec_uint).map(Command::Map),
        preceded(("tps", space1), dec_uint).map(Command::Tps),
        preceded(("clt", space1), dec_int).map(Command::Clt),
        preceded(("vbatt", space1), dec_uint).map(Command::Vbatt),
        preceded(("afr", space1), afr).map(Command::Afr),
        preceded(("knock", space1), dec_uint).map(Command::Knock),
        preceded(("fuel", space1), switch).map(Command::Fuel),
        preceded(("spark", space1), switch).map(Command::Spark),
        preceded("run", opt(preceded(space1, dec_uint)))
            .map(|cycles| Command::Run(cycles.unwrap_or(1))),
        preceded(("late", space1), dec_uint).map(Command::Late),
        "status".value(Command::Status),
        "events".value(Command::Events),
        "help".value(Command::Help),
        alt(("exit", "quit")).value(Command::Exit),
    ))
    .parse_next(input)
}

fn switch(input: &mut &str) -> Result<bool, ContextError> {
    alt(("on".value(true), "off".value(false))).parse_next(input)
}

fn afr(input: &mut &str) -> Result<Option<Afr>, ContextError> {
    let tenth = opt(preceded('.', one_of::<&str, _, ContextError>('0'..='9')));
    alt((
        "none".value(None),
        (dec_uint::<_, u16, _>, tenth).map(|(whole, tenth): (u16, Option<char>)| {
            let tenth = tenth
                .and_then(|digit: char| digit.to_digit(10))
                .and_then(|digit| u16::try_from(digit).ok())
                .unwrap_or(0);
            Some(Afr::from_tenths(whole.saturating_mul(10).saturating_add(tenth)))
        }),
    ))
    .parse_next(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sensor_overrides() {
        assert_eq!(parse("rpm 3000"), Ok(Command::Rpm(3000)));
        assert_eq!(parse("  MAP   95 "), Ok(Command::Map(95)));
        assert_eq!(parse("clt -10"), Ok(Command::Clt(-10)));
        assert_eq!(parse("afr 14.7"), Ok(Command::Afr(Some(Afr::from_tenths(147)))));
        assert_eq!(parse("afr 13"), Ok(Command::Afr(Some(Afr::from_tenths(130)))));
        assert_eq!(parse("afr none"), Ok(Command::Afr(None)));
    }

    #[test]
    fn parses_switches_and_runs() {
        assert_eq!(parse("fuel off"), Ok(Command::Fuel(false)));
        assert_eq!(parse("spark on"), Ok(Command::Spark(true)));
        assert_eq!(parse("run"), Ok(Command::Run(1)));
        assert_eq!(parse("run 20"), Ok(Command::Run(20)));
        assert_eq!(parse("late 150"), Ok(Command::Late(150)));
        assert_eq!(parse("quit"), Ok(Command::Exit));
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(parse("rpm").is_err());
        assert!(parse("rpm fast").is_err());
        assert!(parse("tps 400").is_err());
        assert!(parse("fuel maybe").is_err());
        assert!(parse("status now").is_err());
    }
}
