//! Replays the bench scenarios and writes one transcript per scenario.
//!
//! Usage: `scenario [output-dir]` (defaults to `transcripts/`).

use std::env;
use std::io;
use std::path::PathBuf;

#[allow(dead_code)]
#[path = "../bench.rs"]
mod bench;
#[allow(dead_code)]
#[path = "../command.rs"]
mod command;
#[allow(dead_code)]
#[path = "../session.rs"]
mod session;

use ecu_core::engine::Ticks;
use session::{Session, SessionError};

struct Scenario {
    name: &'static str,
    header: &'static str,
    start: Ticks,
    script: &'static [&'static str],
}

const SCENARIOS: &[Scenario] = &[
    Scenario {
        name: "wrap-around",
        header: "Timer wrap-around at 3000 rpm",
        start: Ticks(u32::MAX - 150_000),
        script: &["rpm 3000", "afr 14.7", "run 8", "status", "events"],
    },
    Scenario {
        name: "fuel-cut",
        header: "Operator fuel cut and restore",
        start: Ticks(0),
        script: &[
            "rpm 2500", "map 60", "afr 14.5", "run 2", "events", "fuel off", "run 2", "status",
            "events", "fuel on", "run 2", "events",
        ],
    },
    Scenario {
        name: "stale-timing",
        header: "Crank samples delivered after they expire",
        start: Ticks(0),
        script: &["rpm 3000", "run 1", "late 20", "late 150", "status", "events", "run 1"],
    },
    Scenario {
        name: "rev-limit",
        header: "Over-rev fuel cut and rev limiter",
        start: Ticks(0),
        script: &[
            "rpm 6500", "tps 100", "map 170", "run 2", "rpm 7100", "run 2", "events",
            "rpm 7300", "run 2", "events", "rpm 4000", "run 2", "status", "events",
        ],
    },
];

fn main() -> Result<(), SessionError> {
    let directory = env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from("transcripts"), PathBuf::from);

    for scenario in SCENARIOS {
        let path = directory.join(format!("{}.log", scenario.name));
        record(scenario, &path)?;
        println!("{} -> {}", scenario.name, path.display());
    }
    Ok(())
}

fn record(scenario: &Scenario, path: &std::path::Path) -> Result<(), SessionError> {
    let mut session = Session::new(scenario.start)?.with_transcript(path, scenario.header)?;
    for line in scenario.script {
        replay(&mut session, line)?;
    }
    Ok(())
}

fn replay(session: &mut Session, line: &str) -> io::Result<()> {
    let reply = session.execute(line)?;
    debug_assert!(!reply.exit);
    Ok(())
}
