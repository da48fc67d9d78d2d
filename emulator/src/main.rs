mod bench;
mod command;
mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use crossterm::style::Stylize;
use crossterm::tty::IsTty;
use ecu_core::engine::Ticks;

use session::Session;

fn main() -> io::Result<()> {
    let transcript = parse_transcript().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("Usage: ecu-emulator [--transcript <path>]");
        process::exit(2);
    });
    let mut session = Session::new(Ticks(0)).unwrap_or_else(|err| {
        eprintln!("{err}");
        process::exit(2);
    });
    if let Some(path) = transcript {
        session = session.with_transcript(&path, "ECU bench emulator session")?;
    }

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let styled = stdout.is_tty();
    let mut writer = stdout.lock();
    let mut line = String::new();

    writeln!(
        writer,
        "ECU bench emulator ready. Type `help` for commands or `exit` to quit."
    )?;

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        if reader.read_line(&mut line)? == 0 {
            writeln!(writer)?;
            break;
        }

        let reply = session.execute(&line)?;
        for response in &reply.lines {
            if styled {
                writeln!(writer, "{}", highlight(response))?;
            } else {
                writeln!(writer, "{response}")?;
            }
        }
        if reply.exit {
            break;
        }
    }

    Ok(())
}

fn parse_transcript() -> Result<Option<PathBuf>, String> {
    let mut args = env::args().skip(1);
    match args.next() {
        None => Ok(None),
        Some(arg) => {
            if let Some(value) = arg.strip_prefix("--transcript=") {
                Ok(Some(PathBuf::from(value)))
            } else if arg == "--transcript" {
                args.next()
                    .map(|value| Some(PathBuf::from(value)))
                    .ok_or_else(|| "Expected value after --transcript".to_string())
            } else {
                Err(format!("Unknown argument `{arg}`"))
            }
        }
    }
}

fn highlight(line: &str) -> String {
    if line.starts_with("ERR") {
        line.red().to_string()
    } else if line.contains("refused") || line.contains("-cut") {
        line.yellow().to_string()
    } else if line.starts_with("OK") {
        line.green().to_string()
    } else {
        line.to_string()
    }
}
