use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use ecu_core::calibration::stock::stock_calibration;
use ecu_core::calibration::{CalibrationError, TableError};
use ecu_core::controller::{CycleReport, EcuConfig, EcuController};
use ecu_core::display::{DisplayFrame, DisplaySink};
use ecu_core::engine::{
    CHANNEL_COUNT, ChannelId, CrankAngle, EnginePosition, OutputEnables, SensorSnapshot, Ticks,
    TimePerDegree,
};
use ecu_core::fuel::StandardFuelCorrections;
use ecu_core::ignition::StandardIgnitionCorrections;
use ecu_core::scheduler::{EventScheduler, SchedulerConfig, SchedulerPort};
use ecu_core::sensors::AfrReading;
use ecu_core::telemetry::{EventId, TelemetryPayload, TelemetryRecord};

use crate::bench::Bench;
use crate::command::{self, Command, HELP_TOPICS};

const TEETH_PER_REVOLUTION: u16 = 12;
const TOOTH_ANGLE: u16 = 360 / TEETH_PER_REVOLUTION;
const TEETH_PER_CYCLE: u16 = TEETH_PER_REVOLUTION * 2;
const MAX_RPM: u16 = 12_000;
const MAX_RUN_CYCLES: u32 = 10_000;
/// Throttle steps are treated as happening over this window.
const TPS_STEP_WINDOW_MS: i16 = 100;

type Controller = EcuController<StandardFuelCorrections, StandardIgnitionCorrections>;

/// Failure to bring up a session.
#[derive(Debug)]
pub enum SessionError {
    Io(io::Error),
    Table(TableError),
    Calibration(CalibrationError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Io(error) => write!(f, "transcript: {error}"),
            SessionError::Table(error) => write!(f, "stock tables: {error}"),
            SessionError::Calibration(error) => write!(f, "stock calibration: {error}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<io::Error> for SessionError {
    fn from(error: io::Error) -> Self {
        SessionError::Io(error)
    }
}

impl From<TableError> for SessionError {
    fn from(error: TableError) -> Self {
        SessionError::Table(error)
    }
}

impl From<CalibrationError> for SessionError {
    fn from(error: CalibrationError) -> Self {
        SessionError::Calibration(error)
    }
}

/// Response to one console line.
#[derive(Debug, Default)]
pub struct Reply {
    pub lines: Vec<String>,
    pub exit: bool,
}

impl Reply {
    fn lines(lines: Vec<String>) -> Self {
        Self { lines, exit: false }
    }

    fn line(line: String) -> Self {
        Self::lines(vec![line])
    }
}

/// Keeps the most recent frame for `status`.
#[derive(Debug, Default)]
struct LatestFrame(Option<DisplayFrame>);

impl DisplaySink for LatestFrame {
    fn publish(&mut self, frame: &DisplayFrame) {
        self.0 = Some(*frame);
    }
}

/// Simulated engine on the bench: crank wheel, sensors and the controller.
pub struct Session {
    ecu: Controller,
    scheduler: EventScheduler,
    bench: Bench,
    rpm: u16,
    tooth: u16,
    sensors: SensorSnapshot,
    enables: OutputEnables,
    display: LatestFrame,
    refusals: usize,
    event_cursor: EventId,
    transcript: Option<TranscriptLogger>,
}

impl Session {
    /// New session whose timer starts at `start`, with the stock calibration loaded.
    pub fn new(start: Ticks) -> Result<Self, SessionError> {
        let mut ecu = Controller::new(
            EcuConfig::DEFAULT,
            StandardFuelCorrections::stock()?,
            StandardIgnitionCorrections::stock()?,
        );
        ecu.load_calibration(stock_calibration()?, false, start)?;

        Ok(Self {
            ecu,
            scheduler: EventScheduler::new(SchedulerConfig::DEFAULT),
            bench: Bench::starting_at(start),
            rpm: 0,
            tooth: 0,
            sensors: SensorSnapshot::DEFAULT,
            enables: OutputEnables::ALL,
            display: LatestFrame::default(),
            refusals: 0,
            event_cursor: 0,
            transcript: None,
        })
    }

    /// Mirrors every command and reply into a transcript file.
    pub fn with_transcript(mut self, path: &Path, header: &str) -> io::Result<Self> {
        self.transcript = Some(TranscriptLogger::new(path, header)?);
        Ok(self)
    }

    #[must_use]
    pub fn now(&self) -> Ticks {
        self.bench.now()
    }

    /// Parses and runs one console line.
    pub fn execute(&mut self, line: &str) -> io::Result<Reply> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Reply::default());
        }
        let at = self.now();
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.append_line(at, TranscriptRole::Host, trimmed)?;
        }

        let reply = match command::parse(trimmed) {
            Ok(command) => self.apply(command),
            Err(error) => Reply::line(format!("ERR {error}")),
        };

        let at = self.now();
        if let Some(transcript) = self.transcript.as_mut() {
            for line in &reply.lines {
                transcript.append_line(at, TranscriptRole::Emulator, line)?;
            }
        }
        Ok(reply)
    }

    fn apply(&mut self, command: Command) -> Reply {
        match command {
            Command::Rpm(rpm) if rpm > MAX_RPM => {
                Reply::line(format!("ERR rpm must be at most {MAX_RPM}"))
            }
            Command::Rpm(0) => {
                self.rpm = 0;
                self.bench.shutdown(&self.scheduler);
                Reply::line("OK engine stopped, outputs released".to_string())
            }
            Command::Rpm(rpm) => {
                self.rpm = rpm;
                Reply::line(format!("OK rpm {rpm}"))
            }
            Command::Map(kpa) => {
                self.sensors.map_kpa = kpa;
                Reply::line(format!("OK map {kpa} kPa"))
            }
            Command::Tps(percent) if percent > 100 => {
                Reply::line("ERR tps must be 0-100".to_string())
            }
            Command::Tps(percent) => {
                let step = i16::from(percent) - i16::from(self.sensors.tps_percent);
                self.sensors.tps_rate = step.saturating_mul(1_000 / TPS_STEP_WINDOW_MS);
                self.sensors.tps_percent = percent;
                Reply::line(format!("OK tps {percent}%"))
            }
            Command::Clt(celsius) => {
                self.sensors.coolant_c = celsius;
                Reply::line(format!("OK clt {celsius} C"))
            }
            Command::Vbatt(millivolts) => {
                self.sensors.battery_mv = millivolts;
                Reply::line(format!("OK vbatt {millivolts} mV"))
            }
            Command::Afr(Some(afr)) => {
                self.sensors.wideband = AfrReading::Valid(afr);
                Reply::line(format!("OK afr {afr}"))
            }
            Command::Afr(None) => {
                self.sensors.wideband = AfrReading::Unavailable;
                Reply::line("OK wideband unplugged".to_string())
            }
            Command::Knock(degrees) => {
                self.sensors.knock_retard = degrees;
                Reply::line(format!("OK knock retard {degrees} deg"))
            }
            Command::Fuel(on) => {
                self.enables.fuel = on;
                Reply::line(format!("OK fuel {}", on_off(on)))
            }
            Command::Spark(on) => {
                self.enables.ignition = on;
                Reply::line(format!("OK spark {}", on_off(on)))
            }
            Command::Run(cycles) if cycles > MAX_RUN_CYCLES => {
                Reply::line(format!("ERR run at most {MAX_RUN_CYCLES} cycles at once"))
            }
            Command::Run(_) | Command::Late(_) if self.rpm == 0 => {
                Reply::line("ERR engine stopped; set rpm first".to_string())
            }
            Command::Run(cycles) => Reply::lines(self.run(cycles)),
            Command::Late(millis) => Reply::lines(self.deliver_late(millis)),
            Command::Status => Reply::lines(self.status()),
            Command::Events => Reply::lines(self.events()),
            Command::Help => Reply::lines(help()),
            Command::Exit => Reply {
                lines: vec!["Session closed.".to_string()],
                exit: true,
            },
        }
    }

    /// Advances the crank by one tooth and runs the controller for it.
    /// `delay` is inserted between sampling the tooth and the calculation.
    fn advance_tooth(&mut self, delay: Duration) -> CycleReport {
        let time_per_degree = TimePerDegree::from_rpm(self.rpm);
        self.bench
            .advance(&self.scheduler, time_per_degree.span(u32::from(TOOTH_ANGLE)));
        self.tooth = (self.tooth + 1) % TEETH_PER_CYCLE;
        let position = EnginePosition::new(
            CrankAngle::new(self.tooth * TOOTH_ANGLE),
            time_per_degree,
            TOOTH_ANGLE,
            self.bench.now(),
        );
        if !delay.is_zero() {
            self.bench.advance(&self.scheduler, delay);
        }

        let mut port = SchedulerPort::new(&self.scheduler, &mut self.bench.compare);
        let report = self.ecu.on_position(
            &position,
            &self.sensors,
            self.enables,
            &mut port,
            &mut self.display,
        );
        self.refusals += report.fuel.delivery.refusals().count();
        self.refusals += report.ignition.delivery.refusals().count();
        self.sensors.tps_rate = 0;
        report
    }

    fn run(&mut self, cycles: u32) -> Vec<String> {
        let pulses = self.bench.outputs.total_pulses();
        let refusals = self.refusals;
        for _ in 0..cycles * u32::from(TEETH_PER_CYCLE) {
            self.advance_tooth(Duration::ZERO);
        }

        let mut lines = vec![format!(
            "OK ran {cycles} cycle(s) at {} rpm: pulses={} refused={} t={}us",
            self.rpm,
            self.bench.outputs.total_pulses() - pulses,
            self.refusals - refusals,
            self.now().as_micros(),
        )];
        if let Some(frame) = self.display.0 {
            lines.push(format!("  {frame}"));
        }
        lines
    }

    fn deliver_late(&mut self, millis: u32) -> Vec<String> {
        let report = self.advance_tooth(Duration::from_millis(u64::from(millis)));
        let mut lines = vec![format!("OK tooth delivered {millis} ms after sampling")];
        let refusals = report
            .fuel
            .delivery
            .refusals()
            .chain(report.ignition.delivery.refusals());
        for (channel, reason) in refusals {
            lines.push(format!("  {channel} refused: {reason}"));
        }
        if lines.len() == 1 {
            lines.push("  no refusals".to_string());
        }
        lines
    }

    fn status(&self) -> Vec<String> {
        let sensors = &self.sensors;
        let mut lines = vec![
            match self.display.0 {
                Some(frame) => frame.to_string(),
                None => "no engine events yet".to_string(),
            },
            format!(
                "rpm={} map={}kPa tps={}% clt={}C vbatt={}mV afr={} knock={}deg fuel={} spark={}",
                self.rpm,
                sensors.map_kpa,
                sensors.tps_percent,
                sensors.coolant_c,
                sensors.battery_mv,
                describe_afr(sensors.wideband),
                sensors.knock_retard,
                on_off(self.enables.fuel),
                on_off(self.enables.ignition),
            ),
        ];
        for channel in (0..CHANNEL_COUNT).filter_map(ChannelId::from_slot) {
            let slot = self.scheduler.snapshot(channel);
            let activity = self.bench.outputs.activity(channel);
            let width = activity
                .last_width
                .map_or_else(|| "-".to_string(), |width| format!("{}us", width.as_micros()));
            lines.push(format!(
                "  {channel}: {:?} fired={} cancelled={} pulses={} last={width}",
                slot.state, slot.fired, slot.cancelled, activity.pulses,
            ));
        }
        lines.push(format!(
            "calibration epoch={} refused={} t={}us",
            self.ecu.calibration().epoch(),
            self.refusals,
            self.now().as_micros(),
        ));
        lines
    }

    fn events(&mut self) -> Vec<String> {
        let cursor = self.event_cursor;
        let telemetry = self.ecu.telemetry();
        let mut lines: Vec<String> = telemetry
            .oldest_first()
            .filter(|record| is_unread(record.id, cursor))
            .map(describe_record)
            .collect();
        self.event_cursor = telemetry.next_event_id();
        if lines.is_empty() {
            lines.push("no new events".to_string());
        }
        lines
    }
}

#[allow(clippy::cast_possible_wrap)]
fn is_unread(id: EventId, next: EventId) -> bool {
    id.wrapping_sub(next) as i32 >= 0
}

fn describe_record(record: &TelemetryRecord<Ticks>) -> String {
    let detail = match record.details {
        TelemetryPayload::None => String::new(),
        TelemetryPayload::Schedule(details) => {
            format!(" reason={} rpm={}", details.reason, details.rpm)
        }
        TelemetryPayload::Cut { rpm } => format!(" rpm={rpm}"),
        TelemetryPayload::Query { rpm, load } => format!(" rpm={rpm} load={load}"),
        TelemetryPayload::Calibration(details) => match details.error {
            Some(error) => format!(" version={} error={error}", details.version),
            None => format!(" version={} epoch={}", details.version, details.epoch),
        },
    };
    format!(
        "  #{} t={}us {}{detail}",
        record.id,
        record.timestamp.as_micros(),
        record.event,
    )
}

fn describe_afr(reading: AfrReading) -> String {
    match reading {
        AfrReading::Valid(afr) => afr.to_string(),
        AfrReading::Unavailable => "none".to_string(),
        AfrReading::OutOfRange => "out-of-range".to_string(),
    }
}

fn on_off(on: bool) -> &'static str {
    if on { "on" } else { "off" }
}

fn help() -> Vec<String> {
    let mut lines = vec!["Available commands:".to_string()];
    lines.extend(HELP_TOPICS.iter().map(|(_, detail)| format!("  {detail}")));
    lines
}

struct TranscriptLogger {
    writer: BufWriter<fs::File>,
}

impl TranscriptLogger {
    fn new(path: &Path, header: &str) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };
        writeln!(logger.writer, "# {header}")?;
        writeln!(logger.writer, "# Timestamps are simulated timer ticks (us)")?;
        writeln!(logger.writer)?;
        logger.writer.flush()?;
        Ok(logger)
    }

    fn append_line(&mut self, at: Ticks, role: TranscriptRole, line: &str) -> io::Result<()> {
        writeln!(self.writer, "[{:>10} us] {} {line}", at.as_micros(), role.prefix())?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(session: &mut Session, line: &str) -> Vec<String> {
        session.execute(line).expect("no transcript attached").lines
    }

    #[test]
    fn a_running_engine_pulses_every_channel() {
        let mut session = Session::new(Ticks(0)).expect("stock session");
        run(&mut session, "rpm 3000");
        let reply = run(&mut session, "run 4");
        assert!(reply[0].starts_with("OK ran 4 cycle(s) at 3000 rpm"), "{reply:?}");

        for channel in (0..CHANNEL_COUNT).filter_map(ChannelId::from_slot) {
            assert!(
                session.bench.outputs.activity(channel).pulses >= 3,
                "{channel} should pulse about once per cycle"
            );
        }
        assert_eq!(session.refusals, 0);
    }

    #[test]
    fn status_reports_compare_fires_per_channel() {
        let mut session = Session::new(Ticks(0)).expect("stock session");
        run(&mut session, "rpm 3000");
        run(&mut session, "run 4");

        for channel in (0..CHANNEL_COUNT).filter_map(ChannelId::from_slot) {
            let fired = session.scheduler.snapshot(channel).fired;
            let pulses = session.bench.outputs.activity(channel).pulses;
            assert!(fired >= pulses && fired >= 3, "{channel}: fired={fired} pulses={pulses}");
        }
        let status = run(&mut session, "status");
        let channel_lines = status.iter().filter(|line| line.contains(" fired=")).count();
        assert_eq!(channel_lines, CHANNEL_COUNT, "{status:?}");
    }

    #[test]
    fn running_needs_a_crank_speed() {
        let mut session = Session::new(Ticks(0)).expect("stock session");
        assert_eq!(run(&mut session, "run 1"), ["ERR engine stopped; set rpm first"]);
        assert_eq!(session.bench.outputs.total_pulses(), 0);
    }

    #[test]
    fn disabling_fuel_is_reported_once() {
        let mut session = Session::new(Ticks(0)).expect("stock session");
        run(&mut session, "rpm 2500");
        run(&mut session, "run 1");
        run(&mut session, "events");
        run(&mut session, "fuel off");
        run(&mut session, "run 2");

        let events = run(&mut session, "events");
        let cuts = events
            .iter()
            .filter(|line| line.contains("fuel-cut"))
            .count();
        assert_eq!(cuts, 1, "{events:?}");
        assert_eq!(run(&mut session, "events"), ["no new events"]);
    }

    #[test]
    fn late_teeth_are_refused() {
        let mut session = Session::new(Ticks(0)).expect("stock session");
        run(&mut session, "rpm 3000");
        run(&mut session, "run 1");
        let reply = run(&mut session, "late 200");
        assert!(reply.len() > 1);
        assert!(
            reply[1..].iter().all(|line| line.contains("refused")),
            "{reply:?}"
        );
    }

    #[test]
    fn syntax_errors_name_the_column() {
        let mut session = Session::new(Ticks(0)).expect("stock session");
        let reply = run(&mut session, "rpm fast");
        assert_eq!(reply.len(), 1);
        assert!(reply[0].starts_with("ERR syntax error at column"));
    }

    #[test]
    fn exit_closes_the_session() {
        let mut session = Session::new(Ticks(0)).expect("stock session");
        assert!(session.execute("exit").expect("reply").exit);
        assert!(!session.execute("status").expect("reply").exit);
    }
}
