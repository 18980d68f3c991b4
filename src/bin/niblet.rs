//! Niblet CLI - Command-line interface for Niblet Monitor
//!
//! Commands:
//! - replay: Replay recorded landmark frames on virtual time (batch mode)
//! - run: Monitor frames streamed on stdin on wall-clock time (streaming mode)
//! - classify: Per-frame hand-near-mouth classification only
//! - config: Print the effective configuration
//! - doctor: Diagnose configuration and environment

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;

use niblet_monitor::adapter::{FrameAdapter, FrameRecord};
use niblet_monitor::alert::{
    AlertChannels, NotificationPermission, NotificationPort, NotificationSupport,
    NotificationWorker, TonePort, ToneSpec,
};
use niblet_monitor::scheduler::PushedFrames;
use niblet_monitor::types::{NotificationRequest, SessionOutput, Visibility};
use niblet_monitor::{
    classify, replay_session, ChannelError, MonitorConfig, MonitorError, MonitorSession,
    Scheduler, SystemClock, APP_NAME, MONITOR_VERSION,
};
use tracing::{info, warn};

/// Niblet - On-device nail-biting habit monitor
#[derive(Parser)]
#[command(name = "niblet")]
#[command(author = "Niblet Contributors")]
#[command(version = MONITOR_VERSION)]
#[command(about = "Detect sustained hand-near-mouth episodes and alert", long_about = None)]
struct Cli {
    /// Log verbosity (logs go to stderr)
    #[arg(long, global = true, default_value = "warn")]
    log_level: LogLevel,

    /// Log line format
    #[arg(long, global = true, default_value = "plain")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay recorded frames on virtual time (batch mode)
    Replay {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Arm notification alerts
        #[arg(long)]
        armed: bool,

        /// Enable the alert tone (terminal bell)
        #[arg(long)]
        sound: bool,

        /// Treat the monitoring surface as hidden from the first frame
        #[arg(long)]
        hidden: bool,
    },

    /// Monitor NDJSON frames streamed on stdin (streaming mode)
    Run {
        /// Configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Arm notification alerts
        #[arg(long)]
        armed: bool,

        /// Enable the alert tone (terminal bell)
        #[arg(long)]
        sound: bool,
    },

    /// Classify each frame without debouncing or alerting
    Classify {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Fingertip-to-mouth distance threshold (normalized units)
        #[arg(long)]
        threshold: Option<f64>,

        /// Configuration file (JSON), used for the threshold when none is given
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the effective configuration
    Config {
        /// Configuration file (JSON) to merge over the defaults
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and environment
    Doctor {
        /// Check configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one frame per line)
    Ndjson,
    /// JSON array of frames
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    /// Human-readable lines
    Plain,
    /// One JSON object per line
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.log_level, cli.log_format) {
        eprintln!("{}", serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string()));
        return ExitCode::FAILURE;
    }

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string()));
            ExitCode::FAILURE
        }
    }
}

fn init_logging(level: LogLevel, format: LogFormat) -> Result<(), NibletCliError> {
    let builder = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::from(level))
        .with_writer(io::stderr)
        .with_target(false);

    let result = match format {
        LogFormat::Plain => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|e| NibletCliError::Logging(e.to_string()))
}

fn run(command: Commands) -> Result<(), NibletCliError> {
    match command {
        Commands::Replay {
            input,
            config,
            input_format,
            output_format,
            armed,
            sound,
            hidden,
        } => cmd_replay(
            &input,
            config.as_deref(),
            input_format,
            output_format,
            armed,
            sound,
            hidden,
        ),

        Commands::Run { config, armed, sound } => cmd_run(config.as_deref(), armed, sound),

        Commands::Classify {
            input,
            input_format,
            output_format,
            threshold,
            config,
        } => cmd_classify(&input, input_format, output_format, threshold, config.as_deref()),

        Commands::Config { config, json } => cmd_config(config.as_deref(), json),

        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),
    }
}

fn cmd_replay(
    input: &Path,
    config_path: Option<&Path>,
    input_format: InputFormat,
    output_format: OutputFormat,
    armed: bool,
    sound: bool,
    hidden: bool,
) -> Result<(), NibletCliError> {
    let config = load_config(config_path)?;
    let mut records = read_records(input, &input_format)?;

    if records.is_empty() {
        return Err(NibletCliError::NoFrames);
    }
    if hidden && records[0].visibility.is_none() {
        records[0].visibility = Some(Visibility::Hidden);
    }

    // Notifications go to stderr so stdout stays a clean output document
    let channels = cli_channels(&config, NotifierTarget::Stderr);
    let mut session = prepare_session(config, channels, armed, sound)?;
    let report = replay_session(&mut session, &records)?;
    info!(frames = report.frames, outputs = report.outputs.len(), "replay complete");

    print!("{}", format_output(&report.outputs, &output_format)?);
    Ok(())
}

fn cmd_run(config_path: Option<&Path>, armed: bool, sound: bool) -> Result<(), NibletCliError> {
    let config = load_config(config_path)?;
    let channels = cli_channels(&config, NotifierTarget::Stdout);
    let session = prepare_session(config, channels, armed, sound)?;

    let (scheduler, handle) = Scheduler::new(session, SystemClock, Box::new(PushedFrames));

    // Frames are read on their own thread; dropping the handle at EOF stops the scheduler
    let reader = thread::spawn(move || -> Result<usize, NibletCliError> {
        let stdin = io::stdin();
        let mut frames = 0;
        for (line_num, line) in stdin.lock().lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let record = FrameAdapter::parse_record(trimmed).map_err(|e| {
                NibletCliError::ParseError(format!("line {}: {}", line_num + 1, e))
            })?;
            if let Some(visibility) = record.visibility {
                handle.visibility(visibility)?;
            }
            handle.frame(record.observation())?;
            frames += 1;
        }
        Ok(frames)
    });

    let mut stdout = io::stdout();
    let mut write_error: Option<io::Error> = None;
    let snapshot = scheduler.run(|output| {
        if write_error.is_some() {
            return;
        }
        let written = serde_json::to_string(output)
            .map_err(io::Error::from)
            .and_then(|line| writeln!(stdout, "{line}"))
            .and_then(|()| stdout.flush());
        if let Err(e) = written {
            write_error = Some(e);
        }
    })?;

    let frames = reader.join().map_err(|_| NibletCliError::ReaderPanicked)??;
    info!(frames, elapsed_secs = snapshot.elapsed_secs, "monitoring finished");

    match write_error {
        Some(e) => Err(NibletCliError::Io(e)),
        None => Ok(()),
    }
}

fn cmd_classify(
    input: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    threshold: Option<f64>,
    config_path: Option<&Path>,
) -> Result<(), NibletCliError> {
    let threshold = match threshold {
        Some(threshold) => {
            MonitorConfig {
                distance_threshold: threshold,
                ..Default::default()
            }
            .validate()?;
            threshold
        }
        None => load_config(config_path)?.distance_threshold,
    };

    let records = read_records(input, &input_format)?;
    if records.is_empty() {
        return Err(NibletCliError::NoFrames);
    }

    let classified: Vec<ClassifiedFrame> = records
        .iter()
        .map(|record| {
            let proximity = classify(&record.observation(), threshold);
            ClassifiedFrame {
                timestamp: record.timestamp.to_rfc3339(),
                hand_near_mouth: proximity.hand_near_mouth,
                closest_distance: proximity.closest_distance,
            }
        })
        .collect();

    print!("{}", format_output(&classified, &output_format)?);
    Ok(())
}

fn cmd_config(config_path: Option<&Path>, json: bool) -> Result<(), NibletCliError> {
    let config = load_config(config_path)?;

    if json {
        println!("{}", config.to_json()?);
    } else {
        println!("Niblet Configuration");
        println!("====================");
        println!("Bite threshold:        {} ms", config.bite_threshold_ms);
        println!("Distance threshold:    {}", config.distance_threshold);
        println!("Notification cooldown: {} ms", config.notification_cooldown_ms);
        println!("Alert interval:        {} ms", config.alert_interval_ms);
        println!("Reward tick:           {} ms", config.reward_tick_ms);
        println!("Goal:                  {} min", config.goal_minutes);
        println!("Focused after:         {} s", config.focused_after_secs);
        println!("Tone:                  {} Hz, {} ms", config.tone_frequency_hz, config.tone_duration_ms);
        println!("Notification:          {} - {}", config.notification_title, config.notification_body);
    }

    Ok(())
}

/// Alert channel check, sized from the tone the session will actually play
fn alerts_check(config: &MonitorConfig) -> DoctorCheck {
    let tone = ToneSpec::new(config.tone_frequency_hz, config.tone_duration_ms);
    DoctorCheck {
        name: "alerts".to_string(),
        status: CheckStatus::Ok,
        message: format!(
            "Terminal bell tone ({} Hz, {} samples at 44.1 kHz), notifications as NDJSON",
            tone.frequency_hz,
            tone.samples(44_100).len()
        ),
    }
}

fn cmd_doctor(config_path: Option<&Path>, json: bool) -> Result<(), NibletCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Niblet version {}", MONITOR_VERSION),
    });

    // Check config file if provided
    let mut alert_config = MonitorConfig::default();
    match config_path {
        Some(path) if path.exists() => match fs::read_to_string(path) {
            Ok(content) => match MonitorConfig::from_json(&content) {
                Ok(config) => {
                    checks.push(DoctorCheck {
                        name: "config".to_string(),
                        status: CheckStatus::Ok,
                        message: format!(
                            "Config valid (bite threshold {} ms, goal {} min)",
                            config.bite_threshold_ms, config.goal_minutes
                        ),
                    });
                    alert_config = config;
                }
                Err(e) => checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Invalid config: {}", e),
                }),
            },
            Err(e) => checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: format!("Cannot read config file: {}", e),
            }),
        },
        Some(_) => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Warning,
            message: "Config file does not exist, defaults will be used".to_string(),
        }),
        None => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Ok,
            message: "Using built-in defaults".to_string(),
        }),
    }

    checks.push(alerts_check(&alert_config));

    // Check stdin is available (for streaming mode)
    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (streaming mode ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        app: APP_NAME.to_string(),
        version: MONITOR_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Niblet Doctor Report");
        println!("====================");
        println!("App:     {}", report.app);
        println!("Version: {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(NibletCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Helper functions

fn read_input(input: &Path) -> Result<String, NibletCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn read_records(input: &Path, input_format: &InputFormat) -> Result<Vec<FrameRecord>, NibletCliError> {
    let input_data = read_input(input)?;
    let records = match input_format {
        InputFormat::Ndjson => FrameAdapter::parse_ndjson(&input_data)?,
        InputFormat::Json => FrameAdapter::parse_array(&input_data)?,
    };
    Ok(records)
}

fn load_config(path: Option<&Path>) -> Result<MonitorConfig, NibletCliError> {
    match path {
        Some(path) => Ok(MonitorConfig::from_json(&fs::read_to_string(path)?)?),
        None => Ok(MonitorConfig::default()),
    }
}

fn prepare_session(
    config: MonitorConfig,
    channels: AlertChannels,
    armed: bool,
    sound: bool,
) -> Result<MonitorSession, NibletCliError> {
    let mut session = MonitorSession::new(config, channels)?;
    if armed {
        let outcome = session.toggle_notifications();
        if let Some(status) = outcome.status {
            warn!(status = %status.message, "notifications could not be armed");
        }
    }
    if sound {
        session.toggle_sound();
    }
    Ok(session)
}

fn cli_channels(config: &MonitorConfig, target: NotifierTarget) -> AlertChannels {
    let worker = NotificationWorker::new(CliNotifier { target }, config.notification_request());
    AlertChannels::new(Box::new(TerminalBell), Box::new(CliNotifier { target }))
        .with_background(Box::new(worker))
}

fn format_output<T: Serialize>(records: &[T], format: &OutputFormat) -> Result<String, NibletCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for record in records {
                lines.push(serde_json::to_string(record)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(records)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(records)?),
    }
}

// Alert channels

/// Tone channel: rings the terminal bell
struct TerminalBell;

impl TonePort for TerminalBell {
    fn play(&mut self, _tone: &ToneSpec) -> Result<(), ChannelError> {
        let mut stderr = io::stderr();
        stderr
            .write_all(b"\x07")
            .and_then(|()| stderr.flush())
            .map_err(|e| ChannelError::Dispatch(e.to_string()))
    }
}

#[derive(Clone, Copy)]
enum NotifierTarget {
    Stdout,
    Stderr,
}

/// Notification channel: one NDJSON line per notification
struct CliNotifier {
    target: NotifierTarget,
}

#[derive(Serialize)]
struct NotificationLine<'a> {
    notification: &'a NotificationRequest,
}

impl NotificationPort for CliNotifier {
    fn support(&self) -> NotificationSupport {
        NotificationSupport::Supported
    }

    fn permission(&self) -> NotificationPermission {
        NotificationPermission::Granted
    }

    fn request_permission(&mut self) -> NotificationPermission {
        NotificationPermission::Granted
    }

    fn show(&mut self, request: &NotificationRequest) -> Result<(), ChannelError> {
        let line = serde_json::to_string(&NotificationLine { notification: request })
            .map_err(|e| ChannelError::Dispatch(e.to_string()))?;
        let written = match self.target {
            NotifierTarget::Stdout => writeln!(io::stdout(), "{line}"),
            NotifierTarget::Stderr => writeln!(io::stderr(), "{line}"),
        };
        written.map_err(|e| ChannelError::Dispatch(e.to_string()))
    }
}

// Error types

#[derive(Debug)]
enum NibletCliError {
    Io(io::Error),
    Monitor(MonitorError),
    Json(serde_json::Error),
    Logging(String),
    NoFrames,
    DoctorFailed,
    ReaderPanicked,
    ParseError(String),
}

impl From<io::Error> for NibletCliError {
    fn from(e: io::Error) -> Self {
        NibletCliError::Io(e)
    }
}

impl From<MonitorError> for NibletCliError {
    fn from(e: MonitorError) -> Self {
        NibletCliError::Monitor(e)
    }
}

impl From<serde_json::Error> for NibletCliError {
    fn from(e: serde_json::Error) -> Self {
        NibletCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<NibletCliError> for CliError {
    fn from(e: NibletCliError) -> Self {
        match e {
            NibletCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            NibletCliError::Monitor(e) => {
                let (code, hint) = match &e {
                    MonitorError::JsonError(_) => ("JSON_ERROR", "Check JSON syntax"),
                    MonitorError::InvalidConfig(_) => {
                        ("INVALID_CONFIG", "Run 'niblet config --json' to see valid defaults")
                    }
                    MonitorError::InvalidFrame(_) => {
                        ("INVALID_FRAME", "Frames need finite coordinates and ascending timestamps")
                    }
                    MonitorError::DeviceAccess(_) => {
                        ("DEVICE_ACCESS", "Could not access webcam. Please allow camera permission.")
                    }
                    MonitorError::NotMonitoring
                    | MonitorError::AlreadyMonitoring
                    | MonitorError::SchedulerClosed => ("SESSION_ERROR", "Restart monitoring"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            NibletCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            NibletCliError::Logging(msg) => CliError {
                code: "LOGGING_ERROR".to_string(),
                message: msg,
                hint: None,
            },
            NibletCliError::NoFrames => CliError {
                code: "NO_FRAMES".to_string(),
                message: "No frames found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            NibletCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            NibletCliError::ReaderPanicked => CliError {
                code: "READER_FAILED".to_string(),
                message: "Frame reader thread panicked".to_string(),
                hint: None,
            },
            NibletCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Check input format".to_string()),
            },
        }
    }
}

// Report types

#[derive(Serialize)]
struct ClassifiedFrame {
    timestamp: String,
    hand_near_mouth: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    closest_distance: Option<f64>,
}

#[derive(Serialize)]
struct DoctorReport {
    app: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
