//! Kiosk Input - raw keyboard pipeline for a children's creativity kiosk
//!
//! Normal runs grab the keyboard and log every gesture-level action. A
//! long-press of the designated key hands the keyboard to an admin shell.
//! `--calibrate` records the scancodes of the function keys.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::{debug, error, info, warn};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io::stdout;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use kiosk_input::{
    calibration::{calibrate_and_save, CalibrationMap},
    config::Config,
    error::InputError,
    keyboard::{
        grab_with_retry, open_device, open_source, ActionSink, Control, InputPipeline, KeyCode,
        KeySource, KeyboardAction, KeyboardStateMachine, SourceOptions, StepOutcome, StopHandle,
    },
    ui::CalibrationPrompt,
};

const RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// Raw keyboard input pipeline for a children's kiosk
#[derive(Parser)]
#[command(name = "kiosk-input", version, about)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Keyboard device node, auto-detected when omitted
    #[arg(long)]
    device: Option<PathBuf>,

    /// Read keys from the terminal instead of the raw device
    #[arg(long)]
    fallback: bool,

    /// Record the function key scancodes and exit
    #[arg(long)]
    calibrate: bool,

    /// Comma-separated key labels to calibrate, e.g. F13,F14,F15
    #[arg(long, value_delimiter = ',', requires = "calibrate")]
    prompts: Option<Vec<String>>,
}

/// Logs each action and notices the admin long-press
struct LogSink {
    admin_key: KeyCode,
    admin_requested: bool,
}

impl LogSink {
    fn new(admin_key: KeyCode) -> Self {
        Self {
            admin_key,
            admin_requested: false,
        }
    }

    fn take_admin_request(&mut self) -> bool {
        std::mem::take(&mut self.admin_requested)
    }
}

impl ActionSink for LogSink {
    fn handle_action(&mut self, action: &KeyboardAction) {
        match action {
            KeyboardAction::Control {
                action: Control::LongPress(key),
                ..
            } if *key == self.admin_key => {
                info!("long-press of {key}: entering administration mode");
                self.admin_requested = true;
            }
            KeyboardAction::Character { ch } => info!("character {ch:?}"),
            other => info!("{other:?}"),
        }
    }
}

/// Friendly message with the technical hint underneath
fn friendly(err: InputError) -> anyhow::Error {
    match err.hint() {
        Some(hint) => anyhow!("{err}\n  hint: {hint}"),
        None => anyhow::Error::new(err),
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load().unwrap_or_else(|e| {
            warn!("ignoring unreadable config: {e}");
            Config::default()
        }),
    };
    if cli.device.is_some() {
        config.device.path = cli.device.clone();
    }
    if let Some(prompts) = &cli.prompts {
        config.calibration.prompts = prompts.clone();
    }
    Ok(config)
}

fn source_options(cli: &Cli, config: &Config) -> SourceOptions {
    SourceOptions {
        device: config.device.path.clone(),
        force_fallback: cli.fallback,
        fallback_release: config.timing.fallback_release(),
    }
}

fn build_pipeline(
    source: Box<dyn KeySource>,
    config: &Config,
    calibration: &CalibrationMap,
    stop: &StopHandle,
) -> Result<InputPipeline> {
    let machine = KeyboardStateMachine::new(
        config.timing.gesture_timings(),
        config.keys.long_press_keycode(),
    );
    let mut pipeline = InputPipeline::new(source, machine)
        .with_stop(stop.clone())
        .with_idle_tick(config.timing.idle_tick())
        .with_grab_retry(config.device.grab_retry());
    pipeline.set_calibration(calibration);
    pipeline.start(config.device.grab).map_err(friendly)?;
    Ok(pipeline)
}

/// Wait for the raw keyboard to come back, `None` when stopped first
fn reconnect(options: &SourceOptions, stop: &StopHandle) -> Result<Option<Box<dyn KeySource>>> {
    while !stop.is_stopped() {
        thread::sleep(RECONNECT_INTERVAL);
        match open_device(options) {
            Ok(source) => return Ok(Some(source)),
            Err(e @ InputError::DeviceUnavailable { .. }) => debug!("still waiting: {e}"),
            Err(e) => return Err(friendly(e)),
        }
    }
    Ok(None)
}

fn run(cli: &Cli, config: &Config) -> Result<()> {
    let calibration_path = config.calibration.resolved_path()?;
    let calibration = CalibrationMap::load_or_identity(&calibration_path);

    let stop = StopHandle::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || handler_stop.stop()).context("failed to install signal handler")?;

    let options = source_options(cli, config);
    let source = open_source(&options).map_err(friendly)?;
    let mut pipeline = build_pipeline(source, config, &calibration, &stop)?;
    let mut sink = LogSink::new(config.keys.long_press_keycode());

    loop {
        match pipeline.step(&mut sink).map_err(friendly)? {
            StepOutcome::Continue => {}
            StepOutcome::Stopped => break,
            StepOutcome::Disconnected if pipeline.source().is_degraded() => break,
            StepOutcome::Disconnected => {
                warn!("keyboard disconnected, waiting for it to return");
                pipeline.shutdown();
                match reconnect(&options, &stop)? {
                    Some(source) => {
                        pipeline = build_pipeline(source, config, &calibration, &stop)?;
                    }
                    None => break,
                }
            }
        }

        if sink.take_admin_request() {
            let mut guard = pipeline.suspend();
            match guard.run_shell(&config.admin.shell, &config.admin.args) {
                Ok(status) if !status.success() => warn!("admin shell exited with {status}"),
                Ok(_) => {}
                Err(e) => error!("failed to start admin shell {:?}: {e}", config.admin.shell),
            }
            guard.resume().map_err(friendly)?;
        }
    }

    pipeline.shutdown();
    info!("keyboard released, exiting");
    Ok(())
}

fn calibrate(cli: &Cli, config: &Config) -> Result<()> {
    let path = config.calibration.resolved_path()?;
    let prompts = &config.calibration.prompts;
    if prompts.is_empty() {
        return Err(anyhow!("no keys to calibrate"));
    }

    let mut source = open_source(&source_options(cli, config)).map_err(friendly)?;
    if config.device.grab {
        grab_with_retry(source.as_mut(), config.device.grab_retry()).map_err(friendly)?;
    }

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let result = calibrate_and_save(source.as_mut(), prompts, &path, |progress| {
        let drawn = terminal.draw(|frame| {
            frame.render_widget(CalibrationPrompt::new(progress), frame.area());
        });
        if let Err(e) = drawn {
            warn!("failed to draw calibration prompt: {e}");
        }
    });

    // Cleanup terminal
    source.release();
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    let map = result.map_err(friendly)?;
    println!(
        "Calibrated {} keys, written to {}",
        map.len(),
        path.display()
    );
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    if cli.calibrate {
        calibrate(&cli, &config)
    } else {
        run(&cli, &config)
    }
}
