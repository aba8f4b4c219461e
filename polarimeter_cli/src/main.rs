use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar};
use indicatif_log_bridge::LogWrapper;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use libpolarimeter::config::Config;
use libpolarimeter::error::ConfigError;
use libpolarimeter::pipeline::PipelineScheduler;
use libpolarimeter::results::{JsonLinesStore, SummaryRenderer};
use libpolarimeter::session::open_session;

fn make_template_config(path: &Path) -> Result<(), ConfigError> {
    Config::default().write_config_file(path)
}

/// Only a line typed by the operator stops the run. A closed or unreadable stdin (pipes,
/// nohup, CI) leaves the run going
fn is_stop_request(read: &std::io::Result<usize>) -> bool {
    match read {
        Ok(n) => *n > 0,
        Err(_) => false,
    }
}

/// Watch stdin for the operator's Enter key
fn watch_stdin(stop_requested: Arc<AtomicBool>) {
    let mut line = String::new();
    let read = std::io::stdin().read_line(&mut line);
    if is_stop_request(&read) {
        stop_requested.store(true, Ordering::Release);
        return;
    }
    match read {
        Err(e) => log::warn!("Could not read stdin: {e}"),
        Ok(_) => log::warn!("stdin is closed"),
    }
    log::warn!("Enter no longer stops the run; use --duration or interrupt the process");
}

/// Terminal logging, plus a log file if requested. Logs are routed around the progress bars
fn init_logging(pb_manager: &MultiProgress, log_path: Option<&PathBuf>) -> Result<(), String> {
    let level = simplelog::LevelFilter::Info;
    let term_logger = simplelog::TermLogger::new(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );
    let result = match log_path {
        Some(path) => {
            let file = File::create(path)
                .map_err(|e| format!("Could not create log file {}: {e}", path.display()))?;
            let logger = simplelog::CombinedLogger::new(vec![
                term_logger,
                simplelog::WriteLogger::new(level, simplelog::Config::default(), file),
            ]);
            LogWrapper::new(pb_manager.clone(), logger).try_init()
        }
        None => LogWrapper::new(pb_manager.clone(), term_logger).try_init(),
    };
    result.map_err(|e| format!("Could not create logging/progress: {e}"))?;
    log::set_max_level(level);
    Ok(())
}

fn main() -> ExitCode {
    // Create a cli
    let matches = Command::new("polarimeter_cli")
        .about("Beam polarimeter acquisition and asymmetry monitor")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .required(true)
                .help("Path to the configuration file"),
        )
        .arg(
            Arg::new("log-file")
                .long("log-file")
                .help("Also write the log to this file"),
        )
        .arg(
            Arg::new("duration")
                .long("duration")
                .value_parser(clap::value_parser!(u64))
                .help("Stop the run after this many seconds"),
        )
        .get_matches();

    // Initialize feedback
    let pb_manager = MultiProgress::new();
    let log_path = matches.get_one::<String>("log-file").map(PathBuf::from);
    if let Err(e) = init_logging(&pb_manager, log_path.as_ref()) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    // Parse the cli
    let Some(config_path) = matches.get_one::<String>("path").map(PathBuf::from) else {
        log::error!("A configuration path is required");
        return ExitCode::FAILURE;
    };

    if let Some(("new", _)) = matches.subcommand() {
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        return match make_template_config(&config_path) {
            Ok(()) => {
                log::info!("Done.");
                ExitCode::SUCCESS
            }
            Err(e) => {
                log::error!("{e}");
                ExitCode::FAILURE
            }
        };
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    log::info!("Config successfully loaded.");
    log::info!("Connection: {}", config.connection.kind());
    log::info!(
        "Channels -- in: {} out1: {} out2: {} beam: {}",
        config.acquisition.in_channel,
        config.acquisition.out_channel_1,
        config.acquisition.out_channel_2,
        config.acquisition.beam_channel
    );
    log::info!(
        "Gates: {}/{} samples, record length: {}, threshold: {}, CFD: {}%",
        config.acquisition.short_gate,
        config.acquisition.long_gate,
        config.acquisition.record_length,
        config.acquisition.threshold,
        config.acquisition.cfd_threshold
    );
    log::info!("Aggregation interval: {} s", config.pipeline.interval_secs);

    // Open the hardware
    let session = match open_session(&config.connection) {
        Ok(s) => s,
        Err(e) => {
            log::error!("Could not open the digitizer: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut scheduler =
        PipelineScheduler::new(session, config.pipeline.clone(), config.analysis.clone())
            .with_renderer(Box::new(SummaryRenderer::new()));
    if let Some(results_path) = &config.results_path {
        match JsonLinesStore::new(results_path) {
            Ok(store) => scheduler = scheduler.with_result_store(Box::new(store)),
            Err(e) => {
                log::error!("Could not open the result store: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    if let Err(e) = scheduler.start(&config.acquisition) {
        log::error!("Acquisition failed to start: {e}");
        return ExitCode::FAILURE;
    }
    log::info!("Acquisition running. Press Enter to stop.");

    // Any line on stdin stops the run
    let stop_requested = Arc::new(AtomicBool::new(false));
    {
        let stop_requested = stop_requested.clone();
        std::thread::spawn(move || watch_stdin(stop_requested));
    }
    let deadline = matches
        .get_one::<u64>("duration")
        .map(|secs| Instant::now() + Duration::from_secs(*secs));

    // Setup the progress display
    let pb = pb_manager.add(ProgressBar::new_spinner());
    loop {
        // No UI here, so poll the status about once a second
        std::thread::sleep(Duration::from_secs(1));
        pb.set_message(scheduler.status().summary());
        pb.tick();

        if scheduler.fault_detected() {
            log::error!("A pipeline task failed, stopping the run");
            break;
        }
        if stop_requested.load(Ordering::Acquire) {
            log::info!("Stop requested");
            break;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            log::info!("Run duration reached");
            break;
        }
    }

    let result = scheduler.stop();
    pb.finish_with_message(scheduler.status().summary());
    match result {
        Ok(()) => {
            log::info!("Done.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("Run ended with error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_request() {
        assert!(is_stop_request(&Ok(1)));
        // EOF on a closed or redirected stdin
        assert!(!is_stop_request(&Ok(0)));
        assert!(!is_stop_request(&Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "stream did not contain valid UTF-8"
        ))));
    }
}
