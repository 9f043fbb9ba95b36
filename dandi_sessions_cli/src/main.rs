use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar};
use indicatif_log_bridge::LogWrapper;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use libdandi_sessions::config::Config;
use libdandi_sessions::process::process;
use libdandi_sessions::remote::StoreOpener;
use libdandi_sessions::report::render_completeness;
use libdandi_sessions::session_cache::load_session;

fn make_template_config(path: &Path) {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config).unwrap();
    let mut file = File::create(path).expect("Could create template config file!");
    file.write_all(yaml_str.as_bytes())
        .expect("Failed to write yaml data to file!");
}

fn load_config(config_path: &Path) -> Option<Config> {
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    match Config::read_config_file(config_path) {
        Ok(c) => {
            log::info!("Config successfully loaded.");
            Some(c)
        }
        Err(e) => {
            log::error!("{e}");
            None
        }
    }
}

/// Open one session and print its summary
fn print_info(url: &str, config: &Config) {
    let opener = StoreOpener::from_config(config);
    let session = match load_session(url, &opener) {
        Ok(s) => s,
        Err(e) => {
            log::error!("Could not load session: {e}");
            return;
        }
    };
    println!("{}", session.describe(None));
    println!("{}", render_completeness(&session.completeness()));
    if let Err(e) = session.check_num_rois() {
        log::warn!("{e}");
    }
}

fn main() {
    // Create a cli
    let matches = Command::new("dandi_sessions_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .subcommand(
            Command::new("info")
                .about("Print the summary of a single session")
                .arg(
                    Arg::new("url")
                        .short('u')
                        .long("url")
                        .required(true)
                        .help("NWB URL or path of the session"),
                ),
        )
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .global(true)
                .help("Path to the configuration file"),
        )
        .get_matches();

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    LogWrapper::new(pb_manager.clone(), logger)
        .try_init()
        .expect("Could not create logging/progress!");

    // Parse the cli
    let config_path = matches.get_one::<String>("path").map(PathBuf::from);

    match matches.subcommand() {
        Some(("new", _)) => {
            let Some(config_path) = config_path else {
                log::error!("A configuration path is required (-p/--path)");
                return;
            };
            log::info!(
                "Making a template config at {}...",
                config_path.to_string_lossy()
            );

            make_template_config(&config_path);
            log::info!("Done.");
            return;
        }
        Some(("info", sub_matches)) => {
            let url = sub_matches
                .get_one::<String>("url")
                .expect("clap enforces the url argument");
            let config = match config_path {
                Some(path) => match load_config(&path) {
                    Some(c) => c,
                    None => return,
                },
                None => Config::default(),
            };
            print_info(url, &config);
            return;
        }
        _ => (),
    }

    let Some(config_path) = config_path else {
        log::error!("A configuration path is required (-p/--path)");
        return;
    };

    // Load our config
    let config = match load_config(&config_path) {
        Some(c) => c,
        None => return,
    };
    log::info!(
        "Dandiset: {} Version: {}",
        config.dandiset_id,
        config.dandiset_version
    );
    log::info!("Output Path: {}", config.output_path.to_string_lossy());
    log::info!("Cache Path: {}", config.cache_path.to_string_lossy());
    log::info!("Use LINDI: {}", config.use_lindi);
    match config.max_sessions {
        Some(max) => log::info!("Max Sessions: {max}"),
        None => log::info!("Max Sessions: all"),
    }

    // Setup the progress bar
    let pb = pb_manager.add(ProgressBar::new(100));
    let status = Arc::new(Mutex::new(0.0));
    let sent_status = status.clone();
    // Spawn the task!
    let handle = std::thread::spawn(|| process(config, sent_status));

    loop {
        std::thread::sleep(std::time::Duration::from_secs(1));
        match status.lock() {
            Ok(stat) => pb.set_position((*stat * 100.0) as u64),
            Err(e) => log::error!("{e}"),
        }

        if handle.is_finished() {
            match handle.join() {
                Ok(result) => match result {
                    Ok(summary) => log::info!(
                        "Successfully reported {} sessions ({} failed)!",
                        summary.sessions_processed,
                        summary.sessions_failed
                    ),
                    Err(e) => log::error!("Report failed with error: {e}"),
                },
                Err(_) => log::error!("Failed to join report task!"),
            }
            break;
        }
    }

    pb.finish();

    log::info!("Done.");
}
