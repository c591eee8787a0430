use chrono::Local;
use colored::*;
use env_logger::{Builder, Env};
use log::LevelFilter;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

lazy_static::lazy_static! {
    static ref LOG_FILE: Mutex<Option<std::fs::File>> = Mutex::new(None);
}

pub fn init_log(log_file_path: Option<&str>) {
    if let Some(path) = log_file_path {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                *LOG_FILE.lock().unwrap() = Some(file);
                eprintln!("Log file output enabled: {}", path);
            }
            Err(e) => {
                eprintln!("Failed to open log file {}: {}", path, e);
            }
        }
    }

    Builder::new()
        .format(|buf, record| {
            let level = record.level();
            let (level_string, level_color) = match level {
                log::Level::Error => ("ERROR", Color::Red),
                log::Level::Warn => ("WARN ", Color::Yellow),
                log::Level::Info => ("INFO ", Color::Green),
                log::Level::Debug => ("DEBUG", Color::Blue),
                log::Level::Trace => ("TRACE", Color::Magenta),
            };
            let args = record.args().to_string();

            // File output (no color)
            if let Some(ref mut file) = *LOG_FILE.lock().unwrap() {
                let _ = writeln!(
                    file,
                    "{} [{}] {}",
                    Local::now().format("%Y-%m-%d %H:%M:%S"),
                    level_string,
                    args
                );
            }

            // Console output (with color)
            writeln!(
                buf,
                "{} [{}] {}",
                Local::now()
                    .format("%H:%M:%S")
                    .to_string()
                    .color(Color::White),
                level_string.color(level_color),
                args
            )
        })
        .filter_level(LevelFilter::Error)
        .parse_env(Env::default().default_filter_or("info"))
        .init();
}
