use std::path::Path;
use std::str::FromStr;

use data::log::Error;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Route `log` records to stdout and the run log file
pub fn setup(level: &str, log_file: Option<&Path>) -> Result<(), Error> {
    let level = log::LevelFilter::from_str(level)?;

    let file = data::log::file(log_file)?;

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{:<5}] {}: {}",
                chrono::Local::now().format(TIMESTAMP_FORMAT),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .level_for("rusqlite", log::LevelFilter::Warn)
        .chain(std::io::stdout())
        .chain(file)
        .apply()?;

    Ok(())
}
