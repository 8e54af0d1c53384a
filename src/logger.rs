use std::fs::{self, OpenOptions};

use thiserror::Error;

use data::environment;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("logger error: {0}")]
    SetLogger(#[from] log::SetLoggerError),
}

pub fn setup(is_debug: bool) -> Result<(), Error> {
    let level = if is_debug {
        log::LevelFilter::Trace
    } else {
        log::LevelFilter::Debug
    };

    let mut logger = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}:{} -- {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                message
            ));
        })
        .level(log::LevelFilter::Off)
        .level_for("panic", log::LevelFilter::Error)
        .level_for("data", level)
        .level_for("irc", level)
        .level_for("tern", level);

    if is_debug {
        logger = logger.chain(std::io::stdout());
    } else {
        let data_dir = environment::data_dir();
        fs::create_dir_all(&data_dir)?;

        let log_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(data_dir.join("tern.log"))?;

        logger = logger.chain(log_file);
    }

    logger.apply()?;
    Ok(())
}
