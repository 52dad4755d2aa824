use std::{
    fs::{self, OpenOptions},
    io::{self, BufWriter, Write},
    path::Path,
    str::FromStr,
    sync::mpsc::{channel, Receiver, Sender},
    thread,
};

use env_logger::Builder;
use log::LevelFilter;

use crate::config;
use crate::core::error::{ErrorContext, OrbError, OrbResult};

/// `Write` half handed to env_logger, forwarding every line to the writer
/// thread.
pub struct ChannelWriter {
    sender: Sender<Vec<u8>>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sender
            .send(buf.to_vec())
            .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct Logger {
    config: config::Log,
}

impl Logger {
    pub fn new(config: config::Log) -> Self {
        Self { config }
    }

    fn level(&self) -> OrbResult<LevelFilter> {
        let level = &self.config.level;
        LevelFilter::from_str(level)
            .map_err(|_| OrbError::Configuration(format!("invalid log level {level}")))
    }

    /// Install the global logger. `RUST_LOG` still overrides the configured
    /// level.
    pub fn init_env_logger(&self) -> OrbResult<()> {
        let mut builder = Builder::new();
        builder
            .filter(None, self.level()?)
            .parse_env(env_logger::Env::default());

        if let Some(path) = &self.config.path {
            let writer = Self::spawn_file_writer(path)?;
            builder.target(env_logger::Target::Pipe(Box::new(writer)));
        }

        builder.try_init().with_context("Failed to install logger")
    }

    fn spawn_file_writer(path: &str) -> OrbResult<ChannelWriter> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() && fs::metadata(parent).is_err() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().append(true).create(true).open(path)?;
        let (sender, receiver) = channel::<Vec<u8>>();

        thread::Builder::new()
            .name("log-writer".to_string())
            .spawn(move || Self::write_loop(BufWriter::new(file), receiver))?;

        Ok(ChannelWriter { sender })
    }

    fn write_loop<W: Write>(mut file: W, receiver: Receiver<Vec<u8>>) {
        while let Ok(data) = receiver.recv() {
            if let Err(e) = file.write_all(&data) {
                eprintln!("Failed to write to log file: {e}");
                continue;
            }
            // flush once the burst is written
            for data in receiver.try_iter() {
                if let Err(e) = file.write_all(&data) {
                    eprintln!("Failed to write to log file: {e}");
                }
            }
            if let Err(e) = file.flush() {
                eprintln!("Failed to flush log file: {e}");
            }
        }

        let _ = file.flush();
    }
}
