//! Wires `env_logger` onto whichever combination of console/file sinks the
//! CLI flags select (§6 `-b`/`-f`), with the RPC surface (`ts_rpc`) filtered
//! at its own verbosity (`-s`) independent of the rest of the engine
//! (`-d`).

use anyhow::{Context, Result};
use log::LevelFilter;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

/// Fans writes out to stderr and/or a log file, whichever the CLI flags
/// leave enabled; `env_logger` writes through this as its configured
/// target rather than directly to a single stream.
struct TeeWriter {
    console: bool,
    file: Option<File>,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.console {
            io::stderr().write_all(buf)?;
        }
        if let Some(file) = &mut self.file {
            file.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.console {
            io::stderr().flush()?;
        }
        if let Some(file) = &mut self.file {
            file.flush()?;
        }
        Ok(())
    }
}

/// Install the process-wide logger. `file_path` is `None` when `-f` asked
/// for no file log; `console` is `false` when `-b` asked for no console log.
pub fn init(console: bool, file_path: Option<&Path>, engine_level: LevelFilter, rpc_level: LevelFilter) -> Result<()> {
    let file = file_path
        .map(|path| File::create(path).with_context(|| format!("failed to open log file {}", path.display())))
        .transpose()?;

    env_logger::Builder::new()
        .filter_level(engine_level)
        .filter_module("ts_rpc", rpc_level)
        .target(env_logger::Target::Pipe(Box::new(TeeWriter { console, file })))
        .init();
    Ok(())
}
