pub mod flags;

use alloc::boxed::Box;
use core::fmt::{Display, Formatter, Write};

use spin::Mutex;

struct OptionU32Display(Option<u32>);

impl Display for OptionU32Display {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        if let Some(val) = self.0 {
            write!(f, "{}", val)
        } else {
            write!(f, "<NULL>")
        }
    }
}

/// Formats log records into a text sink supplied by the host.
pub struct Logger<W> {
    output: Mutex<W>,
    level: log::Level,
}

impl<W: Write + Send> Logger<W> {
    pub fn new(output: W, level: log::Level) -> Logger<W> {
        Logger {
            output: Mutex::new(output),
            level,
        }
    }

    pub fn output(&self) -> &Mutex<W> {
        &self.output
    }
}

impl<W: Write + Send> log::Log for Logger<W> {
    #[inline]
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut os = self.output.lock();

        let _ = if record.level() < log::Level::Debug {
            writeln!(os, "{}: {}", record.level(), record.args())
        } else {
            let file = record.file().unwrap_or("<NULL>");
            let line = OptionU32Display(record.line());
            writeln!(
                os,
                "{}: [{}:{}] {}",
                record.level(),
                file,
                line,
                record.args()
            )
        };
    }

    #[inline]
    fn flush(&self) {}
}

/// Install a [`Logger`] writing to `output` as the global logger.
///
/// Only the first call takes effect; later calls return the error from
/// [`log::set_logger`].
pub fn init<W>(output: W, max_level: log::Level) -> Result<(), log::SetLoggerError>
where
    W: Write + Send + 'static,
{
    let logger = Box::leak(Box::new(Logger::new(output, max_level)));
    log::set_logger(logger)?;
    log::set_max_level(max_level.to_level_filter());
    Ok(())
}
