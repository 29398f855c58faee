//! Kernel logger plumbing.
//!
//! The kernel logs through the `log` facade; there is no mandatory sink.
//! An application that wants kernel output installs [`KernelLogger`] (or
//! any other `log` implementation) at boot. The bundled logger writes
//! through the port's console hook and tags every record with the core it
//! was emitted on.

use core::fmt::Write;

use log::{LevelFilter, Metadata, Record};

use crate::port::{Port, PortTrait};

pub struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

struct ConsoleWriter;

impl Write for ConsoleWriter {
	fn write_str(&mut self, s: &str) -> core::fmt::Result {
		Port::console_write(s);
		Ok(())
	}
}

impl log::Log for KernelLogger {
	fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
		true
	}

	fn log(&self, record: &Record<'_>) {
		let _ = writeln!(
			ConsoleWriter,
			"[{}][{}] {}",
			Port::core_id(),
			record.level(),
			record.args()
		);
	}

	fn flush(&self) {}
}

/// Installs the kernel logger with the given verbosity. Does nothing if a
/// logger is already installed.
pub fn init(level: LevelFilter) {
	if log::set_logger(&LOGGER).is_ok() {
		log::set_max_level(level);
	}
}
