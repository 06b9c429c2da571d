use std::io::{self, Write};
use log::{
    Level,
    LevelFilter,
    Metadata,
    Record
};

static STDOUT_LOGGER: StdoutLogger = StdoutLogger;
struct StdoutLogger;
impl log::Log for StdoutLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Debug
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            println!(
                "[{}] [{}] {}",
                record.target(),
                record.level(),
                record.args()
            );
        }
    }
    fn flush(&self) {
        io::stdout().flush().unwrap();
    }
}

static NULL_LOGGER: NullLogger = NullLogger;
struct NullLogger;
impl log::Log for NullLogger {
    fn enabled(&self, _: &Metadata) -> bool {
        false
    }
    fn log(&self, _: &Record) {}
    fn flush(&self) {}
}

pub(crate) fn setup() {
    _ = log::set_logger(&STDOUT_LOGGER);
    _ = log::set_max_level(LevelFilter::Debug);
}

pub(crate) fn teardown() {
    _ = log::set_logger(&NULL_LOGGER);
}
