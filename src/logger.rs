//
// hook the `log` facade up to the console printer, so init and trap
// paths can emit leveled, tagged lines.
//

use log::{LevelFilter, Metadata, Record};

use crate::printf;

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            printf!(
                "[{:<5}] {}: {}\n",
                record.level().as_str(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

pub fn loginit() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Info);
    }
}
