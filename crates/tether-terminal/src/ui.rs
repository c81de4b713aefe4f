use std::sync::Arc;

use crate::tee_printer::Printer;

/// User-facing output sink handed to every command invocation.
pub trait Ui: Send + Sync {
    fn say(&self, message: &str);
    fn warn(&self, message: &str);
    fn ok(&self);
    fn failed(&self, message: &str);
}

/// `Ui` backed by a `Printer`, so all output lands in the capture log.
#[derive(Clone)]
pub struct TerminalUi {
    printer: Arc<dyn Printer>,
}

impl TerminalUi {
    pub fn new(printer: Arc<dyn Printer>) -> Self {
        Self { printer }
    }

    pub fn printer(&self) -> &Arc<dyn Printer> {
        &self.printer
    }
}

impl Ui for TerminalUi {
    fn say(&self, message: &str) {
        self.printer.println(message);
    }

    fn warn(&self, message: &str) {
        self.printer.println(message);
    }

    fn ok(&self) {
        self.printer.println("OK");
    }

    // Failures are shown even when terminal output is suppressed.
    fn failed(&self, message: &str) {
        self.printer.force_println("FAILED");
        self.printer.force_println(message);
    }
}
