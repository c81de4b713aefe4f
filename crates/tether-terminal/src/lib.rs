//! Terminal output sinks for the tether host.
//!
//! `TeePrinter` mirrors every written line into an in-memory log that callers
//! drain with `get_output_and_reset`, independent of whether echo to the real
//! terminal is suppressed. `TerminalUi` layers the user-facing `Ui` sink that
//! commands and plugins write through on top of any `Printer`.

pub mod tee_printer;
pub mod ui;

pub use tee_printer::{decolorize, OutputCapture, Printer, TeePrinter, TerminalOutputSwitch};
pub use ui::{TerminalUi, Ui};
