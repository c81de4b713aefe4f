use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};

use regex::Regex;

/// Line-oriented writer used by every tether output path.
pub trait Printer: Send + Sync {
    fn print(&self, text: &str);
    fn print_fmt(&self, args: fmt::Arguments<'_>);
    fn println(&self, text: &str);
    fn force_print(&self, text: &str);
    fn force_print_fmt(&self, args: fmt::Arguments<'_>);
    fn force_println(&self, text: &str);
}

/// Retrieves and clears everything written so far.
pub trait OutputCapture {
    fn get_output_and_reset(&self) -> Vec<String>;
}

/// Toggles echo to the real terminal without affecting capture.
pub trait TerminalOutputSwitch {
    fn disable_terminal_output(&self, disable: bool);
}

type EchoWriter = Box<dyn Write + Send>;

/// Printer that captures every entry and optionally echoes it.
pub struct TeePrinter {
    disable_terminal_output: AtomicBool,
    output: Mutex<Vec<String>>,
    echo: Mutex<EchoWriter>,
}

impl fmt::Debug for TeePrinter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeePrinter")
            .field(
                "disable_terminal_output",
                &self.disable_terminal_output.load(Ordering::SeqCst),
            )
            .field("captured", &lock_or_recover(&self.output).len())
            .finish()
    }
}

impl Default for TeePrinter {
    fn default() -> Self {
        Self::new()
    }
}

impl TeePrinter {
    pub fn new() -> Self {
        Self::with_writer(Box::new(std::io::stdout()))
    }

    /// Builds a printer that echoes into `writer` instead of stdout.
    pub fn with_writer(writer: EchoWriter) -> Self {
        Self {
            disable_terminal_output: AtomicBool::new(false),
            output: Mutex::new(Vec::new()),
            echo: Mutex::new(writer),
        }
    }

    fn capture_and_echo(&self, text: &str, newline: bool, force: bool) {
        lock_or_recover(&self.output).push(decolorize(text));
        if !force && self.disable_terminal_output.load(Ordering::SeqCst) {
            return;
        }
        let mut echo = lock_or_recover(&self.echo);
        // Echo failures (closed pipe, detached terminal) never fail the command.
        let _ = echo.write_all(text.as_bytes());
        if newline {
            let _ = echo.write_all(b"\n");
        }
        let _ = echo.flush();
    }
}

impl Printer for TeePrinter {
    fn print(&self, text: &str) {
        self.capture_and_echo(text, false, false);
    }

    fn print_fmt(&self, args: fmt::Arguments<'_>) {
        self.capture_and_echo(&args.to_string(), false, false);
    }

    fn println(&self, text: &str) {
        self.capture_and_echo(text, true, false);
    }

    fn force_print(&self, text: &str) {
        self.capture_and_echo(text, false, true);
    }

    fn force_print_fmt(&self, args: fmt::Arguments<'_>) {
        self.capture_and_echo(&args.to_string(), false, true);
    }

    fn force_println(&self, text: &str) {
        self.capture_and_echo(text, true, true);
    }
}

impl OutputCapture for TeePrinter {
    fn get_output_and_reset(&self) -> Vec<String> {
        std::mem::take(&mut *lock_or_recover(&self.output))
    }
}

impl TerminalOutputSwitch for TeePrinter {
    fn disable_terminal_output(&self, disable: bool) {
        self.disable_terminal_output.store(disable, Ordering::SeqCst);
    }
}

/// Strips ANSI SGR escape sequences.
pub fn decolorize(text: &str) -> String {
    static ANSI_ESCAPE: OnceLock<Regex> = OnceLock::new();
    let pattern =
        ANSI_ESCAPE.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*m").expect("ansi escape regex"));
    pattern.replace_all(text, "").into_owned()
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
