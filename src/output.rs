use std::io::Write;

/// Abstraction over user-facing output.
///
/// Command modules use this trait instead of `println!`/`eprintln!` so that
/// colour follows `NO_COLOR` and `simple_formatting` in one place.
pub trait UserOutput: Send + Sync {
    /// Informational status message (e.g., "Stopping project a...")
    fn status(&self, message: &str);

    /// Success message (e.g., "Successfully started a")
    fn success(&self, message: &str);

    /// Warning message
    fn warning(&self, message: &str);

    /// Error message
    fn error(&self, message: &str);

    /// Inline prompt or progress (no trailing newline).
    fn progress(&self, message: &str);

    /// A blank line separator.
    fn blank(&self);
}

/// Standard CLI output; colours unless `plain`.
pub struct CliOutput {
    pub plain: bool,
}

impl CliOutput {
    fn paint(&self, code: &str, message: &str) -> String {
        if self.plain {
            message.to_string()
        } else {
            format!("\x1b[{}m{}\x1b[0m", code, message)
        }
    }
}

impl UserOutput for CliOutput {
    fn status(&self, message: &str) {
        println!("{}", message);
    }

    fn success(&self, message: &str) {
        println!("{}", self.paint("32", message));
    }

    fn warning(&self, message: &str) {
        eprintln!("{}", self.paint("33", message));
    }

    fn error(&self, message: &str) {
        eprintln!("{}", self.paint("31", message));
    }

    fn progress(&self, message: &str) {
        print!("{}", message);
        std::io::stdout().flush().ok();
    }

    fn blank(&self) {
        println!();
    }
}
