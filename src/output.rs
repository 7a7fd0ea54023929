use std::fmt::Display;
use std::io::IsTerminal;

/// What `vsup` prints for the person running it. Diagnostics go through
/// `tracing` on stderr and are not affected by `--quiet`.
#[derive(Debug, Clone, Copy)]
pub struct Console {
    quiet: bool,
    color: bool,
}

impl Console {
    pub fn new(quiet: bool) -> Self {
        Console {
            quiet,
            color: std::io::stdout().is_terminal(),
        }
    }

    pub fn line(&self, message: &str) {
        if !self.quiet {
            println!("{}", message);
        }
    }

    /// The one line a command ends on when it got what it came for.
    pub fn done(&self, message: &str) {
        if self.quiet {
            return;
        }
        if self.color {
            println!("\x1b[32m{}\x1b[0m", message);
        } else {
            println!("{}", message);
        }
    }

    pub fn warn(&self, message: &str) {
        if self.quiet {
            return;
        }
        if self.color {
            eprintln!("\x1b[33m{}\x1b[0m", message);
        } else {
            eprintln!("{}", message);
        }
    }

    /// Bullet list of the repairs a command performed.
    pub fn actions<T: Display>(&self, actions: &[T]) {
        for action in actions {
            self.line(&format!("  - {}", action));
        }
    }
}
