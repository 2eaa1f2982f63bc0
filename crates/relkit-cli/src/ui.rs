//! Terminal output and password entry.

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::style::Stylize;
use crossterm::terminal;
use relkit_core::{PasswordPrompt, Reporter};
use relkit_schema::PackageTarget;
use std::io::{IsTerminal, Write};
use std::sync::Mutex;

const TARGET_WIDTH: usize = 18;

/// Prints pipeline progress to stdout, warnings and errors to stderr.
///
/// Writes are serialised so concurrent signing tasks never interleave lines.
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    lock: Mutex<()>,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn print(&self, line: &str) {
        let _guard = self.lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        println!("{line}");
    }

    fn eprint(&self, line: &str) {
        let _guard = self.lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        eprintln!("{line}");
    }
}

impl Reporter for ConsoleReporter {
    fn section(&self, title: &str) {
        self.print(&format!("\n{}", title.bold()));
    }

    fn artifact(&self, target: &PackageTarget, action: &str) {
        let name = format!("{:<width$}", target.to_string(), width = TARGET_WIDTH);
        self.print(&format!("  {} {}", name.cyan(), action.dark_grey()));
    }

    fn info(&self, msg: &str) {
        self.print(&format!("  {} {msg}", "•".dark_grey()));
    }

    fn success(&self, msg: &str) {
        self.print(&format!("  {} {msg}", "✓".green().bold()));
    }

    fn warning(&self, msg: &str) {
        self.eprint(&format!("  {} {msg}", "!".yellow().bold()));
    }

    fn error(&self, msg: &str) {
        self.eprint(&format!("  {} {msg}", "✗".red().bold()));
    }

    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        let operation = action.to_uppercase();
        self.print(&format!(
            "\n{}",
            format!("{operation} {count}, elapsed {elapsed_secs:.1}s").green()
        ));

        // Machine-readable line for CI logs
        let result = serde_json::json!({
            "operation": action,
            "status": "success",
            "count": count,
            "elapsed": elapsed_secs,
        });
        self.print(&format!(
            "RESULT {}",
            serde_json::to_string(&result).unwrap_or_default()
        ));
    }
}

/// Reads passwords from the terminal without echo.
///
/// Returns `None` when stdin is not a terminal or the operator presses
/// Esc or Ctrl-C.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

impl PasswordPrompt for TerminalPrompt {
    fn read_password(&self, prompt: &str) -> Option<String> {
        if !std::io::stdin().is_terminal() {
            tracing::warn!("stdin is not a terminal, cannot prompt for a password");
            return None;
        }

        let mut stderr = std::io::stderr();
        let _ = write!(stderr, "{prompt}: ");
        let _ = stderr.flush();

        if terminal::enable_raw_mode().is_err() {
            return None;
        }
        let password = read_hidden_line();
        let _ = terminal::disable_raw_mode();
        let _ = writeln!(stderr);
        password
    }
}

fn read_hidden_line() -> Option<String> {
    let mut buf = String::new();
    loop {
        let Event::Key(KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            ..
        }) = event::read().ok()?
        else {
            continue;
        };
        match code {
            KeyCode::Enter => return Some(buf),
            KeyCode::Esc => return None,
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => return None,
            KeyCode::Backspace => {
                buf.pop();
            }
            KeyCode::Char(c) => buf.push(c),
            _ => {}
        }
    }
}

/// Password from the flag or environment, otherwise asked for.
pub fn password_or_prompt(given: Option<String>, prompt: &str) -> Option<String> {
    given.or_else(|| TerminalPrompt.read_password(prompt))
}
