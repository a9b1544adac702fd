//! Terminal-launch collaborator seam.
//!
//! The engine never opens an interactive terminal itself. It assembles
//! the exact command line (environment export prefix included) and hands
//! it to a `TerminalLauncher` together with the terminal program the
//! user selected. The platform shim that scripts Terminal/iTerm lives
//! outside this crate.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Which external terminal program the launcher should target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TerminalApp {
    #[default]
    Terminal,
    ITerm,
}

/// Consumes a fully assembled command string. No return value is
/// observed by the engine; launch failures are the collaborator's to log.
pub trait TerminalLauncher: Send + Sync {
    fn launch(&self, command: &str, app: TerminalApp);
}

/// Default launcher used headless: logs the handoff and does nothing.
pub struct LoggingLauncher;

impl TerminalLauncher for LoggingLauncher {
    fn launch(&self, command: &str, app: TerminalApp) {
        tracing::info!(?app, %command, "terminal launch requested");
    }
}

/// Single-quote a string for `sh`, escaping embedded quotes.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Render a program plus arguments as one shell command string.
pub fn shell_command(program: &Path, args: &[String]) -> String {
    let mut out = program.display().to_string();
    for arg in args {
        out.push(' ');
        out.push_str(&shell_quote(arg));
    }
    out
}

/// Prefix a command with `export K='v'` statements for the overlay.
/// Keys are sorted so the assembled string is deterministic.
pub fn interactive_command(command: &str, env: &HashMap<String, String>) -> String {
    if env.is_empty() {
        return command.to_string();
    }
    let mut keys: Vec<&String> = env.keys().collect();
    keys.sort();
    let exports: Vec<String> = keys
        .iter()
        .map(|k| format!("{}={}", k, shell_quote(&env[*k])))
        .collect();
    format!("export {}; {}", exports.join(" "), command)
}
