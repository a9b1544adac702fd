//! Activation of menu nodes.
//!
//! A line may legally carry more than one actionable directive; the
//! documented precedence is `href` > `bash` > `copy` > bare `refresh`,
//! and exactly one action fires per activation. Failures (URL won't
//! open, command won't spawn, clipboard unavailable) are logged and
//! never retried — activation must not crash the host or stall the
//! plugin's schedule.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::line_parser::ParsedLine;
use crate::menu::MenuNode;
use crate::scheduler::Scheduler;
use crate::script_exec::ScriptRunner;
use crate::state::EngineState;
use crate::terminal::{self, TerminalLauncher};

/// The single side effect an activation resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuAction {
    OpenUrl(String),
    RunScript {
        command: String,
        params: Vec<String>,
        terminal: bool,
    },
    Copy(String),
    Refresh,
    None,
}

/// Pure directive-to-action resolution; the side effects live in
/// `Dispatcher::activate`.
pub fn resolve_action(line: &ParsedLine) -> MenuAction {
    if let Some(href) = line.href() {
        return MenuAction::OpenUrl(href.to_string());
    }
    if let Some(command) = line.bash() {
        return MenuAction::RunScript {
            command: command.to_string(),
            params: line.bash_params(),
            terminal: line.terminal(),
        };
    }
    if let Some(text) = line.copy_text() {
        return MenuAction::Copy(text.to_string());
    }
    if line.refresh() {
        return MenuAction::Refresh;
    }
    MenuAction::None
}

pub struct Dispatcher {
    state: Arc<EngineState>,
    scheduler: Arc<Scheduler>,
    runner: ScriptRunner,
    launcher: Arc<dyn TerminalLauncher>,
}

impl Dispatcher {
    pub fn new(
        state: Arc<EngineState>,
        scheduler: Arc<Scheduler>,
        runner: ScriptRunner,
        launcher: Arc<dyn TerminalLauncher>,
    ) -> Dispatcher {
        Dispatcher {
            state,
            scheduler,
            runner,
            launcher,
        }
    }

    /// Perform the node's action. `plugin_id` identifies the plugin the
    /// node came from, so `refresh` reaches the right schedule.
    pub fn activate(&self, plugin_id: &str, node: &MenuNode) {
        match resolve_action(&node.line) {
            MenuAction::OpenUrl(target) => self.open_target(&target),
            MenuAction::RunScript {
                command,
                params,
                terminal,
            } => self.run_script(plugin_id, &command, params, terminal),
            MenuAction::Copy(text) => copy_to_clipboard(&text),
            MenuAction::Refresh => {
                // Coalesced with any in-flight run by the scheduler.
                self.scheduler.request_refresh(plugin_id);
            }
            MenuAction::None => {}
        }
    }

    fn open_target(&self, target: &str) {
        match url::Url::parse(target) {
            Ok(parsed) => tracing::debug!(url = %parsed, "opening URL"),
            Err(_) => tracing::debug!(path = target, "opening filesystem path"),
        }
        if let Err(e) = open::that(target) {
            tracing::warn!(target, error = %e, "failed to open target");
        }
    }

    fn run_script(&self, plugin_id: &str, command: &str, params: Vec<String>, interactive: bool) {
        // Same overlay the scheduler hands to cycle executions.
        let env: HashMap<String, String> = self
            .state
            .plugin(plugin_id)
            .map(|s| s.env_overlay())
            .unwrap_or_default();
        if interactive {
            let app = self.state.config.read().terminal;
            let command_line = terminal::shell_command(&PathBuf::from(command), &params);
            let assembled = terminal::interactive_command(&command_line, &env);
            self.launcher.launch(&assembled, app);
        } else {
            self.runner
                .spawn_background(PathBuf::from(command), params, env);
        }
    }
}

fn copy_to_clipboard(text: &str) {
    match arboard::Clipboard::new() {
        Ok(mut clipboard) => {
            if let Err(e) = clipboard.set_text(text.to_string()) {
                tracing::warn!(error = %e, "failed to copy to clipboard");
            }
        }
        Err(e) => tracing::warn!(error = %e, "clipboard unavailable"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn line(s: &str) -> ParsedLine {
        ParsedLine::parse(s)
    }

    #[test]
    fn href_wins_over_bash_and_refresh() {
        let action = resolve_action(&line(
            "x|href=https://example.com bash=/bin/echo refresh=true",
        ));
        assert_eq!(action, MenuAction::OpenUrl("https://example.com".into()));
    }

    #[test]
    fn bash_wins_over_refresh() {
        let action = resolve_action(&line("x|bash=/bin/echo param1=hi refresh=true"));
        assert_eq!(
            action,
            MenuAction::RunScript {
                command: "/bin/echo".into(),
                params: vec!["hi".into()],
                terminal: false,
            }
        );
    }

    #[test]
    fn terminal_flag_is_carried() {
        let action = resolve_action(&line("x|bash=/bin/top terminal=true"));
        assert_eq!(
            action,
            MenuAction::RunScript {
                command: "/bin/top".into(),
                params: vec![],
                terminal: true,
            }
        );
    }

    #[test]
    fn copy_wins_over_refresh() {
        let action = resolve_action(&line("x|copy=\"some text\" refresh=true"));
        assert_eq!(action, MenuAction::Copy("some text".into()));
    }

    #[test]
    fn bare_refresh_resolves_to_refresh() {
        assert_eq!(resolve_action(&line("x|refresh=true")), MenuAction::Refresh);
        assert_eq!(resolve_action(&line("x|refresh")), MenuAction::Refresh);
    }

    #[test]
    fn refresh_false_is_no_action() {
        assert_eq!(resolve_action(&line("x|refresh=false")), MenuAction::None);
    }

    #[test]
    fn plain_line_has_no_action() {
        assert_eq!(resolve_action(&line("just text")), MenuAction::None);
    }

    #[test]
    fn presentation_hints_alone_trigger_nothing() {
        let action = resolve_action(&line("x|color=red size=12 sfimage=gear"));
        assert_eq!(action, MenuAction::None);
    }

    #[test]
    fn interactive_bash_carries_the_plugin_env_exports() {
        use crate::config::AppConfig;
        use crate::menu::NodeKind;
        use crate::plugins::PluginSource;
        use crate::terminal::TerminalApp;
        use parking_lot::Mutex;

        struct Recorder(Arc<Mutex<Vec<String>>>);
        impl TerminalLauncher for Recorder {
            fn launch(&self, command: &str, _app: TerminalApp) {
                self.0.lock().push(command.to_string());
            }
        }

        let state = EngineState::new(AppConfig::default());
        state.plugins.insert(
            "cpu.5s.sh".into(),
            PluginSource::from_path(PathBuf::from("/plugins/cpu.5s.sh"), None).unwrap(),
        );
        let scheduler = Scheduler::new(state.clone(), ScriptRunner::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::new(
            state,
            scheduler,
            ScriptRunner::default(),
            Arc::new(Recorder(seen.clone())),
        );

        let node = MenuNode {
            text: "Top".into(),
            kind: NodeKind::Item,
            line: line("Top|bash=/bin/top terminal=true"),
            source_line: 3,
            children: Vec::new(),
        };
        dispatcher.activate("cpu.5s.sh", &node);

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].starts_with("export "));
        assert!(seen[0].contains("BARISTA_PLUGIN_NAME='cpu'"));
        assert!(seen[0].contains("BARISTA_PLUGIN_PATH='/plugins/cpu.5s.sh'"));
        assert!(seen[0].ends_with("; /bin/top"));
    }
}
