//! barista — menu-bar plugin engine.
//!
//! Runs user-supplied executable scripts on a schedule, parses their
//! stdout as a line-oriented menu protocol, and publishes compiled menu
//! trees to subscribers. Activating a tree node dispatches its action
//! (open URL, run command, copy text, refresh). Rendering, window
//! lifecycle, and terminal automation are collaborators behind narrow
//! seams; this crate never draws pixels.
//!
//! Data flow: `scheduler` triggers `script_exec` → raw text →
//! `menu::compile` (using `line_parser` per line) → `MenuTree`
//! published over a watch channel; activation flows back through
//! `dispatch`, which may invoke the runner or scheduler again.

pub mod config;
pub mod dispatch;
pub mod line_parser;
pub mod menu;
pub mod plugins;
pub mod scheduler;
pub mod script_exec;
pub mod state;
pub mod terminal;

pub use config::AppConfig;
pub use dispatch::{Dispatcher, MenuAction, resolve_action};
pub use line_parser::{Directive, DirectiveValue, ParsedLine};
pub use menu::{MenuNode, MenuTree, NodeKind};
pub use plugins::PluginSource;
pub use scheduler::{RefreshSubscription, Scheduler};
pub use script_exec::{ExecFailure, ExecMode, ExecutionResult, ScriptRunner};
pub use state::EngineState;
pub use terminal::{LoggingLauncher, TerminalApp, TerminalLauncher};
