//! Configured hooks bound to controller events
//!
//! A hook either feeds G-code through the Feeder or runs a shell command.
//! The controller decides what to do with G-code hooks; system hooks are
//! spawned here and reaped by a background task.

use std::process::{ExitStatus, Stdio};

use halstream_settings::{EventHook, HookTrigger};
use tokio::process::Command;
use tokio::task::JoinHandle;

pub const CONTROLLER_READY: &str = "controller:ready";
pub const GCODE_LOAD: &str = "gcode:load";
pub const GCODE_UNLOAD: &str = "gcode:unload";
pub const GCODE_START: &str = "gcode:start";
pub const GCODE_STOP: &str = "gcode:stop";
pub const GCODE_PAUSE: &str = "gcode:pause";
pub const GCODE_RESUME: &str = "gcode:resume";
pub const FEEDHOLD: &str = "feedhold";
pub const CYCLESTART: &str = "cyclestart";
pub const HOMING: &str = "homing";
pub const SLEEP: &str = "sleep";
pub const MACRO_RUN: &str = "macro:run";
pub const MACRO_LOAD: &str = "macro:load";
pub const PORT_OPEN: &str = "port:open";
pub const PORT_CLOSE: &str = "port:close";

/// Every event a hook may bind to
pub const EVENTS: [&str; 15] = [
    CONTROLLER_READY,
    GCODE_LOAD,
    GCODE_UNLOAD,
    GCODE_START,
    GCODE_STOP,
    GCODE_PAUSE,
    GCODE_RESUME,
    FEEDHOLD,
    CYCLESTART,
    HOMING,
    SLEEP,
    MACRO_RUN,
    MACRO_LOAD,
    PORT_OPEN,
    PORT_CLOSE,
];

/// Work produced by firing an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerAction {
    /// G-code to feed
    Gcode(String),
    /// Shell command to run
    System(String),
}

#[derive(Debug, Clone, Default)]
pub struct EventTrigger {
    hooks: Vec<EventHook>,
}

impl EventTrigger {
    pub fn new(hooks: Vec<EventHook>) -> Self {
        for hook in &hooks {
            if !EVENTS.contains(&hook.event.as_str()) {
                tracing::warn!("Hook bound to unknown event '{}'", hook.event);
            }
        }
        Self { hooks }
    }

    pub fn hooks(&self) -> &[EventHook] {
        &self.hooks
    }

    /// Actions of every enabled hook bound to `event`, in configuration order
    pub fn actions(&self, event: &str) -> Vec<TriggerAction> {
        self.hooks
            .iter()
            .filter(|hook| hook.enabled && hook.event == event)
            .filter(|hook| !hook.commands.trim().is_empty())
            .map(|hook| match hook.trigger {
                HookTrigger::Gcode => TriggerAction::Gcode(hook.commands.clone()),
                HookTrigger::System => TriggerAction::System(hook.commands.clone()),
            })
            .collect()
    }

    /// Fire `event`: spawn system hooks and return the G-code to feed
    pub fn trigger(&self, event: &str) -> Vec<String> {
        let mut gcode = Vec::new();
        for action in self.actions(event) {
            match action {
                TriggerAction::Gcode(commands) => {
                    tracing::debug!("Event {} feeds hook G-code", event);
                    gcode.push(commands);
                }
                TriggerAction::System(command) => {
                    if let Err(e) = spawn_system(event, &command) {
                        tracing::warn!("Hook for {} failed to start '{}': {}", event, command, e);
                    }
                }
            }
        }
        gcode
    }
}

/// Run a shell command in the background
///
/// The returned task waits for the child and logs how it exited, so no
/// process is left unreaped. Must be called from within a tokio runtime.
pub fn spawn_system(event: &str, command: &str) -> std::io::Result<JoinHandle<Option<ExitStatus>>> {
    let runtime = tokio::runtime::Handle::try_current().map_err(std::io::Error::other)?;
    tracing::info!("Running hook command for {}: {}", event, command);
    let mut cmd = if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C");
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c");
        cmd
    };
    let mut child = cmd
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    let event = event.to_string();
    let command = command.to_string();
    Ok(runtime.spawn(async move {
        match child.wait().await {
            Ok(status) if status.success() => {
                tracing::debug!("Hook for {} finished: {}", event, command);
                Some(status)
            }
            Ok(status) => {
                tracing::warn!("Hook for {} exited with {}: {}", event, status, command);
                Some(status)
            }
            Err(e) => {
                tracing::warn!("Hook for {} could not be waited on: {}", event, e);
                None
            }
        }
    }))
}
