//! Control surface: turns inbound observer commands into registry operations

use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::registry::{SessionRegistry, ToggleAction};

/// Username reference; observers send either a bare string or `{"username": ...}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum AltRef {
    Name(String),
    Object { username: String },
}

impl AltRef {
    pub fn username(&self) -> &str {
        match self {
            AltRef::Name(username) | AltRef::Object { username } => username,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AltCredentials {
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToggleRequest {
    pub username: String,
    pub action: ToggleAction,
    pub state: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatRequest {
    pub username: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MacroRequest {
    pub username: String,
    pub command: String,
    /// Minutes between runs, fractional allowed
    #[serde(deserialize_with = "number_or_string")]
    pub cooldown: f64,
}

fn number_or_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(value) => Ok(value),
        Raw::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Commands accepted from observers, framed as `{"event": "<name>", "data": ...}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ControlCommand {
    AddAlt(AltCredentials),
    StartAlt(AltCredentials),
    ToggleAction(ToggleRequest),
    SendChat(ChatRequest),
    AddMacro(MacroRequest),
    StopAlt(AltRef),
    RemoveAlt(AltRef),
    RemoveMacros(AltRef),
    ReconnectAlt(AltCredentials),
}

impl ControlCommand {
    /// Username the command targets
    pub fn username(&self) -> &str {
        match self {
            ControlCommand::AddAlt(c)
            | ControlCommand::StartAlt(c)
            | ControlCommand::ReconnectAlt(c) => &c.username,
            ControlCommand::ToggleAction(t) => &t.username,
            ControlCommand::SendChat(c) => &c.username,
            ControlCommand::AddMacro(m) => &m.username,
            ControlCommand::StopAlt(r) | ControlCommand::RemoveAlt(r) | ControlCommand::RemoveMacros(r) => {
                r.username()
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Malformed command: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Username must not be empty")]
    EmptyUsername,
}

/// What happened to a dispatched command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// Target absent or already in the requested state
    Ignored,
    Rejected,
}

/// Counters for dispatched commands
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlStats {
    pub applied: u64,
    pub ignored: u64,
    pub rejected: u64,
}

#[derive(Debug, Default)]
pub struct ControlSurface {
    stats: ControlStats,
}

impl ControlSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one inbound text frame
    pub fn parse(text: &str) -> Result<ControlCommand, ControlError> {
        let command: ControlCommand = serde_json::from_str(text)?;
        if command.username().trim().is_empty() {
            return Err(ControlError::EmptyUsername);
        }
        Ok(command)
    }

    /// Apply a command to the registry
    pub fn dispatch(&mut self, registry: &mut SessionRegistry, command: ControlCommand) -> Outcome {
        debug!("Dispatching command: {:?}", command);

        let outcome = match command {
            ControlCommand::AddAlt(alt) => {
                info!("Adding alt: {}", alt.username);
                Self::applied(registry.create(&alt.username, &alt.password))
            }
            ControlCommand::StartAlt(alt) => {
                info!("Starting alt: {}", alt.username);
                Self::applied(registry.create(&alt.username, &alt.password))
            }
            ControlCommand::ToggleAction(toggle) => {
                if !registry.contains(&toggle.username) {
                    Outcome::Ignored
                } else {
                    Self::applied(registry.toggle_action(
                        &toggle.username,
                        toggle.action,
                        toggle.state,
                    ))
                }
            }
            ControlCommand::SendChat(chat) => {
                if !registry.contains(&chat.username) {
                    Outcome::Ignored
                } else {
                    info!("Sending chat for {}: {}", chat.username, chat.message);
                    Self::applied(registry.send_chat(&chat.username, &chat.message))
                }
            }
            ControlCommand::AddMacro(request) => {
                if !registry.contains(&request.username) {
                    Outcome::Ignored
                } else {
                    match registry.add_macro(&request.username, &request.command, request.cooldown)
                    {
                        Ok(Some(_)) => Outcome::Applied,
                        Ok(None) => Outcome::Ignored,
                        Err(e) => {
                            warn!("Rejected macro for {}: {}", request.username, e);
                            Outcome::Rejected
                        }
                    }
                }
            }
            ControlCommand::StopAlt(alt) => {
                info!("Stopping alt: {}", alt.username());
                Self::applied(registry.stop(alt.username()))
            }
            ControlCommand::RemoveAlt(alt) => {
                info!("Removing alt: {}", alt.username());
                Self::applied(registry.remove(alt.username()))
            }
            ControlCommand::RemoveMacros(alt) => {
                info!("Removing macros for: {}", alt.username());
                Self::applied(registry.clear_macros(alt.username()) > 0)
            }
            ControlCommand::ReconnectAlt(alt) => {
                info!("Reconnecting alt: {}", alt.username);
                registry.reconnect(&alt.username, &alt.password);
                Outcome::Applied
            }
        };

        match outcome {
            Outcome::Applied => self.stats.applied += 1,
            Outcome::Ignored => self.stats.ignored += 1,
            Outcome::Rejected => self.stats.rejected += 1,
        }
        outcome
    }

    fn applied(changed: bool) -> Outcome {
        if changed {
            Outcome::Applied
        } else {
            Outcome::Ignored
        }
    }

    pub fn stats(&self) -> &ControlStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_add_alt() {
        let command =
            ControlSurface::parse(r#"{"event":"add-alt","data":{"username":"alice","password":"pw"}}"#)
                .unwrap();
        assert_eq!(
            command,
            ControlCommand::AddAlt(AltCredentials {
                username: "alice".to_string(),
                password: "pw".to_string()
            })
        );
    }

    #[test]
    fn test_parse_bare_username() {
        let command = ControlSurface::parse(r#"{"event":"stop-alt","data":"bob"}"#).unwrap();
        assert_eq!(command.username(), "bob");

        let command =
            ControlSurface::parse(r#"{"event":"remove-alt","data":{"username":"bob"}}"#).unwrap();
        assert!(matches!(command, ControlCommand::RemoveAlt(_)));
        assert_eq!(command.username(), "bob");
    }

    #[test]
    fn test_parse_toggle_action() {
        let command = ControlSurface::parse(
            r#"{"event":"toggle-action","data":{"username":"carol","action":"auto-reconnect","state":true}}"#,
        )
        .unwrap();
        assert_eq!(
            command,
            ControlCommand::ToggleAction(ToggleRequest {
                username: "carol".to_string(),
                action: ToggleAction::AutoReconnect,
                state: true
            })
        );
    }

    #[test]
    fn test_parse_macro_cooldown_formats() {
        let numeric = ControlSurface::parse(
            r#"{"event":"add-macro","data":{"username":"dave","command":"/sethome","cooldown":1.5}}"#,
        )
        .unwrap();
        let text = ControlSurface::parse(
            r#"{"event":"add-macro","data":{"username":"dave","command":"/sethome","cooldown":"1.5"}}"#,
        )
        .unwrap();
        assert_eq!(numeric, text);
        match numeric {
            ControlCommand::AddMacro(request) => assert_eq!(request.cooldown, 1.5),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_bad_frames() {
        assert!(matches!(
            ControlSurface::parse("not json"),
            Err(ControlError::Malformed(_))
        ));
        assert!(ControlSurface::parse(r#"{"event":"fly","data":{}}"#).is_err());
        assert!(ControlSurface::parse(
            r#"{"event":"toggle-action","data":{"username":"x","action":"dance","state":true}}"#
        )
        .is_err());
        assert!(matches!(
            ControlSurface::parse(r#"{"event":"stop-alt","data":"  "}"#),
            Err(ControlError::EmptyUsername)
        ));
    }
}
