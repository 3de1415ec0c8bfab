use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The complete vocabulary of the live control surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    Play,
    Pause,
    Reset,
    Jump { frame: usize },
    SetParameter { field: String, value: String },
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlCommand::Play => f.write_str("play"),
            ControlCommand::Pause => f.write_str("pause"),
            ControlCommand::Reset => f.write_str("reset"),
            ControlCommand::Jump { frame } => write!(f, "jump {}", frame),
            ControlCommand::SetParameter { field, value } => write!(f, "set {} {}", field, value),
        }
    }
}

/// Parses the text form: `play`, `pause`, `reset`, `jump <frame>`, `set <field> <value>`.
impl FromStr for ControlCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let verb = words.next().ok_or_else(|| "empty command".to_string())?;
        let command = match verb.to_ascii_lowercase().as_str() {
            "play" => ControlCommand::Play,
            "pause" => ControlCommand::Pause,
            "reset" => ControlCommand::Reset,
            "jump" => {
                let raw = words.next().ok_or_else(|| "usage: jump <frame>".to_string())?;
                let frame = raw
                    .parse()
                    .map_err(|_| format!("frame must be a non-negative integer, got {:?}", raw))?;
                ControlCommand::Jump { frame }
            }
            "set" => {
                let field = words.next().ok_or_else(|| "usage: set <field> <value>".to_string())?;
                let value: Vec<&str> = words.by_ref().collect();
                if value.is_empty() {
                    return Err("usage: set <field> <value>".to_string());
                }
                return Ok(ControlCommand::SetParameter {
                    field: field.to_string(),
                    value: value.join(" "),
                });
            }
            other => return Err(format!("unknown command: {}", other)),
        };
        match words.next() {
            Some(extra) => Err(format!("unexpected argument {:?} after `{}`", extra, verb)),
            None => Ok(command),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_commands() {
        assert_eq!("play".parse::<ControlCommand>(), Ok(ControlCommand::Play));
        assert_eq!(" JUMP 42 ".parse::<ControlCommand>(), Ok(ControlCommand::Jump { frame: 42 }));
        assert_eq!(
            "set meal_size 90".parse::<ControlCommand>(),
            Ok(ControlCommand::SetParameter {
                field: "meal_size".into(),
                value: "90".into()
            })
        );
        assert!("jump -3".parse::<ControlCommand>().is_err());
        assert!("pause now".parse::<ControlCommand>().is_err());
        assert!("set meal_size".parse::<ControlCommand>().is_err());
        assert!("".parse::<ControlCommand>().is_err());
    }

    #[test]
    fn json_form_is_tagged() {
        let command: ControlCommand = serde_json::from_str(r#"{"command":"jump","frame":5}"#).unwrap();
        assert_eq!(command, ControlCommand::Jump { frame: 5 });
        assert_eq!(command.to_string(), "jump 5");
    }
}
