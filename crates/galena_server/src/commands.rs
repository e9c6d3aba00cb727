/// Console commands accepted on the server's stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Blank line; nothing to do.
    Noop,
    Stop,
    /// Save one level, or every level when no name is given.
    Save(Option<String>),
    Levels,
    /// Toggle the physics loop for one level.
    Physics { level: String, enabled: bool },
    Help,
    InvalidUsage(&'static str),
    Unknown(String),
}

pub const HELP_TEXT: &str = "\
commands:
  /stop                 save everything and shut down
  /save [level]         save one level, or all of them
  /levels               list loaded levels
  /physics <level> on|off
  /help                 this text";

pub fn parse_command(line: &str) -> Command {
    let mut parts = line.split_whitespace();
    let Some(head) = parts.next() else {
        return Command::Noop;
    };

    match head {
        "/stop" => Command::Stop,
        "/save" => Command::Save(parts.next().map(str::to_string)),
        "/levels" => Command::Levels,
        "/physics" => {
            let (Some(level), Some(state)) = (parts.next(), parts.next()) else {
                return Command::InvalidUsage("usage: /physics <level> on|off");
            };
            match state {
                "on" => Command::Physics {
                    level: level.to_string(),
                    enabled: true,
                },
                "off" => Command::Physics {
                    level: level.to_string(),
                    enabled: false,
                },
                _ => Command::InvalidUsage("usage: /physics <level> on|off"),
            }
        }
        "/help" => Command::Help,
        other => Command::Unknown(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_command, Command};

    #[test]
    fn known_commands_parse() {
        assert_eq!(parse_command("/stop"), Command::Stop);
        assert_eq!(parse_command("/save"), Command::Save(None));
        assert_eq!(
            parse_command("/save main"),
            Command::Save(Some("main".to_string()))
        );
        assert_eq!(parse_command("/levels"), Command::Levels);
        assert_eq!(parse_command("/help"), Command::Help);
    }

    #[test]
    fn physics_toggle_needs_a_level_and_a_state() {
        assert_eq!(
            parse_command("/physics main off"),
            Command::Physics {
                level: "main".to_string(),
                enabled: false,
            }
        );
        assert!(matches!(
            parse_command("/physics main"),
            Command::InvalidUsage(_)
        ));
        assert!(matches!(
            parse_command("/physics main maybe"),
            Command::InvalidUsage(_)
        ));
    }

    #[test]
    fn blanks_and_strangers_are_distinguished() {
        assert_eq!(parse_command("   "), Command::Noop);
        assert_eq!(
            parse_command("/teleport 1 2 3"),
            Command::Unknown("/teleport".to_string())
        );
    }
}
