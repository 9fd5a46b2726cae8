//! Operator console commands read from stdin.

use crate::session::UserAction;

/// One console line, parsed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConsoleCommand {
    Action(UserAction),
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  connect | disconnect | toggle   control connection
  video | audio | speaker         toggle camera, microphone, monitor
  volume N | fbvolume N           microphone / monitor slider (0-2000)
  selftest                        local loopback test
  status                          show session state
  quit";

/// Parse one line. Blank lines give `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let mut words = line.split_whitespace();
    let Some(word) = words.next() else {
        return Ok(None);
    };

    let command = match word.to_ascii_lowercase().as_str() {
        "connect" => ConsoleCommand::Action(UserAction::Connect),
        "disconnect" => ConsoleCommand::Action(UserAction::Disconnect),
        "toggle" => ConsoleCommand::Action(UserAction::ToggleConnect),
        "video" => ConsoleCommand::Action(UserAction::ToggleVideo),
        "audio" | "mic" => ConsoleCommand::Action(UserAction::ToggleAudio),
        "speaker" | "monitor" => ConsoleCommand::Action(UserAction::ToggleMonitor),
        "volume" => ConsoleCommand::Action(UserAction::MicVolume(slider(words.next())?)),
        "fbvolume" => ConsoleCommand::Action(UserAction::MonitorVolume(slider(words.next())?)),
        "selftest" => ConsoleCommand::Action(UserAction::SelfTest),
        "status" => ConsoleCommand::Status,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(format!("unknown command {:?}, try \"help\"", other)),
    };

    if let Some(extra) = words.next() {
        return Err(format!("unexpected argument {:?}", extra));
    }
    Ok(Some(command))
}

fn slider(arg: Option<&str>) -> Result<i32, String> {
    let arg = arg.ok_or_else(|| "missing slider value (0-2000)".to_string())?;
    match arg.parse::<i32>() {
        Ok(v) if (0..=2000).contains(&v) => Ok(v),
        _ => Err(format!("slider value {:?} is not in 0-2000", arg)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_actions() {
        assert_eq!(
            parse_line("toggle").unwrap(),
            Some(ConsoleCommand::Action(UserAction::ToggleConnect))
        );
        assert_eq!(
            parse_line("  Volume 1000 ").unwrap(),
            Some(ConsoleCommand::Action(UserAction::MicVolume(1000)))
        );
        assert_eq!(
            parse_line("fbvolume 0").unwrap(),
            Some(ConsoleCommand::Action(UserAction::MonitorVolume(0)))
        );
        assert_eq!(parse_line("status").unwrap(), Some(ConsoleCommand::Status));
        assert_eq!(parse_line("").unwrap(), None);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_line("volume").is_err());
        assert!(parse_line("volume 2001").is_err());
        assert!(parse_line("video now").is_err());
        assert!(parse_line("dance").is_err());
    }
}
