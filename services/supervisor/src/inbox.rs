//! Filesystem command inbox (§4.4, §6.3): `start <ch>`, `stop <ch>`,
//! `restart <ch>`, `quit`, one per file, polled every 100ms.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

pub enum Command {
    Start(String),
    Stop(String),
    Restart(String),
    Quit,
}

fn parse(line: &str) -> Option<Command> {
    let mut parts = line.trim().split_whitespace();
    match parts.next()? {
        "start" => Some(Command::Start(parts.next()?.to_owned())),
        "stop" => Some(Command::Stop(parts.next()?.to_owned())),
        "restart" => Some(Command::Restart(parts.next()?.to_owned())),
        "quit" => Some(Command::Quit),
        _ => None,
    }
}

pub fn result_path(inbox_path: &Path) -> PathBuf {
    let mut name = inbox_path.as_os_str().to_owned();
    name.push(".result");
    PathBuf::from(name)
}

/// Read and remove the command file if present, returning the parsed
/// command. An unrecognized line is dropped with a warning rather than
/// retried forever.
pub async fn take_command(inbox_path: &Path) -> Option<Command> {
    let contents = fs::read_to_string(inbox_path).await.ok()?;
    let _ = fs::remove_file(inbox_path).await;
    match parse(&contents) {
        Some(cmd) => Some(cmd),
        None => {
            warn!(contents = %contents.trim(), "unrecognized supervisor command");
            None
        }
    }
}

/// Write the `SUCCESS: <msg>` / `ERROR: <msg>` result for the most recently
/// processed command (§6.3). The command file itself is already gone by the
/// time this is called; the result file is left for the operator to read and
/// is overwritten by the next command's result.
pub async fn write_result(inbox_path: &Path, result: Result<String, String>) {
    let line = match result {
        Ok(msg) => format!("SUCCESS: {msg}\n"),
        Err(msg) => format!("ERROR: {msg}\n"),
    };
    let _ = fs::write(result_path(inbox_path), line).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_commands() {
        assert!(matches!(parse("start channelx"), Some(Command::Start(c)) if c == "channelx"));
        assert!(matches!(parse("stop channelx"), Some(Command::Stop(c)) if c == "channelx"));
        assert!(matches!(parse("restart channelx"), Some(Command::Restart(c)) if c == "channelx"));
        assert!(matches!(parse("quit"), Some(Command::Quit)));
    }

    #[test]
    fn rejects_unknown_commands() {
        assert!(parse("frobnicate channelx").is_none());
        assert!(parse("start").is_none());
    }
}
