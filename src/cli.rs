//! Minimal CLI parsing for the catalog commands.

use std::env;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Walk one channel and publish index posts.
    Scan { channel_id: i64, force: bool },
    /// Scan every channel listed in a file, one per line.
    ScanFile { path: String, force: bool },
    /// Mine a channel for candidate encoder tags.
    Mine { channel_id: i64 },
}

#[derive(Debug)]
pub struct CliOptions {
    pub command: Command,
}

impl CliOptions {
    pub fn from_args() -> Result<Self, String> {
        Self::parse(env::args().skip(1).collect())
    }

    fn parse(args: Vec<String>) -> Result<Self, String> {
        let mut args = args.into_iter();
        let command = args.next().ok_or_else(usage)?;

        match command.as_str() {
            "scan" => {
                let (channel_id, force) = parse_channel_args(args)?;
                Ok(Self {
                    command: Command::Scan { channel_id, force },
                })
            }
            "scan-file" => {
                let mut path = None;
                let mut force = false;
                for arg in args {
                    match arg.as_str() {
                        "--force" => force = true,
                        _ if path.is_none() => path = Some(arg),
                        _ => return Err(format!("Unexpected argument: {arg}\n{}", usage())),
                    }
                }
                let path = path.ok_or("scan-file requires a file path".to_string())?;
                Ok(Self {
                    command: Command::ScanFile { path, force },
                })
            }
            "mine" => {
                let (channel_id, _) = parse_channel_args(args)?;
                Ok(Self {
                    command: Command::Mine { channel_id },
                })
            }
            other => Err(format!("Unknown command: {other}\n{}", usage())),
        }
    }
}

fn parse_channel_args(args: impl Iterator<Item = String>) -> Result<(i64, bool), String> {
    let mut channel_id = None;
    let mut force = false;
    for arg in args {
        match arg.as_str() {
            "--force" => force = true,
            _ if channel_id.is_none() => {
                channel_id =
                    Some(arg.parse().map_err(|_| format!("Invalid channel ID: {arg}"))?);
            }
            _ => return Err(format!("Unexpected argument: {arg}\n{}", usage())),
        }
    }
    let channel_id = channel_id.ok_or_else(|| format!("Missing channel ID\n{}", usage()))?;
    Ok((channel_id, force))
}

fn usage() -> String {
    "Usage:\n  \
     mediadex scan <channel_id> [--force]\n  \
     mediadex scan-file <path> [--force]\n  \
     mediadex mine <channel_id>"
        .to_string()
}
