use std::fmt;
use std::path::PathBuf;

use anyhow::{bail, Result};
use chrono::{Datelike, NaiveDate, Weekday};

pub const USAGE: &str = "\
usage: hms-backup [--config <path>] <command>

commands:
  backup [manual|daily|weekly|monthly]   run one backup now (default: manual)
  backup setup                           print a cron template for scheduled runs
  restore                                interactively restore a snapshot
  serve                                  daily scheduler plus the HTTP API";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupLabel {
    Manual,
    Daily,
    Weekly,
    Monthly,
}

impl BackupLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            BackupLabel::Manual => "manual",
            BackupLabel::Daily => "daily",
            BackupLabel::Weekly => "weekly",
            BackupLabel::Monthly => "monthly",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "manual" => Some(BackupLabel::Manual),
            "daily" => Some(BackupLabel::Daily),
            "weekly" => Some(BackupLabel::Weekly),
            "monthly" => Some(BackupLabel::Monthly),
            _ => None,
        }
    }

    /// Label of the scheduled run on `date`: the first of the month is
    /// monthly, Sundays are weekly, every other day is daily.
    pub fn for_date(date: NaiveDate) -> Self {
        if date.day() == 1 {
            BackupLabel::Monthly
        } else if date.weekday() == Weekday::Sun {
            BackupLabel::Weekly
        } else {
            BackupLabel::Daily
        }
    }
}

impl fmt::Display for BackupLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Backup(BackupLabel),
    Setup,
    Restore,
    Serve,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub config_path: Option<PathBuf>,
    pub command: Command,
}

/// Parses arguments without the program name.
pub fn parse_args(args: &[String]) -> Result<Invocation> {
    let mut config_path: Option<PathBuf> = None;
    let mut words: Vec<&str> = Vec::new();
    let mut i = 0;

    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                if i >= args.len() {
                    bail!("--config requires a path argument");
                }
                config_path = Some(PathBuf::from(&args[i]));
            }
            "-h" | "--help" => bail!("{USAGE}"),
            other => words.push(other),
        }
        i += 1;
    }

    let command = match words.as_slice() {
        ["backup"] => Command::Backup(BackupLabel::Manual),
        ["backup", "setup"] => Command::Setup,
        ["backup", label] => match BackupLabel::parse(label) {
            Some(label) => Command::Backup(label),
            None => bail!("unknown backup label: {label}\n\n{USAGE}"),
        },
        ["restore"] => Command::Restore,
        ["serve"] => Command::Serve,
        [] => bail!("missing command\n\n{USAGE}"),
        other => bail!("unrecognised arguments: {}\n\n{USAGE}", other.join(" ")),
    };

    Ok(Invocation {
        config_path,
        command,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Invocation> {
        let owned: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        parse_args(&owned)
    }

    #[test]
    fn backup_defaults_to_manual() {
        let inv = parse(&["backup"]).unwrap();
        assert_eq!(inv.command, Command::Backup(BackupLabel::Manual));
        assert_eq!(inv.config_path, None);
    }

    #[test]
    fn parses_labels_setup_and_config() {
        let inv = parse(&["--config", "/etc/hms/backup.toml", "backup", "weekly"]).unwrap();
        assert_eq!(inv.command, Command::Backup(BackupLabel::Weekly));
        assert_eq!(inv.config_path, Some(PathBuf::from("/etc/hms/backup.toml")));

        assert_eq!(parse(&["backup", "setup"]).unwrap().command, Command::Setup);
        assert_eq!(parse(&["restore"]).unwrap().command, Command::Restore);
        assert_eq!(parse(&["serve", "--config", "x.toml"]).unwrap().command, Command::Serve);
    }

    #[test]
    fn rejects_bad_invocations() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["backup", "hourly"]).is_err());
        assert!(parse(&["restore", "now"]).is_err());
        assert!(parse(&["--config"]).is_err());
    }

    #[test]
    fn label_follows_calendar() {
        let first = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let sunday = NaiveDate::from_ymd_opt(2025, 1, 19).unwrap();
        let monday = NaiveDate::from_ymd_opt(2025, 1, 20).unwrap();
        assert_eq!(BackupLabel::for_date(first), BackupLabel::Monthly);
        assert_eq!(BackupLabel::for_date(sunday), BackupLabel::Weekly);
        assert_eq!(BackupLabel::for_date(monday), BackupLabel::Daily);
    }
}
