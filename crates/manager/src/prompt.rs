use std::io::{self, BufRead, Stdin, StdinLock, Stdout, Write};

use anyhow::{Context, Result};
use hms_backup_core::Snapshot;
use hms_backup_storage::{SelectionProvider, SnapshotSummary};

/// Operator prompts on a terminal, or on any reader/writer pair in tests.
pub struct TerminalPrompt<R, W> {
    input: R,
    output: W,
}

impl TerminalPrompt<StdinLock<'static>, Stdout> {
    pub fn stdio() -> Self {
        let stdin: Stdin = io::stdin();
        Self::new(stdin.lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> TerminalPrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn ask(&mut self, question: &str) -> Result<String> {
        write!(self.output, "{question}")?;
        self.output.flush()?;
        let mut answer = String::new();
        // end of input reads as an empty answer
        let input = &mut self.input;
        off_runtime(|| input.read_line(&mut answer)).context("read operator answer")?;
        Ok(answer.trim().to_owned())
    }
}

/// Runs a blocking terminal read without stalling the runtime's other tasks.
fn off_runtime<T>(read: impl FnOnce() -> T) -> T {
    use tokio::runtime::{Handle, RuntimeFlavor};

    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(read)
        }
        _ => read(),
    }
}

impl<R: BufRead, W: Write> SelectionProvider for TerminalPrompt<R, W> {
    fn choose_snapshot(&mut self, snapshots: &[SnapshotSummary]) -> Result<String> {
        writeln!(self.output, "Available backups (most recent first):")?;
        for (i, summary) in snapshots.iter().enumerate() {
            match &summary.metadata {
                Some(meta) => {
                    let failed = meta.tables.failed_count();
                    write!(
                        self.output,
                        "  [{}] {}  {}  {:<8} {} records",
                        i + 1,
                        summary.id,
                        meta.date.format("%Y-%m-%d %H:%M:%S UTC"),
                        meta.label,
                        meta.total_records
                    )?;
                    if failed > 0 {
                        write!(self.output, "  ({failed} failed tables)")?;
                    }
                    writeln!(self.output)?;
                }
                None => writeln!(
                    self.output,
                    "  [{}] {}  (metadata unavailable)",
                    i + 1,
                    summary.id
                )?,
            }
        }
        self.ask("Select a backup to restore (number or 'latest'): ")
    }

    fn confirm_restore(&mut self, snapshot: &Snapshot) -> Result<bool> {
        writeln!(
            self.output,
            "WARNING: restoring {} deletes ALL current rows in these tables:",
            snapshot.id
        )?;
        for (table, outcome) in snapshot.metadata.tables.iter() {
            if outcome.success {
                writeln!(self.output, "  - {table} ({} records)", outcome.record_count)?;
            } else {
                writeln!(self.output, "  - {table} (not in backup, skipped)")?;
            }
        }
        let answer = self.ask("Type 'yes' to continue: ")?;
        Ok(answer == "yes")
    }
}
