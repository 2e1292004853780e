//! Scripted stand-ins for the migration tool and the database.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use deployd_core::subprocess::{CommandError, CommandOutput};
use deployd_db::DbError;
use deployd_migrate::prober::DatabaseProbe;
use deployd_migrate::tool::MigrationTool;

/// Build a finished command result.
pub fn output(exit_code: i32, stdout: &str, stderr: &str) -> CommandOutput {
    CommandOutput {
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        exit_code,
        duration_ms: 1,
    }
}

pub fn ok(stdout: &str) -> CommandOutput {
    output(0, stdout, "")
}

pub fn failed(stderr: &str) -> CommandOutput {
    output(1, "", stderr)
}

/// A migration tool whose answers are scripted up front.
///
/// `upgrade` pops results in order and succeeds once the script runs out.
/// `generate` writes `generated_file` (when set) so the executor can see a
/// new migration appear on disk.
pub struct FakeTool {
    pub current_reply: CommandOutput,
    pub heads_reply: CommandOutput,
    pub generate_reply: CommandOutput,
    pub generated_file: Option<PathBuf>,
    upgrade_script: Mutex<VecDeque<CommandOutput>>,
    pub current_calls: AtomicU32,
    pub heads_calls: AtomicU32,
    pub generate_calls: AtomicU32,
    pub upgrade_calls: AtomicU32,
}

impl FakeTool {
    /// Database at `current` (empty for uninitialized), chain heads `heads`.
    pub fn new(current: &str, heads: &str) -> Self {
        Self {
            current_reply: ok(current),
            heads_reply: ok(heads),
            generate_reply: ok("Generating alembic/versions/1975ea83b712_initial_schema.py ...  done"),
            generated_file: None,
            upgrade_script: Mutex::new(VecDeque::new()),
            current_calls: AtomicU32::new(0),
            heads_calls: AtomicU32::new(0),
            generate_calls: AtomicU32::new(0),
            upgrade_calls: AtomicU32::new(0),
        }
    }

    pub fn with_current_reply(mut self, reply: CommandOutput) -> Self {
        self.current_reply = reply;
        self
    }

    pub fn with_heads_reply(mut self, reply: CommandOutput) -> Self {
        self.heads_reply = reply;
        self
    }

    pub fn generating(mut self, path: PathBuf) -> Self {
        self.generated_file = Some(path);
        self
    }

    pub fn with_upgrades(self, replies: Vec<CommandOutput>) -> Self {
        *self.upgrade_script.lock().expect("lock") = replies.into();
        self
    }

    /// Number of calls that could have written to the database or disk.
    pub fn writes(&self) -> u32 {
        self.generate_calls.load(Ordering::SeqCst) + self.upgrade_calls.load(Ordering::SeqCst)
    }
}

impl MigrationTool for FakeTool {
    async fn current(&self) -> Result<CommandOutput, CommandError> {
        self.current_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.current_reply.clone())
    }

    async fn heads(&self) -> Result<CommandOutput, CommandError> {
        self.heads_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.heads_reply.clone())
    }

    async fn generate(&self, _message: &str) -> Result<CommandOutput, CommandError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(path) = &self.generated_file {
            std::fs::write(path, "\"\"\"initial schema\"\"\"\n").map_err(CommandError::Io)?;
        }
        Ok(self.generate_reply.clone())
    }

    async fn upgrade(&self) -> Result<CommandOutput, CommandError> {
        self.upgrade_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.upgrade_script.lock().expect("lock").pop_front();
        Ok(next.unwrap_or_else(|| ok("")))
    }
}

/// Database stand-in that is either up or down.
pub struct FakeDatabase {
    pub reachable: bool,
}

impl FakeDatabase {
    pub fn up() -> Self {
        Self { reachable: true }
    }

    pub fn down() -> Self {
        Self { reachable: false }
    }
}

impl DatabaseProbe for FakeDatabase {
    async fn ping(&self) -> Result<(), DbError> {
        if self.reachable {
            Ok(())
        } else {
            Err(DbError::Timeout {
                target: "mysql://app:***@db:3306/blog".to_string(),
                secs: 10,
            })
        }
    }
}

/// Create `count` migration files in `dir`.
pub fn write_migrations(dir: &std::path::Path, count: usize) {
    std::fs::create_dir_all(dir).expect("create versions dir");
    for i in 0..count {
        std::fs::write(dir.join(format!("{i:04}_revision.py")), "").expect("write migration");
    }
}
