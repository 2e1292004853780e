//! The process group: ordered startup, monitoring, and teardown.
//!
//! Each launched child gets a monitor task that waits on it and reports the
//! exit on one channel shared by the whole group. The group's control loop
//! waits on that channel and on the shared shutdown token; whichever fires
//! first tears every remaining child down in reverse launch order.

use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use chrono::Utc;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::SupervisorError;
use crate::log_tail::{forward_lines, LogTail};
use crate::process::{ChildExit, ServiceSpec, SupervisedProcess};
use crate::signal::send_terminate;
use crate::workdir::{SharedWorkdir, WORKDIR_ENV};

/// Default time a freshly launched child must stay alive.
pub const DEFAULT_STARTUP_GRACE: Duration = Duration::from_secs(5);

/// Default window a child gets to exit after SIGTERM before it is killed.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between health checks.
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Timing knobs for a [`ProcessGroup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupSettings {
    pub startup_grace: Duration,
    pub shutdown_timeout: Duration,
    pub health_check_interval: Duration,
}

impl Default for GroupSettings {
    fn default() -> Self {
        Self {
            startup_grace: DEFAULT_STARTUP_GRACE,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
        }
    }
}

struct Member {
    process: SupervisedProcess,
    /// Cancelled to force-kill the child.
    kill: CancellationToken,
    /// `None` once the monitor has been joined.
    monitor: Option<JoinHandle<ChildExit>>,
}

impl Member {
    fn is_running(&self) -> bool {
        self.monitor.as_ref().is_some_and(|m| !m.is_finished())
    }
}

/// Owns the supervised children as one unit.
pub struct ProcessGroup {
    settings: GroupSettings,
    shutdown: CancellationToken,
    workdir: Option<SharedWorkdir>,
    workdir_ready: bool,
    members: Vec<Member>,
    exit_tx: mpsc::UnboundedSender<ChildExit>,
    exit_rx: mpsc::UnboundedReceiver<ChildExit>,
    logs: LogTail,
}

impl ProcessGroup {
    pub fn new(settings: GroupSettings, shutdown: CancellationToken) -> Self {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        Self {
            settings,
            shutdown,
            workdir: None,
            workdir_ready: false,
            members: Vec::new(),
            exit_tx,
            exit_rx,
            logs: LogTail::default(),
        }
    }

    /// Directory prepared once, before the first service that needs it.
    pub fn with_shared_workdir(mut self, workdir: SharedWorkdir) -> Self {
        self.workdir = Some(workdir);
        self
    }

    pub fn with_log_tail(mut self, logs: LogTail) -> Self {
        self.logs = logs;
        self
    }

    pub fn log_tail(&self) -> &LogTail {
        &self.logs
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Current view of every child, in launch order.
    pub fn processes(&self) -> Vec<SupervisedProcess> {
        self.members
            .iter()
            .map(|m| SupervisedProcess {
                alive: m.process.alive && m.is_running(),
                ..m.process.clone()
            })
            .collect()
    }

    /// Launch each service in order, verifying it survives the grace period
    /// before the next one starts.
    ///
    /// On failure every child launched so far is torn down. If shutdown is
    /// requested midway the remaining services are not launched.
    pub async fn start_all(&mut self, services: &[ServiceSpec]) -> Result<(), SupervisorError> {
        for spec in services {
            if self.shutdown.is_cancelled() {
                tracing::info!(service = %spec.name, "Shutdown requested, skipping launch");
                return Ok(());
            }
            if let Err(e) = self.start(spec).await {
                self.terminate_all().await;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Launch one service and wait out its grace period.
    ///
    /// Any child of the group exiting during the grace period is a startup
    /// failure. The caller decides whether to tear the group down.
    pub async fn start(&mut self, spec: &ServiceSpec) -> Result<(), SupervisorError> {
        self.launch(spec)?;

        tokio::select! {
            Some(exit) = self.exit_rx.recv() => {
                self.mark_exited(&exit);
                tracing::error!(
                    service = %exit.service,
                    pid = exit.pid,
                    status = %exit,
                    "Service died during startup",
                );
                Err(SupervisorError::StartupFailed(exit))
            }
            _ = tokio::time::sleep(self.settings.startup_grace) => {
                tracing::info!(service = %spec.name, "Service is up");
                Ok(())
            }
            _ = self.shutdown.cancelled() => Ok(()),
        }
    }

    /// Spawn one child and its monitor and output forwarders.
    fn launch(&mut self, spec: &ServiceSpec) -> Result<u32, SupervisorError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if spec.uses_shared_workdir {
            if let Some(workdir) = &self.workdir {
                if !self.workdir_ready {
                    workdir.prepare()?;
                    self.workdir_ready = true;
                }
                cmd.env(WORKDIR_ENV, workdir.path());
            }
        }

        let spawn_error = |source| SupervisorError::Spawn {
            service: spec.name.clone(),
            source,
        };
        let mut child = cmd.spawn().map_err(spawn_error)?;
        let pid = child
            .id()
            .ok_or_else(|| spawn_error(std::io::Error::other("child exited before its pid was read")))?;

        tracing::info!(service = %spec.name, pid, program = %spec.program, "Launched service");

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(spec.name.clone(), "stdout", stdout, self.logs.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(spec.name.clone(), "stderr", stderr, self.logs.clone()));
        }

        let kill = CancellationToken::new();
        let monitor = {
            let kill = kill.clone();
            let tx = self.exit_tx.clone();
            let service = spec.name.clone();
            tokio::spawn(async move {
                let status = tokio::select! {
                    status = child.wait() => status,
                    _ = kill.cancelled() => {
                        if let Err(e) = child.start_kill() {
                            tracing::warn!(service = %service, pid, error = %e, "Failed to kill service");
                        }
                        child.wait().await
                    }
                };
                let exit = ChildExit::from_wait(service, pid, status);
                // The receiver only goes away with the group itself.
                let _ = tx.send(exit.clone());
                exit
            })
        };

        self.members.push(Member {
            process: SupervisedProcess {
                name: spec.name.clone(),
                pid,
                launched_at: Utc::now(),
                last_health_check: None,
                alive: true,
            },
            kill,
            monitor: Some(monitor),
        });

        Ok(pid)
    }

    /// Drive `work` while watching the children already launched.
    ///
    /// If a child exits first, the shutdown token is cancelled so `work` can
    /// wind down on its own, then the group is torn down and the exit is
    /// reported as `ChildCrashed`.
    pub async fn run_alongside<F: Future>(&mut self, work: F) -> Result<F::Output, SupervisorError> {
        tokio::pin!(work);

        let exit = tokio::select! {
            output = &mut work => return Ok(output),
            Some(exit) = self.exit_rx.recv() => exit,
        };

        self.mark_exited(&exit);
        tracing::error!(
            service = %exit.service,
            pid = exit.pid,
            status = %exit,
            "Service exited while startup work was running, tearing down the group",
        );
        self.shutdown.cancel();
        let _ = work.await;
        self.terminate_all().await;
        Err(SupervisorError::ChildCrashed(exit))
    }

    /// Steady state: wait for shutdown or the first unexpected exit.
    ///
    /// Returns `Ok` after a requested shutdown and `ChildCrashed` when a child
    /// died on its own. Either way every child has been reaped on return.
    pub async fn run_until_stopped(&mut self) -> Result<(), SupervisorError> {
        let mut health = tokio::time::interval(self.settings.health_check_interval);
        health.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Stopping supervised services");
                    self.terminate_all().await;
                    return Ok(());
                }
                Some(exit) = self.exit_rx.recv() => {
                    self.mark_exited(&exit);
                    tracing::error!(
                        service = %exit.service,
                        pid = exit.pid,
                        status = %exit,
                        "Service exited unexpectedly, tearing down the group",
                    );
                    self.terminate_all().await;
                    return Err(SupervisorError::ChildCrashed(exit));
                }
                _ = health.tick() => self.health_check(),
            }
        }
    }

    /// Record a health check for every living child.
    pub fn health_check(&mut self) {
        let now = Utc::now();
        for member in &mut self.members {
            if member.is_running() {
                member.process.last_health_check = Some(now);
            } else {
                member.process.alive = false;
            }
        }
        let alive = self.members.iter().filter(|m| m.process.alive).count();
        tracing::debug!(alive, total = self.members.len(), "Health check");
    }

    /// Stop every child in reverse launch order and reap it.
    ///
    /// Each child gets SIGTERM and `shutdown_timeout` to exit before it is
    /// killed. Safe to call more than once.
    pub async fn terminate_all(&mut self) {
        self.shutdown.cancel();
        let timeout = self.settings.shutdown_timeout;

        for member in self.members.iter_mut().rev() {
            let Some(mut monitor) = member.monitor.take() else {
                continue;
            };
            let service = &member.process.name;
            let pid = member.process.pid;

            if !monitor.is_finished() {
                tracing::info!(service = %service, pid, "Sending SIGTERM");
                if let Err(e) = send_terminate(pid) {
                    tracing::warn!(service = %service, pid, error = %e, "Failed to signal service");
                }
            }

            match tokio::time::timeout(timeout, &mut monitor).await {
                Ok(Ok(exit)) => {
                    tracing::info!(service = %service, pid, status = %exit, "Service stopped");
                }
                Ok(Err(e)) => {
                    tracing::warn!(service = %service, pid, error = %e, "Service monitor failed");
                }
                Err(_) => {
                    tracing::warn!(
                        service = %service,
                        pid,
                        timeout_secs = timeout.as_secs(),
                        "Service ignored SIGTERM, killing",
                    );
                    member.kill.cancel();
                    if let Err(e) = monitor.await {
                        tracing::warn!(service = %service, pid, error = %e, "Service monitor failed");
                    }
                }
            }
            member.process.alive = false;
        }

        // Exits caused by the teardown are expected; drop their reports.
        while self.exit_rx.try_recv().is_ok() {}
    }

    fn mark_exited(&mut self, exit: &ChildExit) {
        if let Some(member) = self
            .members
            .iter_mut()
            .find(|m| m.process.pid == exit.pid)
        {
            member.process.alive = false;
        }
    }
}
