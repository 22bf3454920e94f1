//! Watch session - foreground service driving the orchestrator
//!
//! Starts every configured system, logs each change as it arrives and reads
//! operator commands from stdin until Ctrl+C or `quit`.

use crate::orchestrator::{SystemEvent, SystemOrchestrator};
use crate::report::{LogNotifier, NotificationSink};
use crate::watcher::WatchEvent;
use crate::Config;
use anyhow::{bail, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, warn};

/// Column width used when printing a diff
const DIFF_COLUMN_WIDTH: usize = 60;

/// Commands accepted on stdin
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Status { system: Option<String> },
    Diff { system: String, path: String },
    Copy { system: String, files: Vec<String> },
    Send { system: String, description: Option<String> },
    Assign { system: String, name: String, description: Option<String> },
    Recapture { system: String },
    Clear { system: String },
    Help,
    Quit,
}

impl OperatorCommand {
    /// Parse one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let rest: Vec<String> = words.map(str::to_string).collect();

        let system = |usage: &str| -> Result<String> {
            match rest.first() {
                Some(system) => Ok(system.clone()),
                None => bail!("Usage: {}", usage),
            }
        };
        let joined = |from: usize| -> Option<String> {
            let text = rest.get(from..).unwrap_or_default().join(" ");
            (!text.is_empty()).then_some(text)
        };

        let command = match verb.to_lowercase().as_str() {
            "status" | "st" => OperatorCommand::Status {
                system: rest.first().cloned(),
            },
            "diff" => {
                if rest.len() < 2 {
                    bail!("Usage: diff <system> <path>");
                }
                OperatorCommand::Diff {
                    system: rest[0].clone(),
                    path: rest[1..].join(" "),
                }
            }
            "copy" => OperatorCommand::Copy {
                system: system("copy <system> [files..]")?,
                files: rest.iter().skip(1).cloned().collect(),
            },
            "send" => OperatorCommand::Send {
                system: system("send <system> [description..]")?,
                description: joined(1),
            },
            "assign" => {
                if rest.len() < 2 {
                    bail!("Usage: assign <system> <name> [description..]");
                }
                OperatorCommand::Assign {
                    system: rest[0].clone(),
                    name: rest[1].clone(),
                    description: joined(2),
                }
            }
            "recapture" => OperatorCommand::Recapture {
                system: system("recapture <system>")?,
            },
            "clear" => OperatorCommand::Clear {
                system: system("clear <system>")?,
            },
            "help" | "?" => OperatorCommand::Help,
            "quit" | "exit" | "q" => OperatorCommand::Quit,
            other => bail!("Unknown command: {} (try 'help')", other),
        };

        Ok(Some(command))
    }
}

/// Counters for the running session
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub changes_seen: u64,
    pub deletions_seen: u64,
    pub copies_completed: u64,
    pub archives_completed: u64,
}

/// Foreground watch session
pub struct Daemon {
    config: Arc<Config>,
    orchestrator: SystemOrchestrator,
    events: Option<UnboundedReceiver<SystemEvent>>,
    notifier: Box<dyn NotificationSink>,
    shutdown_sender: broadcast::Sender<()>,
    is_running: Arc<AtomicBool>,
    stats: SessionStats,
}

impl Daemon {
    /// Create a session that reports copies through the log
    pub fn new(config: Config) -> Self {
        Self::with_notifier(config, Box::new(LogNotifier))
    }

    pub fn with_notifier(config: Config, notifier: Box<dyn NotificationSink>) -> Self {
        let (orchestrator, events) = SystemOrchestrator::new(&config);
        let (shutdown_sender, _) = broadcast::channel(1);

        Self {
            config: Arc::new(config),
            orchestrator,
            events: Some(events),
            notifier,
            shutdown_sender,
            is_running: Arc::new(AtomicBool::new(false)),
            stats: SessionStats::default(),
        }
    }

    pub fn orchestrator(&self) -> &SystemOrchestrator {
        &self.orchestrator
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Sender that stops [`run`](Self::run) when signalled
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_sender.clone()
    }

    /// Run the session until Ctrl+C or `quit`
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting compare-observer session");

        let summary = self
            .orchestrator
            .start_all(None)
            .context("Failed to start watchers")?;
        if !summary.systems_failed.is_empty() {
            warn!("Not watching: {}", summary.systems_failed.join(", "));
        }

        self.is_running.store(true, Ordering::SeqCst);

        let shutdown_receiver = self.shutdown_sender.subscribe();
        let is_running = self.is_running.clone();
        let shutdown_sender = self.shutdown_sender.clone();
        tokio::spawn(async move {
            Self::wait_for_shutdown_signal().await;
            info!("Shutdown signal received, stopping session...");
            is_running.store(false, Ordering::SeqCst);
            let _ = shutdown_sender.send(());
        });

        let started = Instant::now();
        let result = self.session_loop(shutdown_receiver).await;

        self.cleanup(started.elapsed());
        result
    }

    async fn session_loop(&mut self, mut shutdown_receiver: broadcast::Receiver<()>) -> Result<()> {
        let mut events = self
            .events
            .take()
            .context("Session already ran; create a new one")?;
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;

        println!("Type 'help' for commands, Ctrl+C to stop");

        loop {
            tokio::select! {
                _ = shutdown_receiver.recv() => {
                    info!("Shutdown signal received in session loop");
                    break;
                }

                Some(event) = events.recv() => {
                    self.log_event(&event);
                }

                line = lines.next_line(), if stdin_open => {
                    match line {
                        Ok(Some(line)) => {
                            if !self.handle_line(&line).await {
                                break;
                            }
                        }
                        Ok(None) => {
                            debug!("stdin closed, commands disabled");
                            stdin_open = false;
                        }
                        Err(e) => {
                            warn!("Failed to read command: {}", e);
                            stdin_open = false;
                        }
                    }
                }
            }
        }

        info!("Session loop exiting");
        Ok(())
    }

    /// Parse and run one operator line. Returns false to end the session.
    pub async fn handle_line(&mut self, line: &str) -> bool {
        match OperatorCommand::parse(line) {
            Ok(None) => true,
            Ok(Some(OperatorCommand::Quit)) => false,
            Ok(Some(command)) => {
                if let Err(e) = self.execute(command).await {
                    error!("{:#}", e);
                }
                true
            }
            Err(e) => {
                println!("{}", e);
                true
            }
        }
    }

    /// Execute one command
    pub async fn execute(&mut self, command: OperatorCommand) -> Result<()> {
        match command {
            OperatorCommand::Status { system: None } => {
                for overview in self.orchestrator.overview() {
                    println!(
                        "{:<16} {:<10} {:>6} baseline  {:>4} pending",
                        overview.name,
                        format!("{:?}", overview.state),
                        overview.baseline_files,
                        overview.pending_changes
                    );
                }
                println!(
                    "Session: {} change(s), {} deletion(s), {} copy run(s), {} archive(s)",
                    self.stats.changes_seen,
                    self.stats.deletions_seen,
                    self.stats.copies_completed,
                    self.stats.archives_completed
                );
            }
            OperatorCommand::Status {
                system: Some(system),
            } => {
                let entries = self.orchestrator.status(&system)?;
                if entries.is_empty() {
                    println!("{}: no pending changes", system);
                }
                for entry in entries {
                    println!(
                        "{:<8} {}  {}",
                        entry.status.to_string(),
                        entry.last_event_time.format("%H:%M:%S"),
                        entry.relative
                    );
                }
            }
            OperatorCommand::Diff { system, path } => {
                let diff = self.orchestrator.diff(&system, &path)?;
                if diff.is_identical() {
                    println!("{}: {} matches baseline", system, path);
                } else {
                    let stats = diff.stats();
                    print!("{}", diff.render(DIFF_COLUMN_WIDTH));
                    println!(
                        "{} modified, {} added, {} removed",
                        stats.modified, stats.added, stats.removed
                    );
                }
            }
            OperatorCommand::Copy { system, files } => {
                let result = self.orchestrator.copy_selection(&system, &files)?;
                self.stats.copies_completed += 1;
                print_copy_summary(&system, &result);
            }
            OperatorCommand::Send {
                system,
                description,
            } => {
                let result = self.orchestrator.copy_selection(&system, &[])?;
                self.stats.copies_completed += 1;
                print_copy_summary(&system, &result);

                if result.success_count == 0 {
                    warn!("{}: nothing copied, notification not sent", system);
                } else if !self.config.notifications.enabled {
                    info!("{}: notifications disabled", system);
                } else {
                    let notification = self.orchestrator.notification_for(
                        &system,
                        description.as_deref(),
                        &result.copied_files,
                    )?;
                    self.notifier
                        .send(&notification)
                        .await
                        .context("Failed to send notification")?;
                }
            }
            OperatorCommand::Assign {
                system,
                name,
                description,
            } => {
                let archived = self.orchestrator.archive_selection(
                    &system,
                    &name,
                    description.as_deref(),
                    &[],
                )?;
                self.stats.archives_completed += 1;
                println!(
                    "{}: assigned {} file(s) to {} ({} failed)",
                    system,
                    archived.result.success_count,
                    archived.target_dir.display(),
                    archived.result.fail_count
                );
            }
            OperatorCommand::Recapture { system } => {
                let count = self.orchestrator.recapture(&system)?;
                println!("{}: baseline re-captured ({} files)", system, count);
            }
            OperatorCommand::Clear { system } => {
                self.orchestrator.clear_status(&system)?;
                println!("{}: pending changes cleared", system);
            }
            OperatorCommand::Help => print_help(),
            OperatorCommand::Quit => {}
        }

        Ok(())
    }

    fn log_event(&mut self, event: &SystemEvent) {
        let relative = event.relative.as_deref().unwrap_or("?");
        match &event.event {
            WatchEvent::FileChanged(_) | WatchEvent::FileCreated(_) => {
                self.stats.changes_seen += 1;
                let status = event
                    .status
                    .map(|s| s.to_string())
                    .unwrap_or_default();
                info!("{}: {} {}", event.system, status, relative);
            }
            WatchEvent::FileDeleted(_) => {
                self.stats.deletions_seen += 1;
                info!("{}: Deleted {}", event.system, relative);
            }
            WatchEvent::StartedWatching => info!("{}: watching", event.system),
            WatchEvent::StoppedWatching => info!("{}: stopped", event.system),
            WatchEvent::PreloadComplete => debug!("{}: preload complete", event.system),
            WatchEvent::LogMessage(text) => info!("{}: {}", event.system, text),
        }
    }

    /// Wait for Ctrl+C
    async fn wait_for_shutdown_signal() {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        debug!("Ctrl+C received");
    }

    fn cleanup(&mut self, uptime: Duration) {
        self.orchestrator.stop_all();
        self.is_running.store(false, Ordering::SeqCst);
        info!(
            "Session ended after {:.1}m: {} change(s), {} copy run(s)",
            uptime.as_secs_f64() / 60.0,
            self.stats.changes_seen,
            self.stats.copies_completed
        );
    }
}

fn print_copy_summary(system: &str, result: &crate::copy::CopyResult) {
    println!(
        "{}: {} succeeded, {} failed",
        system, result.success_count, result.fail_count
    );
    for failure in result.failures() {
        println!(
            "  x {} ({:?} {}): {}",
            failure.relative,
            failure.role,
            failure.target.display(),
            failure.error.as_deref().unwrap_or("unknown error")
        );
    }
}

fn print_help() {
    println!("Commands:");
    println!("  status [system]                     systems overview, or pending changes");
    println!("  diff <system> <path>                baseline against live content");
    println!("  copy <system> [files..]             copy files (default: all pending)");
    println!("  send <system> [description..]       copy all pending, then notify");
    println!("  assign <system> <name> [desc..]     archive pending files under a name");
    println!("  recapture <system>                  take a fresh baseline");
    println!("  clear <system>                      drop pending changes");
    println!("  quit                                stop watching and exit");
}
