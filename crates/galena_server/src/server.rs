use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use galena_core::events::{channel, EventReceiver, EventSender};
use galena_core::jobs::JobSystem;

use crate::broadcast::{self, BroadcastScheduler, ChangeSink, LevelMap};
use crate::commands::{Command, HELP_TEXT};
use crate::config::ServerConfig;
use crate::events::ServerEvent;
use crate::level::{Level, LevelContext};
use crate::permissions::BlockPerms;
use crate::physics::{self, PhysicsThread};
use crate::rules::default_rules;

const IDLE_SLICE: Duration = Duration::from_millis(50);

/// The engine host: owns the loaded levels, their physics loops, the
/// shared broadcast loop and the console command stream.
pub struct Server {
    config: ServerConfig,
    levels: LevelMap,
    physics_threads: HashMap<String, PhysicsThread>,
    broadcast: Option<BroadcastScheduler>,
    running: Arc<AtomicBool>,
    events: EventReceiver<ServerEvent>,
    commands: EventReceiver<Command>,
    command_tx: EventSender<Command>,
}

impl Server {
    pub fn new(config: ServerConfig, sink: Arc<dyn ChangeSink>) -> io::Result<Self> {
        let jobs = Arc::new(
            JobSystem::new(None)
                .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))?,
        );
        let (events_tx, events) = channel();
        let (command_tx, commands) = channel();

        let ctx = LevelContext {
            data_dir: config.data_dir.clone(),
            flush_threshold: config.flush_threshold,
            flush_wait: Duration::from_millis(config.flush_lock_timeout_ms),
            reload_threshold: config.reload_threshold,
            max_volume: config.max_volume,
            perms: BlockPerms::from_specs(&config.block_ranks),
            jobs,
            events: events_tx,
        };

        let rules = Arc::new(default_rules());
        let mut levels = HashMap::new();
        let mut physics_threads = HashMap::new();
        let physics_interval = Duration::from_millis(config.physics_interval_ms);
        for spec in &config.levels {
            let level = Level::load(spec, rules.clone(), &ctx)?;
            physics_threads.insert(
                spec.name.clone(),
                physics::spawn(level.clone(), physics_interval),
            );
            levels.insert(spec.name.clone(), level);
        }

        let levels: LevelMap = Arc::new(RwLock::new(levels));
        let broadcast = broadcast::spawn(
            levels.clone(),
            sink,
            Duration::from_millis(config.broadcast_interval_ms),
            config.broadcast_batch_size,
        );

        Ok(Self {
            config,
            levels,
            physics_threads,
            broadcast: Some(broadcast),
            running: Arc::new(AtomicBool::new(true)),
            events,
            commands,
            command_tx,
        })
    }

    /// Shared flag a signal handler can clear to request shutdown.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Sender the console thread feeds parsed commands into.
    pub fn command_sender(&self) -> EventSender<Command> {
        self.command_tx.clone()
    }

    pub fn level(&self, name: &str) -> Option<Arc<Level>> {
        self.levels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Main loop: pump console commands and engine events, autosave on
    /// the configured cadence, shut everything down when the flag clears.
    pub fn run(&mut self) -> io::Result<()> {
        info!(
            "Server running with {} level(s); type /help for commands",
            self.levels.read().unwrap_or_else(PoisonError::into_inner).len()
        );

        let autosave = Duration::from_secs(self.config.autosave_secs.max(1));
        let mut last_save = Instant::now();
        while self.running.load(Ordering::SeqCst) {
            while let Ok(command) = self.commands.try_recv() {
                self.handle_command(command);
            }
            self.drain_events();

            if last_save.elapsed() >= autosave {
                self.save_all();
                last_save = Instant::now();
            }
            std::thread::sleep(IDLE_SLICE);
        }

        self.shutdown()
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Noop => {}
            Command::Stop => {
                info!("Stop requested");
                self.running.store(false, Ordering::SeqCst);
            }
            Command::Save(Some(name)) => match self.level(&name) {
                Some(level) => {
                    if let Err(err) = level.save() {
                        warn!("Failed to save level '{name}': {err}");
                    }
                }
                None => warn!("No such level '{name}'"),
            },
            Command::Save(None) => self.save_all(),
            Command::Levels => {
                let levels = self.levels.read().unwrap_or_else(PoisonError::into_inner);
                for (name, level) in levels.iter() {
                    info!(
                        "  {name}: {:?}, physics {}, {} pending change(s)",
                        level.dims(),
                        if level.physics().enabled() { "on" } else { "off" },
                        level.pending_len()
                    );
                }
            }
            Command::Physics { level, enabled } => match self.level(&level) {
                Some(target) => {
                    target.physics().set_enabled(enabled);
                    info!(
                        "Physics for '{level}' turned {}",
                        if enabled { "on" } else { "off" }
                    );
                }
                None => warn!("No such level '{level}'"),
            },
            Command::Help => {
                for line in HELP_TEXT.lines() {
                    info!("{line}");
                }
            }
            Command::InvalidUsage(usage) => warn!("{usage}"),
            Command::Unknown(head) => warn!("Unknown command '{head}'; try /help"),
        }
    }

    /// Log the engine's outbound events. A real session layer would relay
    /// these to clients; the host just keeps the operator informed.
    fn drain_events(&self) {
        for event in self.events.try_iter() {
            match event {
                ServerEvent::BlockCommitted { level, index, new, .. } => {
                    debug!("[{level}] cell {index} -> block {}", new.0);
                }
                ServerEvent::EditDenied {
                    level,
                    player,
                    pos,
                    reason,
                } => {
                    info!("[{level}] denied {player} at {pos}: {reason}");
                }
                ServerEvent::ReloadThresholdExceeded { level } => {
                    info!("[{level}] bulk edit exceeded the reload threshold; observers should resync");
                }
                ServerEvent::DrawCompleted {
                    level,
                    player,
                    changed,
                } => {
                    info!("[{level}] draw by {player} changed {changed} cell(s)");
                }
            }
        }
    }

    fn save_all(&self) {
        let levels = self.levels.read().unwrap_or_else(PoisonError::into_inner);
        for (name, level) in levels.iter() {
            if let Err(err) = level.save() {
                warn!("Failed to save level '{name}': {err}");
            }
        }
    }

    /// Stop the loops first so nothing commits mid-unload, then persist
    /// and drop every level.
    fn shutdown(&mut self) -> io::Result<()> {
        info!("Shutting down");
        if let Some(mut broadcast) = self.broadcast.take() {
            broadcast.stop();
        }
        for (_, mut thread) in self.physics_threads.drain() {
            thread.stop();
        }

        let mut levels = self.levels.write().unwrap_or_else(PoisonError::into_inner);
        let mut first_err = None;
        for (name, level) in levels.drain() {
            if let Err(err) = level.unload() {
                warn!("Failed to unload level '{name}': {err}");
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
