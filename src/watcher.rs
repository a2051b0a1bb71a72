//! The watcher daemon: crash-restart polling, file-change restarts, and
//! remote-command handling, serialized through one event loop.
//!
//! Every side channel (the poll tick, the bus subscription, debounced file
//! watchers, armed restart timers) only ever sends a [`WatcherEvent`]; all
//! shared daemon state is owned by a single [`Watcher`] value and mutated
//! exclusively on the loop thread.

use std::{
    collections::{HashMap, HashSet},
    fs,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{Receiver, Sender},
        Arc,
    },
    thread,
    time::{Duration, SystemTime},
};
use tracing::{debug, error, info, warn};

use crate::bus::{
    Bus, BusCommand, CMD_RELOAD, CMD_STOP, CMD_UPDATE_STOPPED_SERVICES,
};
use crate::constants::POLL_INTERVAL_MS;
use crate::error::ManagerError;
use crate::fswatch::{self, FileWatch};
use crate::registry::ServiceRegistry;
use crate::service::{Service, ServiceStatus};

/// Events serialized through the watcher loop.
#[derive(Debug)]
pub enum WatcherEvent {
    /// Periodic poll-cycle trigger.
    Tick,
    /// Broadcast command received from the bus.
    Command(BusCommand),
    /// Debounced change on a service's watched file.
    FileChanged {
        /// Owning service.
        service: String,
    },
    /// A crash-restart delay elapsed.
    RestartDue {
        /// Service whose restart timer fired.
        service: String,
    },
    /// A file-change-triggered restart finished (successfully or not).
    RestartFinished {
        /// Service whose restart completed.
        service: String,
    },
    /// Process-level interrupt; treated exactly like a remote stop.
    Interrupted,
}

/// Long-lived daemon that keeps enabled services alive.
pub struct Watcher {
    registry: ServiceRegistry,
    bus: Bus,
    tx: Sender<WatcherEvent>,
    rx: Receiver<WatcherEvent>,
    /// Local cache of the bus's stopped-set.
    stopped_cache: HashSet<String>,
    /// Services with an armed crash-restart timer.
    scheduled_for_restart: HashSet<String>,
    /// Services with a file-change restart currently in flight.
    restarting: HashSet<String>,
    file_watchers: Vec<FileWatch>,
    /// Last seen modification time per watched service; `None` after the
    /// watched file disappeared.
    last_modified: HashMap<String, Option<SystemTime>>,
}

impl Watcher {
    /// Creates a watcher over an injected registry and bus.
    pub fn new(registry: ServiceRegistry, bus: Bus) -> Self {
        let (tx, rx) = std::sync::mpsc::channel();
        Self {
            registry,
            bus,
            tx,
            rx,
            stopped_cache: HashSet::new(),
            scheduled_for_restart: HashSet::new(),
            restarting: HashSet::new(),
            file_watchers: Vec::new(),
            last_modified: HashMap::new(),
        }
    }

    /// Runs the daemon until a stop command or interrupt arrives.
    pub fn run(mut self) -> Result<(), ManagerError> {
        let subscriber = self.bus.subscribe()?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let tx = self.tx.clone();
        let receiver_shutdown = Arc::clone(&shutdown);
        // The receive thread owns the subscriber; dropping it on the way out
        // unbinds the command socket.
        let receiver = thread::spawn(move || {
            while !receiver_shutdown.load(Ordering::Relaxed) {
                match subscriber.try_recv() {
                    Ok(Some(command)) => {
                        if tx.send(WatcherEvent::Command(command)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => thread::sleep(Duration::from_millis(50)),
                    Err(err) => {
                        warn!("Failed to receive bus command: {err}");
                        thread::sleep(Duration::from_millis(100));
                    }
                }
            }
        });

        let tx = self.tx.clone();
        if let Err(err) = ctrlc::set_handler(move || {
            let _ = tx.send(WatcherEvent::Interrupted);
        }) {
            warn!("Unable to register interrupt handler: {err}");
        }

        self.init_file_watchers();
        self.log_watched_services();
        self.stopped_cache = self.bus.stopped_services()?.into_iter().collect();

        let tx = self.tx.clone();
        thread::spawn(move || {
            loop {
                thread::sleep(Duration::from_millis(POLL_INTERVAL_MS as u64));
                if tx.send(WatcherEvent::Tick).is_err() {
                    break;
                }
            }
        });

        info!("Watcher initialized");
        self.run_cycle();

        loop {
            let event = match self.rx.recv() {
                Ok(event) => event,
                Err(_) => break,
            };
            if !self.handle_event(event) {
                break;
            }
        }

        shutdown.store(true, Ordering::Relaxed);
        if receiver.join().is_err() {
            warn!("Bus receive thread panicked during shutdown");
        }

        Ok(())
    }

    /// Dispatches one event; returns `false` when the daemon should exit.
    fn handle_event(&mut self, event: WatcherEvent) -> bool {
        match event {
            WatcherEvent::Tick => self.run_cycle(),
            WatcherEvent::Command(command) => match command.name.as_str() {
                CMD_RELOAD => self.handle_reload(),
                CMD_UPDATE_STOPPED_SERVICES => self.refresh_stopped_cache(),
                CMD_STOP => {
                    self.handle_stop();
                    return false;
                }
                other => debug!("Ignoring unknown bus command '{other}'"),
            },
            WatcherEvent::Interrupted => {
                self.handle_stop();
                return false;
            }
            WatcherEvent::FileChanged { service } => self.handle_file_changed(&service),
            WatcherEvent::RestartDue { service } => self.handle_restart_due(&service),
            WatcherEvent::RestartFinished { service } => {
                self.restarting.remove(&service);
            }
        }
        true
    }

    /// Runs one poll cycle, containing any failure so the timer keeps going.
    fn run_cycle(&mut self) {
        if let Err(err) = self.poll_cycle() {
            error!("Poll cycle failed: {err}");
        }
    }

    fn poll_cycle(&mut self) -> Result<(), ManagerError> {
        if let Err(err) = self.bus.write_heartbeat() {
            debug!("Failed to write heartbeat: {err}");
        }

        let candidates: Vec<Arc<Service>> = self
            .crash_watched_services()
            .into_iter()
            .filter(|service| !self.stopped_cache.contains(&service.name))
            .filter(|service| !self.scheduled_for_restart.contains(&service.name))
            .collect();

        // Each cycle probes current reality, not a stale snapshot.
        self.registry.invalidate_running_cache();

        for service in candidates {
            match service.status() {
                Ok(ServiceStatus::Running) => continue,
                Ok(_) => {}
                Err(err) => {
                    warn!("Failed to probe service '{}': {err}", service.name);
                    continue;
                }
            }

            // The stopped-set may have changed while the probe ran; consult
            // the authoritative copy before scheduling.
            let stopped_now = self.bus.stopped_services()?;
            if stopped_now.iter().any(|name| name == &service.name) {
                self.stopped_cache.insert(service.name.clone());
                continue;
            }

            let delay = service.restart_seconds.unwrap_or(0);
            info!(
                "Service {} went offline. It will be restarted in {delay} seconds.",
                service.name
            );
            self.scheduled_for_restart.insert(service.name.clone());

            let tx = self.tx.clone();
            let name = service.name.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_secs(delay));
                let _ = tx.send(WatcherEvent::RestartDue { service: name });
            });
        }

        Ok(())
    }

    fn handle_restart_due(&mut self, name: &str) {
        let service = match self.registry.get(name) {
            Some(service) => Arc::clone(service),
            None => {
                // Dropped by a reload while the timer was pending.
                self.scheduled_for_restart.remove(name);
                return;
            }
        };

        match service.is_running(true) {
            Ok(true) => {
                debug!("Service '{name}' is running again; dropping scheduled restart")
            }
            Ok(false) => {
                if let Err(err) = service.start(&self.bus) {
                    warn!("Scheduled restart of '{name}' failed: {err}");
                }
            }
            Err(err) => {
                warn!("Failed to probe '{name}' before scheduled restart: {err}")
            }
        }

        self.scheduled_for_restart.remove(name);
    }

    fn handle_file_changed(&mut self, name: &str) {
        if self.restarting.contains(name) {
            warn!(
                "File for restart-on-change was modified while restarting. \
                 No additional restart will be triggered"
            );
            return;
        }

        let Some(service) = self.registry.get(name).map(Arc::clone) else {
            return;
        };
        let Some(path) = service.watch_path() else {
            return;
        };

        if !path.exists() {
            error!(
                "File for restart-on-change doesn't exist anymore: {}",
                path.display()
            );
            self.last_modified.insert(name.to_string(), None);
            return;
        }

        let modified = match fs::metadata(&path).and_then(|meta| meta.modified()) {
            Ok(modified) => modified,
            Err(err) => {
                warn!("Failed to stat {}: {err}", path.display());
                return;
            }
        };

        // Some notification backends fire without a real content change.
        if let Some(Some(previous)) = self.last_modified.get(name)
            && modified <= *previous
        {
            return;
        }
        self.last_modified.insert(name.to_string(), Some(modified));

        info!("Watched file for service {name} changed. It will be restarted now.");
        self.restarting.insert(name.to_string());

        let bus = self.bus.clone();
        let tx = self.tx.clone();
        let name = name.to_string();
        thread::spawn(move || {
            let result = service
                .stop_or_kill(&bus)
                .and_then(|_| service.start(&bus));
            if let Err(err) = result {
                error!("File watcher failed to restart service: {}: {err}", name);
            }
            let _ = tx.send(WatcherEvent::RestartFinished { service: name });
        });
    }

    fn handle_reload(&mut self) {
        info!("Reloading config...");
        match self.registry.reload() {
            Ok(()) => {
                info!("Config was reloaded");
                self.stop_file_watchers();
                self.init_file_watchers();
                self.log_watched_services();
            }
            Err(err) => error!("Unable to reload config file: {err}"),
        }
    }

    fn handle_stop(&mut self) {
        info!("Received stop command. Exiting...");
        if let Err(err) = self.bus.clear_heartbeat() {
            warn!("Failed to clear heartbeat: {err}");
        }
        self.stop_file_watchers();
    }

    fn refresh_stopped_cache(&mut self) {
        match self.bus.stopped_services() {
            Ok(stopped) => self.stopped_cache = stopped.into_iter().collect(),
            Err(err) => error!("Unable to refresh stopped services: {err}"),
        }
    }

    fn crash_watched_services(&self) -> Vec<Arc<Service>> {
        self.registry
            .services()
            .filter(|service| service.enabled && service.restart_seconds.is_some())
            .cloned()
            .collect()
    }

    fn file_watched_services(&self) -> Vec<Arc<Service>> {
        self.registry
            .services()
            .filter(|service| service.enabled && service.restart_on_change.is_some())
            .cloned()
            .collect()
    }

    fn init_file_watchers(&mut self) {
        for service in self.file_watched_services() {
            let Some(path) = service.watch_path() else {
                continue;
            };

            if !path.exists() {
                error!(
                    "File for restart-on-change doesn't exist: {}",
                    path.display()
                );
                continue;
            }

            match fs::metadata(&path).and_then(|meta| meta.modified()) {
                Ok(modified) => {
                    self.last_modified
                        .insert(service.name.clone(), Some(modified));
                }
                Err(err) => {
                    warn!("Failed to stat {}: {err}", path.display());
                    self.last_modified.insert(service.name.clone(), None);
                }
            }

            match fswatch::watch_file(&service.name, &path, self.tx.clone()) {
                Ok(watch) => self.file_watchers.push(watch),
                Err(err) => {
                    error!("Unable to watch {}: {err}", path.display())
                }
            }
        }
    }

    fn stop_file_watchers(&mut self) {
        for watch in self.file_watchers.drain(..) {
            debug!("Dropping file watch for '{}'", watch.service);
        }
        self.last_modified.clear();
    }

    fn log_watched_services(&self) {
        let crash_watched = self.crash_watched_services();
        if !crash_watched.is_empty() {
            info!("The following services will be watched for restart on crash:");
            for service in &crash_watched {
                info!(
                    " => {} (restarts after {})",
                    service.name,
                    service.restart_seconds.unwrap_or(0)
                );
            }
        }

        let file_watched = self.file_watched_services();
        if !file_watched.is_empty() {
            info!("The following files will be watched for restart on file change:");
            for service in &file_watched {
                if let Some(path) = service.watch_path() {
                    info!(" => {} (watches: {})", service.name, path.display());
                }
            }
        }
    }
}
