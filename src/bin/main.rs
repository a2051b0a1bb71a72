use clap::Parser;
use std::{error::Error, os::unix::io::IntoRawFd, thread, time::Duration};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use servman::{
    bus::{Bus, BusCommand, WatcherStatus, CMD_RELOAD, CMD_STOP},
    cli::{Cli, Commands, ConfigAction, WatcherAction},
    config::resolve_config_path,
    error::ManagerError,
    registry::ServiceRegistry,
    service::ServiceStatus,
    watcher::Watcher,
};

fn main() {
    let args = Cli::parse();
    init_logging(&args);

    if args.delay > 0 {
        info!("Waiting {} seconds before executing...", args.delay);
        thread::sleep(Duration::from_secs(args.delay));
    }

    if let Err(err) = run(args) {
        match err.downcast_ref::<ManagerError>() {
            Some(manager_err) if manager_err.is_user_error() => {
                eprintln!("{manager_err}")
            }
            _ => error!("{err}"),
        }
        std::process::exit(1);
    }
}

fn run(args: Cli) -> Result<(), Box<dyn Error>> {
    let config_path = resolve_config_path(&args.config);

    match args.command {
        Commands::Start { names } => {
            let registry = ServiceRegistry::load(config_path)?;
            let bus = Bus::open()?;
            for_each_service(&registry, &names, |service| service.start(&bus))?;
        }
        Commands::Halt { names } => {
            let registry = ServiceRegistry::load(config_path)?;
            let bus = Bus::open()?;
            for_each_service(&registry, &names, |service| service.stop_or_kill(&bus))?;
        }
        Commands::Restart { names } => {
            let registry = ServiceRegistry::load(config_path)?;
            let bus = Bus::open()?;
            for_each_service(&registry, &names, |service| {
                service.stop_or_kill(&bus)?;
                service.start(&bus)
            })?;
        }
        Commands::Info { names } => {
            let registry = ServiceRegistry::load(config_path)?;
            show_info(&registry, &names)?;
        }
        Commands::Config(action) => {
            let mut registry = ServiceRegistry::load(config_path)?;
            let bus = Bus::open()?;
            match action {
                ConfigAction::Enable { name } => registry.set_enabled(&name, true)?,
                ConfigAction::Disable { name } => registry.set_enabled(&name, false)?,
                ConfigAction::Delete { name } => registry.remove(&name)?,
            }
            // A running watcher picks the edit up on its own schedule.
            if bus.watcher_status()? == WatcherStatus::Running {
                bus.publish(&BusCommand::new(CMD_RELOAD))?;
            }
        }
        Commands::Watcher(action) => run_watcher_action(action, &args.config)?,
    }

    Ok(())
}

/// Applies an action to each resolved service, reporting failures without
/// aborting the rest of the batch.
fn for_each_service<F>(
    registry: &ServiceRegistry,
    names: &[String],
    mut action: F,
) -> Result<(), ManagerError>
where
    F: FnMut(&servman::service::Service) -> Result<(), ManagerError>,
{
    for name in registry.resolve_names(names)? {
        let Some(service) = registry.get(&name) else {
            continue;
        };
        if let Err(err) = action(service.as_ref()) {
            if err.is_user_error() {
                eprintln!("{err}");
            } else {
                error!("{err}");
            }
        }
    }
    Ok(())
}

fn run_watcher_action(action: WatcherAction, config: &str) -> Result<(), Box<dyn Error>> {
    let bus = Bus::open()?;

    match action {
        WatcherAction::Start { detach } => {
            if bus.watcher_status()? == WatcherStatus::Running {
                println!("The watcher service is already running");
                return Ok(());
            }

            let config_path = resolve_config_path(config);
            let registry = ServiceRegistry::load(config_path)?;

            if detach {
                daemonize()?;
            }
            Watcher::new(registry, bus).run()?;
        }
        WatcherAction::Status => {
            let status = bus.watcher_status()?;
            println!("The watcher service is currently {}.", status.as_ref());
        }
        WatcherAction::Reload => send_watcher_command(&bus, CMD_RELOAD)?,
        WatcherAction::Stop => send_watcher_command(&bus, CMD_STOP)?,
    }

    Ok(())
}

fn send_watcher_command(bus: &Bus, command: &str) -> Result<(), Box<dyn Error>> {
    if bus.watcher_status()? != WatcherStatus::Running {
        println!("The watcher service isn't running");
        return Ok(());
    }
    bus.publish(&BusCommand::new(command))?;
    println!("Sent {command} command to watcher service");
    Ok(())
}

fn show_info(registry: &ServiceRegistry, names: &[String]) -> Result<(), Box<dyn Error>> {
    let resolved = registry.resolve_names(names)?;

    registry.invalidate_running_cache();
    let mut rows: Vec<(String, ServiceStatus)> = Vec::new();
    for name in resolved {
        if let Some(service) = registry.get(&name) {
            rows.push((name, service.status()?));
        }
    }
    rows.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

    let longest = rows.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
    let padding = (longest + 2).max(15);
    for (name, status) in rows {
        println!("{name:<padding$} {}", status.as_ref());
    }

    Ok(())
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = &args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn daemonize() -> std::io::Result<()> {
    if unsafe { libc::fork() } > 0 {
        std::process::exit(0);
    }

    unsafe {
        libc::setsid();
    }

    if unsafe { libc::fork() } > 0 {
        std::process::exit(0);
    }

    unsafe {
        libc::setpgid(0, 0);
    }

    let devnull = std::fs::File::open("/dev/null")?;
    let fd = devnull.into_raw_fd();
    unsafe {
        let _ = libc::dup2(fd, libc::STDIN_FILENO);
        let _ = libc::dup2(fd, libc::STDOUT_FILENO);
        let _ = libc::dup2(fd, libc::STDERR_FILENO);
        libc::close(fd);
    }

    Ok(())
}
