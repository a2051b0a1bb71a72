//! Debounced per-file change notifications feeding the watcher event loop.

use std::{
    path::Path,
    sync::mpsc::{self, RecvTimeoutError, Sender},
    thread,
    time::Duration,
};
use notify::{RecommendedWatcher, RecursiveMode, Watcher as _};
use tracing::warn;

use crate::constants::FILE_CHANGE_DEBOUNCE;
use crate::watcher::WatcherEvent;

/// An active watch on one service's restart-on-change file. Dropping the
/// handle tears the watch down and lets its debounce thread exit.
pub struct FileWatch {
    /// Name of the owning service.
    pub service: String,
    _watcher: RecommendedWatcher,
}

/// Installs a filesystem watch on `path`. Raw events are collapsed through a
/// quiet-period debounce; each burst delivers a single
/// [`WatcherEvent::FileChanged`] to `events`.
pub fn watch_file(
    service: &str,
    path: &Path,
    events: Sender<WatcherEvent>,
) -> Result<FileWatch, notify::Error> {
    watch_file_debounced(service, path, events, FILE_CHANGE_DEBOUNCE)
}

fn watch_file_debounced(
    service: &str,
    path: &Path,
    events: Sender<WatcherEvent>,
    debounce: Duration,
) -> Result<FileWatch, notify::Error> {
    let (raw_tx, raw_rx) = mpsc::channel();
    let mut watcher = RecommendedWatcher::new(
        move |result| {
            let _ = raw_tx.send(result);
        },
        notify::Config::default(),
    )?;
    watcher.watch(path, RecursiveMode::NonRecursive)?;

    let service = service.to_string();
    let thread_service = service.clone();
    thread::spawn(move || {
        let service = thread_service;
        loop {
            // First raw event opens a debounce window; the window is extended
            // while further events keep arriving inside the quiet period.
            match raw_rx.recv() {
                Ok(Err(err)) => {
                    warn!("File watcher for '{service}' reported: {err}");
                    continue;
                }
                Ok(Ok(_)) => {}
                Err(_) => break,
            }

            loop {
                match raw_rx.recv_timeout(debounce) {
                    Ok(Err(err)) => {
                        warn!("File watcher for '{service}' reported: {err}");
                    }
                    Ok(Ok(_)) => {}
                    Err(RecvTimeoutError::Timeout) => break,
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            }

            if events
                .send(WatcherEvent::FileChanged {
                    service: service.clone(),
                })
                .is_err()
            {
                break;
            }
        }
    });

    Ok(FileWatch {
        service,
        _watcher: watcher,
    })
}
