//! Serve mode is implemented as a four-part system:
//!
//! 1. **File watcher**: Uses the `notify` crate to monitor the static roots
//!    of every watch rule recursively. It includes debouncing to prevent
//!    duplicate builds from rapid file saves.
//! 2. **Dispatcher**: Maps a batch of changed paths to the rules they match.
//!    Each matched task re-runs once, then, after a fixed delay, the rule's
//!    signal is broadcast.
//! 3. **WebSocket server**: Spawns a dedicated thread using `tungstenite`
//!    to maintain persistent connections with open browser tabs.
//! 4. **Client script**: The [`Environment`](crate::Environment) injects
//!    a lightweight JavaScript snippet into generated pages. This script
//!    connects to the WebSocket server and either reloads the page or
//!    re-requests its stylesheets.

use std::collections::HashSet;
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use console::style;
use notify::RecursiveMode;
use notify_debouncer_full::new_debouncer;
use tungstenite::WebSocket;

use crate::error::WatchError;
use crate::{Environment, FileSet, Mode, Pipeline, Schedule};

/// Default port of the reload socket.
const RELOAD_PORT: u16 = 35729;

/// What connected browsers are told after a task re-ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Reload the whole page.
    Reload,
    /// Re-request stylesheets only.
    Css,
    /// Say nothing.
    None,
}

impl Signal {
    fn message(self) -> Option<&'static str> {
        match self {
            Signal::Reload => Some("reload"),
            Signal::Css => Some("css"),
            Signal::None => None,
        }
    }
}

/// A set of watched files and the task they re-trigger.
#[derive(Debug, Clone)]
pub struct WatchRule {
    pub files: FileSet,
    pub task: String,
    pub signal: Signal,
}

impl WatchRule {
    pub fn new(files: FileSet, task: impl Into<String>, signal: Signal) -> Self {
        Self {
            files,
            task: task.into(),
            signal,
        }
    }
}

/// Something that can broadcast signals to browsers.
pub trait Reloader {
    fn signal(&self, signal: Signal);
}

impl Reloader for Sender<Signal> {
    fn signal(&self, signal: Signal) {
        if self.send(signal).is_err() {
            tracing::warn!("reload thread is gone, signal dropped");
        }
    }
}

/// Maps changed files to task re-runs and reload signals.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    rules: Vec<WatchRule>,
    delay: Duration,
}

impl Dispatcher {
    pub fn new(rules: Vec<WatchRule>, delay: Duration) -> Self {
        Self { rules, delay }
    }

    pub fn rules(&self) -> &[WatchRule] {
        &self.rules
    }

    /// Rules matched by a batch of root-relative paths, at most one per task,
    /// in declaration order.
    pub fn plan<P: AsRef<Utf8Path>>(&self, paths: &[P]) -> Vec<&WatchRule> {
        let mut tasks = HashSet::new();

        self.rules
            .iter()
            .filter(|rule| paths.iter().any(|path| rule.files.matches(path)))
            .filter(|rule| tasks.insert(rule.task.as_str()))
            .collect()
    }

    /// Re-runs every task matched by `paths` exactly once and, for each one
    /// that succeeded, waits for the reload delay and sends its signal.
    ///
    /// Returns the names of the tasks that re-ran successfully.
    pub fn dispatch<P, F, E>(&self, paths: &[P], mut run: F, reloader: &impl Reloader) -> Vec<String>
    where
        P: AsRef<Utf8Path>,
        F: FnMut(&str) -> Result<(), E>,
        E: std::fmt::Display,
    {
        let mut done = Vec::new();

        for rule in self.plan(paths) {
            tracing::info!("change detected, re-running {}", style(&rule.task).cyan());

            if let Err(e) = run(&rule.task) {
                tracing::error!("{e}");
                continue;
            }

            if rule.signal != Signal::None {
                std::thread::sleep(self.delay);
                reloader.signal(rule.signal);
            }

            done.push(rule.task.clone());
        }

        done
    }

    /// Absolute directories that need a recursive watch.
    fn roots(&self, root: &Utf8Path) -> Vec<Utf8PathBuf> {
        let paths = self
            .rules
            .iter()
            .flat_map(|rule| rule.files.roots())
            .map(|path| root.join(path))
            .filter(|path| path.is_dir())
            .collect();

        collapse_watch_paths(paths)
    }
}

/// The two states of the dev server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeState {
    /// The initial build has not finished yet.
    Idle,
    /// Files are served and watched.
    Serving,
}

/// Where the dev server listens and what it serves.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub port: u16,
    /// Checked first for every request.
    pub primary: Utf8PathBuf,
    /// Used for paths missing from `primary`.
    pub fallback: Utf8PathBuf,
}

/// Builds the schedule in watch mode, then serves the output and re-runs
/// tasks on change until the process is killed.
pub fn serve(
    pipeline: &Pipeline,
    schedule: &Schedule,
    dispatcher: &Dispatcher,
    mut env: Environment,
    options: ServeOptions,
) -> Result<(), WatchError> {
    let mut state = ServeState::Idle;
    let (tcp, port) = reserve_port()?;

    env.mode = Mode::Watch;
    env.port = Some(port);

    // A taken port fails here, before anything is built.
    #[cfg(feature = "server")]
    let _thread_http = super::http::start(
        options.port,
        env.path(&options.primary),
        env.path(&options.fallback),
    )?;
    #[cfg(not(feature = "server"))]
    tracing::warn!(
        port = options.port,
        "built without the `server` feature, serve {} yourself",
        options.primary
    );

    tracing::info!(?state, "running initial build...");
    pipeline.run_schedule(&env, schedule)?;

    let clients = Arc::new(Mutex::new(vec![]));
    let _thread_i = new_thread_ws_incoming(tcp, clients.clone());
    let (tx_reload, _thread_o) = new_thread_ws_reload(clients);

    let (tx, rx) = std::sync::mpsc::channel();
    let mut debouncer = new_debouncer(Duration::from_millis(250), None, tx)?;

    let root = env.root.canonicalize_utf8()?;
    for path in dispatcher.roots(&root) {
        tracing::info!("watching {}", path);
        debouncer.watch(&path, RecursiveMode::Recursive)?;
    }

    state = ServeState::Serving;
    tracing::info!(?state, port, "initial build completed, now watching for changes...");

    loop {
        match rx.recv()? {
            Ok(events) => {
                let mut paths = Vec::new();
                for de in events {
                    for path in &de.event.paths {
                        if let Some(path) = Utf8Path::from_path(path)
                            && let Ok(relative) = path.strip_prefix(&root)
                            && !paths.iter().any(|p: &Utf8PathBuf| p == relative)
                        {
                            paths.push(relative.to_path_buf());
                        }
                    }
                }

                let rerun = dispatcher.dispatch(
                    &paths,
                    |task| pipeline.run(&env, &[task]).map(|_| ()),
                    &tx_reload,
                );

                if !rerun.is_empty() {
                    tracing::info!("rebuild complete, watching for changes...");
                }
            }
            Err(errors) => {
                for e in errors {
                    tracing::error!("watch error: {e}");
                }
            }
        }
    }
}

fn reserve_port() -> std::io::Result<(TcpListener, u16)> {
    let listener = match TcpListener::bind(("127.0.0.1", RELOAD_PORT)) {
        Ok(sock) => sock,
        Err(_) => TcpListener::bind("127.0.0.1:0")?,
    };

    let addr = listener.local_addr()?;
    let port = addr.port();
    Ok((listener, port))
}

fn new_thread_ws_incoming(
    server: TcpListener,
    client: Arc<Mutex<Vec<WebSocket<TcpStream>>>>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for stream in server.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("reload connection failed: {e}");
                    continue;
                }
            };

            let socket = match tungstenite::accept(stream) {
                Ok(socket) => socket,
                Err(e) => {
                    tracing::warn!("rejected reload client: {e}");
                    continue;
                }
            };

            let Ok(mut clients) = client.lock() else {
                break;
            };
            clients.push(socket);
        }
    })
}

fn new_thread_ws_reload(
    client: Arc<Mutex<Vec<WebSocket<TcpStream>>>>,
) -> (Sender<Signal>, JoinHandle<()>) {
    let (tx, rx) = std::sync::mpsc::channel::<Signal>();

    let thread = std::thread::spawn(move || {
        while let Ok(signal) = rx.recv() {
            let Some(message) = signal.message() else {
                continue;
            };

            let Ok(mut clients) = client.lock() else {
                break;
            };
            let mut broken = vec![];

            for (i, socket) in clients.iter_mut().enumerate() {
                match socket.send(message.into()) {
                    Ok(_) => {}
                    Err(tungstenite::error::Error::Io(e)) => {
                        if e.kind() == std::io::ErrorKind::BrokenPipe {
                            broken.push(i);
                        }
                    }
                    Err(e) => {
                        tracing::error!("Error: {e:?}");
                    }
                }
            }

            for i in broken.into_iter().rev() {
                clients.remove(i);
            }

            // Close all but the last 10 connections
            let len = clients.len();
            if len > 10 {
                for mut socket in clients.drain(0..len - 10) {
                    socket.close(None).ok();
                }
            }
        }
    });

    (tx, thread)
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// If we watch `/a` and `/a/b`, we only need to watch `/a` because
/// the watcher is recursive. This function sorts the paths and filters
/// out any path that is a subdirectory of a previously accepted path.
fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut filtered = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}
