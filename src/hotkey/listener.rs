//! Hotkey listener thread
//!
//! Owns the interception session on a dedicated thread with its own
//! CFRunLoop. Other threads reach the session only through [`Command`]s,
//! drained between short run-loop slices.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info, warn};

use crate::events::SwitchEvent;
use crate::sources::{InputSource, InputSourceProvider, SwitchError};

use super::capture::{CaptureSession, PermissionProvider};
use super::keys::TriggerKey;
use super::session::{InterceptionSession, SessionError};

/// Longest time a command waits before the listener thread sees it
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Requests posted to the listener thread
#[derive(Debug)]
pub enum Command {
    Start(oneshot::Sender<Result<(), SessionError>>),
    Cycle(oneshot::Sender<Result<InputSource, SwitchError>>),
    Rediscover(oneshot::Sender<usize>),
    Stop,
}

/// Errors that can occur in the hotkey listener
#[derive(Debug, thiserror::Error)]
pub enum HotkeyError {
    #[error("hotkey listener is already running")]
    AlreadyRunning,

    #[error("hotkey listener is not running")]
    NotRunning,

    #[error("key interception is not supported on this platform")]
    Unsupported,

    #[error("failed to spawn listener thread: {0}")]
    ThreadSpawn(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Switch(#[from] SwitchError),
}

impl HotkeyError {
    /// Stable machine-readable code for IPC error responses
    pub fn code(&self) -> &'static str {
        match self {
            HotkeyError::Session(SessionError::PermissionRequired) => "permission_required",
            HotkeyError::Session(SessionError::HookCreationFailed) => "hook_creation_failed",
            HotkeyError::Session(SessionError::AlreadyStopped) => "session_stopped",
            HotkeyError::Switch(SwitchError::NoSourcesAvailable) => "no_sources_available",
            HotkeyError::Switch(SwitchError::SwitchFailed { .. }) => "switch_failed",
            HotkeyError::Unsupported => "unsupported",
            HotkeyError::AlreadyRunning | HotkeyError::NotRunning | HotkeyError::ThreadSpawn(_) => {
                "unavailable"
            }
        }
    }
}

/// Body of the listener thread: serves commands until stopped
type Runner = fn(
    TriggerKey,
    broadcast::Sender<SwitchEvent>,
    Receiver<Command>,
    &AtomicBool,
) -> Result<(), HotkeyError>;

/// Handle to the listener thread, shareable across tasks
pub struct HotkeyListener {
    trigger: TriggerKey,
    event_tx: broadcast::Sender<SwitchEvent>,
    runner: Option<Runner>,
    running: Arc<AtomicBool>,
    commands: Mutex<Option<Sender<Command>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl HotkeyListener {
    /// Create a new hotkey listener
    pub fn new(trigger: TriggerKey, event_tx: broadcast::Sender<SwitchEvent>) -> Self {
        let runner = crate::platform::is_supported().then_some(run_event_loop as Runner);
        Self::with_runner(trigger, event_tx, runner)
    }

    fn with_runner(
        trigger: TriggerKey,
        event_tx: broadcast::Sender<SwitchEvent>,
        runner: Option<Runner>,
    ) -> Self {
        Self {
            trigger,
            event_tx,
            runner,
            running: Arc::new(AtomicBool::new(false)),
            commands: Mutex::new(None),
            thread: Mutex::new(None),
        }
    }

    pub fn trigger(&self) -> TriggerKey {
        self.trigger
    }

    /// Spawn the listener thread into `slot`. The caller holds the slot's
    /// lock, so checking for a live thread and replacing it can't race.
    ///
    /// The thread discovers input sources and then waits for commands;
    /// the hook is only installed once [`HotkeyListener::start`] is called.
    fn spawn(&self, slot: &mut Option<JoinHandle<()>>) -> Result<(), HotkeyError> {
        let runner = self.runner.ok_or(HotkeyError::Unsupported)?;
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(HotkeyError::AlreadyRunning);
        }

        let (command_tx, command_rx) = mpsc::channel();
        let trigger = self.trigger;
        let event_tx = self.event_tx.clone();
        let running = Arc::clone(&self.running);

        let handle = thread::Builder::new()
            .name("hotkey-listener".to_string())
            .spawn(move || {
                info!("hotkey listener thread started");

                if let Err(e) = runner(trigger, event_tx, command_rx, &running) {
                    error!(?e, "hotkey listener error");
                }

                running.store(false, Ordering::SeqCst);
                info!("hotkey listener thread stopped");
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                HotkeyError::ThreadSpawn(e.to_string())
            })?;

        if let Ok(mut commands) = self.commands.lock() {
            *commands = Some(command_tx);
        }
        *slot = Some(handle);
        Ok(())
    }

    /// Arm the interception session, spawning the thread if needed.
    /// Safe to call again after a permission or hook failure.
    pub async fn start(&self) -> Result<(), HotkeyError> {
        {
            let mut slot = self.thread.lock().map_err(|_| HotkeyError::NotRunning)?;
            if !self.is_running() {
                // Reap the exited thread before replacing it
                if let Some(handle) = slot.take() {
                    if handle.join().is_err() {
                        warn!("hotkey listener thread panicked");
                    }
                }
                self.spawn(&mut slot)?;
            }
        }
        Ok(self.request(Command::Start).await??)
    }

    /// Cycle once, as if the trigger had been pressed
    pub async fn cycle(&self) -> Result<InputSource, HotkeyError> {
        Ok(self.request(Command::Cycle).await??)
    }

    /// Re-run input source discovery
    pub async fn rediscover(&self) -> Result<usize, HotkeyError> {
        self.request(Command::Rediscover).await
    }

    /// Stop the listener, tearing down the hook, and wait for the thread
    pub fn stop(&self) {
        if self.send(Command::Stop).is_err() {
            debug!("hotkey listener already gone");
        }
        self.running.store(false, Ordering::SeqCst);
        self.join_thread();
    }

    /// Check if the listener is currently running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, HotkeyError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(make(reply_tx))?;
        reply_rx.await.map_err(|_| HotkeyError::NotRunning)
    }

    fn send(&self, command: Command) -> Result<(), HotkeyError> {
        let commands = self.commands.lock().map_err(|_| HotkeyError::NotRunning)?;
        commands
            .as_ref()
            .ok_or(HotkeyError::NotRunning)?
            .send(command)
            .map_err(|_| HotkeyError::NotRunning)
    }

    fn join_thread(&self) {
        let handle = self.thread.lock().ok().and_then(|mut thread| thread.take());
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("hotkey listener thread panicked");
            }
        }
    }
}

/// Apply one command to the session. Returns false when the loop should exit.
pub fn dispatch<C, P, A>(session: &mut InterceptionSession<C, P, A>, command: Command) -> bool
where
    C: CaptureSession,
    P: InputSourceProvider + 'static,
    A: PermissionProvider,
{
    debug!(?command, "listener command");
    match command {
        Command::Start(reply) => {
            let _ = reply.send(session.start());
        }
        Command::Cycle(reply) => {
            let _ = reply.send(session.cycle());
        }
        Command::Rediscover(reply) => {
            let _ = reply.send(session.rediscover());
        }
        Command::Stop => return false,
    }
    true
}

/// Serve commands until stopped, running `run_slice` while a hook is
/// installed so its callbacks get delivered. Always stops the session.
pub fn drive<C, P, A>(
    session: &mut InterceptionSession<C, P, A>,
    commands: &Receiver<Command>,
    running: &AtomicBool,
    mut run_slice: impl FnMut(),
) where
    C: CaptureSession,
    P: InputSourceProvider + 'static,
    A: PermissionProvider,
{
    'serve: while running.load(Ordering::SeqCst) {
        if session.is_installed() {
            run_slice();
        } else {
            match commands.recv_timeout(POLL_INTERVAL) {
                Ok(command) => {
                    if !dispatch(session, command) {
                        break 'serve;
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break 'serve,
            }
        }

        loop {
            match commands.try_recv() {
                Ok(command) => {
                    if !dispatch(session, command) {
                        break 'serve;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break 'serve,
            }
        }
    }

    session.stop();
}

/// Run the CFRunLoop with the event tap
#[cfg(target_os = "macos")]
fn run_event_loop(
    trigger: TriggerKey,
    event_tx: broadcast::Sender<SwitchEvent>,
    commands: Receiver<Command>,
    running: &AtomicBool,
) -> Result<(), HotkeyError> {
    use core_foundation::runloop::{kCFRunLoopDefaultMode, CFRunLoop};

    use crate::platform::macos::{AccessibilityPermission, EventTap, TisProvider};

    let mut session = InterceptionSession::new(
        EventTap::new(),
        TisProvider::new(),
        AccessibilityPermission,
        trigger,
        event_tx,
    );

    drive(&mut session, &commands, running, || {
        // Run the loop for a short interval, then check for commands
        unsafe {
            CFRunLoop::run_in_mode(kCFRunLoopDefaultMode, POLL_INTERVAL, true);
        }
    });

    Ok(())
}

#[cfg(not(target_os = "macos"))]
fn run_event_loop(
    _trigger: TriggerKey,
    _event_tx: broadcast::Sender<SwitchEvent>,
    _commands: Receiver<Command>,
    _running: &AtomicBool,
) -> Result<(), HotkeyError> {
    Err(HotkeyError::Unsupported)
}
