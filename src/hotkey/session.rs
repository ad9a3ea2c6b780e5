//! Interception session: owns the capture hook lifecycle and routes every
//! captured event through the classifier and the switch executor.
//!
//! Everything here runs on the single run-loop thread. The handler
//! registered with the hook shares the session core through `Rc<RefCell<_>>`.

use std::cell::RefCell;
use std::rc::Rc;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::events::SwitchEvent;
use crate::sources::{InputSource, InputSourceProvider, SwitchError, SwitchExecutor};
use crate::state::SessionState;

use super::capture::{CaptureSession, EventHandler, PermissionProvider, TapControl, TapPlacement};
use super::classifier::{classify, CapturedEvent, Decision, EventKind};
use super::keys::TriggerKey;

/// Errors from starting the session
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("accessibility permission is required to capture key events")]
    PermissionRequired,

    #[error("event tap rejected at every placement")]
    HookCreationFailed,

    #[error("session already stopped")]
    AlreadyStopped,
}

/// State shared between the session and its event handler
struct SessionCore<P> {
    state: SessionState,
    trigger: TriggerKey,
    executor: SwitchExecutor<P>,
    event_tx: broadcast::Sender<SwitchEvent>,
}

impl<P: InputSourceProvider> SessionCore<P> {
    fn handle_event(&mut self, event: &CapturedEvent, tap: &dyn TapControl) -> Decision {
        if self.state.is_terminal() {
            return Decision::PassThrough;
        }

        let decision = classify(event.kind, event.key_code, self.trigger);
        match decision {
            Decision::Rearm => {
                if let EventKind::TapDisabled(reason) = event.kind {
                    self.state = self.state.disable(reason);
                    warn!(%reason, "event tap disabled, re-enabling");
                    tap.set_enabled(true);
                    self.state = self.state.arm();
                    info!("event tap re-enabled");
                    let _ = self.event_tx.send(SwitchEvent::SessionRearmed { reason });
                }
            }
            Decision::Suppress => {
                debug!(key_code = event.key_code, "trigger key pressed");
                if let Err(e) = self.executor.cycle_to_next() {
                    // The press stays suppressed either way
                    warn!(%e, "trigger press did not switch input source");
                }
            }
            Decision::PassThrough => {}
        }
        decision
    }
}

/// The system-level interception session
pub struct InterceptionSession<C, P, A> {
    capture: C,
    permission: A,
    core: Rc<RefCell<SessionCore<P>>>,
}

impl<C, P, A> InterceptionSession<C, P, A>
where
    C: CaptureSession,
    P: InputSourceProvider + 'static,
    A: PermissionProvider,
{
    /// Create an unarmed session; discovers input sources right away
    pub fn new(
        capture: C,
        provider: P,
        permission: A,
        trigger: TriggerKey,
        event_tx: broadcast::Sender<SwitchEvent>,
    ) -> Self {
        let executor = SwitchExecutor::new(provider, event_tx.clone());
        Self {
            capture,
            permission,
            core: Rc::new(RefCell::new(SessionCore {
                state: SessionState::Unarmed,
                trigger,
                executor,
                event_tx,
            })),
        }
    }

    pub fn state(&self) -> SessionState {
        self.core.borrow().state
    }

    /// Check permission, then install the hook, falling back through the
    /// placement strategies. Starting an armed session is a no-op.
    pub fn start(&mut self) -> Result<(), SessionError> {
        let state = self.state();
        if state.is_terminal() {
            return Err(SessionError::AlreadyStopped);
        }
        if state.has_hook() {
            debug!(%state, "session already armed");
            return Ok(());
        }

        let granted = self.permission.is_granted();
        info!(granted, "accessibility permission");
        if !granted {
            error!(
                "accessibility permission required - add this daemon under \
                 System Settings > Privacy & Security > Accessibility"
            );
            return Err(SessionError::PermissionRequired);
        }

        for placement in TapPlacement::FALLBACK_ORDER {
            let handler = self.handler();
            match self.capture.install(placement, handler) {
                Ok(()) => {
                    let mut core = self.core.borrow_mut();
                    core.state = core.state.arm();
                    info!(%placement, trigger = %core.trigger, "event tap created and enabled");
                    let _ = core.event_tx.send(SwitchEvent::SessionArmed);
                    return Ok(());
                }
                Err(e) => {
                    warn!(%e, %placement, "failed to create event tap");
                }
            }
        }

        error!("failed to create event tap at any placement");
        Err(SessionError::HookCreationFailed)
    }

    /// Disable and remove the hook. Idempotent, valid from any state.
    pub fn stop(&mut self) {
        let mut core = self.core.borrow_mut();
        if core.state.is_terminal() {
            return;
        }

        self.capture.uninstall();
        core.state = core.state.stop();
        info!("interception session stopped");
        let _ = core.event_tx.send(SwitchEvent::SessionStopped);
    }

    /// Cycle without a key press, e.g. from a "test the trigger" request
    pub fn cycle(&mut self) -> Result<InputSource, SwitchError> {
        self.core.borrow_mut().executor.cycle_to_next()
    }

    /// Re-run input source discovery; returns the new ring size
    pub fn rediscover(&mut self) -> usize {
        self.core.borrow_mut().executor.rediscover()
    }

    #[cfg(test)]
    pub fn current_source_name(&self) -> Option<String> {
        self.core
            .borrow()
            .executor
            .registry()
            .current()
            .map(|s| s.name.clone())
    }

    #[cfg(test)]
    pub fn source_names(&self) -> Vec<String> {
        self.core.borrow().executor.registry().names()
    }

    pub fn is_installed(&self) -> bool {
        self.capture.is_installed()
    }

    fn handler(&self) -> EventHandler {
        let core = Rc::clone(&self.core);
        Box::new(move |event: &CapturedEvent, tap: &dyn TapControl| match core.try_borrow_mut() {
            Ok(mut core) => core.handle_event(event, tap),
            Err(_) => {
                warn!(?event, "event delivered while session busy, passing through");
                Decision::PassThrough
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::capture::fake::{FakeCapture, FakePermission};
    use crate::hotkey::keys::codes;
    use crate::sources::fake::{layout, FakeProvider};
    use crate::sources::SourceId;
    use crate::state::DisableReason;

    type TestSession = InterceptionSession<FakeCapture, FakeProvider, FakePermission>;

    struct Fixture {
        session: TestSession,
        capture: FakeCapture,
        provider: FakeProvider,
        permission: FakePermission,
        rx: broadcast::Receiver<SwitchEvent>,
    }

    fn fixture(granted: bool) -> Fixture {
        let capture = FakeCapture::new();
        let provider = FakeProvider::new(vec![layout("a"), layout("b"), layout("c")], Some("a"));
        let permission = FakePermission::granted(granted);
        let (tx, rx) = broadcast::channel(32);
        let session = InterceptionSession::new(
            capture.clone(),
            provider.clone(),
            permission.clone(),
            TriggerKey::default(),
            tx,
        );
        Fixture {
            session,
            capture,
            provider,
            permission,
            rx,
        }
    }

    fn source_changes(rx: &mut broadcast::Receiver<SwitchEvent>) -> usize {
        let mut count = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, SwitchEvent::SourceChanged { .. }) {
                count += 1;
            }
        }
        count
    }

    #[test]
    fn test_start_requires_permission() {
        let mut f = fixture(false);
        assert_eq!(f.session.start(), Err(SessionError::PermissionRequired));
        assert_eq!(f.session.state(), SessionState::Unarmed);
        assert!(!f.capture.is_installed());

        f.permission.grant();
        assert_eq!(f.session.start(), Ok(()));
        assert_eq!(f.session.state(), SessionState::Armed);
    }

    #[test]
    fn test_start_prefers_head_insert() {
        let mut f = fixture(true);
        f.session.start().unwrap();
        assert_eq!(f.capture.installed_at(), Some(TapPlacement::HeadInsert));
    }

    #[test]
    fn test_start_falls_back_to_tail_append() {
        let mut f = fixture(true);
        f.capture.reject(TapPlacement::HeadInsert);
        f.session.start().unwrap();
        assert_eq!(f.capture.installed_at(), Some(TapPlacement::TailAppend));
        assert_eq!(f.session.state(), SessionState::Armed);
    }

    #[test]
    fn test_start_fails_when_every_placement_rejected() {
        let mut f = fixture(true);
        f.capture.reject(TapPlacement::HeadInsert);
        f.capture.reject(TapPlacement::TailAppend);
        assert_eq!(f.session.start(), Err(SessionError::HookCreationFailed));
        assert_eq!(f.session.state(), SessionState::Unarmed);
        assert!(!f.capture.is_installed());
    }

    #[test]
    fn test_start_twice_is_noop() {
        let mut f = fixture(true);
        f.session.start().unwrap();
        f.session.start().unwrap();
        assert_eq!(f.capture.enable_calls(), vec![true]);
    }

    #[test]
    fn test_trigger_press_switches_and_suppresses() {
        let mut f = fixture(true);
        f.session.start().unwrap();

        let decision = f.capture.deliver(CapturedEvent::key_down(codes::GLOBE));
        assert_eq!(decision, Some(Decision::Suppress));
        assert_eq!(f.session.current_source_name().as_deref(), Some("B"));
        assert_eq!(f.provider.attempts(), vec![SourceId::new("b")]);
        assert_eq!(source_changes(&mut f.rx), 1);
    }

    #[test]
    fn test_failed_candidate_falls_through_to_next() {
        let mut f = fixture(true);
        f.provider.reject_first(1);
        f.session.start().unwrap();

        let decision = f.capture.deliver(CapturedEvent::key_down(codes::GLOBE));
        assert_eq!(decision, Some(Decision::Suppress));
        assert_eq!(f.session.current_source_name().as_deref(), Some("C"));
        assert_eq!(f.provider.attempts().len(), 2);
        assert_eq!(source_changes(&mut f.rx), 1);
    }

    #[test]
    fn test_switch_failure_still_suppresses() {
        let mut f = fixture(true);
        f.provider.reject_all();
        f.session.start().unwrap();

        let decision = f.capture.deliver(CapturedEvent::key_down(codes::GLOBE));
        assert_eq!(decision, Some(Decision::Suppress));
        assert_eq!(f.session.current_source_name().as_deref(), Some("A"));
        assert_eq!(source_changes(&mut f.rx), 0);
    }

    #[test]
    fn test_other_keys_pass_through() {
        let mut f = fixture(true);
        f.session.start().unwrap();

        assert_eq!(f.capture.deliver(CapturedEvent::key_down(0)), Some(Decision::PassThrough));
        assert_eq!(
            f.capture.deliver(CapturedEvent::key_up(codes::GLOBE)),
            Some(Decision::PassThrough)
        );
        assert!(f.provider.attempts().is_empty());
    }

    #[test]
    fn test_rearm_then_trigger_in_same_turn() {
        let mut f = fixture(true);
        f.session.start().unwrap();

        let decision = f
            .capture
            .deliver(CapturedEvent::tap_disabled(DisableReason::UserInput));
        assert_eq!(decision, Some(Decision::Rearm));
        assert_eq!(f.capture.enable_calls(), vec![true, true]);
        assert_eq!(f.session.state(), SessionState::Armed);
        assert!(f.provider.attempts().is_empty());

        let decision = f.capture.deliver(CapturedEvent::key_down(codes::GLOBE));
        assert_eq!(decision, Some(Decision::Suppress));
        assert_eq!(f.session.current_source_name().as_deref(), Some("B"));

        let mut rearmed = false;
        while let Ok(event) = f.rx.try_recv() {
            if event == (SwitchEvent::SessionRearmed { reason: DisableReason::UserInput }) {
                rearmed = true;
            }
        }
        assert!(rearmed);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut f = fixture(true);
        f.session.start().unwrap();

        f.session.stop();
        f.session.stop();
        assert_eq!(f.session.state(), SessionState::Stopped);
        assert_eq!(f.capture.uninstall_calls(), 1);
        assert_eq!(f.capture.enable_calls(), vec![true, false]);
        assert_eq!(f.capture.deliver(CapturedEvent::key_down(codes::GLOBE)), None);
    }

    #[test]
    fn test_stop_before_start_is_terminal() {
        let mut f = fixture(true);
        f.session.stop();
        assert_eq!(f.session.state(), SessionState::Stopped);
        assert_eq!(f.session.start(), Err(SessionError::AlreadyStopped));
        assert!(!f.capture.is_installed());
    }

    #[test]
    fn test_manual_cycle_moves_cursor() {
        let mut f = fixture(true);
        let switched = f.session.cycle().unwrap();
        assert_eq!(switched.id.as_str(), "b");
        assert_eq!(f.session.source_names(), vec!["A", "B", "C"]);
    }
}
