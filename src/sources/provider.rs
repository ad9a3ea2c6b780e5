//! Narrow interface over the OS text input subsystem

use super::source::{InputSource, SourceId};

/// Errors returned by an activation attempt
#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    #[error("input source activation rejected with status {0}")]
    Rejected(i32),

    #[error("input source {0} is no longer installed")]
    UnknownSource(SourceId),
}

/// Access to the system's input sources and the global active source
pub trait InputSourceProvider {
    /// All installed input sources, in system order, unfiltered
    fn list(&self) -> Vec<InputSource>;

    /// Ask the OS to make `id` the active keyboard input source
    fn activate(&self, id: &SourceId) -> Result<(), ActivationError>;

    /// Identity of the currently active keyboard input source
    fn query_active(&self) -> Option<SourceId>;
}

#[cfg(test)]
pub mod fake {
    //! Scriptable provider for exercising the engine without the OS

    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use super::*;
    use crate::sources::source::{SourceCategory, SourceKind};

    /// Keyboard layout snapshot with the given identity and name
    pub fn layout(id: &str) -> InputSource {
        InputSource {
            id: SourceId::new(id),
            name: id.to_uppercase(),
            enabled: true,
            selectable: true,
            category: SourceCategory::Keyboard,
            kind: SourceKind::Layout,
        }
    }

    #[derive(Debug, Default)]
    struct Inner {
        sources: RefCell<Vec<InputSource>>,
        active: RefCell<Option<SourceId>>,
        reject_first: Cell<usize>,
        reject_all: Cell<bool>,
        confirm_despite_error: Cell<bool>,
        attempts: RefCell<Vec<SourceId>>,
    }

    /// Provider fake; clones share state so tests can inspect it after
    /// handing one to the engine.
    #[derive(Debug, Clone, Default)]
    pub struct FakeProvider {
        inner: Rc<Inner>,
    }

    impl FakeProvider {
        pub fn new(sources: Vec<InputSource>, active: Option<&str>) -> Self {
            let provider = Self::default();
            *provider.inner.sources.borrow_mut() = sources;
            *provider.inner.active.borrow_mut() = active.map(SourceId::new);
            provider
        }

        /// Reject the next `count` activation attempts
        pub fn reject_first(&self, count: usize) {
            self.inner.reject_first.set(count);
        }

        pub fn reject_all(&self) {
            self.inner.reject_all.set(true);
        }

        /// Report an error from activate but still switch the active source
        pub fn confirm_despite_error(&self) {
            self.inner.confirm_despite_error.set(true);
        }

        /// Change the active source behind the engine's back
        pub fn set_active(&self, id: &str) {
            *self.inner.active.borrow_mut() = Some(SourceId::new(id));
        }

        pub fn set_sources(&self, sources: Vec<InputSource>) {
            *self.inner.sources.borrow_mut() = sources;
        }

        pub fn attempts(&self) -> Vec<SourceId> {
            self.inner.attempts.borrow().clone()
        }
    }

    impl InputSourceProvider for FakeProvider {
        fn list(&self) -> Vec<InputSource> {
            self.inner.sources.borrow().clone()
        }

        fn activate(&self, id: &SourceId) -> Result<(), ActivationError> {
            self.inner.attempts.borrow_mut().push(id.clone());

            let remaining = self.inner.reject_first.get();
            if self.inner.reject_all.get() || remaining > 0 {
                self.inner.reject_first.set(remaining.saturating_sub(1));
                if self.inner.confirm_despite_error.get() {
                    *self.inner.active.borrow_mut() = Some(id.clone());
                }
                return Err(ActivationError::Rejected(-50));
            }

            *self.inner.active.borrow_mut() = Some(id.clone());
            Ok(())
        }

        fn query_active(&self) -> Option<SourceId> {
            self.inner.active.borrow().clone()
        }
    }
}
