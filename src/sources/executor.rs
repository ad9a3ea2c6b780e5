//! Switch executor: activates the next source with retry across the ring

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::events::SwitchEvent;

use super::provider::InputSourceProvider;
use super::registry::SourceRegistry;
use super::source::{InputSource, SourceId};

/// Errors from a cycling attempt
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SwitchError {
    #[error("no selectable keyboard input sources available")]
    NoSourcesAvailable,

    #[error("all {attempts} input source candidates were rejected")]
    SwitchFailed { attempts: usize },
}

/// Owns the source ring and performs switches against the provider
pub struct SwitchExecutor<P> {
    provider: P,
    registry: SourceRegistry,
    event_tx: broadcast::Sender<SwitchEvent>,
}

impl<P: InputSourceProvider> SwitchExecutor<P> {
    /// Create an executor and run the initial discovery
    pub fn new(provider: P, event_tx: broadcast::Sender<SwitchEvent>) -> Self {
        let registry = SourceRegistry::discover(&provider);
        let executor = Self {
            provider,
            registry,
            event_tx,
        };
        executor.announce_sources();
        executor
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Re-run discovery, replacing the ring and re-seeding the cursor
    pub fn rediscover(&mut self) -> usize {
        self.registry = SourceRegistry::discover(&self.provider);
        self.announce_sources();
        self.registry.len()
    }

    /// Advance the active input source to the next one in the ring.
    ///
    /// Each rejected candidate moves a tentative cursor forward, so every
    /// source is tried at most once. The registry cursor is only committed
    /// on a confirmed switch.
    pub fn cycle_to_next(&mut self) -> Result<InputSource, SwitchError> {
        let len = self.registry.len();
        let Some(mut tentative) = self.registry.current_index() else {
            warn!("no available input sources");
            return Err(SwitchError::NoSourcesAvailable);
        };
        let previously_active = self.provider.query_active();

        for attempt in 1..=len {
            let (candidate, index) = self.registry.peek_after(tentative)?;
            let candidate = candidate.clone();

            debug!(attempt, index, name = %candidate.name, "switching input source");

            if self.try_activate(&candidate, previously_active.as_ref()) {
                self.registry.commit(index);
                info!(name = %candidate.name, index, attempts = attempt, "switched input source");
                self.notify(SwitchEvent::SourceChanged {
                    id: candidate.id.to_string(),
                    name: candidate.name.clone(),
                    index,
                    attempts: attempt,
                });
                return Ok(candidate);
            }

            tentative = index;
        }

        warn!(attempts = len, "all input source switching attempts failed");
        self.notify(SwitchEvent::SwitchFailed { attempts: len });
        Err(SwitchError::SwitchFailed { attempts: len })
    }

    /// One activation attempt, accepted when the OS reports success or
    /// when the OS-reported active source moved to the candidate anyway
    fn try_activate(&self, candidate: &InputSource, previously_active: Option<&SourceId>) -> bool {
        match self.provider.activate(&candidate.id) {
            Ok(()) => true,
            Err(e) => {
                let now_active = self.provider.query_active();
                let confirmed = now_active.as_ref() == Some(&candidate.id)
                    && previously_active != Some(&candidate.id);
                if confirmed {
                    debug!(?e, id = %candidate.id, "activation errored but source is active");
                } else {
                    warn!(?e, id = %candidate.id, "activation rejected, trying next source");
                }
                confirmed
            }
        }
    }

    fn announce_sources(&self) {
        self.notify(SwitchEvent::SourcesDiscovered {
            names: self.registry.names(),
            current: self.registry.current_index(),
        });
    }

    fn notify(&self, event: SwitchEvent) {
        // No subscribers is fine, the UI may not be connected
        let _ = self.event_tx.send(event);
    }
}
