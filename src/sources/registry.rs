//! Filtered, ordered ring of selectable input sources with a cursor

use tracing::{debug, info, warn};

use super::executor::SwitchError;
use super::provider::InputSourceProvider;
use super::source::{InputSource, SourceId};

/// Snapshot of cyclable input sources plus the cursor into it.
///
/// The list keeps discovery order. The cursor only moves through
/// [`SourceRegistry::commit`], after the OS confirmed a switch.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<InputSource>,
    cursor: usize,
}

impl SourceRegistry {
    /// Query the provider and build the ring, seeding the cursor from the
    /// currently active source
    pub fn discover<P: InputSourceProvider>(provider: &P) -> Self {
        let registry = Self::from_sources(provider.list(), provider.query_active().as_ref());

        if registry.is_empty() {
            warn!("no enabled keyboard input sources found");
        } else {
            info!(count = registry.len(), cursor = registry.cursor, "discovered input sources");
            for (index, source) in registry.sources.iter().enumerate() {
                debug!(index, id = %source.id, name = %source.name, "input source");
            }
        }

        registry
    }

    /// Build the ring from an unfiltered source list
    pub fn from_sources(all: Vec<InputSource>, active: Option<&SourceId>) -> Self {
        let sources: Vec<InputSource> = all.into_iter().filter(InputSource::is_cyclable).collect();

        let cursor = active
            .and_then(|id| sources.iter().position(|s| &s.id == id))
            .unwrap_or(0);

        Self { sources, cursor }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// The cursor, or `None` when there is nothing to cycle
    pub fn current_index(&self) -> Option<usize> {
        (!self.is_empty()).then_some(self.cursor)
    }

    /// Source under the cursor
    pub fn current(&self) -> Option<&InputSource> {
        self.sources.get(self.cursor)
    }

    /// Next source after the cursor. Pure, repeated calls agree.
    pub fn peek_next(&self) -> Result<(&InputSource, usize), SwitchError> {
        self.peek_after(self.cursor)
    }

    /// Next source after an arbitrary ring position
    pub fn peek_after(&self, index: usize) -> Result<(&InputSource, usize), SwitchError> {
        if self.is_empty() {
            return Err(SwitchError::NoSourcesAvailable);
        }
        let next = (index + 1) % self.len();
        Ok((&self.sources[next], next))
    }

    /// Move the cursor to a confirmed position
    pub fn commit(&mut self, index: usize) {
        if index < self.len() {
            self.cursor = index;
        } else {
            warn!(index, len = self.len(), "ignoring commit outside source ring");
        }
    }

    #[cfg(test)]
    pub(crate) fn sources(&self) -> &[InputSource] {
        &self.sources
    }

    /// Display names in ring order
    pub fn names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name.clone()).collect()
    }
}
