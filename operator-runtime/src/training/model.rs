use std::sync::Arc;

use arc_swap::ArcSwapOption;

/// The model currently in use, shared between the runtime loop and the poller.
///
/// Readers never block: `load` is a lock-free pointer read, and a model that
/// was loaded stays valid for the reader even after it is replaced.
pub struct ModelHandle<M> {
    current: Arc<ArcSwapOption<M>>,
}

impl<M> ModelHandle<M> {
    pub fn new() -> Self {
        Self {
            current: Arc::new(ArcSwapOption::empty()),
        }
    }

    pub fn load(&self) -> Option<Arc<M>> {
        self.current.load_full()
    }

    pub fn store(&self, model: M) {
        self.current.store(Some(Arc::new(model)));
    }

    pub fn is_loaded(&self) -> bool {
        self.current.load().is_some()
    }
}

impl<M> Default for ModelHandle<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Clone for ModelHandle<M> {
    fn clone(&self) -> Self {
        Self {
            current: self.current.clone(),
        }
    }
}
