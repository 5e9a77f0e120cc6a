//! Explicitly scoped per-session UI state.
//!
//! A [`Provider`] owns a value for as long as it is mounted; [`Accessor`]s hand out read/write
//! access to it. Using an accessor after its provider is gone, or one that was never bound, is
//! a wiring defect and panics, unless the accessor was built with a fallback value.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("{0} accessor used outside of its provider")]
    OutsideProvider(&'static str),
}

pub struct Provider<T> {
    name: &'static str,
    cell: Arc<RwLock<T>>,
}

impl<T: Clone> Provider<T> {
    pub fn mount(name: &'static str, initial: T) -> Self {
        Self {
            name,
            cell: Arc::new(RwLock::new(initial)),
        }
    }

    /// Accessor that fails loudly once this provider is unmounted.
    pub fn accessor(&self) -> Accessor<T> {
        Accessor {
            name: self.name,
            cell: Arc::downgrade(&self.cell),
            fallback: None,
        }
    }

    /// Accessor that reads `fallback` and drops writes once this provider is unmounted.
    pub fn accessor_or(&self, fallback: T) -> Accessor<T> {
        Accessor {
            name: self.name,
            cell: Arc::downgrade(&self.cell),
            fallback: Some(fallback),
        }
    }
}

impl<T> fmt::Debug for Provider<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider").field("name", &self.name).finish()
    }
}

#[derive(Clone)]
pub struct Accessor<T> {
    name: &'static str,
    cell: Weak<RwLock<T>>,
    fallback: Option<T>,
}

impl<T: Clone> Accessor<T> {
    /// An accessor with no provider at all.
    pub fn detached(name: &'static str) -> Self {
        Self {
            name,
            cell: Weak::new(),
            fallback: None,
        }
    }

    pub fn try_get(&self) -> Result<T, ContextError> {
        match self.cell.upgrade() {
            Some(cell) => Ok(cell.read().clone()),
            None => self
                .fallback
                .clone()
                .ok_or(ContextError::OutsideProvider(self.name)),
        }
    }

    pub fn try_set(&self, value: T) -> Result<(), ContextError> {
        match self.cell.upgrade() {
            Some(cell) => {
                *cell.write() = value;
                Ok(())
            }
            None if self.fallback.is_some() => {
                debug!(
                    target = "sync.context",
                    store = self.name,
                    "write dropped, provider unmounted"
                );
                Ok(())
            }
            None => Err(ContextError::OutsideProvider(self.name)),
        }
    }

    #[track_caller]
    pub fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    #[track_caller]
    pub fn set(&self, value: T) {
        if let Err(err) = self.try_set(value) {
            panic!("{err}");
        }
    }
}

impl<T> fmt::Debug for Accessor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accessor")
            .field("name", &self.name)
            .field("bound", &(self.cell.strong_count() > 0))
            .finish()
    }
}

/// Ephemeral UI state for one session or page. Construct one per session and hand accessors
/// to the components that need them.
#[derive(Debug)]
pub struct SessionContext {
    request_id: Provider<Option<String>>,
    dialog_id: Provider<Option<String>>,
    payment_loading: Provider<bool>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionContext {
    pub fn new() -> Self {
        Self {
            request_id: Provider::mount("request_id", None),
            dialog_id: Provider::mount("dialog_id", None),
            payment_loading: Provider::mount("payment_loading", false),
        }
    }

    pub fn request_id(&self) -> Accessor<Option<String>> {
        self.request_id.accessor()
    }

    pub fn dialog_id(&self) -> Accessor<Option<String>> {
        self.dialog_id.accessor()
    }

    /// Degrades to "not loading" with ignored writes if the session is remounted.
    pub fn payment_loading(&self) -> Accessor<bool> {
        self.payment_loading.accessor_or(false)
    }

    /// Reset every store. Accessors handed out before the remount are unbound afterwards.
    pub fn remount(&mut self) {
        *self = Self::new();
    }
}
