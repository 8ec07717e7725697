//! The active-locale store.
//!
//! # Resolution
//!
//! At construction the active locale is the first of:
//!
//! 1. the explicit locale passed in (e.g. resolved by the render host),
//! 2. the persisted choice under [`CHOSEN_LOCALE_KEY`], if still available,
//! 3. negotiation of the user agent's preferences against the registry,
//! 4. the registry default (the negotiation fallback).
//!
//! An explicit or persisted locale is a *choice*. A language-preference change
//! from the user agent only re-negotiates the default; it never replaces a
//! choice.
//!
//! # Failure Modes
//!
//! - Storage errors are logged and otherwise ignored: the in-memory state is
//!   always updated.
//! - Subscribers are called outside any borrow, but a subscriber that calls
//!   back into `set_locale` re-enters notification synchronously.

use crate::i18n::persistence::{KeyValueStore, CHOSEN_LOCALE_KEY};
use crate::i18n::{negotiate, Locale, LocaleRegistry};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Source of the user agent's ranked language preferences.
pub trait UserAgent {
    fn preferred_languages(&self) -> Vec<String>;
}

/// Fixed preference list.
#[derive(Debug, Clone, Default)]
pub struct StaticUserAgent(pub Vec<String>);

impl StaticUserAgent {
    pub fn new<I, S>(languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(languages.into_iter().map(Into::into).collect())
    }
}

impl UserAgent for StaticUserAgent {
    fn preferred_languages(&self) -> Vec<String> {
        self.0.clone()
    }
}

type Callback = Rc<dyn Fn(Locale)>;

/// Guard returned by [`LocaleStore::subscribe`]; dropping it unsubscribes.
#[must_use = "dropping the subscription unsubscribes immediately"]
pub struct Subscription {
    _callback: Callback,
}

struct LocaleState {
    preferences: Vec<String>,
    chosen: Option<Locale>,
    negotiated: Locale,
}

impl LocaleState {
    fn current(&self) -> Locale {
        self.chosen.unwrap_or(self.negotiated)
    }
}

/// The active locale for one client, with the user's explicit choice
/// persisted through a [`KeyValueStore`].
///
/// An explicit choice wins over negotiation from the user agent's
/// preferences. Subscribers hear about every change to the active locale.
pub struct LocaleStore {
    registry: Arc<LocaleRegistry>,
    storage: Rc<dyn KeyValueStore>,
    state: RefCell<LocaleState>,
    subscribers: RefCell<Vec<Weak<dyn Fn(Locale)>>>,
    version: Cell<u64>,
}

impl LocaleStore {
    pub fn new(
        registry: Arc<LocaleRegistry>,
        storage: Rc<dyn KeyValueStore>,
        user_agent: &dyn UserAgent,
        explicit: Option<&str>,
    ) -> Self {
        let preferences = user_agent.preferred_languages();
        let negotiated = negotiate(&preferences, &registry);

        let explicit = explicit.and_then(|code| match registry.locale(code) {
            Ok(locale) => Some(locale),
            Err(e) => {
                warn!("Ignoring explicit locale: {}", e);
                None
            }
        });
        let chosen = explicit.or_else(|| persisted_choice(&registry, storage.as_ref()));

        let state = LocaleState {
            preferences,
            chosen,
            negotiated,
        };
        debug!(
            locale = %state.current(),
            chosen = chosen.is_some(),
            "Locale resolved"
        );

        Self {
            registry,
            storage,
            state: RefCell::new(state),
            subscribers: RefCell::new(Vec::new()),
            version: Cell::new(0),
        }
    }

    /// The chosen locale if any, else the negotiated one.
    pub fn current_locale(&self) -> Locale {
        self.state.borrow().current()
    }

    /// Whether the active locale was chosen rather than negotiated.
    pub fn has_choice(&self) -> bool {
        self.state.borrow().chosen.is_some()
    }

    pub fn registry(&self) -> &Arc<LocaleRegistry> {
        &self.registry
    }

    /// Select a locale and persist the choice.
    pub fn set_locale(&self, locale: Locale) {
        let locale = match self.registry.locale(locale.code()) {
            Ok(locale) => locale,
            Err(e) => {
                warn!("Refusing to select locale: {}", e);
                return;
            }
        };

        if let Err(e) = self.storage.set(CHOSEN_LOCALE_KEY, locale.code()) {
            warn!("Failed to persist locale choice: {:#}", e);
        }
        info!(%locale, "Locale selected");
        self.update(|state| state.chosen = Some(locale));
    }

    /// Forget the choice and fall back to negotiation.
    pub fn reset_locale(&self) {
        if let Err(e) = self.storage.remove(CHOSEN_LOCALE_KEY) {
            warn!("Failed to clear persisted locale: {:#}", e);
        }
        let registry = Arc::clone(&self.registry);
        self.update(|state| {
            state.chosen = None;
            state.negotiated = negotiate(&state.preferences, &registry);
        });
    }

    /// The user agent's preferences changed; re-negotiate the default.
    pub fn language_changed(&self, preferences: Vec<String>) {
        let registry = Arc::clone(&self.registry);
        self.update(|state| {
            state.negotiated = negotiate(&preferences, &registry);
            state.preferences = preferences;
        });
    }

    /// Register a callback for active-locale changes.
    pub fn subscribe(&self, callback: impl Fn(Locale) + 'static) -> Subscription {
        let callback: Callback = Rc::new(callback);
        self.subscribers.borrow_mut().push(Rc::downgrade(&callback));
        Subscription {
            _callback: callback,
        }
    }

    /// Increments once per change of the active locale.
    pub fn version(&self) -> u64 {
        self.version.get()
    }

    fn update(&self, change: impl FnOnce(&mut LocaleState)) {
        let (before, after) = {
            let mut state = self.state.borrow_mut();
            let before = state.current();
            change(&mut state);
            (before, state.current())
        };
        if before != after {
            self.version.set(self.version.get() + 1);
            debug!(from = %before, to = %after, "Active locale changed");
            self.notify(after);
        }
    }

    fn notify(&self, locale: Locale) {
        let callbacks: Vec<Callback> = {
            let mut subscribers = self.subscribers.borrow_mut();
            subscribers.retain(|weak| weak.strong_count() > 0);
            subscribers.iter().filter_map(Weak::upgrade).collect()
        };
        for callback in callbacks {
            callback(locale);
        }
    }
}

fn persisted_choice(registry: &LocaleRegistry, storage: &dyn KeyValueStore) -> Option<Locale> {
    match storage.get(CHOSEN_LOCALE_KEY) {
        Ok(Some(code)) => match registry.locale(&code) {
            Ok(locale) => Some(locale),
            Err(e) => {
                debug!("Ignoring persisted locale: {}", e);
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            warn!("Failed to read persisted locale: {:#}", e);
            None
        }
    }
}
