//! Navigation port used for authentication redirects.
//!
//! # Design
//! - The client never touches a browser API directly; embedding applications
//!   supply a [`Navigator`] that reports the current location and performs
//!   replace-navigation.
//! - A navigator without a browser context reports no location, which turns
//!   every redirect into a no-op.

use std::sync::{Arc, Mutex, PoisonError};

use url::form_urlencoded;

/// Query parameter carrying the location to return to after login or tenant selection.
pub const REDIRECT_PARAM: &str = "redirect";

/// Location and navigation side channel of the embedding application.
pub trait Navigator: Send + Sync {
    /// Current full path (path, query and fragment), or `None` outside a browser context.
    fn current_location(&self) -> Option<String>;
    /// Replace the current history entry with `target`.
    fn replace(&self, target: &str);
}

/// Shared reference to a navigator.
pub type SharedNavigator = Arc<dyn Navigator>;

/// Navigator for processes without a browser context; never navigates.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessNavigator;

impl Navigator for HeadlessNavigator {
    fn current_location(&self) -> Option<String> {
        None
    }

    fn replace(&self, _target: &str) {}
}

#[derive(Debug)]
struct MemoryHistory {
    location: String,
    replacements: Vec<String>,
}

/// In-memory navigator tracking the current location and every replacement issued.
#[derive(Debug)]
pub struct MemoryNavigator {
    history: Mutex<MemoryHistory>,
}

impl MemoryNavigator {
    /// Navigator positioned at `location`.
    #[must_use]
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            history: Mutex::new(MemoryHistory {
                location: location.into(),
                replacements: Vec::new(),
            }),
        }
    }

    /// Current location.
    #[must_use]
    pub fn location(&self) -> String {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .location
            .clone()
    }

    /// Every target passed to [`Navigator::replace`], oldest first.
    #[must_use]
    pub fn replacements(&self) -> Vec<String> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replacements
            .clone()
    }
}

impl Navigator for MemoryNavigator {
    fn current_location(&self) -> Option<String> {
        Some(self.location())
    }

    fn replace(&self, target: &str) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.location = target.to_string();
        history.replacements.push(target.to_string());
    }
}

/// Path component of a full path, without query or fragment.
#[must_use]
pub fn pathname(full_path: &str) -> &str {
    full_path
        .find(['?', '#'])
        .map_or(full_path, |index| &full_path[..index])
}

/// Target for sending the user to `page` and back to `current` afterwards.
///
/// The `redirect` parameter is omitted when `current` is exactly the login
/// page, so the user is never bounced back to the login form.
#[must_use]
pub fn redirect_target(page: &str, current: &str, login_page: &str) -> String {
    if current == login_page {
        return page.to_string();
    }
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair(REDIRECT_PARAM, current)
        .finish();
    format!("{page}?{query}")
}
