//! Application routes and navigation.
//!
//! Recipe views require a session; `Router` consults the `AuthGuard` and
//! redirects to the auth view when it denies entry.

use std::fmt;

use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

use crate::auth::AuthGuard;

/// Navigation targets requested by the auth flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavTarget {
    Home,
    Auth,
}

/// Performs navigation side effects. Nothing is returned to the caller.
pub trait Navigator: Send {
    fn navigate(&mut self, target: NavTarget);
}

/// Navigator publishing the latest target on a watch channel.
pub struct WatchNavigator {
    tx: watch::Sender<Option<NavTarget>>,
}

impl WatchNavigator {
    pub fn new() -> (Self, watch::Receiver<Option<NavTarget>>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, rx)
    }
}

impl Navigator for WatchNavigator {
    fn navigate(&mut self, target: NavTarget) {
        debug!(?target, "Navigating");
        self.tx.send_replace(Some(target));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Auth,
    Recipes,
    NewRecipe,
    RecipeDetail(usize),
    EditRecipe(usize),
}

impl Route {
    /// Parse a path such as `/recipes/2/edit`. `/` is the recipe list.
    pub fn parse(path: &str) -> Option<Route> {
        let segments: Vec<&str> = path
            .trim()
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        match segments.as_slice() {
            [] | ["recipes"] => Some(Route::Recipes),
            ["auth"] => Some(Route::Auth),
            ["recipes", "new"] => Some(Route::NewRecipe),
            ["recipes", id] => id.parse().ok().map(Route::RecipeDetail),
            ["recipes", id, "edit"] => id.parse().ok().map(Route::EditRecipe),
            _ => None,
        }
    }

    pub fn path(&self) -> String {
        match self {
            Route::Auth => "/auth".to_string(),
            Route::Recipes => "/recipes".to_string(),
            Route::NewRecipe => "/recipes/new".to_string(),
            Route::RecipeDetail(id) => format!("/recipes/{}", id),
            Route::EditRecipe(id) => format!("/recipes/{}/edit", id),
        }
    }

    pub fn requires_session(&self) -> bool {
        !matches!(self, Route::Auth)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

impl From<NavTarget> for Route {
    fn from(target: NavTarget) -> Self {
        match target {
            NavTarget::Home => Route::Recipes,
            NavTarget::Auth => Route::Auth,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("No route matches {0}")]
    NotFound(String),

    #[error("Sign in required - redirecting to {0}")]
    Redirect(Route),
}

/// Resolves paths to routes, applying the auth guard to protected ones.
#[derive(Clone)]
pub struct Router {
    guard: AuthGuard,
}

impl Router {
    pub fn new(guard: AuthGuard) -> Self {
        Self { guard }
    }

    pub fn resolve(&self, path: &str) -> Result<Route, RouteError> {
        let route = Route::parse(path).ok_or_else(|| RouteError::NotFound(path.to_string()))?;
        if route.requires_session() && !self.guard.can_enter() {
            debug!(%route, "Guard denied entry");
            return Err(RouteError::Redirect(Route::Auth));
        }
        Ok(route)
    }
}
