//! Client-side route guard and role-based navigation.
//!
//! The back end enforces every rule again; this only keeps users away from
//! screens they cannot use.

use std::fmt;

use crate::net::types::Role;
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Home,
    Login,
    Register,
    Users,
    Services,
}

impl Route {
    #[must_use]
    pub fn path(self) -> &'static str {
        match self {
            Self::Home => "/",
            Self::Login => "/login",
            Self::Register => "/register",
            Self::Users => "/users",
            Self::Services => "/service",
        }
    }

    /// Only administrators may open this route.
    #[must_use]
    pub fn admin_only(self) -> bool {
        matches!(self, Self::Users | Self::Services)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allow,
    RedirectToLogin,
    RedirectHome,
    Forbidden,
}

/// Decide whether `session` may open `route`.
#[must_use]
pub fn check(route: Route, session: &Session) -> Access {
    let logged_in = session.is_logged_in();
    if route.admin_only() {
        return match (logged_in, session.is_admin()) {
            (false, _) => Access::RedirectToLogin,
            (true, true) => Access::Allow,
            (true, false) => Access::Forbidden,
        };
    }
    match route {
        Route::Login | Route::Register if logged_in => Access::RedirectHome,
        _ => Access::Allow,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavItem {
    Link(Route),
    Logout,
}

/// Navigation entries shown to `session`, in display order.
#[must_use]
pub fn navigation(session: &Session) -> Vec<NavItem> {
    let logged_in = session.is_logged_in();
    let admin = session.is_admin();

    let mut items = vec![NavItem::Link(Route::Home)];
    if !logged_in {
        items.push(NavItem::Link(Route::Login));
    }
    if admin {
        items.push(NavItem::Link(Route::Users));
        items.push(NavItem::Link(Route::Services));
    }
    if !logged_in {
        items.push(NavItem::Link(Route::Register));
    }
    if logged_in {
        items.push(NavItem::Logout);
    }
    items
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dashboard {
    Customer,
    Professional,
    Admin,
}

/// The home-page dashboard for the session's role, if signed in.
#[must_use]
pub fn dashboard_for(session: &Session) -> Option<Dashboard> {
    if !session.is_logged_in() {
        return None;
    }
    session.role.map(|role| match role {
        Role::Customer => Dashboard::Customer,
        Role::Professional => Dashboard::Professional,
        Role::Admin => Dashboard::Admin,
    })
}

#[cfg(test)]
#[path = "guard_test.rs"]
mod tests;
