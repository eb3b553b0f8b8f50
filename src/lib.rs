//! Client for the home-services marketplace back end.
//!
//! The centrepiece is [`export::ExportPoller`], which starts the admin's
//! closed-services CSV export and polls until the file is ready. Around it
//! sit the typed REST client ([`net::ApiClient`]), the stored session, the
//! role-based route guard, and the dashboard helpers used by the `portal`
//! binary.

pub mod config;
pub mod dashboard;
pub mod export;
pub mod guard;
pub mod net;
pub mod session;
