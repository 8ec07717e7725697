//! Localized GraphQL client for the Kitsu API.
//!
//! - `exchange`: the composable operation pipeline (debug, cache, auth, SSR, transport)
//! - `client`: pipeline assembly and the public query/mutate/subscribe surface
//! - `i18n`: locale registry, negotiation, persistence and message catalogs
//! - `render` / `server`: server-render handoff and the render host

pub mod client;
pub mod config;
pub mod error;
pub mod exchange;
pub mod i18n;
pub mod metrics;
pub mod operation;
pub mod render;
pub mod server;
