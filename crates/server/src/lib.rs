#![allow(clippy::collapsible_if)]
pub mod error;
pub mod events;
pub mod output;
pub mod routes;
pub mod state;
pub mod upload;
