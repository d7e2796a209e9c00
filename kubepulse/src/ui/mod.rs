//! Terminal front end for the live view.
//!
//! ```text
//! events.rs ── key_to_input ──▶ LiveViewEngine ──▶ TerminalRenderer
//!                                                     │
//!                                          dashboard::draw_dashboard
//!                                                     │
//!                                      components/ (gauge, header, help bar)
//! ```

pub mod components;
pub mod dashboard;
pub mod events;
pub mod layout;
mod terminal;

pub use events::{key_to_input, spawn_input_thread};
pub use terminal::TerminalRenderer;
