//! Widgets shared by the dashboard.

mod gauge;
mod header;
mod help_bar;

pub use gauge::{make_gauge, GaugeStyle};
pub use header::draw_header;
pub use help_bar::{draw_help_bar, live_hints};
