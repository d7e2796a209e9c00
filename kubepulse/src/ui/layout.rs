//! Layout helpers shared by the table and header.

use ratatui::{
    layout::{Constraint, Layout, Rect},
    text::Line,
};

/// Gap between the CPU and MEM columns.
pub const COL_GAP: u16 = 2;

/// Widest the name column may get.
pub const MAX_TITLE_WIDTH: u16 = 60;

pub const STATUS_WIDTH: u16 = 12;

/// Splits a row into `[NAME, STATUS, CPU, GAP, MEM, DETAIL]`.
pub fn column_split(area: Rect, name_width: u16, detail_width: u16) -> [Rect; 6] {
    Layout::horizontal([
        Constraint::Length(name_width),
        Constraint::Length(STATUS_WIDTH),
        Constraint::Fill(1),
        Constraint::Length(COL_GAP),
        Constraint::Fill(1),
        Constraint::Length(detail_width),
    ])
    .areas(area)
}

/// Width of the longest name plus padding, clamped to [`MAX_TITLE_WIDTH`].
pub fn calculate_name_width<'a>(names: impl Iterator<Item = &'a str>, padding: u16) -> u16 {
    names
        .map(|name| Line::from(name).width() as u16 + padding)
        .max()
        .unwrap_or(4 + padding)
        .clamp(1, MAX_TITLE_WIDTH)
}
