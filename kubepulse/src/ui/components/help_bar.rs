//! Inline key hints.

use ratatui::{
    prelude::*,
    style::{palette::tailwind, Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};

/// Draws `key:desc │ key:desc │ ...` on one line.
pub fn draw_help_bar(f: &mut Frame, area: Rect, hints: &[(&str, &str)]) {
    let mut spans = Vec::new();
    let separator = Span::styled(" │ ", Style::default().fg(tailwind::GRAY.c600));

    for (i, (key, desc)) in hints.iter().enumerate() {
        if i > 0 {
            spans.push(separator.clone());
        }
        spans.push(Span::styled(
            *key,
            Style::default()
                .fg(tailwind::YELLOW.c400)
                .add_modifier(Modifier::BOLD),
        ));
        spans.push(Span::styled(
            format!(":{desc}"),
            Style::default().fg(tailwind::GRAY.c400),
        ));
    }

    f.render_widget(
        Paragraph::new(Line::from(spans)).alignment(Alignment::Left),
        area,
    );
}

pub fn live_hints(namespaced: bool) -> Vec<(&'static str, &'static str)> {
    let mut hints = vec![("1-4", "view")];
    if namespaced {
        hints.push(("[/]", "namespace"));
    }
    hints.extend([
        ("s", "sort"),
        ("b", "bars"),
        ("p", "percent"),
        ("c", "compact"),
        ("r", "refresh"),
        ("q", "quit"),
    ]);
    hints
}
