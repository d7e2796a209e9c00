//! Usage gauges.

use ratatui::{
    style::{palette::tailwind, Color, Style},
    widgets::Gauge,
};

/// Gauge color schemes. `Hot` overrides the resource color past 90%.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GaugeStyle {
    Cpu,
    Memory,
    Hot,
}

impl GaugeStyle {
    pub fn for_percent(self, percent: f64) -> Self {
        if percent > 90.0 {
            GaugeStyle::Hot
        } else {
            self
        }
    }

    fn color(self) -> Color {
        match self {
            GaugeStyle::Cpu => tailwind::GREEN.c500,
            GaugeStyle::Memory => tailwind::ORANGE.c400,
            GaugeStyle::Hot => tailwind::RED.c400,
        }
    }
}

/// A gauge filled to `percent` (clamped to 0..=100), labelled with `label`.
pub fn make_gauge(label: String, percent: f64, style: GaugeStyle) -> Gauge<'static> {
    let style = style.for_percent(percent);
    Gauge::default()
        .gauge_style(Style::default().fg(style.color()).bg(tailwind::GRAY.c800))
        .label(label)
        .use_unicode(true)
        .percent(percent.clamp(0.0, 100.0) as u16)
}
