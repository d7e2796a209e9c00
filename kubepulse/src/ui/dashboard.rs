//! Draws a [`LiveFrame`] onto a ratatui frame.

use chrono::Local;
use ratatui::{
    prelude::*,
    style::{palette::tailwind, Modifier, Style},
    widgets::{Paragraph, Tabs},
    Frame,
};

use super::{
    components::{draw_header, draw_help_bar, live_hints, make_gauge, GaugeStyle},
    layout::{calculate_name_width, column_split},
};
use crate::{
    aggregate::{average_usage_pct, Totals},
    live::{DisplayToggles, LiveFrame},
    model::ResourceMetrics,
    orchestrator::{Row, ViewKind},
    quantity::{format_cpu, format_memory, percent},
};

const DETAIL_WIDTH: u16 = 24;

/// Draws `frame`, or a placeholder before the first one, with `error` on
/// the status line.
pub fn draw_dashboard(f: &mut Frame, frame: Option<&LiveFrame>, error: Option<&str>) {
    let [help_area, tabs_area, summary_area, _blank, hdr_area, body_area, status_area] =
        Layout::vertical([
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .areas(f.area());

    let Some(frame) = frame else {
        draw_help_bar(f, help_area, &live_hints(false));
        f.render_widget(
            Paragraph::new("waiting for first refresh...").style(Style::default().fg(tailwind::GRAY.c400)),
            body_area,
        );
        draw_status(f, status_area, None, error);
        return;
    };

    draw_help_bar(f, help_area, &live_hints(frame.view.is_namespaced()));
    draw_tabs(f, tabs_area, frame);
    f.render_widget(Paragraph::new(summary_line(frame)), summary_area);

    let rows = &frame.output.rows;
    let name_width = calculate_name_width(rows.iter().map(|r| r.name.as_str()), 2);
    let detail_width = if frame.toggles.compact { 0 } else { DETAIL_WIDTH };
    draw_header(f, hdr_area, name_width, detail_width);

    let row_height: u16 = if frame.toggles.compact { 1 } else { 2 };
    for (idx, (row, metrics)) in rows.iter().zip(&frame.output.metrics).enumerate() {
        let y = body_area.y + idx as u16 * row_height;
        if y + row_height > body_area.y + body_area.height {
            break;
        }
        let area = Rect {
            x: body_area.x,
            y,
            width: body_area.width,
            height: row_height,
        };
        draw_row(f, area, row, metrics, frame.toggles, name_width, detail_width);
    }

    draw_status(f, status_area, Some(frame), error);
}

fn draw_tabs(f: &mut Frame, area: Rect, frame: &LiveFrame) {
    let selected = ViewKind::ALL
        .iter()
        .position(|v| *v == frame.view)
        .unwrap_or(0);
    let titles: Vec<Line> = ViewKind::ALL
        .iter()
        .enumerate()
        .map(|(i, v)| Line::from(format!("{} {v}", i + 1)))
        .collect();
    let [tabs_area, info_area] =
        Layout::horizontal([Constraint::Fill(1), Constraint::Length(40)]).areas(area);

    f.render_widget(
        Tabs::new(titles)
            .select(selected)
            .style(Style::default().fg(Color::White))
            .highlight_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        tabs_area,
    );

    let mut info = format!("sort:{}", frame.sort);
    if let Some(ns) = &frame.namespace {
        info.push_str(&format!("  ns:{ns}"));
    }
    f.render_widget(
        Paragraph::new(info)
            .alignment(Alignment::Right)
            .style(Style::default().fg(tailwind::GRAY.c300)),
        info_area,
    );
}

fn summary_line(frame: &LiveFrame) -> Line<'static> {
    let cluster = &frame.output.cluster;
    let mut spans = vec![
        Span::styled(
            cluster.host.clone(),
            Style::default().fg(tailwind::BLUE.c400).add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(" {}  ", cluster.version)),
    ];

    let figures = match &frame.output.totals {
        Some(totals) => totals_text(totals),
        None => match average_usage_pct(&frame.output.metrics) {
            Some((cpu, mem)) => format!("avg cpu {cpu:.0}%  avg mem {mem:.0}%"),
            None => "usage unavailable".to_string(),
        },
    };
    spans.push(Span::raw(figures));
    spans.push(Span::styled(
        format!(
            "  updated {} every {}s",
            frame.last_update.with_timezone(&Local).format("%H:%M:%S"),
            frame.refresh_interval.as_secs()
        ),
        Style::default().fg(tailwind::GRAY.c400),
    ));
    Line::from(spans)
}

fn totals_text(totals: &Totals) -> String {
    let m = totals.metrics();
    format!(
        "nodes {}/{} ready  cpu req {}/{} ({:.0}%)  mem req {}/{} ({:.0}%)",
        totals.ready_nodes,
        totals.nodes,
        format_cpu(totals.allocated_requests.cpu_milli),
        format_cpu(totals.allocatable.cpu_milli),
        m.cpu_request_pct(),
        format_memory(totals.allocated_requests.mem_bytes),
        format_memory(totals.allocatable.mem_bytes),
        m.mem_request_pct(),
    )
}

fn cores(v: f64) -> String {
    format_cpu((v * 1000.0).round() as i64)
}

fn bytes(v: f64) -> String {
    format_memory(v.round() as i64)
}

/// `42% 250m/4` style cell text. Unknown usage reads `n/a`.
fn usage_label(used: Option<f64>, capacity: f64, fmt: fn(f64) -> String, toggles: DisplayToggles) -> String {
    let Some(used) = used else {
        return "n/a".to_string();
    };
    let amount = format!("{}/{}", fmt(used), fmt(capacity));
    if toggles.percentages {
        format!("{:.0}% {amount}", percent(used, capacity))
    } else {
        amount
    }
}

fn draw_usage(f: &mut Frame, area: Rect, label: String, pct: f64, style: GaugeStyle, toggles: DisplayToggles) {
    if toggles.bars {
        f.render_widget(make_gauge(label, pct, style), area);
    } else {
        f.render_widget(Paragraph::new(label).alignment(Alignment::Center), area);
    }
}

fn draw_row(
    f: &mut Frame,
    area: Rect,
    row: &Row,
    m: &ResourceMetrics,
    toggles: DisplayToggles,
    name_width: u16,
    detail_width: u16,
) {
    let [first, second] = if area.height > 1 {
        Layout::vertical([Constraint::Length(1), Constraint::Length(1)]).areas(area)
    } else {
        [area, Rect::default()]
    };
    let [name_col, status_col, cpu_col, _gap, mem_col, detail_col] =
        column_split(first, name_width, detail_width);

    f.render_widget(
        Paragraph::new(row.name.clone()).style(Style::default().fg(tailwind::BLUE.c400)),
        name_col,
    );
    let status_color = if row.healthy {
        tailwind::GREEN.c400
    } else {
        tailwind::RED.c400
    };
    f.render_widget(
        Paragraph::new(row.status.clone()).style(Style::default().fg(status_color)),
        status_col,
    );

    let cpu_label = usage_label(m.cpu_usage, m.cpu_capacity, cores, toggles);
    let mem_label = usage_label(m.mem_usage, m.mem_capacity, bytes, toggles);
    draw_usage(f, cpu_col, cpu_label, m.cpu_usage_pct(), GaugeStyle::Cpu, toggles);
    draw_usage(f, mem_col, mem_label, m.mem_usage_pct(), GaugeStyle::Memory, toggles);

    if toggles.compact || second.height == 0 {
        return;
    }
    f.render_widget(
        Paragraph::new(row.detail.clone()).style(Style::default().fg(tailwind::GRAY.c300)),
        detail_col,
    );

    let mut extra = format!(
        "  req {}/{}  lim {}/{}",
        cores(m.cpu_request),
        bytes(m.mem_request),
        cores(m.cpu_limit),
        bytes(m.mem_limit)
    );
    if let Some(cloud) = &row.cloud {
        extra.push_str(&format!("  {}", cloud.summary()));
    }
    f.render_widget(
        Paragraph::new(extra).style(Style::default().fg(tailwind::GRAY.c500)),
        second,
    );
}

fn draw_status(f: &mut Frame, area: Rect, frame: Option<&LiveFrame>, error: Option<&str>) {
    let line = match (error, frame) {
        (Some(err), _) => Line::from(Span::styled(
            format!("refresh failed: {err}"),
            Style::default().fg(tailwind::RED.c400),
        )),
        (None, Some(frame)) => Line::from(Span::styled(
            format!("{} {}", frame.output.len(), frame.view.to_string().to_lowercase()),
            Style::default().fg(tailwind::GRAY.c400),
        )),
        (None, None) => Line::default(),
    };
    f.render_widget(Paragraph::new(line), area);
}
