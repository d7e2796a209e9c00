use std::io::{self, Stdout};

use crossterm::{
    cursor::{Hide, Show},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    Terminal,
};
use tracing::warn;

use super::dashboard::draw_dashboard;
use crate::{
    error::{Error, Result},
    live::{LiveFrame, Render},
};

/// Ratatui renderer. Keeps the last good frame so a failed refresh only
/// changes the status line.
pub struct TerminalRenderer<B: Backend> {
    terminal: Terminal<B>,
    last: Option<LiveFrame>,
    error: Option<String>,
    /// Raw mode and the alternate screen were entered and must be undone.
    owns_tty: bool,
    torn_down: bool,
}

impl TerminalRenderer<CrosstermBackend<Stdout>> {
    /// Takes over stdout: raw mode, alternate screen, hidden cursor.
    pub fn stdout() -> Result<Self> {
        enable_raw_mode().map_err(|e| Error::terminal(format!("enable raw mode: {e}")))?;
        let mut stdout = io::stdout();
        if let Err(e) = execute!(stdout, EnterAlternateScreen, Hide) {
            let _ = disable_raw_mode();
            return Err(Error::terminal(format!("enter alternate screen: {e}")));
        }
        let mut renderer = Self::with_backend(CrosstermBackend::new(stdout))?;
        renderer.owns_tty = true;
        Ok(renderer)
    }
}

impl<B: Backend> TerminalRenderer<B> {
    pub fn with_backend(backend: B) -> Result<Self> {
        let terminal = Terminal::new(backend).map_err(|e| Error::terminal(e.to_string()))?;
        Ok(Self {
            terminal,
            last: None,
            error: None,
            owns_tty: false,
            torn_down: false,
        })
    }

    pub fn backend(&self) -> &B {
        self.terminal.backend()
    }

    fn redraw(&mut self) -> Result<()> {
        let last = self.last.as_ref();
        let error = self.error.as_deref();
        self.terminal
            .draw(|f| draw_dashboard(f, last, error))
            .map_err(|e| Error::terminal(e.to_string()))?;
        Ok(())
    }

    fn restore(&mut self) -> Result<()> {
        if self.torn_down {
            return Ok(());
        }
        self.torn_down = true;
        if !self.owns_tty {
            return Ok(());
        }
        disable_raw_mode().map_err(|e| Error::terminal(format!("disable raw mode: {e}")))?;
        execute!(io::stdout(), LeaveAlternateScreen, Show)
            .map_err(|e| Error::terminal(format!("leave alternate screen: {e}")))
    }
}

impl<B: Backend + Send> Render for TerminalRenderer<B> {
    fn render(&mut self, frame: &LiveFrame) -> Result<()> {
        self.last = Some(frame.clone());
        self.error = None;
        self.redraw()
    }

    fn report_error(&mut self, message: &str) -> Result<()> {
        self.error = Some(message.to_string());
        self.redraw()
    }

    fn teardown(&mut self) -> Result<()> {
        self.restore()
    }
}

impl<B: Backend> Drop for TerminalRenderer<B> {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            warn!(error = %e, "failed to restore terminal");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        aggregate::ClusterInfo,
        live::DisplayToggles,
        orchestrator::{Row, SortMode, ViewKind, ViewOutput},
    };
    use chrono::Utc;
    use ratatui::backend::TestBackend;
    use std::time::Duration;

    fn screen(renderer: &TerminalRenderer<TestBackend>) -> String {
        let buf = renderer.backend().buffer();
        buf.content().iter().map(|c| c.symbol()).collect()
    }

    fn frame() -> LiveFrame {
        LiveFrame {
            view: ViewKind::Namespaces,
            sort: SortMode::Status,
            namespace: None,
            toggles: DisplayToggles::default(),
            refresh_interval: Duration::from_secs(5),
            last_update: Utc::now(),
            output: ViewOutput {
                view: ViewKind::Namespaces,
                rows: vec![Row {
                    name: "kube-system".into(),
                    status: "Active".into(),
                    healthy: true,
                    ..Default::default()
                }],
                metrics: vec![Default::default()],
                namespaces: Vec::new(),
                totals: None,
                cluster: ClusterInfo::default(),
                fetched_at: Utc::now(),
            },
        }
    }

    #[test]
    fn error_redraw_keeps_last_frame() {
        let mut renderer = TerminalRenderer::with_backend(TestBackend::new(120, 10)).unwrap();
        renderer.render(&frame()).unwrap();
        assert!(screen(&renderer).contains("kube-system"));

        renderer.report_error("failed to list pods: boom").unwrap();
        let shown = screen(&renderer);
        assert!(shown.contains("kube-system"));
        assert!(shown.contains("failed to list pods"));

        renderer.render(&frame()).unwrap();
        assert!(!screen(&renderer).contains("refresh failed"));
        renderer.teardown().unwrap();
        renderer.teardown().unwrap();
    }
}
