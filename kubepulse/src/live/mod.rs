//! The refresh loop: ticks and input drive fetch, aggregate and render passes.

mod state;

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::{
    sync::mpsc,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    error::Result,
    mirror::ObjectMirror,
    orchestrator::{Orchestrator, SortMode, ViewKind, ViewOutput},
};

pub use state::{DisplayToggles, InputEvent, LiveState, DEFAULT_NAMESPACE};

/// Everything a renderer needs for one screen.
#[derive(Clone, Debug)]
pub struct LiveFrame {
    pub view: ViewKind,
    pub sort: SortMode,
    pub namespace: Option<String>,
    pub toggles: DisplayToggles,
    pub refresh_interval: Duration,
    pub last_update: DateTime<Utc>,
    pub output: ViewOutput,
}

/// Display backend driven by [`LiveViewEngine`].
pub trait Render: Send {
    fn render(&mut self, frame: &LiveFrame) -> Result<()>;

    /// A pass failed. The previous frame stays on screen.
    fn report_error(&mut self, message: &str) -> Result<()>;

    fn teardown(&mut self) -> Result<()>;
}

pub struct LiveViewEngine<R> {
    orchestrator: Orchestrator,
    renderer: R,
    state: LiveState,
    mirror: Option<Arc<ObjectMirror>>,
    last_frame: Option<LiveFrame>,
}

impl<R: Render> LiveViewEngine<R> {
    pub fn new(orchestrator: Orchestrator, renderer: R, mut state: LiveState) -> Self {
        state.max_concurrent = orchestrator.max_concurrent();
        Self {
            orchestrator,
            renderer,
            state,
            mirror: None,
            last_frame: None,
        }
    }

    /// Stopped together with the renderer on quit.
    pub fn with_mirror(mut self, mirror: Arc<ObjectMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn state(&self) -> &LiveState {
        &self.state
    }

    pub fn last_frame(&self) -> Option<&LiveFrame> {
        self.last_frame.as_ref()
    }

    /// Runs until quit or until `input` closes. Returns the final state.
    pub async fn run(mut self, mut input: mpsc::Receiver<InputEvent>) -> Result<LiveState> {
        let mut tick = time::interval(self.state.refresh_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let outcome = loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.pass().await {
                        break Err(e);
                    }
                }
                event = input.recv() => {
                    let Some(event) = event else {
                        debug!("input closed");
                        break Ok(());
                    };
                    if !self.state.apply(&event) {
                        break Ok(());
                    }
                    if event == InputEvent::Refresh {
                        tick.reset();
                    }
                    if let Err(e) = self.pass().await {
                        break Err(e);
                    }
                }
            }
        };

        self.shutdown();
        outcome.map(|()| self.state)
    }

    /// One fetch, aggregate and render pass. View failures are reported to
    /// the renderer; only renderer failures end the loop.
    #[tracing::instrument(skip(self), fields(view = %self.state.mode))]
    async fn pass(&mut self) -> Result<()> {
        let request = self.state.request();
        match self.orchestrator.run(&request).await {
            Ok(output) => {
                if output.view == ViewKind::Namespaces {
                    self.state.set_namespaces(output.namespaces.iter().cloned());
                }
                self.state.last_update = Some(output.fetched_at);
                let frame = LiveFrame {
                    view: self.state.mode,
                    sort: self.state.sort,
                    namespace: request.namespace,
                    toggles: self.state.toggles,
                    refresh_interval: self.state.refresh_interval,
                    last_update: output.fetched_at,
                    output,
                };
                self.renderer.render(&frame)?;
                self.last_frame = Some(frame);
            }
            Err(e) => {
                warn!(error = %e, "refresh failed, keeping previous frame");
                self.renderer.report_error(&e.to_string())?;
            }
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Some(mirror) = &self.mirror {
            mirror.stop();
        }
        if let Err(e) = self.renderer.teardown() {
            warn!(error = %e, "renderer teardown failed");
        }
        info!("live view stopped");
    }
}
