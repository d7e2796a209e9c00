//! View, sort and namespace selection for the live display.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::orchestrator::{SortMode, ViewKind, ViewRequest};

/// Namespace selected when a namespaced view is opened with none chosen.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Rendering switches. They never change what is fetched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DisplayToggles {
    pub bars: bool,
    pub percentages: bool,
    pub compact: bool,
}

impl Default for DisplayToggles {
    fn default() -> Self {
        Self {
            bars: true,
            percentages: true,
            compact: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputEvent {
    SwitchView(ViewKind),
    NextNamespace,
    PrevNamespace,
    CycleSort,
    ToggleBars,
    TogglePercentages,
    ToggleCompact,
    Refresh,
    Quit,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LiveState {
    pub mode: ViewKind,
    pub sort: SortMode,
    pub namespace: Option<String>,
    pub refresh_interval: Duration,
    pub last_update: Option<DateTime<Utc>>,
    pub node_limit: usize,
    pub pod_limit: usize,
    pub max_concurrent: usize,
    pub toggles: DisplayToggles,
    /// Known namespaces, sorted, used for next/previous cycling.
    namespaces: Vec<String>,
}

impl LiveState {
    pub fn new(refresh_interval: Duration, node_limit: usize, pod_limit: usize, max_concurrent: usize) -> Self {
        Self {
            mode: ViewKind::Namespaces,
            sort: SortMode::Status,
            namespace: None,
            refresh_interval,
            last_update: None,
            node_limit,
            pod_limit,
            max_concurrent: max_concurrent.max(1),
            toggles: DisplayToggles::default(),
            namespaces: Vec::new(),
        }
    }

    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    pub fn set_namespaces(&mut self, names: impl IntoIterator<Item = String>) {
        let mut names: Vec<String> = names.into_iter().collect();
        names.sort();
        names.dedup();
        self.namespaces = names;
    }

    /// Applies an input event. Returns `false` for quit.
    pub fn apply(&mut self, event: &InputEvent) -> bool {
        match event {
            InputEvent::SwitchView(kind) => {
                self.mode = *kind;
                if kind.is_namespaced() && self.namespace.is_none() {
                    self.namespace = Some(DEFAULT_NAMESPACE.to_string());
                }
            }
            InputEvent::NextNamespace => self.step_namespace(true),
            InputEvent::PrevNamespace => self.step_namespace(false),
            InputEvent::CycleSort => self.sort = self.sort.next(),
            InputEvent::ToggleBars => self.toggles.bars = !self.toggles.bars,
            InputEvent::TogglePercentages => self.toggles.percentages = !self.toggles.percentages,
            InputEvent::ToggleCompact => self.toggles.compact = !self.toggles.compact,
            InputEvent::Refresh => {}
            InputEvent::Quit => return false,
        }
        true
    }

    fn step_namespace(&mut self, forward: bool) {
        let len = self.namespaces.len();
        if len == 0 {
            return;
        }
        let current = self
            .namespace
            .as_ref()
            .and_then(|ns| self.namespaces.iter().position(|n| n == ns));
        let idx = match (current, forward) {
            (Some(i), true) => (i + 1) % len,
            (Some(i), false) => (i + len - 1) % len,
            (None, true) => 0,
            (None, false) => len - 1,
        };
        self.namespace = Some(self.namespaces[idx].clone());
    }

    /// The request for the next pass.
    pub fn request(&self) -> ViewRequest {
        ViewRequest {
            view: self.mode,
            namespace: self.namespace.clone().filter(|_| self.mode.is_namespaced()),
            sort: self.sort,
            limit: match self.mode {
                ViewKind::Nodes => self.node_limit,
                _ => self.pod_limit,
            },
        }
    }
}
