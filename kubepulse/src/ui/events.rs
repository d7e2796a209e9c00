//! Keyboard input: key mapping and the blocking reader thread.

use std::{thread, time::Duration};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{live::InputEvent, orchestrator::ViewKind};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Maps a key press to an engine event. Unbound keys map to `None`.
pub fn key_to_input(key: &KeyEvent) -> Option<InputEvent> {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return matches!(key.code, KeyCode::Char('c')).then_some(InputEvent::Quit);
    }

    let ev = match key.code {
        KeyCode::Char('1') => InputEvent::SwitchView(ViewKind::Namespaces),
        KeyCode::Char('2') => InputEvent::SwitchView(ViewKind::Pods),
        KeyCode::Char('3') => InputEvent::SwitchView(ViewKind::Nodes),
        KeyCode::Char('4') => InputEvent::SwitchView(ViewKind::Deployments),
        KeyCode::Char(']') | KeyCode::Right => InputEvent::NextNamespace,
        KeyCode::Char('[') | KeyCode::Left => InputEvent::PrevNamespace,
        KeyCode::Char('s') => InputEvent::CycleSort,
        KeyCode::Char('b') => InputEvent::ToggleBars,
        KeyCode::Char('p') => InputEvent::TogglePercentages,
        KeyCode::Char('c') => InputEvent::ToggleCompact,
        KeyCode::Char('r') | KeyCode::F(5) => InputEvent::Refresh,
        KeyCode::Char('q') | KeyCode::Esc => InputEvent::Quit,
        _ => return None,
    };
    Some(ev)
}

/// Reads terminal events on a dedicated thread and forwards mapped keys.
/// Stops after forwarding quit or once the receiver is gone.
pub fn spawn_input_thread(tx: mpsc::Sender<InputEvent>) -> thread::JoinHandle<()> {
    thread::spawn(move || loop {
        if tx.is_closed() {
            break;
        }
        match event::poll(POLL_INTERVAL) {
            Ok(false) => continue,
            Ok(true) => {}
            Err(e) => {
                warn!(error = %e, "terminal poll failed");
                break;
            }
        }

        let key = match event::read() {
            Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => key,
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "terminal read failed");
                break;
            }
        };

        let Some(input) = key_to_input(&key) else {
            continue;
        };
        debug!(?input, "key");
        let quit = input == InputEvent::Quit;
        if tx.blocking_send(input).is_err() || quit {
            break;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn view_keys() {
        assert_eq!(
            key_to_input(&key(KeyCode::Char('3'))),
            Some(InputEvent::SwitchView(ViewKind::Nodes))
        );
        assert_eq!(
            key_to_input(&key(KeyCode::Char('4'))),
            Some(InputEvent::SwitchView(ViewKind::Deployments))
        );
    }

    #[test]
    fn namespace_and_toggle_keys() {
        assert_eq!(key_to_input(&key(KeyCode::Char(']'))), Some(InputEvent::NextNamespace));
        assert_eq!(key_to_input(&key(KeyCode::Left)), Some(InputEvent::PrevNamespace));
        assert_eq!(key_to_input(&key(KeyCode::Char('s'))), Some(InputEvent::CycleSort));
        assert_eq!(key_to_input(&key(KeyCode::Char('c'))), Some(InputEvent::ToggleCompact));
        assert_eq!(key_to_input(&key(KeyCode::Char('x'))), None);
    }

    #[test]
    fn quit_keys() {
        assert_eq!(key_to_input(&key(KeyCode::Char('q'))), Some(InputEvent::Quit));
        assert_eq!(key_to_input(&key(KeyCode::Esc)), Some(InputEvent::Quit));
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(key_to_input(&ctrl_c), Some(InputEvent::Quit));
        let ctrl_s = KeyEvent::new(KeyCode::Char('s'), KeyModifiers::CONTROL);
        assert_eq!(key_to_input(&ctrl_s), None);
    }
}
