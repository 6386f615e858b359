//! Terminal front end for the chat client: one event loop multiplexing
//! terminal input, session-change notifications and the live message feed
//! over the screens owned by [`App`].

use std::sync::Arc;

use clink_common::ChatBackend;
use crossterm::event::{Event, KeyEventKind};

pub mod app;
mod keymap;
mod screens;

pub use app::{App, Screen};

pub async fn run(backend: Arc<dyn ChatBackend>) -> std::io::Result<()> {
    let terminal = ratatui::init();
    let res = run_inner(terminal, backend).await;
    ratatui::restore();
    res
}

enum Step {
    Key(crossterm::event::KeyEvent),
    SessionChanged,
    Live(app::LiveEvent),
}

async fn run_inner(
    mut term: ratatui::DefaultTerminal,
    backend: Arc<dyn ChatBackend>,
) -> std::io::Result<()> {
    use futures::stream::StreamExt;

    let mut session_rx = backend.session_changes();
    let mut app = App::new(backend);

    // the auth collaborator reports the current session at registration
    // time; apply it before the first frame
    let initial = session_rx.borrow_and_update().clone();
    app.on_session_change(initial).await;

    let mut term_events = crossterm::event::EventStream::new();
    while !app.should_quit() {
        term.draw(|frame| app.render(frame))?;
        let step = tokio::select! {
            event = term_events.next() => match event {
                Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => Step::Key(key),
                Some(Ok(event)) => {
                    tracing::debug!("{event:?}");
                    continue;
                }
                Some(Err(err)) => {
                    tracing::warn!("{err}");
                    continue;
                }
                None => {
                    tracing::info!("term events stream stopped, shutting down");
                    break;
                }
            },
            changed = session_rx.changed() => match changed {
                Ok(()) => Step::SessionChanged,
                Err(_) => {
                    tracing::info!("session stream stopped, shutting down");
                    break;
                }
            },
            event = app.next_live_event() => Step::Live(event),
        };
        match step {
            Step::Key(key) => app.handle_key(key).await,
            Step::SessionChanged => {
                let session = session_rx.borrow_and_update().clone();
                app.on_session_change(session).await;
            }
            Step::Live(event) => app.handle_live_event(event).await,
        }
    }
    Ok(())
}
