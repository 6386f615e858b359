use std::sync::Arc;

use clink_common::{ChatBackend, ConversationId, Error, Message, NewMessage, Session};
use crossterm::event::{KeyCode as TermKey, KeyEvent as TermKeyEvent, KeyModifiers};
use ratatui::{
    layout::{Constraint, Layout},
    style::{Color, Style, Stylize},
    text::Line,
    widgets::Paragraph,
    Frame,
};

use crate::{
    keymap::{Keymap, KeymapState, Resolution},
    screens::{chat::ChatView, conversations::ConversationList, login::LoginForm},
};

/// The three screens; holding them in one enum makes "exactly one visible"
/// structural rather than something to maintain.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Screen {
    Login,
    Conversations,
    Chat,
}

/// What pressing retry on the error banner should do.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Retry {
    LoadConversations,
    OpenConversation(ConversationId),
    Send,
    Resubscribe,
}

/// The single surface for every failure path: the latest error plus an
/// optional retry action.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ErrorBanner {
    pub message: String,
    pub retry: Option<Retry>,
}

/// Commands on the conversation list screen.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ListAction {
    Up,
    Down,
    First,
    Last,
    Open,
    Refresh,
    Logout,
    Quit,
}

fn list_keymap() -> Keymap<ListAction> {
    let mut keymap = Keymap::default();
    for (sequence, action) in [
        ("k", ListAction::Up),
        ("j", ListAction::Down),
        ("<Up>", ListAction::Up),
        ("<Down>", ListAction::Down),
        ("gg", ListAction::First),
        ("G", ListAction::Last),
        ("<CR>", ListAction::Open),
        ("r", ListAction::Refresh),
        ("<C-l>", ListAction::Logout),
        ("q", ListAction::Quit),
    ] {
        keymap.bind(sequence, action);
    }
    keymap
}

/// Something happened on the live side of the open chat.
#[derive(Debug)]
pub enum LiveEvent {
    Message(Message),
    /// The subscription closed underneath us.
    Disconnected,
    /// The reconnect backoff timer fired.
    ReconnectDue,
}

pub struct App {
    backend: Arc<dyn ChatBackend>,
    screen: Screen,
    session: Option<Session>,
    login: LoginForm,
    conversations: ConversationList,
    chat: Option<ChatView>,
    banner: Option<ErrorBanner>,
    keymap: Keymap<ListAction>,
    list_keys: KeymapState,
    should_quit: bool,
}

impl App {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            backend,
            screen: Screen::Login,
            session: None,
            login: LoginForm::default(),
            conversations: ConversationList::default(),
            chat: None,
            banner: None,
            keymap: list_keymap(),
            list_keys: KeymapState::default(),
            should_quit: false,
        }
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    pub fn banner(&self) -> Option<&ErrorBanner> {
        self.banner.as_ref()
    }

    fn show(&mut self, screen: Screen) {
        // total and idempotent: the previous screen is implicitly hidden
        if self.screen != screen {
            tracing::debug!(from = ?self.screen, to = ?screen, "screen change");
        }
        self.screen = screen;
    }

    fn quit(&mut self) {
        self.should_quit = true;
    }

    fn report(&mut self, error: Error, retry: Option<Retry>) {
        tracing::warn!(%error, "surfacing error");
        self.banner = Some(ErrorBanner {
            message: error.to_string(),
            retry,
        });
    }

    /// One session-change notification from the auth collaborator. This is
    /// the single source of truth for "am I logged in": a present session
    /// loads the conversation list, an absent one routes to Login.
    pub async fn on_session_change(&mut self, session: Option<Session>) {
        match session {
            Some(session) => {
                tracing::info!(user = %session.user.email, "signed in");
                self.session = Some(session);
                self.load_conversations().await;
            }
            None => {
                self.session = None;
                self.chat = None;
                self.show(Screen::Login);
            }
        }
    }

    /// Submits the login form. On failure the collaborator's message is
    /// surfaced as-is and Login stays active; on success nothing changes
    /// here — the session-change notification drives the transition.
    pub async fn sign_in(&mut self) {
        let (email, password) = self.login.credentials();
        match self.backend.sign_in(&email, &password).await {
            Ok(_) => self.login.clear_password(),
            Err(error) => self.report(error, None),
        }
    }

    /// Signs out and routes to Login synchronously, without waiting for the
    /// session-change notification.
    pub async fn log_out(&mut self) {
        if let Err(error) = self.backend.sign_out().await {
            tracing::warn!(%error, "sign-out failed");
        }
        self.session = None;
        self.chat = None;
        self.login.clear();
        self.banner = None;
        self.show(Screen::Login);
    }

    pub async fn load_conversations(&mut self) {
        match self.backend.conversations().await {
            Ok(rows) => {
                self.conversations.set_rows(rows);
                self.banner = None;
                self.show(Screen::Conversations);
            }
            // previous screen and content stay put; the banner offers retry
            Err(error) => self.report(error, Some(Retry::LoadConversations)),
        }
    }

    pub async fn open_conversation(&mut self, conversation: ConversationId) {
        let Some(session) = self.session.clone() else {
            return;
        };
        // close any previous live subscription before opening the next one
        self.chat = None;
        let history = match self.backend.messages(&conversation).await {
            Ok(history) => history,
            Err(error) => {
                self.report(error, Some(Retry::OpenConversation(conversation)));
                return;
            }
        };
        // the subscription filter depends on the conversation recorded above
        let subscription = match self.backend.subscribe(&conversation).await {
            Ok(subscription) => subscription,
            Err(error) => {
                self.report(error, Some(Retry::OpenConversation(conversation)));
                return;
            }
        };
        self.chat = Some(ChatView::new(
            conversation,
            session.user.id,
            history,
            subscription,
        ));
        self.banner = None;
        self.show(Screen::Chat);
    }

    pub fn back_to_list(&mut self) {
        // dropping the view closes its subscription
        self.chat = None;
        self.show(Screen::Conversations);
    }

    /// Sends the compose field. Blank or whitespace-only input is a no-op;
    /// the sent message is rendered only once the live feed delivers it.
    pub async fn send_message(&mut self) {
        let Some(chat) = self.chat.as_ref() else {
            return;
        };
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let content = chat.compose.trim().to_owned();
        if content.is_empty() {
            return;
        }
        let new = NewMessage {
            conversation: chat.conversation.clone(),
            sender: session.user.id.clone(),
            content,
        };
        match self.backend.send_message(new).await {
            Ok(_) => {
                if let Some(chat) = self.chat.as_mut() {
                    chat.compose.clear();
                }
                self.banner = None;
            }
            // the compose text stays for editing or retry
            Err(error) => self.report(error, Some(Retry::Send)),
        }
    }

    pub async fn retry(&mut self) {
        if self.banner.as_ref().is_none_or(|b| b.retry.is_none()) {
            return;
        }
        let banner = self.banner.take();
        match banner.and_then(|b| b.retry) {
            Some(Retry::LoadConversations) => self.load_conversations().await,
            Some(Retry::OpenConversation(id)) => self.open_conversation(id).await,
            Some(Retry::Send) => self.send_message().await,
            Some(Retry::Resubscribe) => self.resubscribe().await,
            None => {}
        }
    }

    /// Completes only while a chat is open: yields live rows, the end of
    /// the feed, or the reconnect timer.
    pub async fn next_live_event(&mut self) -> LiveEvent {
        let Some(chat) = self.chat.as_mut() else {
            return std::future::pending::<LiveEvent>().await;
        };
        match (chat.subscription.as_mut(), chat.reconnect_at) {
            (Some(subscription), _) => match subscription.next().await {
                Some(message) => LiveEvent::Message(message),
                None => LiveEvent::Disconnected,
            },
            (None, Some(deadline)) => {
                tokio::time::sleep_until(deadline).await;
                LiveEvent::ReconnectDue
            }
            (None, None) => std::future::pending::<LiveEvent>().await,
        }
    }

    pub async fn handle_live_event(&mut self, event: LiveEvent) {
        match event {
            LiveEvent::Message(message) => self.apply_live_message(message),
            LiveEvent::Disconnected => {
                tracing::warn!("live subscription closed");
                if let Some(chat) = self.chat.as_mut() {
                    chat.mark_disconnected();
                }
                self.report(
                    Error::Subscription("live updates disconnected".to_owned()),
                    Some(Retry::Resubscribe),
                );
            }
            LiveEvent::ReconnectDue => self.resubscribe().await,
        }
    }

    /// A row delivered by the live feed, rendered through the same path as
    /// history; keyed insertion deduplicates the overlap between the two.
    pub fn apply_live_message(&mut self, message: Message) {
        match self.chat.as_mut() {
            Some(chat) if chat.conversation == message.conversation => chat.insert(message),
            _ => tracing::debug!(
                conversation = %message.conversation,
                "dropping live row for a conversation that is not open"
            ),
        }
    }

    async fn resubscribe(&mut self) {
        let Some(conversation) = self.chat.as_ref().map(|chat| chat.conversation.clone()) else {
            return;
        };
        let resumed = match self.backend.subscribe(&conversation).await {
            // refetch history so rows missed while disconnected are merged in
            Ok(subscription) => match self.backend.messages(&conversation).await {
                Ok(history) => Some((subscription, history)),
                Err(error) => {
                    self.report(error, Some(Retry::Resubscribe));
                    None
                }
            },
            Err(error) => {
                self.report(error, Some(Retry::Resubscribe));
                None
            }
        };
        let Some(chat) = self.chat.as_mut() else {
            return;
        };
        match resumed {
            Some((subscription, history)) => {
                chat.resume(subscription, history);
                self.banner = None;
                tracing::info!(%conversation, "live subscription reestablished");
            }
            None => chat.schedule_retry(),
        }
    }

    pub async fn handle_key(&mut self, key: TermKeyEvent) {
        // banner shortcuts take precedence everywhere
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == TermKey::Char('r') {
            self.retry().await;
            return;
        }
        if key.code == TermKey::Esc && self.banner.is_some() {
            self.banner = None;
            return;
        }
        match self.screen {
            Screen::Login => match key.code {
                TermKey::Esc => self.quit(),
                TermKey::Tab | TermKey::BackTab => self.login.toggle_focus(),
                TermKey::Enter => self.sign_in().await,
                TermKey::Backspace => self.login.backspace(),
                TermKey::Char(c) if !has_command_modifier(key) => self.login.push(c),
                _ => {}
            },
            Screen::Conversations => {
                let event = crate::keymap::KeyEvent::from(key);
                match self.list_keys.handle(&self.keymap, event) {
                    Resolution::Action(action) => self.run_list_action(action).await,
                    Resolution::Pending => {}
                    Resolution::Unmapped => tracing::debug!(?event, "unmapped key"),
                }
            }
            Screen::Chat => match key.code {
                TermKey::Esc => self.back_to_list(),
                TermKey::Enter => self.send_message().await,
                TermKey::Backspace => {
                    if let Some(chat) = self.chat.as_mut() {
                        chat.compose.pop();
                    }
                }
                TermKey::Up => {
                    if let Some(chat) = self.chat.as_mut() {
                        chat.scroll_up();
                    }
                }
                TermKey::Down => {
                    if let Some(chat) = self.chat.as_mut() {
                        chat.scroll_down();
                    }
                }
                TermKey::End => {
                    if let Some(chat) = self.chat.as_mut() {
                        chat.jump_newest();
                    }
                }
                TermKey::Char(c) if !has_command_modifier(key) => {
                    if let Some(chat) = self.chat.as_mut() {
                        chat.compose.push(c);
                    }
                }
                _ => {}
            },
        }
    }

    async fn run_list_action(&mut self, action: ListAction) {
        match action {
            ListAction::Up => self.conversations.select_prev(),
            ListAction::Down => self.conversations.select_next(),
            ListAction::First => self.conversations.select_first(),
            ListAction::Last => self.conversations.select_last(),
            ListAction::Open => {
                if let Some(id) = self.conversations.selected_id() {
                    self.open_conversation(id).await;
                }
            }
            ListAction::Refresh => self.load_conversations().await,
            ListAction::Logout => self.log_out().await,
            ListAction::Quit => self.quit(),
        }
    }

    pub fn render(&mut self, frame: &mut Frame<'_>) {
        let [main, status] =
            Layout::vertical([Constraint::Min(1), Constraint::Length(1)]).areas(frame.area());
        match self.screen {
            Screen::Login => frame.render_widget(&self.login, main),
            Screen::Conversations => frame.render_widget(&mut self.conversations, main),
            Screen::Chat => {
                if let Some(chat) = self.chat.as_mut() {
                    frame.render_widget(chat, main);
                }
            }
        }

        let status_line = match &self.banner {
            Some(banner) => {
                let hint = if banner.retry.is_some() {
                    "  [ctrl-r retry | esc dismiss]"
                } else {
                    "  [esc dismiss]"
                };
                Line::styled(
                    format!("{}{hint}", banner.message),
                    Style::new().fg(Color::Red),
                )
            }
            None => Line::styled(hint_for(self.screen), Style::new().dim()),
        };
        frame.render_widget(Paragraph::new(status_line), status);
    }

    #[cfg(test)]
    pub(crate) fn login_mut(&mut self) -> &mut LoginForm {
        &mut self.login
    }

    #[cfg(test)]
    pub(crate) fn conversations_view(&self) -> &ConversationList {
        &self.conversations
    }

    #[cfg(test)]
    pub(crate) fn chat_view(&self) -> Option<&ChatView> {
        self.chat.as_ref()
    }

    #[cfg(test)]
    pub(crate) fn chat_view_mut(&mut self) -> Option<&mut ChatView> {
        self.chat.as_mut()
    }
}

fn has_command_modifier(key: TermKeyEvent) -> bool {
    key.modifiers
        .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT)
}

fn hint_for(screen: Screen) -> &'static str {
    match screen {
        Screen::Login => "tab: switch field | enter: sign in | esc: quit",
        Screen::Conversations => {
            "j/k: move | enter: open | r: refresh | ctrl-l: log out | q: quit"
        }
        Screen::Chat => "enter: send | esc: back | up/down: scroll | end: newest",
    }
}

#[cfg(test)]
mod tests {
    use clink_fake_backend::{FakeBackend, DEMO_PASSWORD};

    use super::*;

    fn app_with(backend: &Arc<FakeBackend>) -> App {
        App::new(backend.clone())
    }

    async fn signed_in(backend: &Arc<FakeBackend>) -> App {
        let mut app = app_with(backend);
        let session = backend
            .sign_in("alice@example.com", DEMO_PASSWORD)
            .await
            .unwrap();
        app.on_session_change(Some(session)).await;
        app
    }

    fn conversation(id: &str) -> ConversationId {
        ConversationId::new(id)
    }

    async fn seed_message(backend: &FakeBackend, conversation_id: &str, content: &str) {
        let bob = backend.users()[1].id.clone();
        backend
            .send_message(NewMessage {
                conversation: conversation(conversation_id),
                sender: bob,
                content: content.to_owned(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn session_changes_route_between_screens() {
        let backend = Arc::new(FakeBackend::seeded());
        let mut app = signed_in(&backend).await;
        assert_eq!(app.screen(), Screen::Conversations);

        app.on_session_change(None).await;
        assert_eq!(app.screen(), Screen::Login);
        assert!(app.chat_view().is_none());
    }

    #[tokio::test]
    async fn failed_sign_in_surfaces_the_raw_error_and_stays_on_login() {
        let backend = Arc::new(FakeBackend::seeded());
        let mut app = app_with(&backend);
        app.login_mut().email = "alice@example.com".to_owned();
        app.login_mut().password = "wrong".to_owned();

        app.sign_in().await;

        assert_eq!(app.screen(), Screen::Login);
        let banner = app.banner().unwrap();
        assert!(banner.message.contains("invalid login credentials"));
        assert!(banner.retry.is_none());
    }

    #[tokio::test]
    async fn conversations_render_newest_first() {
        let backend = Arc::new(FakeBackend::seeded());
        let app = signed_in(&backend).await;
        assert_eq!(
            app.conversations_view().labels(),
            ["Conversation 3", "Conversation 2", "Conversation 1"]
        );
    }

    #[tokio::test]
    async fn failed_conversation_load_keeps_the_screen_and_offers_retry() {
        let backend = Arc::new(FakeBackend::seeded());
        let mut app = app_with(&backend);
        backend.fail_next_conversations();
        let session = backend
            .sign_in("alice@example.com", DEMO_PASSWORD)
            .await
            .unwrap();

        app.on_session_change(Some(session)).await;
        assert_eq!(app.screen(), Screen::Login);
        assert_eq!(
            app.banner().unwrap().retry,
            Some(Retry::LoadConversations)
        );

        app.retry().await;
        assert_eq!(app.screen(), Screen::Conversations);
        assert!(app.banner().is_none());
    }

    #[tokio::test]
    async fn history_renders_oldest_first() {
        let backend = Arc::new(FakeBackend::seeded());
        for content in ["first", "second", "third"] {
            seed_message(&backend, "1", content).await;
        }
        let mut app = signed_in(&backend).await;
        app.open_conversation(conversation("1")).await;

        assert_eq!(app.screen(), Screen::Chat);
        let chat = app.chat_view().unwrap();
        assert_eq!(chat.title(), "Chat 1");
        let contents: Vec<_> = chat.messages().map(|m| m.content.to_string()).collect();
        assert_eq!(contents, ["first", "second", "third"]);
    }

    #[tokio::test]
    async fn blank_compose_never_writes_to_the_store() {
        let backend = Arc::new(FakeBackend::seeded());
        let mut app = signed_in(&backend).await;
        app.open_conversation(conversation("1")).await;

        app.chat_view_mut().unwrap().compose = "   \t ".to_owned();
        app.send_message().await;

        assert!(backend
            .messages(&conversation("1"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn sent_message_round_trips_through_the_live_feed_as_self() {
        let backend = Arc::new(FakeBackend::seeded());
        let mut app = signed_in(&backend).await;
        app.open_conversation(conversation("1")).await;

        app.chat_view_mut().unwrap().compose = "  hello there  ".to_owned();
        app.send_message().await;
        // no optimistic render: the row only appears via the subscription
        assert_eq!(app.chat_view().unwrap().messages().count(), 0);
        assert!(app.chat_view().unwrap().compose.is_empty());

        let event = app.next_live_event().await;
        app.handle_live_event(event).await;

        let chat = app.chat_view().unwrap();
        let rendered: Vec<_> = chat.messages().collect();
        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0].content.as_ref(), "hello there");
        assert!(chat.is_self(rendered[0]));

        // a row from someone else is classified "other"
        seed_message(&backend, "1", "hi back").await;
        let event = app.next_live_event().await;
        app.handle_live_event(event).await;
        let chat = app.chat_view().unwrap();
        let last = chat.messages().last().unwrap();
        assert_eq!(last.content.as_ref(), "hi back");
        assert!(!chat.is_self(last));
    }

    #[tokio::test]
    async fn at_most_one_subscription_is_ever_live() {
        let backend = Arc::new(FakeBackend::seeded());
        let mut app = signed_in(&backend).await;

        app.open_conversation(conversation("1")).await;
        assert_eq!(backend.active_subscriptions(), 1);

        app.open_conversation(conversation("2")).await;
        assert_eq!(backend.active_subscriptions(), 1);

        app.back_to_list();
        assert_eq!(backend.active_subscriptions(), 0);
        assert_eq!(app.screen(), Screen::Conversations);
    }

    #[tokio::test]
    async fn send_failure_keeps_compose_and_retries() {
        let backend = Arc::new(FakeBackend::seeded());
        let mut app = signed_in(&backend).await;
        app.open_conversation(conversation("1")).await;

        backend.fail_next_send();
        app.chat_view_mut().unwrap().compose = "hello".to_owned();
        app.send_message().await;

        assert_eq!(app.banner().unwrap().retry, Some(Retry::Send));
        assert_eq!(app.chat_view().unwrap().compose, "hello");
        assert!(backend
            .messages(&conversation("1"))
            .await
            .unwrap()
            .is_empty());

        app.retry().await;
        assert!(app.banner().is_none());
        assert!(app.chat_view().unwrap().compose.is_empty());
        assert_eq!(backend.messages(&conversation("1")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn disconnect_marks_the_chat_stale_and_reconnect_heals_it() {
        let backend = Arc::new(FakeBackend::seeded());
        let mut app = signed_in(&backend).await;
        app.open_conversation(conversation("1")).await;

        app.handle_live_event(LiveEvent::Disconnected).await;
        assert!(!app.chat_view().unwrap().is_live());
        assert!(app.chat_view().unwrap().title().contains("disconnected"));
        assert_eq!(app.banner().unwrap().retry, Some(Retry::Resubscribe));
        assert_eq!(backend.active_subscriptions(), 0);

        // a row inserted while disconnected is healed by the refetch
        seed_message(&backend, "1", "missed you").await;
        app.handle_live_event(LiveEvent::ReconnectDue).await;

        let chat = app.chat_view().unwrap();
        assert!(chat.is_live());
        assert_eq!(backend.active_subscriptions(), 1);
        assert_eq!(
            chat.messages().last().unwrap().content.as_ref(),
            "missed you"
        );
        assert!(app.banner().is_none());
    }

    #[tokio::test]
    async fn logout_routes_to_login_synchronously() {
        let backend = Arc::new(FakeBackend::seeded());
        let mut app = signed_in(&backend).await;
        app.open_conversation(conversation("1")).await;

        app.log_out().await;

        assert_eq!(app.screen(), Screen::Login);
        assert!(app.chat_view().is_none());
        assert_eq!(backend.active_subscriptions(), 0);
        assert!(backend.session_changes().borrow().is_none());
    }
}
