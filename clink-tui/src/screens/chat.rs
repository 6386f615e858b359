use std::time::Duration;

use clink_common::{backend::Subscription, ConversationId, Message, MessageList, UserId};
use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Layout, Rect},
    style::Stylize,
    text::Line,
    widgets::{Block, List, ListItem, Paragraph, StatefulWidget, Widget},
};
use tokio::time::Instant;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// One open conversation: its history, its live subscription, and the
/// compose field. Dropping the view drops the subscription, so "at most one
/// live subscription" falls out of ownership.
pub struct ChatView {
    pub conversation: ConversationId,
    current_user: UserId,
    messages: MessageList,
    list_state: ratatui::widgets::ListState,
    /// While true the list tracks the newest message; scrolling up unsets
    /// it, `End` restores it.
    follow: bool,
    pub compose: String,
    pub(crate) subscription: Option<Subscription>,
    pub(crate) reconnect_at: Option<Instant>,
    backoff: Duration,
    live: bool,
}

impl ChatView {
    pub fn new(
        conversation: ConversationId,
        current_user: UserId,
        history: Vec<Message>,
        subscription: Subscription,
    ) -> Self {
        let mut messages = MessageList::new();
        messages.extend(history);
        let mut view = Self {
            conversation,
            current_user,
            messages,
            list_state: Default::default(),
            follow: true,
            compose: String::new(),
            subscription: Some(subscription),
            reconnect_at: None,
            backoff: INITIAL_BACKOFF,
            live: true,
        };
        view.track_newest();
        view
    }

    pub fn title(&self) -> String {
        if self.live {
            format!("Chat {}", self.conversation)
        } else {
            format!("Chat {} (disconnected)", self.conversation)
        }
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// Inserts one message, from history or from the live feed; the keyed
    /// list makes redelivery across the two idempotent.
    pub fn insert(&mut self, message: Message) {
        self.messages.insert(message);
        self.track_newest();
    }

    pub fn is_self(&self, message: &Message) -> bool {
        message.sender == self.current_user
    }

    pub fn scroll_up(&mut self) {
        if self.messages.is_empty() {
            return;
        }
        self.follow = false;
        let current = self
            .list_state
            .selected()
            .unwrap_or(self.messages.len() - 1);
        self.list_state.select(Some(current.saturating_sub(1)));
    }

    pub fn scroll_down(&mut self) {
        if self.messages.is_empty() {
            return;
        }
        let next = self
            .list_state
            .selected()
            .map_or(0, |idx| (idx + 1).min(self.messages.len() - 1));
        self.list_state.select(Some(next));
        if next == self.messages.len() - 1 {
            self.follow = true;
        }
    }

    pub fn jump_newest(&mut self) {
        self.follow = true;
        self.track_newest();
    }

    /// The live feed has closed; stop consuming and arm the reconnect
    /// timer.
    pub(crate) fn mark_disconnected(&mut self) {
        self.subscription = None;
        self.live = false;
        self.reconnect_at = Some(Instant::now() + self.backoff);
    }

    /// A reconnect attempt failed; back off further.
    pub(crate) fn schedule_retry(&mut self) {
        self.backoff = (self.backoff * 2).min(MAX_BACKOFF);
        self.reconnect_at = Some(Instant::now() + self.backoff);
    }

    /// A reconnect succeeded: adopt the fresh subscription and merge the
    /// refetched history, healing any rows missed while disconnected.
    pub(crate) fn resume(&mut self, subscription: Subscription, history: Vec<Message>) {
        self.messages.extend(history);
        self.subscription = Some(subscription);
        self.reconnect_at = None;
        self.backoff = INITIAL_BACKOFF;
        self.live = true;
        self.track_newest();
    }

    fn track_newest(&mut self) {
        if self.follow && !self.messages.is_empty() {
            self.list_state.select(Some(self.messages.len() - 1));
        }
    }
}

impl Widget for &mut ChatView {
    fn render(self, area: Rect, buffer: &mut Buffer) {
        let [title_area, list_area, compose_area] = Layout::vertical([
            Constraint::Length(1),
            Constraint::Min(1),
            Constraint::Length(3),
        ])
        .areas(area);

        let title = if self.live {
            Line::from(self.title()).bold()
        } else {
            Line::from(self.title()).bold().yellow()
        };
        title.render(title_area, buffer);

        let items = self
            .messages
            .iter()
            .map(|message| {
                let content = message.content.as_ref().to_owned();
                let line = if message.sender == self.current_user {
                    Line::from(content).right_aligned().cyan()
                } else {
                    Line::from(content)
                };
                ListItem::new(line)
            })
            .collect::<Vec<_>>();
        if self.follow && !items.is_empty() {
            self.list_state.select(Some(items.len() - 1));
        }
        StatefulWidget::render(List::new(items), list_area, buffer, &mut self.list_state);

        Paragraph::new(self.compose.as_str())
            .block(Block::bordered().title("message"))
            .render(compose_area, buffer);
    }
}
