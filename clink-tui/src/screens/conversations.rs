use clink_common::{Conversation, ConversationId};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    widgets::{Block, List, ListItem, ListState, StatefulWidget, Widget},
};

/// The conversation list, in the order the store returned it (newest
/// first). Rebuilt wholesale on every load.
#[derive(Debug, Default)]
pub struct ConversationList {
    rows: Vec<Conversation>,
    state: ListState,
}

impl ConversationList {
    pub fn set_rows(&mut self, rows: Vec<Conversation>) {
        self.state = ListState::default();
        if !rows.is_empty() {
            self.state.select(Some(0));
        }
        self.rows = rows;
    }

    pub fn selected_id(&self) -> Option<ConversationId> {
        self.state
            .selected()
            .and_then(|idx| self.rows.get(idx))
            .map(|conversation| conversation.id.clone())
    }

    pub fn select_next(&mut self) {
        if self.rows.is_empty() {
            return;
        }
        let next = match self.state.selected() {
            Some(idx) => (idx + 1).min(self.rows.len() - 1),
            None => 0,
        };
        self.state.select(Some(next));
    }

    pub fn select_prev(&mut self) {
        if self.rows.is_empty() {
            return;
        }
        let prev = self.state.selected().map_or(0, |idx| idx.saturating_sub(1));
        self.state.select(Some(prev));
    }

    pub fn select_first(&mut self) {
        if !self.rows.is_empty() {
            self.state.select(Some(0));
        }
    }

    pub fn select_last(&mut self) {
        if !self.rows.is_empty() {
            self.state.select(Some(self.rows.len() - 1));
        }
    }

    /// Row labels, top to bottom.
    pub fn labels(&self) -> Vec<String> {
        self.rows.iter().map(label).collect()
    }
}

fn label(conversation: &Conversation) -> String {
    format!("Conversation {}", conversation.id)
}

impl Widget for &mut ConversationList {
    fn render(self, area: Rect, buffer: &mut Buffer) {
        let items = self
            .rows
            .iter()
            .map(|conversation| {
                ListItem::new(format!(
                    "{}  (created {})",
                    label(conversation),
                    conversation.created_at.format("%Y-%m-%d %H:%M")
                ))
            })
            .collect::<Vec<_>>();
        let list = List::new(items)
            .block(Block::bordered().title("conversations"))
            .highlight_symbol("> ");
        StatefulWidget::render(list, area, buffer, &mut self.state);
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    fn rows() -> Vec<Conversation> {
        // newest first, as the store returns them
        let now = Utc::now();
        vec![
            Conversation {
                id: ConversationId::new("2"),
                created_at: now,
            },
            Conversation {
                id: ConversationId::new("1"),
                created_at: now - Duration::hours(1),
            },
        ]
    }

    #[test]
    fn store_order_is_preserved_in_labels() {
        let mut list = ConversationList::default();
        list.set_rows(rows());
        assert_eq!(list.labels(), ["Conversation 2", "Conversation 1"]);
    }

    #[test]
    fn selection_is_clamped_to_the_rows() {
        let mut list = ConversationList::default();
        list.set_rows(rows());
        assert_eq!(list.selected_id().unwrap().as_str(), "2");

        list.select_next();
        list.select_next();
        assert_eq!(list.selected_id().unwrap().as_str(), "1");

        list.select_first();
        assert_eq!(list.selected_id().unwrap().as_str(), "2");

        list.select_prev();
        assert_eq!(list.selected_id().unwrap().as_str(), "2");
    }
}
