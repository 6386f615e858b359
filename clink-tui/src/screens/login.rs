use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Layout, Rect},
    style::{Style, Stylize},
    text::Line,
    widgets::{Block, Paragraph, Widget},
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Field {
    Email,
    Password,
}

/// The sign-in form: two text fields and a focus marker.
#[derive(Clone, Debug)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
    focus: Field,
}

impl Default for LoginForm {
    fn default() -> Self {
        Self {
            email: String::new(),
            password: String::new(),
            focus: Field::Email,
        }
    }
}

impl LoginForm {
    pub fn toggle_focus(&mut self) {
        self.focus = match self.focus {
            Field::Email => Field::Password,
            Field::Password => Field::Email,
        };
    }

    pub fn push(&mut self, c: char) {
        match self.focus {
            Field::Email => self.email.push(c),
            Field::Password => self.password.push(c),
        }
    }

    pub fn backspace(&mut self) {
        match self.focus {
            Field::Email => self.email.pop(),
            Field::Password => self.password.pop(),
        };
    }

    pub fn credentials(&self) -> (String, String) {
        (self.email.clone(), self.password.clone())
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn clear_password(&mut self) {
        self.password.clear();
    }

    fn masked(&self) -> String {
        "*".repeat(self.password.chars().count())
    }
}

impl Widget for &LoginForm {
    fn render(self, area: Rect, buffer: &mut Buffer) {
        let [_, middle, _] = Layout::vertical([
            Constraint::Min(0),
            Constraint::Length(7),
            Constraint::Min(0),
        ])
        .areas(area);
        let [_, center, _] = Layout::horizontal([
            Constraint::Min(0),
            Constraint::Length(48),
            Constraint::Min(0),
        ])
        .areas(middle);

        let block = Block::bordered().title("clink: sign in");
        let inner = block.inner(center);
        block.render(center, buffer);

        let style_for = |field| {
            if self.focus == field {
                Style::new().bold()
            } else {
                Style::new().dim()
            }
        };
        let lines = vec![
            Line::styled(format!("email:    {}", self.email), style_for(Field::Email)),
            Line::raw(""),
            Line::styled(
                format!("password: {}", self.masked()),
                style_for(Field::Password),
            ),
        ];
        Paragraph::new(lines).render(inner, buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_goes_to_the_focused_field() {
        let mut form = LoginForm::default();
        form.push('a');
        form.toggle_focus();
        form.push('p');
        form.push('w');
        form.backspace();

        assert_eq!(form.credentials(), ("a".to_owned(), "p".to_owned()));
        assert_eq!(form.masked(), "*");
    }
}
