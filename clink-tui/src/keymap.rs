use std::{cmp, collections::BTreeMap};

use crossterm::event::KeyModifiers;

// Key bindings are written in a compact textual form ("gg", "<CR>",
// "<C-l>") and resolved against a sorted map, so multi-key sequences are a
// prefix lookup rather than a state machine per binding.

pub fn parse_key_sequence(input: &str) -> Result<Vec<KeyEvent>, nom::error::Error<&str>> {
    use nom::Finish;
    nom::multi::many1(parse_key)(input).finish().map(|(_, k)| k)
}

fn parse_key(input: &str) -> nom::IResult<&str, KeyEvent> {
    use nom::{
        branch::alt,
        bytes::complete::tag,
        character::complete::one_of,
        combinator::map,
        sequence::{delimited, separated_pair},
    };

    let key = alt((KeyCode::parse_char, KeyCode::parse_special));
    let modifiers = nom::multi::fold_many1(
        map(one_of("ACMS"), |c| match c {
            'A' => KeyModifiers::ALT,
            'C' => KeyModifiers::CONTROL,
            'M' => KeyModifiers::META,
            'S' => KeyModifiers::SHIFT,
            _ => unreachable!(),
        }),
        KeyModifiers::empty,
        KeyModifiers::union,
    );

    let bracketed = alt((
        map(
            separated_pair(modifiers, tag("-"), key),
            |(modifiers, code)| KeyEvent { modifiers, code },
        ),
        map(KeyCode::parse_special, KeyEvent::from),
    ));
    alt((
        delimited(tag("<"), bracketed, tag(">")),
        map(KeyCode::parse_char, KeyEvent::from),
    ))(input)
}

#[derive(Clone, Copy, Debug, Eq)]
pub struct KeyEvent {
    pub code: KeyCode,
    pub modifiers: KeyModifiers,
}

impl From<KeyCode> for KeyEvent {
    fn from(code: KeyCode) -> Self {
        Self {
            code,
            modifiers: KeyModifiers::empty(),
        }
    }
}

impl From<crossterm::event::KeyEvent> for KeyEvent {
    fn from(event: crossterm::event::KeyEvent) -> Self {
        let code = KeyCode::from(event.code);
        // uppercase characters already encode shift
        let modifiers = match code {
            KeyCode::Char(_) => event.modifiers.difference(KeyModifiers::SHIFT),
            _ => event.modifiers,
        };
        Self { code, modifiers }
    }
}

// manually impl `Ord` since `KeyModifiers` isn't `Ord`
// https://github.com/crossterm-rs/crossterm/pull/951
impl Ord for KeyEvent {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        self.code
            .cmp(&other.code)
            .then(self.modifiers.bits().cmp(&other.modifiers.bits()))
    }
}

impl PartialOrd for KeyEvent {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for KeyEvent {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == cmp::Ordering::Equal
    }
}

// Our own version of `crossterm::event::KeyCode`, orderable so sequences
// can key a `BTreeMap`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum KeyCode {
    Char(char),
    Backspace,
    Delete,
    Enter,
    Left,
    Right,
    Up,
    Down,
    Home,
    End,
    PageUp,
    PageDown,
    Tab,
    Escape,
    Unknown,
}

impl KeyCode {
    fn parse_char(input: &str) -> nom::IResult<&str, Self> {
        nom::combinator::map(
            nom::character::complete::satisfy(nom_unicode::is_alphanumeric),
            Self::Char,
        )(input)
    }

    fn parse_special(input: &str) -> nom::IResult<&str, Self> {
        use nom::{bytes::complete::tag, combinator::value};
        nom::branch::alt((
            value(Self::Backspace, tag("BS")),
            value(Self::Delete, tag("Del")),
            value(Self::Enter, tag("CR")),
            value(Self::Left, tag("Left")),
            value(Self::Right, tag("Right")),
            value(Self::Up, tag("Up")),
            value(Self::Down, tag("Down")),
            value(Self::Home, tag("Home")),
            value(Self::End, tag("End")),
            value(Self::PageUp, tag("PageUp")),
            value(Self::PageDown, tag("PageDown")),
            value(Self::Tab, tag("Tab")),
            value(Self::Escape, tag("Esc")),
        ))(input)
    }
}

impl From<crossterm::event::KeyCode> for KeyCode {
    fn from(code: crossterm::event::KeyCode) -> Self {
        use crossterm::event::KeyCode as Kc;
        match code {
            Kc::Char(c) => Self::Char(c),
            Kc::Backspace => Self::Backspace,
            Kc::Delete => Self::Delete,
            Kc::Enter => Self::Enter,
            Kc::Left => Self::Left,
            Kc::Right => Self::Right,
            Kc::Up => Self::Up,
            Kc::Down => Self::Down,
            Kc::Home => Self::Home,
            Kc::End => Self::End,
            Kc::PageUp => Self::PageUp,
            Kc::PageDown => Self::PageDown,
            Kc::Tab => Self::Tab,
            Kc::Esc => Self::Escape,
            _ => Self::Unknown,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Keymap<A> {
    keys: BTreeMap<Vec<KeyEvent>, A>,
}

impl<A> Default for Keymap<A> {
    fn default() -> Self {
        Self {
            keys: BTreeMap::new(),
        }
    }
}

impl<A: Clone> Keymap<A> {
    /// Binds a textual key sequence to an action. Unparseable sequences are
    /// logged and skipped rather than failing the whole map.
    pub fn bind(&mut self, sequence: &str, action: A) {
        match parse_key_sequence(sequence) {
            Ok(keys) => {
                self.keys.insert(keys, action);
            }
            Err(err) => tracing::warn!(sequence, %err, "unparseable key binding"),
        }
    }

    fn entries_with_prefix<'s, 'p>(
        &'s self,
        prefix: &'p [KeyEvent],
    ) -> impl Iterator<Item = (&'s Vec<KeyEvent>, &'s A)> + use<'s, 'p, A> {
        use std::ops::Bound;

        self.keys
            .range::<[_], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(move |(k, _)| k.starts_with(prefix))
    }

    /// Finds the action corresponding to the provided key sequence.
    ///
    /// ## Return values
    /// - `Some(Some(action))`: the key sequence is mapped to the action
    /// - `Some(None)`: the key sequence is a prefix to at least one action
    /// - `None`: the key sequence is not a prefix to any action
    fn get(&self, keys: &[KeyEvent]) -> Option<Option<A>> {
        self.entries_with_prefix(keys)
            .next()
            .map(|(k, v)| (k == keys).then_some(v.clone()))
    }
}

/// Outcome of feeding one key into a [`KeymapState`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Resolution<A> {
    Action(A),
    /// Part of a multi-key sequence; more keys are needed.
    Pending,
    Unmapped,
}

/// Buffers keys across events so multi-key sequences resolve incrementally.
#[derive(Clone, Debug, Default)]
pub struct KeymapState {
    buffer: Vec<KeyEvent>,
}

impl KeymapState {
    pub fn handle<A: Clone>(&mut self, keymap: &Keymap<A>, event: KeyEvent) -> Resolution<A> {
        self.buffer.push(event);
        match keymap.get(&self.buffer) {
            Some(Some(action)) => {
                self.buffer.clear();
                Resolution::Action(action)
            }
            Some(None) => Resolution::Pending,
            None => {
                self.buffer.clear();
                Resolution::Unmapped
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn char_key(c: char) -> KeyEvent {
        KeyEvent::from(KeyCode::Char(c))
    }

    #[test]
    fn parses_plain_special_and_modified_keys() {
        assert_eq!(parse_key_sequence("gg").unwrap(), [char_key('g'); 2]);
        assert_eq!(
            parse_key_sequence("<CR>").unwrap(),
            [KeyEvent::from(KeyCode::Enter)]
        );
        assert_eq!(
            parse_key_sequence("<C-l>").unwrap(),
            [KeyEvent {
                code: KeyCode::Char('l'),
                modifiers: KeyModifiers::CONTROL,
            }]
        );
    }

    #[test]
    fn multi_key_sequences_resolve_incrementally() {
        let mut keymap = Keymap::default();
        keymap.bind("gg", "first");
        keymap.bind("j", "down");

        let mut state = KeymapState::default();
        assert_eq!(state.handle(&keymap, char_key('g')), Resolution::Pending);
        assert_eq!(
            state.handle(&keymap, char_key('g')),
            Resolution::Action("first")
        );
        assert_eq!(
            state.handle(&keymap, char_key('j')),
            Resolution::Action("down")
        );
        assert_eq!(state.handle(&keymap, char_key('x')), Resolution::Unmapped);
        // the buffer was cleared by the miss
        assert_eq!(state.handle(&keymap, char_key('g')), Resolution::Pending);
    }

    #[test]
    fn shift_on_plain_characters_is_ignored() {
        let upper = crossterm::event::KeyEvent::new(
            crossterm::event::KeyCode::Char('G'),
            KeyModifiers::SHIFT,
        );
        assert_eq!(KeyEvent::from(upper), char_key('G'));
    }
}
