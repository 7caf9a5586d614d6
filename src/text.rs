use std::{collections::VecDeque, fmt::Display};

use tracing::warn;

use crate::runtime::DialogEvent;

/// A control tag found in line text.
#[derive(Debug, Clone, PartialEq)]
pub enum TextTag {
    Auto,
    End,
    Goto(String),
    /// `None` waits for input instead of a duration.
    Pause(Option<f64>),
    Speed(f64),
    Prompt,
    Scroll,
    Page,
}

impl Display for TextTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::End => f.write_str("end"),
            Self::Goto(target) => write!(f, "goto={}", target),
            Self::Pause(None) => f.write_str("pause"),
            Self::Pause(Some(seconds)) => write!(f, "pause={}", seconds),
            Self::Speed(speed) => write!(f, "speed={}", speed),
            Self::Prompt => f.write_str("prompt"),
            Self::Scroll => f.write_str("scroll"),
            Self::Page => f.write_str("page"),
        }
    }
}

/// A tag placed on the reveal timeline. `offset` counts visible chars, so it
/// is the number of chars shown when the tag fires.
#[derive(Debug, Clone, PartialEq)]
pub struct TextEvent {
    pub tag: TextTag,
    pub offset: usize,
    /// Playback waits for the player before continuing past this tag.
    pub is_await: bool,
}

impl Display for TextEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.tag, self.offset)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct InterpolatedText {
    pub text: String,
    pub events: Vec<TextEvent>,
}

impl InterpolatedText {
    pub fn tags(&self) -> impl Iterator<Item = &TextTag> {
        self.events.iter().map(|event| &event.tag)
    }
}

const RESERVED_TAGS: &[&str] = &[
    "auto", "end", "goto", "pause", "speed", "prompt", "scroll", "page",
];

/// Strips control tags from `text` and places them on a timeline.
///
/// Other bracketed tags are markup for the renderer: they stay in the text
/// verbatim and take up no reveal time.
pub fn interpolate(text: &str) -> InterpolatedText {
    let mut result = InterpolatedText::default();
    let mut visible = 0;
    let mut rest = text;
    while let Some(open) = rest.find('[') {
        let before = &rest[..open];
        result.text.push_str(before);
        visible += before.chars().count();

        let after_open = &rest[open + 1..];
        let close = match after_open.find(|ch| ch == ']' || ch == '[') {
            Some(close) if after_open[close..].starts_with(']') => close,
            _ => {
                // Not a tag; keep the bracket as text.
                result.text.push('[');
                visible += 1;
                rest = after_open;
                continue;
            }
        };
        let body = &after_open[..close];
        rest = &after_open[close + 1..];

        let (name, argument) = match body.split_once('=') {
            Some((name, argument)) => (name.trim(), Some(argument.trim())),
            None => (body.trim(), None),
        };
        if !RESERVED_TAGS.contains(&name) {
            result.text.push('[');
            result.text.push_str(body);
            result.text.push(']');
            continue;
        }
        match parse_tag(name, argument) {
            Some(tag) => {
                let is_await = matches!(tag, TextTag::Pause(None) | TextTag::Prompt | TextTag::Page);
                result.events.push(TextEvent {
                    tag,
                    offset: visible,
                    is_await,
                });
            }
            None => warn!(tag = body, "ignoring malformed text tag"),
        }
    }
    result.text.push_str(rest);
    result
}

fn parse_tag(name: &str, argument: Option<&str>) -> Option<TextTag> {
    let number = || argument.and_then(|argument| argument.parse::<f64>().ok());
    Some(match (name, argument) {
        ("auto", None) => TextTag::Auto,
        ("end", None) => TextTag::End,
        ("goto", Some(target)) if !target.is_empty() => TextTag::Goto(target.to_string()),
        ("pause", None) => TextTag::Pause(None),
        ("pause", Some(_)) => TextTag::Pause(Some(number()?)),
        ("speed", Some(_)) => TextTag::Speed(number()?),
        ("prompt", None) => TextTag::Prompt,
        ("scroll", None) => TextTag::Scroll,
        ("page", None) => TextTag::Page,
        _ => return None,
    })
}

/// Byte offset of every char a reader sees in interpolated `text`; markup
/// tags are skipped, an unmatched `[` is visible.
fn visible_offsets(text: &str) -> Vec<usize> {
    let mut offsets = Vec::new();
    let mut idx = 0;
    while let Some(ch) = text[idx..].chars().next() {
        if ch == '[' {
            let after_open = &text[idx + 1..];
            if let Some(close) = after_open.find(|ch| ch == ']' || ch == '[') {
                if after_open[close..].starts_with(']') {
                    idx += close + 2;
                    continue;
                }
            }
        }
        offsets.push(idx);
        idx += ch.len_utf8();
    }
    offsets
}

/// Number of visible chars in interpolated text, the unit of timeline
/// offsets.
pub fn visible_len(text: &str) -> usize {
    visible_offsets(text).len()
}

/// The part of `text` shown once `revealed` visible chars are out, markup
/// included.
pub fn revealed_prefix(text: &str, revealed: usize) -> &str {
    let end = visible_offsets(text)
        .get(revealed)
        .copied()
        .unwrap_or(text.len());
    &text[..end]
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypewriterStep {
    /// Show the first `n` visible chars.
    Reveal(usize),
    Event(DialogEvent),
}

/// Steps through a line's timeline the way a typewriter renderer reveals it:
/// reveal up to the next tag, fire the tag, repeat.
///
/// `goto` and `end` tags steer the script rather than the reveal and are not
/// stepped.
pub struct Typewriter {
    length: usize,
    events: VecDeque<TextEvent>,
    pending: VecDeque<DialogEvent>,
    revealed: usize,
}

impl Typewriter {
    pub fn new(text: &str, timeline: &[TextEvent]) -> Self {
        Self {
            length: visible_len(text),
            events: timeline.iter().cloned().collect(),
            pending: VecDeque::new(),
            revealed: 0,
        }
    }
    pub fn revealed(&self) -> usize {
        self.revealed
    }
}

impl Iterator for Typewriter {
    type Item = TypewriterStep;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(TypewriterStep::Event(event));
            }
            match self.events.front() {
                Some(event) if event.offset.min(self.length) <= self.revealed => {
                    if let Some(event) = self.events.pop_front() {
                        match event.tag {
                            TextTag::Auto => self.pending.push_back(DialogEvent::AutoAdvance),
                            TextTag::Pause(None) | TextTag::Prompt => {
                                self.pending.push_back(DialogEvent::Prompt)
                            }
                            TextTag::Page => {
                                self.pending.push_back(DialogEvent::Prompt);
                                self.pending.push_back(DialogEvent::Scroll);
                            }
                            TextTag::Pause(Some(seconds)) => {
                                self.pending.push_back(DialogEvent::PauseRequested(seconds))
                            }
                            TextTag::Speed(speed) => {
                                self.pending.push_back(DialogEvent::SpeedChanged(speed))
                            }
                            TextTag::Scroll => self.pending.push_back(DialogEvent::Scroll),
                            TextTag::Goto(_) | TextTag::End => {}
                        }
                    }
                }
                next_event => {
                    if self.revealed >= self.length {
                        return None;
                    }
                    self.revealed = next_event
                        .map_or(self.length, |event| event.offset.min(self.length));
                    return Some(TypewriterStep::Reveal(self.revealed));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn pause_tag_is_removed_and_timed() {
        let result = interpolate("Hello [pause=1] world!");
        assert_eq!(result.text, "Hello  world!");
        assert_eq!(
            result.events,
            vec![TextEvent {
                tag: TextTag::Pause(Some(1.0)),
                offset: 6,
                is_await: false,
            }]
        );
    }

    #[test]
    fn markup_passes_through_without_taking_time() {
        let result = interpolate("[b]Hé[/b] [speed=2]there[prompt] [wave amp=3]x[/wave]");
        assert_eq!(result.text, "[b]Hé[/b] there [wave amp=3]x[/wave]");
        assert_eq!(
            result.events,
            vec![
                TextEvent {
                    tag: TextTag::Speed(2.0),
                    offset: 3,
                    is_await: false,
                },
                TextEvent {
                    tag: TextTag::Prompt,
                    offset: 8,
                    is_await: true,
                },
            ]
        );
    }

    #[test]
    fn control_tags() {
        let result = interpolate("[auto]a[goto=shop]b[end][page][scroll][pause]");
        assert_eq!(result.text, "ab");
        assert_eq!(
            result.tags().cloned().collect::<Vec<_>>(),
            vec![
                TextTag::Auto,
                TextTag::Goto("shop".into()),
                TextTag::End,
                TextTag::Page,
                TextTag::Scroll,
                TextTag::Pause(None)
            ]
        );
        assert_eq!(
            result
                .events
                .iter()
                .map(|event| event.offset)
                .collect::<Vec<_>>(),
            vec![0, 1, 2, 2, 2, 2]
        );
    }

    #[test]
    fn malformed_and_unclosed_tags() {
        let result = interpolate("a[speed=fast]b[pause=]c [unclosed");
        assert_eq!(result.text, "abc [unclosed");
        assert!(result.events.is_empty());

        let result = interpolate("[[pause]");
        assert_eq!(result.text, "[");
        assert_eq!(result.events[0].offset, 1);
    }

    #[test]
    fn typewriter_reveals_between_tags() {
        let text = interpolate("Hi [speed=2]there[pause=0.5][page]!");
        let steps: Vec<_> = Typewriter::new(&text.text, &text.events).collect();
        assert_eq!(
            steps,
            vec![
                TypewriterStep::Reveal(3),
                TypewriterStep::Event(DialogEvent::SpeedChanged(2.0)),
                TypewriterStep::Reveal(8),
                TypewriterStep::Event(DialogEvent::PauseRequested(0.5)),
                TypewriterStep::Event(DialogEvent::Prompt),
                TypewriterStep::Event(DialogEvent::Scroll),
                TypewriterStep::Reveal(9),
            ]
        );
    }

    #[test]
    fn typewriter_fires_leading_and_trailing_tags() {
        let text = interpolate("[auto]ok[scroll]");
        let steps: Vec<_> = Typewriter::new(&text.text, &text.events).collect();
        assert_eq!(
            steps,
            vec![
                TypewriterStep::Event(DialogEvent::AutoAdvance),
                TypewriterStep::Reveal(2),
                TypewriterStep::Event(DialogEvent::Scroll),
            ]
        );
    }

    #[test]
    fn typewriter_counts_only_visible_chars() {
        let text = interpolate("[b]Hi[/b] [pause=1]x");
        assert_eq!(text.text, "[b]Hi[/b] x");
        assert_eq!(visible_len(&text.text), 4);
        let steps: Vec<_> = Typewriter::new(&text.text, &text.events).collect();
        assert_eq!(
            steps,
            vec![
                TypewriterStep::Reveal(3),
                TypewriterStep::Event(DialogEvent::PauseRequested(1.0)),
                TypewriterStep::Reveal(4),
            ]
        );
        assert_eq!(revealed_prefix(&text.text, 0), "[b]");
        assert_eq!(revealed_prefix(&text.text, 3), "[b]Hi[/b] ");
        assert_eq!(revealed_prefix(&text.text, 4), "[b]Hi[/b] x");
        assert_eq!(visible_len("a [ b"), 5);
    }
}
