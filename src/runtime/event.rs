use std::{collections::BTreeMap, fmt::Display};

use itertools::Itertools;

use crate::{text::TextEvent, value::Variant};

/// An option offered to the player.
#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    pub next: usize,
    pub text: String,
    pub enabled: bool,
}

/// Everything a playthrough asks its host to present, in document order.
#[derive(Debug, Clone, PartialEq)]
pub enum DialogEvent {
    LineStarted {
        speakers: Vec<String>,
        text: String,
        /// Inline tags, by visible char offset.
        timeline: Vec<TextEvent>,
    },
    ChoicePresented {
        choices: Vec<Choice>,
    },
    HashData {
        speaker: Option<String>,
        data: BTreeMap<String, Variant>,
    },
    ScriptEnded,
    SpeedChanged(f64),
    PauseRequested(f64),
    AutoAdvance,
    Prompt,
    Scroll,
}

fn quoted(value: &Variant) -> String {
    match value {
        Variant::String(string) => format!("{:?}", string),
        other => other.to_string(),
    }
}

impl Display for DialogEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LineStarted {
                speakers,
                text,
                timeline,
            } => {
                write!(f, "{}: {}", speakers.join(", "), text)?;
                if !timeline.is_empty() {
                    write!(f, " [{}]", timeline.iter().join(", "))?;
                }
                Ok(())
            }
            Self::ChoicePresented { choices } => write!(
                f,
                "choice: {}",
                choices
                    .iter()
                    .enumerate()
                    .map(|(idx, choice)| if choice.enabled {
                        format!("{}) {}", idx, choice.text)
                    } else {
                        format!("{}) ({})", idx, choice.text)
                    })
                    .join(" | ")
            ),
            Self::HashData { speaker, data } => {
                f.write_str("hash ")?;
                if let Some(speaker) = speaker {
                    write!(f, "{} ", speaker)?;
                }
                write!(
                    f,
                    "#{{{}}}",
                    data.iter()
                        .map(|(key, value)| format!("{}: {}", key, quoted(value)))
                        .join(", ")
                )
            }
            Self::ScriptEnded => f.write_str("end"),
            Self::SpeedChanged(speed) => write!(f, "speed {}", speed),
            Self::PauseRequested(seconds) => write!(f, "pause {}", seconds),
            Self::AutoAdvance => f.write_str("auto"),
            Self::Prompt => f.write_str("prompt"),
            Self::Scroll => f.write_str("scroll"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::TextTag;
    use pretty_assertions::assert_eq;

    #[test]
    fn events_render_on_one_line() {
        let line = DialogEvent::LineStarted {
            speakers: vec!["A".into(), "B".into()],
            text: "Hi  there".into(),
            timeline: vec![TextEvent {
                tag: TextTag::Pause(Some(0.5)),
                offset: 3,
                is_await: false,
            }],
        };
        assert_eq!(line.to_string(), "A, B: Hi  there [pause=0.5@3]");

        let choices = DialogEvent::ChoicePresented {
            choices: vec![
                Choice {
                    next: 4,
                    text: "Buy".into(),
                    enabled: true,
                },
                Choice {
                    next: 9,
                    text: "Steal".into(),
                    enabled: false,
                },
            ],
        };
        assert_eq!(choices.to_string(), "choice: 0) Buy | 1) (Steal)");

        let hash = DialogEvent::HashData {
            speaker: Some("A".into()),
            data: [
                ("mood".to_string(), Variant::from("glad")),
                ("loud".to_string(), Variant::from(true)),
            ]
            .into_iter()
            .collect(),
        };
        assert_eq!(hash.to_string(), "hash A #{loud: true, mood: \"glad\"}");
    }
}
