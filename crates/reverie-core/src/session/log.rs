//! The human-readable session log.
//!
//! One message per `[YYYY-MM-DD HH:MM:SS] **Role**: content` line. A line that does not start
//! with that pattern continues the previous message, so multi-line content survives. Artifacts
//! are logged as assistant lines whose whole content is `Generated {selfie|audio|video}: <file>`.

use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

use super::{MediaKind, Role};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

static LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})\] \*\*(User|Assistant|System|Bot)\*\*: ?(.*)$")
        .expect("log line regex")
});

static MEDIA_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Generated (selfie|audio|video): (\S+)$").expect("media line regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Message {
        timestamp: Option<NaiveDateTime>,
        role: Role,
        content: String,
    },
    Media {
        timestamp: Option<NaiveDateTime>,
        kind: MediaKind,
        filename: String,
    },
}

pub fn render_line(timestamp: NaiveDateTime, role: Role, content: &str) -> String {
    format!(
        "[{}] **{}**: {}\n",
        timestamp.format(TIMESTAMP_FORMAT),
        role.label(),
        content
    )
}

pub fn render_media_line(timestamp: NaiveDateTime, kind: MediaKind, filename: &str) -> String {
    render_line(
        timestamp,
        Role::Assistant,
        &format!("Generated {}: {}", kind.log_label(), filename),
    )
}

fn parse_role(label: &str) -> Role {
    match label {
        "User" => Role::User,
        "System" => Role::System,
        _ => Role::Assistant,
    }
}

/// A media line only counts when it names a single file with a media extension matching its
/// kind; anything else stays ordinary assistant text.
fn parse_media(content: &str) -> Option<(MediaKind, String)> {
    let caps = MEDIA_RE.captures(content)?;
    let kind = MediaKind::from_log_label(&caps[1])?;
    let filename = caps[2].to_string();
    let by_ext = MediaKind::from_path(Path::new(&filename))?;
    (by_ext == kind).then_some((kind, filename))
}

pub fn parse(text: &str) -> Vec<LogRecord> {
    let mut records: Vec<LogRecord> = Vec::new();
    for line in text.lines() {
        if let Some(caps) = LINE_RE.captures(line) {
            let timestamp = NaiveDateTime::parse_from_str(&caps[1], TIMESTAMP_FORMAT).ok();
            let role = parse_role(&caps[2]);
            let content = caps[3].to_string();
            let media = if role == Role::Assistant {
                parse_media(&content)
            } else {
                None
            };
            records.push(match media {
                Some((kind, filename)) => LogRecord::Media {
                    timestamp,
                    kind,
                    filename,
                },
                None => LogRecord::Message {
                    timestamp,
                    role,
                    content,
                },
            });
            continue;
        }
        match records.last_mut() {
            Some(LogRecord::Message { content, .. }) => {
                content.push('\n');
                content.push_str(line);
            }
            Some(last @ LogRecord::Media { .. }) => {
                // A continuation means the "media line" was really the start of a message.
                if let LogRecord::Media {
                    timestamp,
                    kind,
                    filename,
                } = last.clone()
                {
                    *last = LogRecord::Message {
                        timestamp,
                        role: Role::Assistant,
                        content: format!("Generated {}: {}\n{}", kind.log_label(), filename, line),
                    };
                }
            }
            None => {
                tracing::debug!(target: "reverie::session", "Skipping log text before first message");
            }
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(13, 4, 5)
            .unwrap()
    }

    #[test]
    fn renders_expected_format() {
        assert_eq!(
            render_line(ts(), Role::User, "hello"),
            "[2024-05-01 13:04:05] **User**: hello\n"
        );
        assert_eq!(
            render_media_line(ts(), MediaKind::Audio, "tts_response_1.mp3"),
            "[2024-05-01 13:04:05] **Assistant**: Generated audio: tts_response_1.mp3\n"
        );
    }

    #[test]
    fn render_then_parse_preserves_entries() {
        let cases = [
            (Role::User, "hello"),
            (Role::Assistant, "line one\nline two\n\n*smiles*"),
            (Role::System, ""),
            (Role::Assistant, " leading space"),
            (Role::User, "trailing newline\n"),
        ];
        for (role, content) in cases {
            let parsed = parse(&render_line(ts(), role, content));
            assert_eq!(
                parsed,
                vec![LogRecord::Message {
                    timestamp: Some(ts()),
                    role,
                    content: content.to_string()
                }],
                "case {content:?}"
            );
        }
    }

    #[test]
    fn media_lines_and_legacy_bot_label() {
        let text = "[2024-05-01 13:04:05] **User**: hi\n\
                    [2024-05-01 13:04:06] **Bot**: hey there\n\
                    [2024-05-01 13:04:07] **Bot**: Generated selfie: selfie_image_20240501_130407.png\n";
        let parsed = parse(text);
        assert_eq!(parsed.len(), 3);
        assert!(matches!(&parsed[1], LogRecord::Message { role: Role::Assistant, content, .. } if content == "hey there"));
        assert!(matches!(&parsed[2], LogRecord::Media { kind: MediaKind::Image, filename, .. } if filename == "selfie_image_20240501_130407.png"));
    }

    #[test]
    fn media_phrase_in_prose_is_not_media() {
        let parsed = parse("[2024-05-01 13:04:05] **Assistant**: Generated audio: is what I'd call that\n");
        assert!(matches!(&parsed[0], LogRecord::Message { .. }));
        let parsed = parse("[2024-05-01 13:04:05] **User**: Generated audio: a.mp3\n");
        assert!(matches!(&parsed[0], LogRecord::Message { role: Role::User, .. }));
    }

    #[test]
    fn continuation_after_media_line_becomes_message() {
        let text = "[2024-05-01 13:04:05] **Assistant**: Generated video: clip.mp4\nand more\n";
        let parsed = parse(text);
        assert!(matches!(&parsed[0], LogRecord::Message { content, .. } if content == "Generated video: clip.mp4\nand more"));
    }
}
