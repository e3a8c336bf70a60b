//! Text shaping at the bridge boundary: rendering recalled memories as a
//! prompt block, and cutting a transcript into overlapping windows.

use ara_types::{ConversationTurn, MemoryError, RecalledMemory, Role};

/// Header of the block produced by [`format_context`].
pub const CONTEXT_HEADER: &str = "[Relevant Past Memories]:";

/// Turns per transcript window.
pub const DEFAULT_CHUNK_SIZE: usize = 5;
/// Turns shared by consecutive windows.
pub const DEFAULT_CHUNK_OVERLAP: usize = 2;

/// Render memories for prompt injection.
///
/// Context chunks are fenced with `---` lines; single utterances render as
/// `role: text`. Returns an empty string when there is nothing to show.
///
/// ```rust
/// # use ara_memory::context::format_context;
/// assert_eq!(format_context(&[]), "");
/// ```
pub fn format_context(memories: &[RecalledMemory]) -> String {
    if memories.is_empty() {
        return String::new();
    }
    let mut out = format!("\n{CONTEXT_HEADER}\n");
    for m in memories {
        match m.metadata.role {
            Some(Role::ContextChunk) => {
                out.push_str("---\n");
                out.push_str(&m.content);
                out.push_str("\n---\n");
            }
            role => {
                let role = role.unwrap_or(Role::User);
                out.push_str(&format!("{role}: {}\n", m.content));
            }
        }
    }
    out
}

/// Group `turns` into windows of `chunk_size` starting every
/// `chunk_size - overlap` turns, each rendered as `role: text` lines.
///
/// Blank turns are skipped inside a window, windows that end up empty are
/// dropped, and a window identical to an earlier one is emitted once.
///
/// # Errors
///
/// [`MemoryError::InvalidArgument`] when `chunk_size` is zero or `overlap`
/// is not smaller than `chunk_size`.
pub fn transcript_windows(
    turns: &[ConversationTurn],
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<String>, MemoryError> {
    if chunk_size == 0 {
        return Err(MemoryError::InvalidArgument(
            "chunk_size must be at least 1".into(),
        ));
    }
    if overlap >= chunk_size {
        return Err(MemoryError::InvalidArgument(format!(
            "overlap ({overlap}) must be smaller than chunk_size ({chunk_size})"
        )));
    }
    let step = (chunk_size - overlap).max(1);

    let mut windows: Vec<String> = Vec::new();
    for start in (0..turns.len()).step_by(step) {
        let end = (start + chunk_size).min(turns.len());
        let text = turns[start..end]
            .iter()
            .filter(|t| !t.text.trim().is_empty())
            .map(|t| format!("{}: {}", t.role, t.text))
            .collect::<Vec<_>>()
            .join("\n");
        if text.trim().is_empty() || windows.contains(&text) {
            continue;
        }
        windows.push(text);
    }
    Ok(windows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ara_types::{MemoryId, Metadata};
    use chrono::Utc;

    fn recalled(content: &str, role: Role) -> RecalledMemory {
        let now = Utc::now();
        RecalledMemory {
            id: MemoryId(1),
            content: content.into(),
            metadata: Metadata::new().with_role(role),
            score: 0.9,
            similarity: 0.9,
            importance: 0.5,
            access_count: 1,
            created_at: now,
            last_accessed_at: now,
        }
    }

    fn turns(n: usize) -> Vec<ConversationTurn> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    ConversationTurn::user(format!("u{i}"))
                } else {
                    ConversationTurn::assistant(format!("a{i}"))
                }
            })
            .collect()
    }

    // ── format_context ───────────────────────────────────────────────────────

    #[test]
    fn context_renders_utterances_and_chunks() {
        let out = format_context(&[
            recalled("I have a dog", Role::User),
            recalled("user: hi\nassistant: hello", Role::ContextChunk),
        ]);
        assert_eq!(
            out,
            "\n[Relevant Past Memories]:\nuser: I have a dog\n---\nuser: hi\nassistant: hello\n---\n"
        );
    }

    // ── transcript_windows ───────────────────────────────────────────────────

    #[test]
    fn windows_overlap_by_configured_turns() {
        let w = transcript_windows(&turns(7), 5, 2).unwrap();
        // starts at 0, 3, 6
        assert_eq!(w.len(), 3);
        assert!(w[0].starts_with("user: u0") && w[0].ends_with("user: u4"));
        assert!(w[1].starts_with("assistant: a3") && w[1].ends_with("user: u6"));
        assert_eq!(w[2], "user: u6");
    }

    #[test]
    fn blank_turns_are_skipped() {
        let t = vec![
            ConversationTurn::user("hello"),
            ConversationTurn::assistant("   "),
            ConversationTurn::user("bye"),
        ];
        let w = transcript_windows(&t, 5, 2).unwrap();
        assert_eq!(w, vec!["user: hello\nuser: bye".to_string()]);
    }

    #[test]
    fn all_blank_transcript_yields_nothing() {
        let t = vec![ConversationTurn::user(""), ConversationTurn::assistant(" ")];
        assert!(transcript_windows(&t, 2, 1).unwrap().is_empty());
    }

    #[test]
    fn invalid_window_shape_rejected() {
        assert!(matches!(
            transcript_windows(&turns(3), 0, 0),
            Err(MemoryError::InvalidArgument(_))
        ));
        assert!(matches!(
            transcript_windows(&turns(3), 3, 3),
            Err(MemoryError::InvalidArgument(_))
        ));
    }
}
