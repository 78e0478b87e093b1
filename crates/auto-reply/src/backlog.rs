//! Bounded per-session backlog with drop-policy eviction.

use std::collections::VecDeque;

use {
    parley_common::types::ChannelMeta,
    parley_config::DropPolicy,
    serde::Serialize,
    tokio::time::Instant,
};

/// How many condensed message previews a placeholder keeps.
const MAX_CONDENSED_PREVIEWS: usize = 10;
/// Preview length per condensed message, in characters.
const PREVIEW_CHARS: usize = 80;

/// A pending input not yet consumed by a run.
#[derive(Debug, Clone)]
pub struct QueuedInput {
    /// Per-session sequence number, increasing in receipt order.
    pub seq: u64,
    pub received_at: Instant,
    pub payload: QueuedPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueuedPayload {
    Message { body: String, meta: ChannelMeta },
    /// Synthetic entry standing in for messages collapsed by `summarize` eviction.
    Condensed { count: usize, previews: Vec<String> },
}

impl QueuedInput {
    pub fn message(seq: u64, received_at: Instant, body: String, meta: ChannelMeta) -> Self {
        Self {
            seq,
            received_at,
            payload: QueuedPayload::Message { body, meta },
        }
    }

    /// Text handed to the agent for this entry.
    #[must_use]
    pub fn text(&self) -> String {
        match &self.payload {
            QueuedPayload::Message { body, .. } => body.clone(),
            QueuedPayload::Condensed { count, previews } => {
                let noun = if *count == 1 {
                    "message was"
                } else {
                    "messages were"
                };
                let mut text = format!("[{count} earlier {noun} condensed]");
                for preview in previews {
                    text.push_str("\n- ");
                    text.push_str(preview);
                }
                text
            },
        }
    }

    /// Channel metadata, absent for condensed placeholders.
    #[must_use]
    pub fn meta(&self) -> Option<&ChannelMeta> {
        match &self.payload {
            QueuedPayload::Message { meta, .. } => Some(meta),
            QueuedPayload::Condensed { .. } => None,
        }
    }

    /// Number of original messages this entry represents.
    #[must_use]
    pub fn message_count(&self) -> usize {
        match &self.payload {
            QueuedPayload::Message { .. } => 1,
            QueuedPayload::Condensed { count, .. } => *count,
        }
    }

    fn previews(&self) -> Vec<String> {
        match &self.payload {
            QueuedPayload::Message { body, .. } => vec![preview(body)],
            QueuedPayload::Condensed { previews, .. } => previews.clone(),
        }
    }
}

fn preview(body: &str) -> String {
    let flat = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        return flat;
    }
    let mut cut: String = flat.chars().take(PREVIEW_CHARS - 1).collect();
    cut.push('…');
    cut
}

/// FIFO backlog. Eviction is applied inside [`Backlog::append`], so the length
/// never exceeds the cap once `append` returns.
#[derive(Debug, Default)]
pub struct Backlog {
    entries: VecDeque<QueuedInput>,
}

impl Backlog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `input`, evicting per `drop` when the backlog is at `cap`.
    ///
    /// Returns the entries that left the backlog (or never entered it):
    /// - `Old`: the oldest entries, the new input is always kept.
    /// - `New`: the incoming input itself, after any entries above a lowered
    ///   cap (oldest first).
    /// - `Summarize`: the entries folded into the condensed placeholder.
    ///   With `cap == 1` there's no room for a placeholder, so this behaves as `Old`.
    pub fn append(
        &mut self,
        input: QueuedInput,
        cap: usize,
        drop: DropPolicy,
    ) -> Vec<QueuedInput> {
        let cap = cap.max(1);
        if self.entries.len() < cap {
            self.entries.push_back(input);
            return Vec::new();
        }

        match drop {
            DropPolicy::New => {
                let mut evicted = Vec::new();
                while self.entries.len() > cap {
                    if let Some(oldest) = self.entries.pop_front() {
                        evicted.push(oldest);
                    }
                }
                evicted.push(input);
                evicted
            },
            DropPolicy::Summarize if cap >= 2 => {
                let collapsed: Vec<QueuedInput> = self.entries.drain(..).collect();
                self.entries.push_back(condense(&collapsed));
                self.entries.push_back(input);
                collapsed
            },
            DropPolicy::Old | DropPolicy::Summarize => {
                let mut evicted = Vec::new();
                while self.entries.len() >= cap {
                    if let Some(oldest) = self.entries.pop_front() {
                        evicted.push(oldest);
                    }
                }
                self.entries.push_back(input);
                evicted
            },
        }
    }

    pub fn pop_front(&mut self) -> Option<QueuedInput> {
        self.entries.pop_front()
    }

    /// Remove and return every entry in order.
    pub fn take_all(&mut self) -> Vec<QueuedInput> {
        self.entries.drain(..).collect()
    }

    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedInput> {
        self.entries.iter()
    }
}

fn condense(collapsed: &[QueuedInput]) -> QueuedInput {
    let count = collapsed.iter().map(QueuedInput::message_count).sum();
    let mut previews: Vec<String> = collapsed.iter().flat_map(QueuedInput::previews).collect();
    if previews.len() > MAX_CONDENSED_PREVIEWS {
        previews.drain(..previews.len() - MAX_CONDENSED_PREVIEWS);
    }
    let (seq, received_at) = collapsed
        .first()
        .map(|first| (first.seq, first.received_at))
        .unwrap_or((0, Instant::now()));
    QueuedInput {
        seq,
        received_at,
        payload: QueuedPayload::Condensed { count, previews },
    }
}

/// Render the agent prompt for a run's inputs.
///
/// A single input is passed through verbatim; batches get a header and
/// numbered sections in receipt order.
#[must_use]
pub fn render_prompt(inputs: &[QueuedInput]) -> String {
    match inputs {
        [] => String::new(),
        [single] => single.text(),
        many => {
            let total: usize = many.iter().map(QueuedInput::message_count).sum();
            let mut prompt = format!("[{total} messages arrived together]");
            for (i, input) in many.iter().enumerate() {
                prompt.push_str(&format!("\n\n---\n#{}\n{}", i + 1, input.text()));
            }
            prompt
        },
    }
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn msg(seq: u64, body: &str) -> QueuedInput {
        QueuedInput::message(seq, Instant::now(), body.into(), ChannelMeta::default())
    }

    fn bodies(backlog: &Backlog) -> Vec<String> {
        backlog.iter().map(QueuedInput::text).collect()
    }

    #[test]
    fn under_cap_appends() {
        let mut backlog = Backlog::new();
        assert!(backlog.append(msg(1, "a"), 2, DropPolicy::Old).is_empty());
        assert!(backlog.append(msg(2, "b"), 2, DropPolicy::Old).is_empty());
        assert_eq!(bodies(&backlog), ["a", "b"]);
    }

    #[test]
    fn old_evicts_oldest() {
        let mut backlog = Backlog::new();
        for (i, b) in ["A", "B", "C"].iter().enumerate() {
            backlog.append(msg(i as u64, b), 3, DropPolicy::Old);
        }
        let evicted = backlog.append(msg(3, "D"), 3, DropPolicy::Old);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].text(), "A");
        assert_eq!(bodies(&backlog), ["B", "C", "D"]);
    }

    #[test]
    fn new_drops_incoming() {
        let mut backlog = Backlog::new();
        backlog.append(msg(1, "a"), 1, DropPolicy::New);
        let evicted = backlog.append(msg(2, "b"), 1, DropPolicy::New);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].seq, 2);
        assert_eq!(bodies(&backlog), ["a"]);
    }

    #[rstest]
    #[case::old(DropPolicy::Old)]
    #[case::new(DropPolicy::New)]
    #[case::summarize(DropPolicy::Summarize)]
    fn lowered_cap_shrinks_backlog(#[case] drop: DropPolicy) {
        let mut backlog = Backlog::new();
        for (i, b) in ["a", "b", "c", "d"].iter().enumerate() {
            backlog.append(msg(i as u64, b), 5, drop);
        }
        let evicted = backlog.append(msg(4, "e"), 2, drop);
        assert!(backlog.len() <= 2);
        let kept: usize = backlog.iter().map(QueuedInput::message_count).sum();
        let dropped: usize = evicted.iter().map(QueuedInput::message_count).sum();
        match drop {
            DropPolicy::New => {
                assert_eq!(bodies(&backlog), ["c", "d"]);
                assert_eq!(evicted.iter().map(|e| e.seq).collect::<Vec<_>>(), [0, 1, 4]);
            },
            DropPolicy::Old => assert_eq!(bodies(&backlog), ["d", "e"]),
            DropPolicy::Summarize => assert_eq!(kept, 5),
        }
        assert!(kept + dropped >= 5);
    }

    #[test]
    fn summarize_condenses_backlog() {
        let mut backlog = Backlog::new();
        backlog.append(msg(1, "a"), 2, DropPolicy::Summarize);
        backlog.append(msg(2, "b"), 2, DropPolicy::Summarize);
        let evicted = backlog.append(msg(3, "c"), 2, DropPolicy::Summarize);
        assert_eq!(evicted.len(), 2);
        assert_eq!(backlog.len(), 2);
        let first = backlog.iter().next().map(QueuedInput::message_count);
        assert_eq!(first, Some(2));

        // A second overflow folds the placeholder into a new one.
        backlog.append(msg(4, "d"), 2, DropPolicy::Summarize);
        assert_eq!(backlog.len(), 2);
        let texts = bodies(&backlog);
        assert!(texts[0].starts_with("[3 earlier messages were condensed]"));
        assert!(texts[0].contains("- a") && texts[0].contains("- c"));
        assert_eq!(texts[1], "d");
    }

    #[test]
    fn summarize_with_cap_one_keeps_newest() {
        let mut backlog = Backlog::new();
        backlog.append(msg(1, "a"), 1, DropPolicy::Summarize);
        let evicted = backlog.append(msg(2, "b"), 1, DropPolicy::Summarize);
        assert_eq!(evicted.len(), 1);
        assert_eq!(bodies(&backlog), ["b"]);
    }

    #[test]
    fn previews_are_truncated() {
        let long = "x".repeat(200);
        let p = preview(&long);
        assert_eq!(p.chars().count(), PREVIEW_CHARS);
        assert!(p.ends_with('…'));
    }

    #[test]
    fn prompt_rendering() {
        assert_eq!(render_prompt(&[msg(1, "hello")]), "hello");
        let batch = render_prompt(&[msg(1, "one"), msg(2, "two")]);
        assert!(batch.starts_with("[2 messages arrived together]"));
        assert!(batch.find("one") < batch.find("two"));
    }
}
