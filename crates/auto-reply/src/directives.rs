//! Inline `/queue` directive parsing.
//!
//! Recognized forms, anywhere in a message body:
//!
//! ```text
//! /queue collect debounce:2s cap:10 drop:summarize
//! /queue:interrupt
//! /queue reset
//! ```
//!
//! Arguments are consumed left to right after the `/queue` marker until the
//! first token that isn't a valid argument; everything else stays message text.
//! A bare mode or reset word is only an argument in first position; later
//! arguments must be `key:value`.
//! Parsing is pure and never fails.

use std::ops::Range;

use {
    once_cell::sync::Lazy,
    parley_config::{DropPolicy, MessageQueueMode},
    regex::Regex,
};

use crate::policy::PolicyOverride;

#[allow(clippy::expect_used)]
static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\S+").expect("hardcoded regex"));

#[allow(clippy::expect_used)]
static MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^/queue(?:@[A-Za-z0-9_]+)?(?:[:=](.+))?$").expect("hardcoded regex")
});

#[allow(clippy::expect_used)]
static KEY_VALUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(mode|debounce|max[_-]?wait|wait|cap|drop)[:=](.+)$")
        .expect("hardcoded regex")
});

#[allow(clippy::expect_used)]
static DURATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\d+(?:\.\d+)?)(ms|s|sec|secs|m|min|mins|h)?$").expect("hardcoded regex")
});

#[allow(clippy::expect_used)]
static SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").expect("hardcoded regex"));

/// Result of stripping directives from a message body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedDirectives {
    /// Body with directive tokens removed and whitespace collapsed. Equal to
    /// the input when nothing was recognized.
    pub cleaned: String,
    /// Only fields that were explicitly present are set.
    pub overrides: PolicyOverride,
    /// `reset`/`inherit` was given: drop the session-level override.
    pub reset: bool,
    /// A `/queue` marker was found.
    pub recognized: bool,
}

impl ParsedDirectives {
    /// The message carried nothing but a directive.
    #[must_use]
    pub fn is_directive_only(&self) -> bool {
        self.recognized && self.cleaned.is_empty()
    }
}

pub fn parse_directives(raw: &str) -> ParsedDirectives {
    let tokens: Vec<_> = TOKEN.find_iter(raw).collect();
    let mut consumed: Vec<Range<usize>> = Vec::new();
    let mut overrides = PolicyOverride::default();
    let mut reset = false;
    let mut recognized = false;

    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];
        i += 1;
        let Some(caps) = MARKER.captures(token.as_str()) else {
            continue;
        };
        let attached = caps.get(1);
        if let Some(inline) = attached
            && !apply_arg(inline.as_str(), true, &mut overrides, &mut reset)
        {
            continue;
        }
        recognized = true;
        consumed.push(token.range());

        let mut bare_allowed = attached.is_none();
        while i < tokens.len()
            && apply_arg(tokens[i].as_str(), bare_allowed, &mut overrides, &mut reset)
        {
            consumed.push(tokens[i].range());
            bare_allowed = false;
            i += 1;
        }
    }

    if !recognized {
        return ParsedDirectives {
            cleaned: raw.to_string(),
            ..Default::default()
        };
    }

    ParsedDirectives {
        cleaned: strip_ranges(raw, &consumed),
        overrides,
        reset,
        recognized,
    }
}

fn apply_arg(
    token: &str,
    bare_allowed: bool,
    overrides: &mut PolicyOverride,
    reset: &mut bool,
) -> bool {
    let lower = token.to_ascii_lowercase();
    if bare_allowed {
        if matches!(lower.as_str(), "reset" | "inherit" | "default" | "clear") {
            *reset = true;
            return true;
        }
        if let Some(mode) = normalize_queue_mode(&lower) {
            overrides.mode = Some(mode);
            return true;
        }
    }

    let Some(caps) = KEY_VALUE.captures(&lower) else {
        return false;
    };
    let (key, value) = (&caps[1], &caps[2]);
    match key {
        "mode" => normalize_queue_mode(value).map(|m| overrides.mode = Some(m)),
        "debounce" => parse_duration_ms(value).map(|ms| overrides.debounce_ms = Some(ms)),
        "cap" => parse_cap(value).map(|cap| overrides.cap = Some(cap)),
        "drop" => normalize_drop_policy(value).map(|d| overrides.drop = Some(d)),
        _ => parse_duration_ms(value).map(|ms| overrides.max_wait_ms = Some(ms)),
    }
    .is_some()
}

/// Map a mode name or synonym to a queue mode.
pub fn normalize_queue_mode(token: &str) -> Option<MessageQueueMode> {
    let mode = match token.trim().to_ascii_lowercase().as_str() {
        "interrupt" | "interrupts" | "abort" => MessageQueueMode::Interrupt,
        "steer" | "steering" | "queue" | "queued" => MessageQueueMode::Steer,
        "followup" | "follow-up" | "follow_up" | "followups" | "follow-ups" => {
            MessageQueueMode::Followup
        },
        "collect" | "coalesce" | "batch" => MessageQueueMode::Collect,
        "steer-backlog" | "steer_backlog" | "steer+backlog" | "steerbacklog" => {
            MessageQueueMode::SteerBacklog
        },
        _ => return None,
    };
    Some(mode)
}

pub fn normalize_drop_policy(token: &str) -> Option<DropPolicy> {
    let policy = match token.trim().to_ascii_lowercase().as_str() {
        "old" | "oldest" => DropPolicy::Old,
        "new" | "newest" => DropPolicy::New,
        "summarize" | "summarise" | "summary" => DropPolicy::Summarize,
        _ => return None,
    };
    Some(policy)
}

/// Parse `500ms`, `2s`, `1.5m`, `1h`; a bare number is milliseconds.
pub fn parse_duration_ms(token: &str) -> Option<u64> {
    let caps = DURATION.captures(token.trim())?;
    let value: f64 = caps[1].parse().ok()?;
    let unit_ms = match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()).as_deref() {
        None | Some("ms") => 1.0,
        Some("s" | "sec" | "secs") => 1_000.0,
        Some("m" | "min" | "mins") => 60_000.0,
        Some(_) => 3_600_000.0,
    };
    let ms = (value * unit_ms).round();
    (ms.is_finite() && ms <= u64::MAX as f64).then_some(ms as u64)
}

fn parse_cap(token: &str) -> Option<usize> {
    token.trim().parse::<usize>().ok().filter(|cap| *cap >= 1)
}

fn strip_ranges(raw: &str, ranges: &[Range<usize>]) -> String {
    let mut kept = String::with_capacity(raw.len());
    let mut cursor = 0;
    for range in ranges {
        kept.push_str(&raw[cursor..range.start]);
        cursor = range.end;
    }
    kept.push_str(&raw[cursor..]);

    kept.lines()
        .map(|line| SPACES.replace_all(line, " ").trim().to_string())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("queued", MessageQueueMode::Steer)]
    #[case("Steering", MessageQueueMode::Steer)]
    #[case("interrupts", MessageQueueMode::Interrupt)]
    #[case("coalesce", MessageQueueMode::Collect)]
    #[case("follow-ups", MessageQueueMode::Followup)]
    #[case("steer+backlog", MessageQueueMode::SteerBacklog)]
    fn mode_synonyms(#[case] token: &str, #[case] expected: MessageQueueMode) {
        assert_eq!(normalize_queue_mode(token), Some(expected));
    }

    #[rstest]
    #[case("250", Some(250))]
    #[case("250ms", Some(250))]
    #[case("2s", Some(2_000))]
    #[case("1.5m", Some(90_000))]
    #[case("1h", Some(3_600_000))]
    #[case("soon", None)]
    #[case("-5s", None)]
    fn durations(#[case] token: &str, #[case] expected: Option<u64>) {
        assert_eq!(parse_duration_ms(token), expected);
    }

    #[test]
    fn plain_text_is_untouched() {
        let parsed = parse_directives("please  collect the\tlogs");
        assert!(!parsed.recognized);
        assert_eq!(parsed.cleaned, "please  collect the\tlogs");
        assert!(parsed.overrides.is_empty());
    }

    #[test]
    fn full_directive_with_text() {
        let parsed =
            parse_directives("/queue collect debounce:2s cap:10 drop:old  what's the weather?");
        assert!(parsed.recognized);
        assert!(!parsed.reset);
        assert_eq!(parsed.cleaned, "what's the weather?");
        assert_eq!(parsed.overrides.mode, Some(MessageQueueMode::Collect));
        assert_eq!(parsed.overrides.debounce_ms, Some(2_000));
        assert_eq!(parsed.overrides.cap, Some(10));
        assert_eq!(parsed.overrides.drop, Some(DropPolicy::Old));
        assert_eq!(parsed.overrides.max_wait_ms, None);
    }

    #[test]
    fn directive_only_message() {
        let parsed = parse_directives("  /queue interrupt  ");
        assert!(parsed.is_directive_only());
        assert_eq!(parsed.overrides.mode, Some(MessageQueueMode::Interrupt));
    }

    #[test]
    fn attached_argument_and_bot_suffix() {
        let parsed = parse_directives("/queue@parley_bot:coalesce hi");
        assert_eq!(parsed.overrides.mode, Some(MessageQueueMode::Collect));
        assert_eq!(parsed.cleaned, "hi");
    }

    #[test]
    fn reset_token() {
        let parsed = parse_directives("/queue inherit");
        assert!(parsed.reset);
        assert!(parsed.overrides.is_empty());
        assert!(parsed.is_directive_only());
    }

    #[test]
    fn unrecognized_argument_stops_consumption() {
        let parsed = parse_directives("/queue collect cap:0 drop:sideways now");
        assert_eq!(parsed.overrides.mode, Some(MessageQueueMode::Collect));
        assert_eq!(parsed.overrides.cap, None);
        assert_eq!(parsed.overrides.drop, None);
        assert_eq!(parsed.cleaned, "cap:0 drop:sideways now");
    }

    #[test]
    fn invalid_attached_argument_is_text() {
        let parsed = parse_directives("/queue:sometimes hello");
        assert!(!parsed.recognized);
        assert_eq!(parsed.cleaned, "/queue:sometimes hello");
    }

    #[test]
    fn directive_mid_message_keeps_lines() {
        let parsed = parse_directives("first line\nsecond /queue followup wait=5s line\nthird");
        assert_eq!(parsed.cleaned, "first line\nsecond line\nthird");
        assert_eq!(parsed.overrides.mode, Some(MessageQueueMode::Followup));
        assert_eq!(parsed.overrides.max_wait_ms, Some(5_000));
    }

    #[rstest]
    #[case("/queue followup clear the cache", MessageQueueMode::Followup, "clear the cache")]
    #[case("/queue collect abort the deploy", MessageQueueMode::Collect, "abort the deploy")]
    #[case("/queue:steer batch these", MessageQueueMode::Steer, "batch these")]
    #[case("/queue interrupt cap:3 default please", MessageQueueMode::Interrupt, "default please")]
    fn bare_words_after_first_argument_are_text(
        #[case] raw: &str,
        #[case] mode: MessageQueueMode,
        #[case] cleaned: &str,
    ) {
        let parsed = parse_directives(raw);
        assert!(!parsed.reset);
        assert_eq!(parsed.overrides.mode, Some(mode));
        assert_eq!(parsed.cleaned, cleaned);
    }

    #[test]
    fn later_values_win() {
        let parsed = parse_directives("/queue steer /queue mode=interrupt go");
        assert_eq!(parsed.overrides.mode, Some(MessageQueueMode::Interrupt));
        assert_eq!(parsed.cleaned, "go");
    }

    #[test]
    fn bare_marker_is_recognized() {
        let parsed = parse_directives("/queue");
        assert!(parsed.recognized);
        assert!(parsed.overrides.is_empty());
        assert!(!parsed.reset);
    }
}
