//! Line-oriented demo gateway: stdin lines in, agent replies out.
//!
//! Input format, one message per line:
//!
//! ```text
//! <session_key>\t<message text>
//! <message text>                  (default session)
//! !abort [session_key]
//! !cancel [session_key]
//! !sessions
//! ```

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    anyhow::Result,
    async_trait::async_trait,
    parley_auto_reply::{
        AgentExecutor, AgentReply, Error, Ingested, QueuedInput, RunCoordinator, RunEvents,
        RunObserver, RunOutcome, RunRef, RunRequest, RunSettled,
    },
    parley_common::types::{ChannelMeta, InboundMessage},
    parley_config::ParleyConfig,
    tokio::io::{AsyncBufReadExt, BufReader},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info},
};

/// Simulated streaming agent: echoes the prompt word by word, pausing
/// `word_delay` between words. Accepts live input while a run is streaming.
pub struct EchoAgent {
    word_delay: Duration,
    live: Mutex<HashMap<String, Vec<String>>>,
}

impl EchoAgent {
    pub fn new(word_delay: Duration) -> Self {
        Self {
            word_delay,
            live: Mutex::new(HashMap::new()),
        }
    }

    fn take_injected(&self, run_id: &str) -> Vec<String> {
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(run_id)
            .map(std::mem::take)
            .unwrap_or_default()
    }
}

#[async_trait]
impl AgentExecutor for EchoAgent {
    async fn start_run(
        &self,
        request: RunRequest,
        cancel: CancellationToken,
        events: RunEvents,
    ) -> parley_auto_reply::Result<AgentReply> {
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request.run_id.clone(), Vec::new());

        let mut words: Vec<String> = request
            .prompt
            .split_whitespace()
            .map(str::to_string)
            .collect();
        let mut reply = Vec::with_capacity(words.len());
        let mut i = 0;
        let result = loop {
            words.extend(self.take_injected(&request.run_id));
            let Some(word) = words.get(i) else {
                break Ok(AgentReply::new(format!("echo: {}", reply.join(" "))));
            };
            tokio::select! {
                _ = cancel.cancelled() => break Err(Error::Cancelled),
                _ = tokio::time::sleep(self.word_delay) => {},
            }
            events.partial(word);
            reply.push(word.clone());
            i += 1;
        };

        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&request.run_id);
        result
    }

    fn supports_live_injection(&self, run_id: &str) -> bool {
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(run_id)
    }

    async fn inject_live(&self, run_id: &str, input: &QueuedInput) -> bool {
        let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        match live.get_mut(run_id) {
            Some(pending) => {
                pending.extend(input.text().split_whitespace().map(str::to_string));
                true
            },
            None => false,
        }
    }
}

/// Prints run results to stdout.
pub struct ConsoleObserver;

#[async_trait]
impl RunObserver for ConsoleObserver {
    async fn on_run_started(&self, request: &RunRequest) {
        debug!(session_key = %request.session_key, run_id = %request.run_id, "agent run started");
    }

    async fn on_run_settled(&self, settled: &RunSettled) {
        match &settled.outcome {
            RunOutcome::Completed(reply) => println!("[{}] {}", settled.session_key, reply.text),
            RunOutcome::Failed { error } => println!("[{}] error: {error}", settled.session_key),
            RunOutcome::Cancelled => println!("[{}] (run cancelled)", settled.session_key),
        }
    }

    async fn on_dropped(&self, session_key: &str, dropped: &[QueuedInput]) {
        println!(
            "[{session_key}] dropped {} queued message(s)",
            dropped.iter().map(QueuedInput::message_count).sum::<usize>()
        );
    }
}

/// One parsed stdin line.
#[derive(Debug, PartialEq, Eq)]
enum Line<'a> {
    Message { session_key: &'a str, body: &'a str },
    Abort(&'a str),
    Cancel(&'a str),
    Sessions,
    Blank,
}

fn parse_line<'a>(line: &'a str, default_key: &'a str) -> Line<'a> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Line::Blank;
    }
    if let Some(rest) = line.strip_prefix('!') {
        let mut parts = rest.split_whitespace();
        let command = parts.next().unwrap_or_default();
        let key = parts.next().unwrap_or(default_key);
        match command {
            "abort" => return Line::Abort(key),
            "cancel" => return Line::Cancel(key),
            "sessions" => return Line::Sessions,
            _ => {},
        }
    }
    match line.split_once('\t') {
        Some((key, body)) if !key.trim().is_empty() => Line::Message {
            session_key: key.trim(),
            body,
        },
        _ => Line::Message {
            session_key: default_key,
            body: line,
        },
    }
}

/// Read stdin until EOF, feeding every message to the coordinator.
pub async fn run(config: ParleyConfig, word_delay: Duration) -> Result<()> {
    let agent = Arc::new(EchoAgent::new(word_delay));
    let coordinator = RunCoordinator::with_observer(agent, Arc::new(ConsoleObserver), &config.chat);

    let meta = ChannelMeta {
        channel: "cli".into(),
        account_id: "local".into(),
        chat_id: "stdin".into(),
        ..Default::default()
    };
    let default_key = meta.session_key(&config.agent.id);
    info!(
        session_key = %default_key,
        mode = %config.chat.queue.mode,
        "reading messages from stdin"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                let cleared = coordinator.clear_all_sessions();
                info!(cleared, "interrupted, sessions cleared");
                return Ok(());
            },
        };
        let Some(line) = line else {
            break;
        };

        match parse_line(&line, &default_key) {
            Line::Blank => {},
            Line::Abort(key) => {
                let aborted = coordinator.abort_run(RunRef::Session(key));
                println!("[{key}] abort: {}", if aborted { "requested" } else { "no active run" });
            },
            Line::Cancel(key) => {
                let cleared = coordinator.cancel_queued(key);
                println!("[{key}] cleared {cleared} queued message(s)");
            },
            Line::Sessions => {
                println!("{}", serde_json::to_string_pretty(&coordinator.sessions())?);
            },
            Line::Message { session_key, body } => {
                let msg = InboundMessage::new(session_key, body, meta.clone());
                match coordinator.ingest(msg).await {
                    Ingested::PolicyUpdated { policy } => {
                        println!("[{session_key}] queue policy: {}", serde_json::to_string(&policy)?);
                    },
                    Ingested::PolicyStatus { policy } => {
                        println!("[{session_key}] queue policy: {}", serde_json::to_string(&policy)?);
                    },
                    Ingested::Queued(enqueued) => {
                        debug!(session_key, action = enqueued.action.as_str(), queue_len = enqueued.queue_len, "message queued");
                    },
                    Ingested::Ignored => {},
                }
            },
        }
    }

    // EOF: let queued work finish before exiting.
    loop {
        let busy: Vec<String> = coordinator
            .sessions()
            .into_iter()
            .filter(|s| s.state.is_active() || s.queue_len > 0)
            .map(|s| s.key)
            .collect();
        if busy.is_empty() {
            break;
        }
        for key in &busy {
            let waited = coordinator.wait_for_end(key, None).await;
            if !waited.settled {
                info!(session_key = %key, "run still active after wait timeout, aborting");
                coordinator.abort_run(RunRef::Session(key));
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn parses_session_prefixed_lines() {
        assert_eq!(parse_line("s1\thello there", "d"), Line::Message {
            session_key: "s1",
            body: "hello there",
        });
        assert_eq!(parse_line("hello", "d"), Line::Message {
            session_key: "d",
            body: "hello",
        });
        assert_eq!(parse_line("   ", "d"), Line::Blank);
    }

    #[test]
    fn parses_control_commands() {
        assert_eq!(parse_line("!abort s2", "d"), Line::Abort("s2"));
        assert_eq!(parse_line("!cancel", "d"), Line::Cancel("d"));
        assert_eq!(parse_line("!sessions", "d"), Line::Sessions);
        // Unknown commands are plain text.
        assert_eq!(parse_line("!wave", "d"), Line::Message {
            session_key: "d",
            body: "!wave",
        });
    }

    #[tokio::test(start_paused = true)]
    async fn echo_agent_streams_and_accepts_injection() {
        let agent = EchoAgent::new(Duration::from_millis(10));
        let request = RunRequest {
            run_id: "r1".into(),
            session_key: "s1".into(),
            inputs: Vec::new(),
            prompt: "one two".into(),
        };
        let events = RunEvents::detached("r1", "s1");
        let cancel = CancellationToken::new();

        let run = agent.start_run(request, cancel, events.clone());
        let inject = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let input = QueuedInput::message(
                1,
                tokio::time::Instant::now(),
                "three".into(),
                ChannelMeta::default(),
            );
            agent.inject_live("r1", &input).await
        };
        let (reply, injected) = tokio::join!(run, inject);

        assert!(injected);
        assert_eq!(reply.unwrap().text, "echo: one two three");
        assert!(events.is_streaming());
        assert!(!agent.supports_live_injection("r1"));
    }

    #[tokio::test(start_paused = true)]
    async fn echo_agent_observes_cancellation() {
        let agent = EchoAgent::new(Duration::from_millis(100));
        let request = RunRequest {
            run_id: "r1".into(),
            session_key: "s1".into(),
            inputs: Vec::new(),
            prompt: "a b c".into(),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = agent
            .start_run(request, cancel, RunEvents::detached("r1", "s1"))
            .await;
        assert!(result.unwrap_err().is_cancelled());
    }
}
