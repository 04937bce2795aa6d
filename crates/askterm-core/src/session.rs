//! Conversation session: single-flight question dispatch and result merging.
//!
//! The session is the only owner of the transcript and the pending question.
//! Background engine tasks never touch either; they only feed the
//! invocation's channels, and [`ConversationSession::resolve`] folds what
//! arrives into the transcript on the caller's task.

use std::time::Duration;

use tokio::time::Instant;

use crate::engine::{Engine, EngineEvent, EngineExit, Invocation, OutputMode};
use crate::state::{ChatMessage, Transcript};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of [`ConversationSession::submit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Dispatched,
    /// A question is already in flight; nothing changed
    Busy,
    /// Empty or whitespace-only text; nothing changed
    Blank,
    /// The engine could not be started; the error is in the transcript
    LaunchFailed,
}

/// Result of one [`ConversationSession::resolve`] round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// A chunk was appended and the question is still pending
    Output,
    /// The invocation finished and was discarded
    Completed,
    /// No activity within the timeout; the invocation was cancelled
    TimedOut,
}

struct PendingQuestion {
    question: String,
    invocation: Invocation,
    deadline: Instant,
    produced_output: bool,
}

pub struct ConversationSession {
    engine: Box<dyn Engine>,
    transcript: Transcript,
    pending: Option<PendingQuestion>,
    timeout: Duration,
}

impl ConversationSession {
    pub fn new(engine: impl Engine + 'static) -> Self {
        Self {
            engine: Box::new(engine),
            transcript: Transcript::new(),
            pending: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn render_transcript(&self) -> String {
        self.transcript.render()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending_question(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.question.as_str())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn engine_name(&self) -> String {
        self.engine.name()
    }

    /// Record the question and hand it to the engine. Returns immediately.
    pub fn submit(&mut self, question: &str) -> Submission {
        if self.pending.is_some() {
            tracing::debug!("question rejected, another one is pending");
            return Submission::Busy;
        }

        if question.trim().is_empty() {
            return Submission::Blank;
        }

        self.transcript.push(ChatMessage::user(question));

        match self.engine.invoke(question) {
            Ok(invocation) => {
                tracing::info!(question, "question dispatched");
                self.pending = Some(PendingQuestion {
                    question: question.to_string(),
                    invocation,
                    deadline: Instant::now() + self.timeout,
                    produced_output: false,
                });
                Submission::Dispatched
            }
            Err(error) => {
                tracing::warn!(error = %error, "engine launch failed");
                self.transcript.push(ChatMessage::system(error.to_string()));
                Submission::LaunchFailed
            }
        }
    }

    /// Wait for whichever comes first: output, completion, or the inactivity
    /// timeout, and apply it to the transcript.
    ///
    /// Cancel-safe, so it can sit in a `select!` next to input handling.
    /// Never resolves while nothing is pending.
    pub async fn resolve(&mut self) -> Resolution {
        loop {
            let Some(pending) = self.pending.as_mut() else {
                return std::future::pending().await;
            };
            let mode = pending.invocation.mode();

            let event = tokio::select! {
                biased;
                event = pending.invocation.next_event() => Some(event),
                _ = tokio::time::sleep_until(pending.deadline) => None,
            };

            match event {
                Some(EngineEvent::Progress) => {
                    // Combined mode: still producing, just not shown yet
                    pending.deadline = Instant::now() + self.timeout;
                }
                Some(EngineEvent::Output(chunk)) => {
                    self.transcript.push(ChatMessage::system(chunk));
                    return match mode {
                        OutputMode::Stream => {
                            if let Some(pending) = self.pending.as_mut() {
                                pending.produced_output = true;
                                pending.deadline = Instant::now() + self.timeout;
                            }
                            Resolution::Output
                        }
                        OutputMode::Combined => {
                            self.pending = None;
                            Resolution::Completed
                        }
                    };
                }
                Some(EngineEvent::Exited(exit)) => {
                    self.complete(exit);
                    return Resolution::Completed;
                }
                None => {
                    if let Some(pending) = self.pending.take() {
                        tracing::info!(
                            question = %pending.question,
                            timeout_secs = self.timeout.as_secs(),
                            "engine timed out, cancelling"
                        );
                    }
                    return Resolution::TimedOut;
                }
            }
        }
    }

    /// Drop the in-flight invocation, killing its process. Returns whether
    /// anything was pending.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(pending) => {
                tracing::info!(question = %pending.question, "pending question cancelled");
                true
            }
            None => false,
        }
    }

    fn complete(&mut self, exit: EngineExit) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        tracing::debug!(code = ?exit.code, "question resolved");

        if !exit.success() && !pending.produced_output {
            let message = match exit.code {
                Some(code) => format!("engine exited with status {code}"),
                None => "engine terminated without an exit status".to_string(),
            };
            self.transcript.push(ChatMessage::system(message));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineError;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use tokio::sync::{mpsc, oneshot};

    struct Handle {
        output: mpsc::Sender<String>,
        done: oneshot::Sender<EngineExit>,
    }

    impl Handle {
        async fn emit(&self, line: &str) {
            self.output.send(line.to_string()).await.unwrap();
        }

        fn finish(self, code: i32) {
            drop(self.output);
            self.done.send(EngineExit { code: Some(code) }).unwrap();
        }
    }

    /// Engine whose output the test drives by hand
    #[derive(Clone)]
    struct ScriptedEngine {
        mode: OutputMode,
        handles: Arc<Mutex<Vec<Handle>>>,
        questions: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedEngine {
        fn new(mode: OutputMode) -> Self {
            Self {
                mode,
                handles: Arc::new(Mutex::new(Vec::new())),
                questions: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn take_handle(&self) -> Handle {
            self.handles.lock().unwrap().remove(0)
        }

        fn invocations(&self) -> usize {
            self.questions.lock().unwrap().len()
        }
    }

    impl Engine for ScriptedEngine {
        fn invoke(&self, question: &str) -> Result<Invocation, EngineError> {
            let (output_tx, output_rx) = mpsc::channel(16);
            let (done_tx, done_rx) = oneshot::channel();
            self.handles.lock().unwrap().push(Handle {
                output: output_tx,
                done: done_tx,
            });
            self.questions.lock().unwrap().push(question.to_string());
            Ok(Invocation::from_channels(output_rx, done_rx, self.mode))
        }
    }

    struct MissingEngine;

    impl Engine for MissingEngine {
        fn invoke(&self, _question: &str) -> Result<Invocation, EngineError> {
            Err(EngineError::Launch {
                path: PathBuf::from("./llm/missing.sh"),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory"),
            })
        }
    }

    #[tokio::test]
    async fn test_round_trip_hello_world() {
        let engine = ScriptedEngine::new(OutputMode::Stream);
        let mut session = ConversationSession::new(engine.clone());

        assert_eq!(session.submit("hello"), Submission::Dispatched);
        assert_eq!(session.transcript().lines(), vec!["User: hello"]);
        assert!(session.is_pending());
        assert_eq!(session.pending_question(), Some("hello"));

        let handle = engine.take_handle();
        handle.emit("world").await;
        handle.finish(0);

        assert_eq!(session.resolve().await, Resolution::Output);
        assert_eq!(session.resolve().await, Resolution::Completed);
        assert_eq!(session.transcript().lines(), vec!["User: hello", "System: world"]);
        assert!(!session.is_pending());
    }

    #[tokio::test]
    async fn test_submit_while_pending_is_rejected() {
        let engine = ScriptedEngine::new(OutputMode::Stream);
        let mut session = ConversationSession::new(engine.clone());

        assert_eq!(session.submit("first"), Submission::Dispatched);
        assert_eq!(session.submit("second"), Submission::Busy);

        assert_eq!(engine.invocations(), 1);
        assert_eq!(session.transcript().lines(), vec!["User: first"]);
        assert_eq!(session.pending_question(), Some("first"));
    }

    #[tokio::test]
    async fn test_chunks_appended_in_receipt_order() {
        let engine = ScriptedEngine::new(OutputMode::Stream);
        let mut session = ConversationSession::new(engine.clone());
        session.submit("count");

        let handle = engine.take_handle();
        for chunk in ["one", "two", "three"] {
            handle.emit(chunk).await;
        }
        handle.finish(0);

        while session.resolve().await != Resolution::Completed {}

        assert_eq!(
            session.transcript().lines(),
            vec!["User: count", "System: one", "System: two", "System: three"]
        );
        assert!(!session.is_pending());
    }

    #[tokio::test]
    async fn test_each_question_gets_one_user_line() {
        let engine = ScriptedEngine::new(OutputMode::Stream);
        let mut session = ConversationSession::new(engine.clone());

        for (question, answer) in [("a", "1"), ("b", "2")] {
            assert_eq!(session.submit(question), Submission::Dispatched);
            let handle = engine.take_handle();
            handle.emit(answer).await;
            handle.finish(0);
            while session.resolve().await != Resolution::Completed {}
        }

        assert_eq!(
            session.transcript().lines(),
            vec!["User: a", "System: 1", "User: b", "System: 2"]
        );
        assert_eq!(engine.invocations(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_before_output_leaves_transcript_alone() {
        let engine = ScriptedEngine::new(OutputMode::Stream);
        let mut session = ConversationSession::new(engine.clone());
        session.submit("slow");
        let before = session.transcript().lines();

        assert_eq!(session.resolve().await, Resolution::TimedOut);
        assert_eq!(session.transcript().lines(), before);
        assert!(!session.is_pending());

        // The invocation is gone, so a late answer has nowhere to go
        let handle = engine.take_handle();
        assert!(handle.output.try_send("late".to_string()).is_err());

        assert_eq!(session.submit("again"), Submission::Dispatched);
        assert_eq!(engine.invocations(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_rearms_timeout() {
        let engine = ScriptedEngine::new(OutputMode::Stream);
        let mut session = ConversationSession::new(engine.clone());
        session.submit("long answer");
        let handle = engine.take_handle();

        tokio::time::advance(Duration::from_secs(4)).await;
        handle.emit("part one").await;
        assert_eq!(session.resolve().await, Resolution::Output);

        tokio::time::advance(Duration::from_secs(4)).await;
        handle.emit("part two").await;
        assert_eq!(session.resolve().await, Resolution::Output);

        tokio::time::advance(Duration::from_secs(4)).await;
        handle.finish(0);
        assert_eq!(session.resolve().await, Resolution::Completed);

        assert_eq!(
            session.transcript().lines(),
            vec!["User: long answer", "System: part one", "System: part two"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_timeout_is_honoured() {
        let engine = ScriptedEngine::new(OutputMode::Stream);
        let mut session =
            ConversationSession::new(engine.clone()).with_timeout(Duration::from_secs(60));
        session.submit("patient");

        let waited = tokio::time::timeout(Duration::from_secs(30), session.resolve()).await;
        assert!(waited.is_err());
        assert!(session.is_pending());

        assert_eq!(session.resolve().await, Resolution::TimedOut);
    }

    #[tokio::test]
    async fn test_launch_failure_appends_one_system_line() {
        let mut session = ConversationSession::new(MissingEngine);

        assert_eq!(session.submit("hello"), Submission::LaunchFailed);
        let lines = session.transcript().lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "User: hello");
        assert!(lines[1].starts_with("System: failed to launch engine './llm/missing.sh'"));
        assert!(!session.is_pending());

        assert_eq!(session.submit("again"), Submission::LaunchFailed);
        assert_eq!(session.transcript().len(), 4);
    }

    #[tokio::test]
    async fn test_combined_output_resolves_in_one_step() {
        let engine = ScriptedEngine::new(OutputMode::Combined);
        let mut session = ConversationSession::new(engine.clone());
        session.submit("summary");

        let handle = engine.take_handle();
        handle.emit("line one\nline two").await;
        handle.finish(0);

        assert_eq!(session.resolve().await, Resolution::Completed);
        assert!(!session.is_pending());
        assert_eq!(
            session.transcript().lines(),
            vec!["User: summary", "System: line one\nline two"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_combined_output_rearms_timeout_while_buffering() {
        let engine = ScriptedEngine::new(OutputMode::Combined);
        let mut session = ConversationSession::new(engine.clone());
        session.submit("slow summary");
        let handle = engine.take_handle();

        tokio::time::advance(Duration::from_secs(4)).await;
        handle.emit("first half").await;

        // The buffered line pushes the deadline to t=9, past this guard
        let waited = tokio::time::timeout(Duration::from_secs(4), session.resolve()).await;
        assert!(waited.is_err());
        assert!(session.is_pending());
        assert_eq!(session.transcript().lines(), vec!["User: slow summary"]);

        handle.emit("second half").await;
        handle.finish(0);
        assert_eq!(session.resolve().await, Resolution::Completed);
        assert_eq!(
            session.transcript().lines(),
            vec!["User: slow summary", "System: first half\nsecond half"]
        );
    }

    #[tokio::test]
    async fn test_question_reaches_engine_untrimmed() {
        let engine = ScriptedEngine::new(OutputMode::Stream);
        let mut session = ConversationSession::new(engine.clone());

        assert_eq!(session.submit("  what  is up? "), Submission::Dispatched);
        assert_eq!(engine.questions.lock().unwrap().as_slice(), ["  what  is up? "]);
        assert_eq!(session.pending_question(), Some("  what  is up? "));
    }

    #[tokio::test]
    async fn test_failed_exit_without_output_is_reported() {
        let engine = ScriptedEngine::new(OutputMode::Stream);
        let mut session = ConversationSession::new(engine.clone());
        session.submit("broken");

        engine.take_handle().finish(2);

        assert_eq!(session.resolve().await, Resolution::Completed);
        assert_eq!(
            session.transcript().lines(),
            vec!["User: broken", "System: engine exited with status 2"]
        );
    }

    #[tokio::test]
    async fn test_failed_exit_after_output_keeps_partial_answer() {
        let engine = ScriptedEngine::new(OutputMode::Stream);
        let mut session = ConversationSession::new(engine.clone());
        session.submit("partial");

        let handle = engine.take_handle();
        handle.emit("half an answer").await;
        handle.finish(1);

        while session.resolve().await != Resolution::Completed {}
        assert_eq!(
            session.transcript().lines(),
            vec!["User: partial", "System: half an answer"]
        );
    }

    #[tokio::test]
    async fn test_blank_submission_is_ignored() {
        let engine = ScriptedEngine::new(OutputMode::Stream);
        let mut session = ConversationSession::new(engine.clone());

        assert_eq!(session.submit("   "), Submission::Blank);
        assert!(session.transcript().is_empty());
        assert_eq!(engine.invocations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_idles_without_pending_question() {
        let engine = ScriptedEngine::new(OutputMode::Stream);
        let mut session = ConversationSession::new(engine);

        let waited = tokio::time::timeout(Duration::from_secs(60), session.resolve()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_cancel_clears_pending() {
        let engine = ScriptedEngine::new(OutputMode::Stream);
        let mut session = ConversationSession::new(engine.clone());
        session.submit("never mind");

        assert!(session.cancel());
        assert!(!session.is_pending());
        assert!(!session.cancel());
        assert_eq!(session.transcript().lines(), vec!["User: never mind"]);
    }
}
