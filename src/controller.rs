use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use tokio::sync::mpsc;

use crate::audio::{AudioClip, AudioSink, MimePolicy};
use crate::config::{AiTrigger, Config};
use crate::gemini::ChatModel;
use crate::identity::{NicknameError, Session};
use crate::protocol::{ChatMessage, NewMessage};
use crate::store::MessageStore;

// ======================== Turn guard ========================

/// Allows one AI request in flight at a time.
#[derive(Clone, Default)]
pub struct TurnGuard {
    busy: Arc<AtomicBool>,
}

/// Proof that the holder owns the current AI turn; released on drop.
pub struct TurnPermit {
    busy: Arc<AtomicBool>,
}

impl TurnGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_begin(&self) -> Option<TurnPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TurnPermit {
                busy: self.busy.clone(),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for TurnPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

// ======================== AI responder ========================

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub message: ChatMessage,
    /// Whether the reply was also played as speech
    pub spoken: bool,
}

/// Reported back to the event loop when a spawned AI turn finishes.
#[derive(Debug)]
pub enum TurnEvent {
    Replied(TurnOutcome),
    Failed(String),
}

/// Runs one AI turn: history → reply → store → optional speech.
#[derive(Clone)]
pub struct AiResponder {
    store: Arc<dyn MessageStore>,
    model: Arc<dyn ChatModel>,
    sink: Arc<dyn AudioSink>,
    display_name: String,
    history_limit: usize,
    mime_policy: MimePolicy,
    speech: Arc<AtomicBool>,
}

impl AiResponder {
    pub fn new(
        config: &Config,
        store: Arc<dyn MessageStore>,
        model: Arc<dyn ChatModel>,
        sink: Arc<dyn AudioSink>,
    ) -> Self {
        Self {
            store,
            model,
            sink,
            display_name: config.ai.display_name.clone(),
            history_limit: config.ai.history_limit,
            mime_policy: config.audio.mime_policy,
            speech: Arc::new(AtomicBool::new(config.speech.enabled)),
        }
    }

    /// The permit is held until the reply has been posted and spoken.
    pub async fn respond(&self, _permit: TurnPermit) -> Result<TurnOutcome> {
        let history = self.store.recent(self.history_limit).await?;
        let text = self.model.reply(&history).await?;
        let message = self
            .store
            .add(NewMessage::ai(&self.display_name, &text)?)
            .await?;

        let spoken = if self.speech.load(Ordering::Relaxed) {
            match self.speak(&message).await {
                Ok(()) => true,
                Err(e) => {
                    // 文本回复已发出，语音失败不影响本轮
                    log::warn!("Speech for {} failed: {:#}", message.id, e);
                    false
                }
            }
        } else {
            false
        };

        Ok(TurnOutcome { message, spoken })
    }

    async fn speak(&self, message: &ChatMessage) -> Result<()> {
        let audio = self.model.synthesize(&message.text).await?;
        let wav = audio.to_wav(self.mime_policy)?;
        self.sink
            .play(&AudioClip {
                id: message.id.clone(),
                wav,
            })
            .await
    }
}

// ======================== Controller ========================

/// `prefix` (lowercase) at the start of `text`, followed by end of text,
/// whitespace or punctuation.
fn starts_with_mention(text: &str, prefix: &str) -> bool {
    let lowered = text.to_lowercase();
    match lowered.strip_prefix(prefix) {
        Some(rest) => rest
            .chars()
            .next()
            .is_none_or(|c| c.is_whitespace() || c.is_ascii_punctuation()),
        None => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiDispatch {
    NotTriggered,
    Started,
    /// Another AI turn is still running; the message was posted without one
    Busy,
}

#[derive(Debug, Clone)]
pub struct Submitted {
    pub message: ChatMessage,
    pub ai: AiDispatch,
}

pub struct ChatController {
    session: Session,
    store: Arc<dyn MessageStore>,
    responder: AiResponder,
    guard: TurnGuard,
    trigger: AiTrigger,
    mention_prefix: String,
    max_message_len: usize,
    turn_tx: mpsc::Sender<TurnEvent>,
}

impl ChatController {
    pub fn new(
        config: &Config,
        session: Session,
        store: Arc<dyn MessageStore>,
        responder: AiResponder,
        turn_tx: mpsc::Sender<TurnEvent>,
    ) -> Self {
        Self {
            session,
            store,
            responder,
            guard: TurnGuard::new(),
            trigger: config.ai.trigger,
            mention_prefix: config.ai.mention_prefix.trim().to_lowercase(),
            max_message_len: config.store.max_message_len,
            turn_tx,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn set_nickname(&mut self, raw: &str) -> Result<&str, NicknameError> {
        let nickname = self.session.set_nickname(raw)?;
        log::info!("Nickname set to {}", nickname);
        Ok(nickname)
    }

    pub fn set_speech(&self, enabled: bool) {
        self.responder.speech.store(enabled, Ordering::Relaxed);
        log::info!("Speech {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn speech_enabled(&self) -> bool {
        self.responder.speech.load(Ordering::Relaxed)
    }

    pub fn ai_busy(&self) -> bool {
        self.guard.is_busy()
    }

    fn addresses_ai(&self, text: &str) -> bool {
        match self.trigger {
            AiTrigger::Always => true,
            AiTrigger::Mention => starts_with_mention(text, &self.mention_prefix),
        }
    }

    /// Post a message as the current user and start an AI turn if it calls for one.
    pub async fn submit(&mut self, text: &str) -> Result<Submitted> {
        let new_message = NewMessage::user(&self.session, text, self.max_message_len)?;
        let message = self.store.add(new_message).await?;

        if !self.addresses_ai(&message.text) {
            return Ok(Submitted {
                message,
                ai: AiDispatch::NotTriggered,
            });
        }

        let Some(permit) = self.guard.try_begin() else {
            log::info!("AI turn still running, not dispatching for {}", message.id);
            return Ok(Submitted {
                message,
                ai: AiDispatch::Busy,
            });
        };

        let responder = self.responder.clone();
        let turn_tx = self.turn_tx.clone();
        tokio::spawn(async move {
            let event = match responder.respond(permit).await {
                Ok(outcome) => TurnEvent::Replied(outcome),
                Err(e) => {
                    log::error!("AI turn failed: {:#}", e);
                    TurnEvent::Failed(format!("{:#}", e))
                }
            };
            if let Err(e) = turn_tx.send(event).await {
                log::warn!("Failed to report AI turn: {}", e);
            }
        });

        Ok(Submitted {
            message,
            ai: AiDispatch::Started,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::InlineAudio;
    use crate::audio::wav::decode_wav;
    use crate::gemini::GeminiError;
    use crate::protocol::MessageError;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use base64::prelude::*;
    use std::sync::Mutex;
    use tokio::sync::Notify;
    use tokio::time::{Duration, timeout};

    struct FakeModel {
        reply: Result<String, ()>,
        audio: Option<InlineAudio>,
        gate: Option<Arc<Notify>>,
        seen_history: Mutex<Vec<usize>>,
    }

    impl FakeModel {
        fn replying(text: &str) -> Self {
            Self {
                reply: Ok(text.to_string()),
                audio: None,
                gate: None,
                seen_history: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for FakeModel {
        async fn reply(&self, history: &[ChatMessage]) -> Result<String, GeminiError> {
            self.seen_history.lock().unwrap().push(history.len());
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.reply.clone().map_err(|_| GeminiError::EmptyResponse)
        }

        async fn synthesize(&self, _text: &str) -> Result<InlineAudio, GeminiError> {
            self.audio.clone().ok_or(GeminiError::NoAudio)
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        clips: Mutex<Vec<AudioClip>>,
    }

    #[async_trait]
    impl AudioSink for RecordingSink {
        async fn play(&self, clip: &AudioClip) -> Result<()> {
            self.clips.lock().unwrap().push(clip.clone());
            Ok(())
        }
    }

    struct Harness {
        controller: ChatController,
        store: MemoryStore,
        sink: Arc<RecordingSink>,
        turns: mpsc::Receiver<TurnEvent>,
    }

    fn harness(config: Config, model: FakeModel) -> Harness {
        let store = MemoryStore::new(config.collection_path());
        let sink = Arc::new(RecordingSink::default());
        let responder = AiResponder::new(
            &config,
            Arc::new(store.clone()),
            Arc::new(model),
            sink.clone(),
        );
        let (tx, turns) = mpsc::channel(8);
        let mut controller =
            ChatController::new(&config, Session::new("u1"), Arc::new(store.clone()), responder, tx);
        controller.set_nickname("ada").unwrap();
        Harness {
            controller,
            store,
            sink,
            turns,
        }
    }

    async fn next_turn(turns: &mut mpsc::Receiver<TurnEvent>) -> TurnEvent {
        timeout(Duration::from_secs(2), turns.recv())
            .await
            .expect("turn did not finish")
            .expect("turn channel closed")
    }

    #[test]
    fn test_guard_allows_single_permit() {
        let guard = TurnGuard::new();
        let permit = guard.try_begin().unwrap();
        assert!(guard.is_busy());
        assert!(guard.try_begin().is_none());

        drop(permit);
        assert!(!guard.is_busy());
        assert!(guard.try_begin().is_some());
    }

    #[tokio::test]
    async fn test_submit_posts_and_ai_replies() {
        let mut h = harness(Config::default(), FakeModel::replying("Hello ada!"));

        let submitted = h.controller.submit("hi there").await.unwrap();
        assert_eq!(submitted.ai, AiDispatch::Started);
        assert_eq!(submitted.message.nickname, "ada");

        match next_turn(&mut h.turns).await {
            TurnEvent::Replied(outcome) => {
                assert_eq!(outcome.message.text, "Hello ada!");
                assert!(outcome.message.is_ai);
                assert!(!outcome.spoken);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let texts: Vec<String> = h
            .store
            .recent(10)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, vec!["hi there", "Hello ada!"]);
        assert!(!h.controller.ai_busy());
    }

    #[tokio::test]
    async fn test_submit_without_nickname_is_rejected() {
        let config = Config::default();
        let store = MemoryStore::new("test");
        let responder = AiResponder::new(
            &config,
            Arc::new(store.clone()),
            Arc::new(FakeModel::replying("x")),
            Arc::new(RecordingSink::default()),
        );
        let (tx, _rx) = mpsc::channel(1);
        let mut controller =
            ChatController::new(&config, Session::new("u1"), Arc::new(store.clone()), responder, tx);

        let err = controller.submit("hello").await.unwrap_err();
        assert_eq!(err.downcast_ref::<MessageError>(), Some(&MessageError::NoNickname));
        assert!(store.recent(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_message_while_busy_is_posted_without_ai() {
        let gate = Arc::new(Notify::new());
        let model = FakeModel {
            gate: Some(gate.clone()),
            ..FakeModel::replying("done")
        };
        let mut h = harness(Config::default(), model);

        assert_eq!(h.controller.submit("first").await.unwrap().ai, AiDispatch::Started);
        assert_eq!(h.controller.submit("second").await.unwrap().ai, AiDispatch::Busy);
        assert!(h.controller.ai_busy());

        gate.notify_one();
        assert!(matches!(next_turn(&mut h.turns).await, TurnEvent::Replied(_)));

        assert!(!h.controller.ai_busy());
        assert_eq!(h.store.recent(10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_mention_trigger() {
        let mut config = Config::default();
        config.ai.trigger = AiTrigger::Mention;
        config.ai.mention_prefix = "@AI".to_string();
        let mut h = harness(config, FakeModel::replying("yes?"));

        assert_eq!(
            h.controller.submit("just chatting").await.unwrap().ai,
            AiDispatch::NotTriggered
        );
        assert_eq!(
            h.controller.submit("@ai what time is it").await.unwrap().ai,
            AiDispatch::Started
        );
        assert!(matches!(next_turn(&mut h.turns).await, TurnEvent::Replied(_)));
    }

    #[test]
    fn test_mention_needs_word_boundary() {
        assert!(starts_with_mention("@ai", "@ai"));
        assert!(starts_with_mention("@AI what's up", "@ai"));
        assert!(starts_with_mention("@ai, hello", "@ai"));
        assert!(!starts_with_mention("@aisle is clear", "@ai"));
        assert!(!starts_with_mention("hey @ai", "@ai"));
    }

    #[tokio::test]
    async fn test_mention_prefix_inside_word_does_not_trigger() {
        let mut config = Config::default();
        config.ai.trigger = AiTrigger::Mention;
        let mut h = harness(config, FakeModel::replying("hm?"));

        assert_eq!(
            h.controller.submit("@aisle three is clear").await.unwrap().ai,
            AiDispatch::NotTriggered
        );
        assert!(!h.controller.ai_busy());
    }

    #[tokio::test]
    async fn test_model_failure_is_reported_and_releases_guard() {
        let model = FakeModel {
            reply: Err(()),
            ..FakeModel::replying("")
        };
        let mut h = harness(Config::default(), model);

        h.controller.submit("hello?").await.unwrap();
        match next_turn(&mut h.turns).await {
            TurnEvent::Failed(reason) => assert!(reason.contains("no text")),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(!h.controller.ai_busy());
        assert_eq!(h.store.recent(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_history_limit_bounds_context() {
        let mut config = Config::default();
        config.ai.history_limit = 2;
        config.ai.trigger = AiTrigger::Mention;
        let model = Arc::new(FakeModel::replying("ok"));

        let store = MemoryStore::new("test");
        let responder = AiResponder::new(
            &config,
            Arc::new(store.clone()),
            model.clone(),
            Arc::new(RecordingSink::default()),
        );
        let (tx, mut turns) = mpsc::channel(1);
        let mut controller =
            ChatController::new(&config, Session::new("u1"), Arc::new(store), responder, tx);
        controller.set_nickname("ada").unwrap();

        for text in ["a", "b", "c"] {
            controller.submit(text).await.unwrap();
        }
        controller.submit("@ai summarize").await.unwrap();
        next_turn(&mut turns).await;

        assert_eq!(*model.seen_history.lock().unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn test_speech_converted_to_wav_and_played() {
        let raw: Vec<u8> = [100i16, -100, 7].iter().flat_map(|s| s.to_le_bytes()).collect();
        let model = FakeModel {
            audio: Some(InlineAudio {
                mime_type: "audio/L16;codec=pcm;rate=24000".to_string(),
                data: BASE64_STANDARD.encode(raw),
            }),
            ..FakeModel::replying("Listen to this")
        };
        let mut h = harness(Config::default(), model);
        h.controller.set_speech(true);

        h.controller.submit("say something").await.unwrap();
        let outcome = match next_turn(&mut h.turns).await {
            TurnEvent::Replied(outcome) => outcome,
            other => panic!("unexpected event: {:?}", other),
        };
        assert!(outcome.spoken);

        let clips = h.sink.clips.lock().unwrap();
        assert_eq!(clips.len(), 1);
        assert_eq!(clips[0].id, outcome.message.id);
        let decoded = decode_wav(&clips[0].wav).unwrap();
        assert_eq!(decoded.sample_rate, 24000);
        assert_eq!(decoded.samples, vec![100, -100, 7]);
    }

    #[tokio::test]
    async fn test_speech_failure_keeps_text_reply() {
        let mut h = harness(Config::default(), FakeModel::replying("text only"));
        h.controller.set_speech(true);

        h.controller.submit("talk to me").await.unwrap();
        match next_turn(&mut h.turns).await {
            TurnEvent::Replied(outcome) => {
                assert!(!outcome.spoken);
                assert_eq!(outcome.message.text, "text only");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(h.sink.clips.lock().unwrap().is_empty());
    }
}
