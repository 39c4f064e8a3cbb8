//! Typing-presence signaling for the active conversation.
//!
//! Outbound, every keystroke sends `typing` and re-arms a timer that sends
//! `stop_typing` once input goes quiet. Inbound, [`inbound_indicator`]
//! decides whether a remote signal should change the indicator.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use agora_net::EnvelopeSink;
use agora_shared::constants::TYPING_TIMEOUT;
use agora_shared::protocol::TypingSignal;
use agora_shared::{ChatId, OutboundEnvelope, UserId};

/// Id of the composition input of the chat view.
pub const MESSAGE_INPUT_ID: &str = "messageInput";

/// Addressing of outbound typing signals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingTarget {
    pub chat_id: ChatId,
    pub receiver_id: UserId,
    pub sender_id: UserId,
}

impl TypingTarget {
    fn signal(&self) -> TypingSignal {
        TypingSignal {
            chat_id: self.chat_id,
            receiver_id: Some(self.receiver_id.clone()),
            sender_id: self.sender_id.clone(),
            sender_name: None,
        }
    }

    pub fn typing(&self) -> OutboundEnvelope {
        OutboundEnvelope::Typing(self.signal())
    }

    pub fn stop_typing(&self) -> OutboundEnvelope {
        OutboundEnvelope::StopTyping(self.signal())
    }
}

pub struct TypingSignaler {
    sink: Arc<dyn EnvelopeSink>,
    attached_input: Option<String>,
    timer: Option<JoinHandle<()>>,
    timeout: Duration,
}

impl TypingSignaler {
    pub fn new(sink: Arc<dyn EnvelopeSink>) -> Self {
        Self::with_timeout(sink, TYPING_TIMEOUT)
    }

    pub fn with_timeout(sink: Arc<dyn EnvelopeSink>, timeout: Duration) -> Self {
        Self {
            sink,
            attached_input: None,
            timer: None,
            timeout,
        }
    }

    /// Bind to a composition input. Returns `false` if already bound to it.
    pub fn attach(&mut self, input_id: &str) -> bool {
        if self.attached_input.as_deref() == Some(input_id) {
            debug!(input_id, "typing signaler already attached");
            return false;
        }
        self.attached_input = Some(input_id.to_string());
        true
    }

    /// A keystroke in the bound input.
    ///
    /// The timer keeps the addressing captured here, so a conversation switch
    /// before it fires still sends `stop_typing` to the previous chat.
    pub fn on_input(&mut self, target: Option<&TypingTarget>) {
        if self.attached_input.is_none() {
            debug!("input ignored: typing signaler not attached");
            return;
        }
        let Some(target) = target else {
            debug!("input ignored: no active conversation");
            return;
        };
        if !self.sink.is_open() {
            debug!("input ignored: push channel not open");
            return;
        }

        self.sink.send(&target.typing());
        self.cancel_timer();

        let sink = self.sink.clone();
        let stop = target.stop_typing();
        let timeout = self.timeout;
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            debug!("typing timed out");
            sink.send(&stop);
        }));
    }

    /// The bound input lost focus.
    pub fn on_blur(&mut self, target: Option<&TypingTarget>) {
        self.cancel_timer();
        if let Some(target) = target {
            if self.sink.is_open() {
                self.sink.send(&target.stop_typing());
            }
        }
    }

    /// Send `stop_typing` now, ahead of an outgoing message.
    pub fn stop(&mut self, target: &TypingTarget) {
        self.cancel_timer();
        self.sink.send(&target.stop_typing());
    }

    pub fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    /// Drop the binding and any pending timer.
    pub fn reset(&mut self) {
        self.cancel_timer();
        self.attached_input = None;
    }
}

impl Drop for TypingSignaler {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}

/// What a remote typing signal does to the indicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypingIndicator {
    Show(String),
    Hide,
}

/// Filter a remote `typing` (`started == true`) or `stop_typing` signal.
/// Signals for another chat, with no active chat, or echoing the local user
/// are ignored.
pub fn inbound_indicator(
    signal: &TypingSignal,
    started: bool,
    active_chat: Option<ChatId>,
    local_user: Option<&UserId>,
) -> Option<TypingIndicator> {
    if active_chat != Some(signal.chat_id) {
        return None;
    }
    if local_user == Some(&signal.sender_id) {
        return None;
    }

    if started {
        let name = signal
            .sender_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| "Someone".to_string());
        Some(TypingIndicator::Show(name))
    } else {
        Some(TypingIndicator::Hide)
    }
}
