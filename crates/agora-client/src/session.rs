//! The chat session: all mutable state of a logged-in user's chat view.
//!
//! [`ChatSession`] owns the active [`Conversation`], its pagination guard and
//! scroll throttle, the unread highlights, the cached roster and the typing
//! signaler. It consumes push events and UI signals, drives the pull API and
//! publishes [`SessionEvent`]s for whatever renders the view.
//!
//! Every load captures the session generation when it starts. Opening a
//! conversation or tearing the session down bumps the generation, so the
//! result of a load that outlives its conversation is discarded.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use agora_net::{ChatApi, ConnectionEvent, EnvelopeSink, NetError};
use agora_shared::constants::{MAX_PAGE_SIZE, MESSAGES_PER_LOAD, SCROLL_THROTTLE_WAIT};
use agora_shared::protocol::{OutgoingMessage, TypingSignal};
use agora_shared::{ChatId, InboundEnvelope, Message, OutboundEnvelope, RosterUser, UserId};

use crate::error::{ClientError, Result};
use crate::events::{emit_event, RosterEntry, ScrollIntent, SessionEvent};
use crate::guard::{PaginationGuard, SkipReason};
use crate::ranker::ConversationRanker;
use crate::store::{Conversation, Peer};
use crate::throttle::{Throttle, ThrottleDecision};
use crate::typing::{inbound_indicator, TypingIndicator, TypingSignaler, TypingTarget, MESSAGE_INPUT_ID};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub page_size: usize,
    pub scroll_throttle: Duration,
}

impl SessionConfig {
    /// Page size the server will actually honour. A page shorter than this
    /// means the history is exhausted.
    pub fn page_limit(&self) -> usize {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            page_size: MESSAGES_PER_LOAD,
            scroll_throttle: SCROLL_THROTTLE_WAIT,
        }
    }
}

/// Result of a history load that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The page was applied; `count` messages were new.
    Loaded { count: usize },
    /// Nothing to do or another load holds the slot.
    Skipped,
    /// The conversation changed while the page was in flight.
    Stale,
}

struct ActiveConversation {
    conversation: Conversation,
    guard: PaginationGuard,
    throttle: Throttle,
    scroll_pending: Option<JoinHandle<()>>,
}

impl ActiveConversation {
    fn new(conversation: Conversation, throttle_wait: Duration) -> Self {
        Self {
            conversation,
            guard: PaginationGuard::new(),
            throttle: Throttle::new(throttle_wait),
            scroll_pending: None,
        }
    }

    fn cancel_scroll(&mut self) {
        if let Some(task) = self.scroll_pending.take() {
            task.abort();
        }
    }
}

impl Drop for ActiveConversation {
    fn drop(&mut self) {
        self.cancel_scroll();
    }
}

#[derive(Default)]
struct SessionState {
    generation: u64,
    local_user: Option<RosterUser>,
    view_mounted: bool,
    pending_target: Option<Peer>,
    active: Option<ActiveConversation>,
    highlighted: BTreeSet<UserId>,
    roster: Vec<RosterUser>,
    typing_visible: bool,
}

impl SessionState {
    fn active_chat(&self) -> Option<ChatId> {
        self.active.as_ref().map(|a| a.conversation.chat_id())
    }

    fn typing_target(&self) -> Option<TypingTarget> {
        let active = self.active.as_ref()?;
        let local = self.local_user.as_ref()?;
        Some(TypingTarget {
            chat_id: active.conversation.chat_id(),
            receiver_id: active.conversation.peer().id.clone(),
            sender_id: local.id.clone(),
        })
    }
}

struct Inner {
    config: SessionConfig,
    api: Arc<dyn ChatApi>,
    sink: Arc<dyn EnvelopeSink>,
    state: Mutex<SessionState>,
    ranker: Mutex<ConversationRanker>,
    typing: Mutex<TypingSignaler>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<Inner>,
}

impl ChatSession {
    /// Create a session with no user, no mounted view and no conversation.
    ///
    /// Returns the session and the receiver of its render events.
    pub fn new(
        config: SessionConfig,
        api: Arc<dyn ChatApi>,
        sink: Arc<dyn EnvelopeSink>,
        ranker: ConversationRanker,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let typing = TypingSignaler::new(sink.clone());
        let inner = Inner {
            config,
            api,
            sink,
            state: Mutex::new(SessionState::default()),
            ranker: Mutex::new(ranker),
            typing: Mutex::new(typing),
            events,
        };
        (Self { inner: Arc::new(inner) }, events_rx)
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ranker(&self) -> MutexGuard<'_, ConversationRanker> {
        self.inner.ranker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn typing(&self) -> MutexGuard<'_, TypingSignaler> {
        self.inner.typing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SessionEvent) {
        emit_event(&self.inner.events, event);
    }

    // -- accessors --

    pub fn local_user(&self) -> Option<RosterUser> {
        self.state().local_user.clone()
    }

    pub fn active_peer(&self) -> Option<Peer> {
        self.state()
            .active
            .as_ref()
            .map(|a| a.conversation.peer().clone())
    }

    pub fn active_chat(&self) -> Option<ChatId> {
        self.state().active_chat()
    }

    /// Run `f` against the active conversation.
    pub fn with_conversation<R>(&self, f: impl FnOnce(&Conversation) -> R) -> Option<R> {
        self.state().active.as_ref().map(|a| f(&a.conversation))
    }

    pub fn highlighted(&self) -> Vec<UserId> {
        self.state().highlighted.iter().cloned().collect()
    }

    pub fn pending_target(&self) -> Option<Peer> {
        self.state().pending_target.clone()
    }

    pub fn generation(&self) -> u64 {
        self.state().generation
    }

    // -- lifecycle --

    /// Fetch the authenticated user, then the roster.
    pub async fn initialize(&self) -> Result<RosterUser> {
        let user = match self.inner.api.current_user().await {
            Ok(user) => user,
            Err(NetError::Rejected(reason)) => {
                warn!(%reason, "current user unavailable");
                return Err(ClientError::NotAuthenticated);
            }
            Err(NetError::Status(401)) => return Err(ClientError::NotAuthenticated),
            Err(e) => return Err(e.into()),
        };
        info!(user = %user.id, "session user resolved");
        self.set_local_user(user.clone());

        if let Err(e) = self.refresh_roster().await {
            debug!(error = %e, "initial roster unavailable");
        }
        Ok(user)
    }

    pub fn set_local_user(&self, user: RosterUser) {
        self.state().local_user = Some(user);
    }

    /// Clear every field. Loads still in flight are discarded on completion.
    pub fn teardown(&self) {
        {
            let mut state = self.state();
            let generation = state.generation + 1;
            *state = SessionState {
                generation,
                ..Default::default()
            };
        }
        self.typing().reset();
        self.emit(SessionEvent::SessionCleared);
        info!("chat session cleared");
    }

    // -- conversations --

    /// A user picked `peer` from the roster. Opens the conversation if the
    /// chat view is mounted, otherwise remembers it and asks for navigation.
    pub async fn request_chat(&self, peer: Peer) -> Result<LoadOutcome> {
        let cleared = {
            let mut state = self.state();
            let cleared = state.highlighted.remove(&peer.id);
            if !state.view_mounted {
                debug!(peer = %peer.id, "chat view not mounted, deferring");
                state.pending_target = Some(peer.clone());
                drop(state);
                if cleared {
                    self.emit_roster();
                }
                self.emit(SessionEvent::NavigateToChat { peer });
                return Ok(LoadOutcome::Skipped);
            }
            cleared
        };
        if cleared {
            self.emit_roster();
        }
        self.open_conversation(peer).await
    }

    /// The chat view is attached. Resumes a deferred [`request_chat`].
    ///
    /// [`request_chat`]: ChatSession::request_chat
    pub async fn view_mounted(&self) -> Result<LoadOutcome> {
        let pending = {
            let mut state = self.state();
            state.view_mounted = true;
            state.pending_target.take()
        };
        match pending {
            Some(peer) => {
                info!(peer = %peer.id, "opening pending chat");
                self.open_conversation(peer).await
            }
            None => Ok(LoadOutcome::Skipped),
        }
    }

    /// Make `peer` the active conversation and load its newest page.
    pub async fn open_conversation(&self, peer: Peer) -> Result<LoadOutcome> {
        let (generation, cleared) = {
            let mut state = self.state();
            if !state.view_mounted {
                debug!(peer = %peer.id, "open ignored: chat view not mounted");
                return Ok(LoadOutcome::Skipped);
            }
            state.generation += 1;
            state.active = None;
            if state.typing_visible {
                state.typing_visible = false;
                self.emit(SessionEvent::TypingHidden);
            }
            (state.generation, state.highlighted.remove(&peer.id))
        };
        if cleared {
            self.emit_roster();
        }
        info!(peer = %peer.id, generation, "opening conversation");

        let chat_id = match self.inner.api.lookup_chat(&peer.id).await {
            Ok(chat_id) => chat_id,
            Err(e) => {
                warn!(peer = %peer.id, error = %e, "conversation lookup failed");
                return Err(e.into());
            }
        };

        {
            let mut state = self.state();
            if state.generation != generation {
                debug!(peer = %peer.id, "conversation superseded before lookup completed");
                return Ok(LoadOutcome::Stale);
            }
            let conversation = Conversation::new(peer.clone(), chat_id);
            state.active = Some(ActiveConversation::new(
                conversation,
                self.inner.config.scroll_throttle,
            ));
        }
        self.emit(SessionEvent::ConversationOpened { peer, chat_id });

        // The initial page counts as a paginated fetch, so the user cannot
        // page back until the cooldown has passed.
        self.guard_started(generation);
        let result = self.load_initial().await;
        self.guard_finished(generation, result.is_ok());

        self.typing().attach(MESSAGE_INPUT_ID);
        result
    }

    fn guard_started(&self, generation: u64) {
        let mut state = self.state();
        if state.generation != generation {
            return;
        }
        if let Some(active) = state.active.as_mut() {
            active.guard.start(Instant::now());
        }
    }

    fn guard_finished(&self, generation: u64, success: bool) {
        let mut state = self.state();
        if state.generation != generation {
            return;
        }
        if let Some(active) = state.active.as_mut() {
            active.guard.finish(Instant::now(), success);
        }
    }

    /// Replace the active conversation's messages with its newest page.
    pub async fn load_initial(&self) -> Result<LoadOutcome> {
        let (generation, peer_id, chat_id) = {
            let mut state = self.state();
            let generation = state.generation;
            let Some(active) = state.active.as_mut() else {
                debug!("initial load ignored: no active conversation");
                return Ok(LoadOutcome::Skipped);
            };
            if !active.conversation.begin_load() {
                debug!("initial load ignored: already loading");
                return Ok(LoadOutcome::Skipped);
            }
            (
                generation,
                active.conversation.peer().id.clone(),
                active.conversation.chat_id(),
            )
        };

        let page_size = self.inner.config.page_limit();
        let result = self.inner.api.history(&peer_id, page_size, None).await;

        let mut state = self.state();
        if state.generation != generation {
            debug!(peer = %peer_id, "discarding initial page for a replaced conversation");
            return Ok(LoadOutcome::Stale);
        }
        let Some(active) = state.active.as_mut() else {
            return Ok(LoadOutcome::Stale);
        };
        let conversation = &mut active.conversation;
        conversation.end_load();

        match result {
            Ok(page) => {
                conversation.apply_initial(page, page_size);
                let count = conversation.len();
                debug!(
                    peer = %peer_id,
                    count,
                    exhausted = conversation.is_exhausted(),
                    "initial page applied"
                );
                self.emit(SessionEvent::MessagesRendered {
                    chat_id,
                    messages: conversation.snapshot(),
                    scroll: ScrollIntent::Bottom,
                });
                Ok(LoadOutcome::Loaded { count })
            }
            Err(e) => {
                warn!(peer = %peer_id, error = %e, "initial history load failed");
                self.emit(SessionEvent::HistoryError {
                    chat_id,
                    initial: true,
                    error: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    /// Fetch the page before the earliest loaded message and merge it.
    pub async fn load_older(&self) -> Result<LoadOutcome> {
        let (generation, peer_id, chat_id, before) = {
            let mut state = self.state();
            let generation = state.generation;
            let Some(active) = state.active.as_mut() else {
                debug!("older load ignored: no active conversation");
                return Ok(LoadOutcome::Skipped);
            };
            let conversation = &mut active.conversation;
            if conversation.is_exhausted() {
                debug!("older load ignored: history exhausted");
                return Ok(LoadOutcome::Skipped);
            }
            let Some(before) = conversation.earliest_loaded_id() else {
                debug!("older load ignored: nothing loaded yet");
                return Ok(LoadOutcome::Skipped);
            };
            if !conversation.begin_load() {
                debug!("older load ignored: already loading");
                return Ok(LoadOutcome::Skipped);
            }
            (
                generation,
                conversation.peer().id.clone(),
                conversation.chat_id(),
                before,
            )
        };
        self.emit(SessionEvent::LoadingOlder { chat_id });

        let page_size = self.inner.config.page_limit();
        let result = self
            .inner
            .api
            .history(&peer_id, page_size, Some(before))
            .await;

        let mut state = self.state();
        if state.generation != generation {
            debug!(peer = %peer_id, "discarding older page for a replaced conversation");
            return Ok(LoadOutcome::Stale);
        }
        let Some(active) = state.active.as_mut() else {
            return Ok(LoadOutcome::Stale);
        };
        let conversation = &mut active.conversation;
        conversation.end_load();

        match result {
            Ok(page) => {
                let returned = page.len();
                let added = conversation.apply_older(page, page_size);
                debug!(
                    peer = %peer_id,
                    %before,
                    returned,
                    added,
                    exhausted = conversation.is_exhausted(),
                    "older page applied"
                );
                if added > 0 {
                    self.emit(SessionEvent::MessagesRendered {
                        chat_id,
                        messages: conversation.snapshot(),
                        scroll: ScrollIntent::PreserveFromTop { prepended: added },
                    });
                }
                Ok(LoadOutcome::Loaded { count: added })
            }
            Err(e) => {
                warn!(peer = %peer_id, %before, error = %e, "older history load failed");
                self.emit(SessionEvent::HistoryError {
                    chat_id,
                    initial: false,
                    error: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    // -- scroll pagination --

    /// Raw scroll event from the message pane. Throttled; the check itself
    /// runs on a spawned task.
    pub fn on_scroll(&self, scroll_top: u32) {
        let mut state = self.state();
        let generation = state.generation;
        let Some(active) = state.active.as_mut() else {
            return;
        };

        active.cancel_scroll();
        match active.throttle.decide(Instant::now()) {
            ThrottleDecision::RunNow => {
                let session = self.clone();
                tokio::spawn(async move {
                    session.run_scroll_check(scroll_top).await;
                });
            }
            ThrottleDecision::Defer(delay) => {
                let session = self.clone();
                active.scroll_pending = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    {
                        let mut state = session.state();
                        if state.generation != generation {
                            return;
                        }
                        let Some(active) = state.active.as_mut() else {
                            return;
                        };
                        // Detach before fetching so a later scroll cannot
                        // abort a request midway.
                        active.scroll_pending = None;
                        active.throttle.mark_run(Instant::now());
                    }
                    session.run_scroll_check(scroll_top).await;
                }));
            }
        }
    }

    async fn run_scroll_check(&self, scroll_top: u32) {
        if let Err(e) = self.check_scroll(scroll_top).await {
            debug!(error = %e, "scroll-triggered load failed");
        }
    }

    /// Start an older-page fetch if the pagination guard admits it.
    /// Returns whether a fetch was issued.
    pub async fn check_scroll(&self, scroll_top: u32) -> Result<bool> {
        let generation = {
            let mut state = self.state();
            let generation = state.generation;
            let Some(active) = state.active.as_mut() else {
                return Ok(false);
            };
            let now = Instant::now();
            let reasons = active.guard.check(now, scroll_top, &active.conversation);
            if !reasons.is_empty() {
                if !reasons.contains(&SkipReason::NotAtTop) {
                    debug!(?reasons, "not loading older messages");
                }
                return Ok(false);
            }
            active.guard.start(now);
            generation
        };

        let result = self.load_older().await;
        self.guard_finished(generation, result.is_ok());
        Ok(matches!(result?, LoadOutcome::Loaded { .. }))
    }

    // -- push channel --

    pub async fn handle_connection_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::StateChanged(state) => {
                self.emit(SessionEvent::ConnectionChanged { state });
            }
            ConnectionEvent::Envelope(envelope) => self.handle_envelope(envelope).await,
        }
    }

    pub async fn handle_envelope(&self, envelope: InboundEnvelope) {
        match envelope {
            InboundEnvelope::Message(message) => {
                self.ranker()
                    .record_activity(&message.sender_id, Some(&message.time));
                self.apply_incoming(message);
                if let Err(e) = self.refresh_roster().await {
                    debug!(error = %e, "roster refresh after message failed");
                }
            }
            InboundEnvelope::Typing(signal) => self.apply_typing(&signal, true),
            InboundEnvelope::StopTyping(signal) => self.apply_typing(&signal, false),
            InboundEnvelope::PresenceUpdate(_) => {
                if let Err(e) = self.refresh_roster().await {
                    debug!(error = %e, "roster refresh after presence update failed");
                }
            }
        }
    }

    fn apply_incoming(&self, message: Message) {
        let mut state = self.state();

        if state.active_chat() != Some(message.chat_id) {
            let from_self = state
                .local_user
                .as_ref()
                .is_some_and(|u| u.id == message.sender_id);
            if !from_self && state.highlighted.insert(message.sender_id.clone()) {
                debug!(sender = %message.sender_id, chat = %message.chat_id, "unread message");
                self.emit(SessionEvent::Highlighted {
                    user: message.sender_id,
                });
            }
            return;
        }

        if state.typing_visible {
            state.typing_visible = false;
            self.emit(SessionEvent::TypingHidden);
        }

        let Some(active) = state.active.as_mut() else {
            return;
        };
        let id = message.id;
        let chat_id = message.chat_id;
        if !active.conversation.append_incoming(message) {
            debug!(%id, "duplicate message suppressed");
            return;
        }
        self.emit(SessionEvent::MessagesRendered {
            chat_id,
            messages: active.conversation.snapshot(),
            scroll: ScrollIntent::Bottom,
        });
    }

    fn apply_typing(&self, signal: &TypingSignal, started: bool) {
        let mut state = self.state();
        let indicator = inbound_indicator(
            signal,
            started,
            state.active_chat(),
            state.local_user.as_ref().map(|u| &u.id),
        );

        match indicator {
            Some(TypingIndicator::Show(name)) => {
                state.typing_visible = true;
                self.emit(SessionEvent::TypingShown { name });
            }
            Some(TypingIndicator::Hide) if state.typing_visible => {
                state.typing_visible = false;
                self.emit(SessionEvent::TypingHidden);
            }
            _ => {}
        }
    }

    // -- roster --

    /// Fetch the online users and publish them in activity order.
    pub async fn refresh_roster(&self) -> Result<Vec<RosterEntry>> {
        match self.inner.api.online_users().await {
            Ok(users) => {
                self.state().roster = users;
                Ok(self.emit_roster())
            }
            Err(e) => {
                warn!(error = %e, "failed to load roster");
                self.emit(SessionEvent::RosterError {
                    error: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    fn emit_roster(&self) -> Vec<RosterEntry> {
        let (users, highlighted) = {
            let state = self.state();
            (state.roster.clone(), state.highlighted.clone())
        };
        let entries: Vec<RosterEntry> = self
            .ranker()
            .rank(users)
            .into_iter()
            .map(|user| RosterEntry {
                highlighted: highlighted.contains(&user.id),
                user,
            })
            .collect();

        self.emit(SessionEvent::RosterUpdated {
            entries: entries.clone(),
        });
        entries
    }

    // -- composing --

    /// Send `body` to the active peer over the push channel. Returns whether
    /// the message was handed to the socket.
    pub async fn send_message(&self, body: &str) -> bool {
        let body = body.trim();
        if body.is_empty() {
            debug!("send ignored: empty message");
            return false;
        }
        if !self.inner.sink.is_open() {
            debug!("send ignored: push channel not open");
            return false;
        }
        let Some(target) = self.state().typing_target() else {
            debug!("send ignored: no active conversation or user");
            return false;
        };

        self.typing().stop(&target);
        let envelope = OutboundEnvelope::Message(OutgoingMessage {
            chat_id: target.chat_id,
            receiver_id: target.receiver_id.clone(),
            message: body.to_string(),
        });
        if !self.inner.sink.send(&envelope) {
            return false;
        }
        info!(chat = %target.chat_id, to = %target.receiver_id, "message sent");
        self.emit(SessionEvent::InputCleared);

        self.ranker().record_activity(&target.receiver_id, None);
        if let Err(e) = self.refresh_roster().await {
            debug!(error = %e, "roster refresh after send failed");
        }
        true
    }

    /// Keystroke in the composition input.
    pub fn on_input(&self) {
        let target = self.state().typing_target();
        self.typing().on_input(target.as_ref());
    }

    /// The composition input lost focus.
    pub fn on_blur(&self) {
        let target = self.state().typing_target();
        self.typing().on_blur(target.as_ref());
    }
}
