//! Delivery of output events to the attached consumer.
//!
//! The relay is the only state shared between sessions. A single async mutex
//! guards the consumer slot and the buffer, so concurrent sessions interleave
//! at event granularity while each session's events keep their production
//! order. Delivery waits for channel capacity, which applies backpressure to
//! producers; a consumer that stays full past the delivery timeout, or whose
//! receiver is gone, is detached and the relay falls back to buffering.
//!
//! The buffer is bounded twice: per session by `buffer_capacity` events, and
//! overall by `max_buffered_sessions`. When a new session would exceed the
//! session limit, the oldest finished session is evicted whole (or the oldest
//! session when none has finished) and a single notice reports the loss on the
//! next flush.

use crate::config::types::RelayConfig;
use kiln_types::{CorrelationId, OutputEvent};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// The receiving end of the relay.
pub type EventConsumer = mpsc::Sender<OutputEvent>;

#[derive(Debug, Default)]
struct Discarded {
    count: u64,
    last_sequence: u64,
}

/// Whole sessions dropped to respect the session limit.
#[derive(Debug, Default)]
struct Evicted {
    sessions: u64,
    events: u64,
    last: Option<(CorrelationId, u64)>,
}

#[derive(Debug, Default)]
struct RelayState {
    consumer: Option<EventConsumer>,
    buffer: VecDeque<OutputEvent>,
    per_session: HashMap<CorrelationId, usize>,
    discarded: HashMap<CorrelationId, Discarded>,
    /// Buffered sessions, oldest first.
    sessions: VecDeque<CorrelationId>,
    /// Buffered sessions whose terminal event is in the buffer.
    finished: HashSet<CorrelationId>,
    evicted: Evicted,
}

enum Delivery {
    Delivered,
    Rejected(OutputEvent),
}

#[derive(Debug)]
pub struct OutputRelay {
    state: Mutex<RelayState>,
    capacity: usize,
    max_sessions: usize,
    delivery_timeout: Duration,
}

impl OutputRelay {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            state: Mutex::new(RelayState::default()),
            capacity: config.buffer_capacity.max(1),
            max_sessions: config.max_buffered_sessions.max(1),
            delivery_timeout: config.delivery_timeout(),
        }
    }

    /// Deliver an event, or buffer it while no consumer is attached.
    pub async fn emit(&self, mut event: OutputEvent) {
        if event.timestamp.is_none() {
            event.timestamp = Some(chrono::Utc::now().timestamp_millis());
        }
        log::debug!("{}", event.console_line());

        let mut state = self.state.lock().await;
        let event = match state.consumer.clone() {
            Some(consumer) => match self.deliver(&consumer, event).await {
                Delivery::Delivered => return,
                Delivery::Rejected(event) => {
                    state.consumer = None;
                    event
                }
            },
            None => event,
        };
        self.buffer(&mut state, event);
    }

    /// Install a consumer and flush everything buffered so far, in order.
    ///
    /// Returns whether the consumer is still attached after the flush.
    pub async fn attach(&self, consumer: EventConsumer) -> bool {
        let mut state = self.state.lock().await;
        if state.consumer.is_some() {
            log::info!("Replacing attached output consumer");
        }

        let pending = state.buffer.len();
        if let Some((session, sequence)) = state.evicted.last.clone() {
            let notice = OutputEvent::system(
                format!(
                    "{} event(s) from {} earlier session(s) were discarded",
                    state.evicted.events, state.evicted.sessions
                ),
                session,
            )
            .with_sequence(sequence)
            .with_timestamp(chrono::Utc::now().timestamp_millis());

            if let Delivery::Rejected(_) = self.deliver(&consumer, notice).await {
                log::warn!("Output consumer went away during flush; keeping buffer");
                return false;
            }
            state.evicted = Evicted::default();
        }

        while let Some(event) = state.buffer.pop_front() {
            let session = event.correlation_id.clone();

            if let Some(discarded) = state.discarded.remove(&session) {
                let notice = OutputEvent::system(
                    format!("{} earlier line(s) were discarded", discarded.count),
                    session.clone(),
                )
                .with_sequence(discarded.last_sequence)
                .with_timestamp(chrono::Utc::now().timestamp_millis());

                if let Delivery::Rejected(_) = self.deliver(&consumer, notice).await {
                    state.discarded.insert(session, discarded);
                    state.buffer.push_front(event);
                    log::warn!("Output consumer went away during flush; keeping buffer");
                    return false;
                }
            }

            match self.deliver(&consumer, event).await {
                Delivery::Delivered => Self::forget_one(&mut state, &session),
                Delivery::Rejected(event) => {
                    state.buffer.push_front(event);
                    log::warn!("Output consumer went away during flush; keeping buffer");
                    return false;
                }
            }
        }

        if pending > 0 {
            log::info!("Flushed {} buffered event(s) to output consumer", pending);
        }
        state.consumer = Some(consumer);
        true
    }

    /// Stop delivering; subsequent events are buffered.
    pub async fn detach(&self) {
        let mut state = self.state.lock().await;
        if state.consumer.take().is_some() {
            log::info!("Output consumer detached");
        }
    }

    pub async fn is_attached(&self) -> bool {
        let state = self.state.lock().await;
        state
            .consumer
            .as_ref()
            .map(|consumer| !consumer.is_closed())
            .unwrap_or(false)
    }

    /// Number of events waiting for a consumer.
    pub async fn buffered(&self) -> usize {
        self.state.lock().await.buffer.len()
    }

    async fn deliver(&self, consumer: &EventConsumer, event: OutputEvent) -> Delivery {
        match tokio::time::timeout(self.delivery_timeout, consumer.reserve()).await {
            Ok(Ok(permit)) => {
                permit.send(event);
                Delivery::Delivered
            }
            Ok(Err(_)) => {
                log::warn!("Output consumer closed; buffering events");
                Delivery::Rejected(event)
            }
            Err(_) => {
                log::warn!(
                    "Output consumer stalled for {:?}; detaching and buffering events",
                    self.delivery_timeout
                );
                Delivery::Rejected(event)
            }
        }
    }

    fn buffer(&self, state: &mut RelayState, event: OutputEvent) {
        let session = event.correlation_id.clone();
        let held = state.per_session.get(&session).copied().unwrap_or(0);

        if held == 0 {
            if state.sessions.len() >= self.max_sessions {
                Self::evict(state);
            }
            state.sessions.push_back(session.clone());
        } else if held >= self.capacity {
            if let Some(pos) = state
                .buffer
                .iter()
                .position(|buffered| buffered.correlation_id == session)
            {
                if let Some(dropped) = state.buffer.remove(pos) {
                    if let Some(count) = state.per_session.get_mut(&session) {
                        *count -= 1;
                    }
                    let discarded = state.discarded.entry(session.clone()).or_default();
                    discarded.count += 1;
                    discarded.last_sequence = dropped.sequence;
                    if discarded.count == 1 {
                        log::warn!(
                            "Buffer for session {} is full; discarding oldest lines",
                            session
                        );
                    }
                }
            }
        }

        if event.kind.is_terminal() {
            state.finished.insert(session.clone());
        }
        *state.per_session.entry(session).or_insert(0) += 1;
        state.buffer.push_back(event);
    }

    /// Drop every buffered event of one session to make room for another.
    fn evict(state: &mut RelayState) {
        let pos = state
            .sessions
            .iter()
            .position(|session| state.finished.contains(session))
            .unwrap_or(0);
        let Some(victim) = state.sessions.remove(pos) else {
            return;
        };

        let mut events = 0u64;
        let mut last_sequence = 0u64;
        state.buffer.retain(|event| {
            if event.correlation_id == victim {
                events += 1;
                last_sequence = event.sequence;
                false
            } else {
                true
            }
        });
        let finished = state.finished.remove(&victim);
        state.per_session.remove(&victim);
        if let Some(discarded) = state.discarded.remove(&victim) {
            events += discarded.count;
        }

        if state.evicted.sessions == 0 {
            log::warn!("Buffered session limit reached; evicting oldest sessions");
        }
        log::debug!(
            "Evicted {} session {} with {} buffered event(s)",
            if finished { "finished" } else { "live" },
            victim,
            events
        );
        state.evicted.sessions += 1;
        state.evicted.events += events;
        state.evicted.last = Some((victim, last_sequence));
    }

    fn forget_one(state: &mut RelayState, session: &CorrelationId) {
        if let Some(count) = state.per_session.get_mut(session) {
            *count -= 1;
            if *count == 0 {
                state.per_session.remove(session);
                state.finished.remove(session);
                state.sessions.retain(|buffered| buffered != session);
            }
        }
    }
}
