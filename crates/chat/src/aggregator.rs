use std::collections::HashMap;
use std::sync::Arc;

use crate::events::{ChunkEvent, Fragment};
use crate::normalizer;
use crate::session::{ChatSession, FragmentStatus, SessionId};

/// Stream lifecycle of one tracked session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamPhase {
    /// No request in flight.
    Idle,
    /// A user turn was appended and the assistant answer is expected or arriving.
    Streaming,
    /// The transport finished, or an error fragment closed the answer.
    Settled,
}

/// Result of feeding one fragment or event into the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub enum FoldOutcome {
    /// The session changed; carries the new snapshot.
    Applied(Arc<ChatSession>),
    /// The session is tracked but its turns did not change.
    Unchanged(Arc<ChatSession>),
    /// The session id is not tracked any more; the input was dropped.
    Discarded,
}

impl FoldOutcome {
    pub fn snapshot(&self) -> Option<&Arc<ChatSession>> {
        match self {
            Self::Applied(snapshot) | Self::Unchanged(snapshot) => Some(snapshot),
            Self::Discarded => None,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    pub fn is_discarded(&self) -> bool {
        matches!(self, Self::Discarded)
    }
}

#[derive(Debug, Clone)]
struct TrackedSession {
    snapshot: Arc<ChatSession>,
    phase: StreamPhase,
}

/// Owns every live session and folds stream fragments into them.
///
/// The key set of the session map is the set of live session ids. It changes
/// only through [`open_session`](Self::open_session),
/// [`start_turn`](Self::start_turn), [`track`](Self::track) and
/// [`abandon`](Self::abandon); fragments for any other id are dropped, which
/// is how abandoned requests are cancelled.
#[derive(Debug, Default)]
pub struct StreamAggregator {
    sessions: HashMap<SessionId, TrackedSession>,
}

impl StreamAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a fresh, empty session with a generated id.
    pub fn open_session(&mut self) -> SessionId {
        let session_id = SessionId::generate();
        self.sessions.insert(
            session_id.clone(),
            TrackedSession {
                snapshot: Arc::new(ChatSession::new(session_id.clone())),
                phase: StreamPhase::Idle,
            },
        );
        tracing::debug!(session_id = %session_id, "opened chat session");
        session_id
    }

    /// Resumes a previously stored session, replacing any tracked session with the same id.
    pub fn track(&mut self, session: ChatSession) -> Arc<ChatSession> {
        let phase = if session.is_empty() {
            StreamPhase::Idle
        } else {
            StreamPhase::Settled
        };
        let snapshot = Arc::new(session);
        self.sessions.insert(
            snapshot.id().clone(),
            TrackedSession {
                snapshot: snapshot.clone(),
                phase,
            },
        );
        snapshot
    }

    /// Appends exactly one user turn, creating the session when it is not tracked.
    pub fn start_turn(
        &mut self,
        session_id: &SessionId,
        prompt: impl Into<String>,
    ) -> Arc<ChatSession> {
        let entry = self
            .sessions
            .entry(session_id.clone())
            .or_insert_with(|| TrackedSession {
                snapshot: Arc::new(ChatSession::new(session_id.clone())),
                phase: StreamPhase::Idle,
            });

        entry.snapshot = Arc::new(entry.snapshot.with_user_turn(prompt));
        entry.phase = StreamPhase::Streaming;
        tracing::debug!(
            session_id = %session_id,
            turn_count = entry.snapshot.turns().len(),
            "started turn"
        );
        entry.snapshot.clone()
    }

    pub fn apply_fragment(&mut self, fragment: &Fragment) -> FoldOutcome {
        let Some(entry) = self.sessions.get_mut(&fragment.session_id) else {
            tracing::debug!(
                session_id = %fragment.session_id,
                fragment_len = fragment.text.len(),
                "discarding fragment for untracked session"
            );
            return FoldOutcome::Discarded;
        };

        let Some(folded) = entry.snapshot.fold(&fragment.text, fragment.status) else {
            return FoldOutcome::Unchanged(entry.snapshot.clone());
        };

        if fragment.status == FragmentStatus::Error {
            tracing::debug!(
                session_id = %fragment.session_id,
                "error fragment settled the assistant turn"
            );
            entry.phase = StreamPhase::Settled;
        }
        entry.snapshot = Arc::new(folded);
        FoldOutcome::Applied(entry.snapshot.clone())
    }

    /// Normalizes one provider event and folds it.
    pub fn apply_event(&mut self, event: &ChunkEvent) -> FoldOutcome {
        match normalizer::normalize(event) {
            Some(fragment) => self.apply_fragment(&fragment),
            None => self.finish(&event.session_id),
        }
    }

    /// Marks the end of the provider stream without touching any turn.
    pub fn finish(&mut self, session_id: &SessionId) -> FoldOutcome {
        let Some(entry) = self.sessions.get_mut(session_id) else {
            return FoldOutcome::Discarded;
        };

        if entry.phase == StreamPhase::Streaming {
            entry.phase = StreamPhase::Settled;
        }
        FoldOutcome::Unchanged(entry.snapshot.clone())
    }

    /// Stops tracking a session. Later fragments for its id are discarded.
    pub fn abandon(&mut self, session_id: &SessionId) -> Option<Arc<ChatSession>> {
        let removed = self.sessions.remove(session_id)?;
        tracing::debug!(
            session_id = %session_id,
            phase = ?removed.phase,
            "abandoned chat session"
        );
        Some(removed.snapshot)
    }

    pub fn is_tracked(&self, session_id: &SessionId) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn session(&self, session_id: &SessionId) -> Option<Arc<ChatSession>> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.snapshot.clone())
    }

    pub fn phase(&self, session_id: &SessionId) -> Option<StreamPhase> {
        self.sessions.get(session_id).map(|entry| entry.phase)
    }

    pub fn tracked_ids(&self) -> impl Iterator<Item = &SessionId> {
        self.sessions.keys()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Displayable text of the trailing assistant turn, once the stream settled.
    ///
    /// Intermediate fragments are never exposed here.
    pub fn final_response(&self, session_id: &SessionId) -> Option<&str> {
        let entry = self.sessions.get(session_id)?;
        if entry.phase != StreamPhase::Settled {
            return None;
        }
        entry
            .snapshot
            .open_assistant_turn()
            .map(|turn| turn.display_text())
    }
}
