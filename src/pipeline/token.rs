//! Tokens that travel between stages: requests, futures and work items.
//!
//! All tokens live in one [`TokenArena`] and are addressed by [`TokenId`].
//! A token is logically owned by whichever stage currently holds its id; the
//! arena only enforces the per-token invariants:
//!
//! - `filled` goes from false to true exactly once.
//! - The continuation slot holds at most one continuation and hands it out
//!   at most once, either at registration (already filled) or at the fill.
//! - Every move changes `position` by exactly one stage, in the direction
//!   dictated by the token kind, and stays inside the pipeline.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::{StageId, TokenId};
use serde::{Deserialize, Serialize};

/// Which way a token travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Toward stage 0 (requests).
    Downstream,
    /// Toward the consumer (futures).
    Upstream,
}

/// Progress of a work item inside its stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkProgress {
    /// Waiting on downstream.
    #[default]
    Idle,
    /// Busy for a fixed number of ticks.
    Working,
    /// Raw data arrived, transform pending.
    Partial,
    /// Result ready.
    Complete,
}

/// The in-flight computation an operator owes to a future.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Future this item will fill. A readahead prefetch has none until a
    /// caller adopts it.
    pub future: Option<TokenId>,
    /// Position in the owning stage's queue, used for layout.
    pub slot: usize,
    pub progress: WorkProgress,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Request,
    Future,
    WorkItem(WorkItem),
}

impl TokenKind {
    /// Travel direction, `None` for work items which stay in their stage.
    pub fn direction(&self) -> Option<Direction> {
        match self {
            TokenKind::Request => Some(Direction::Downstream),
            TokenKind::Future => Some(Direction::Upstream),
            TokenKind::WorkItem(_) => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TokenKind::Request => "request",
            TokenKind::Future => "future",
            TokenKind::WorkItem(_) => "work item",
        }
    }
}

/// "When `source` fills, hand it to `stage`'s `on_fill`."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Continuation {
    pub stage: StageId,
    pub source: TokenId,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub id: TokenId,
    pub kind: TokenKind,
    pub position: StageId,
    pub origin: StageId,
    pub created_at: u64,
    pub filled: bool,
    pub filled_at: Option<u64>,
    pub removed: bool,
    continuation: Option<Continuation>,
}

impl Token {
    pub fn is_future(&self) -> bool {
        matches!(self.kind, TokenKind::Future)
    }

    pub fn work_item(&self) -> Option<&WorkItem> {
        match &self.kind {
            TokenKind::WorkItem(w) => Some(w),
            _ => None,
        }
    }

    pub fn has_continuation(&self) -> bool {
        self.continuation.is_some()
    }
}

/// Owner of every token created during a run.
#[derive(Debug, Default)]
pub struct TokenArena {
    tokens: Vec<Token>,
}

impl TokenArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Token> {
        self.tokens.iter()
    }

    pub fn insert(&mut self, kind: TokenKind, stage: StageId, now: u64, filled: bool) -> TokenId {
        let id = TokenId(self.tokens.len() as u32);
        self.tokens.push(Token {
            id,
            kind,
            position: stage,
            origin: stage,
            created_at: now,
            filled,
            filled_at: filled.then_some(now),
            removed: false,
            continuation: None,
        });
        id
    }

    pub fn get(&self, id: TokenId) -> PipelineResult<&Token> {
        self.tokens.get(id.index()).ok_or_else(|| {
            PipelineError::invariant(StageId::INVALID, format!("unknown token {id}"))
        })
    }

    pub fn get_mut(&mut self, id: TokenId) -> PipelineResult<&mut Token> {
        self.tokens.get_mut(id.index()).ok_or_else(|| {
            PipelineError::invariant(StageId::INVALID, format!("unknown token {id}"))
        })
    }

    pub fn work_item_mut(&mut self, id: TokenId) -> PipelineResult<&mut WorkItem> {
        let token = self.get_mut(id)?;
        let stage = token.position;
        match &mut token.kind {
            TokenKind::WorkItem(w) => Ok(w),
            other => Err(PipelineError::invariant(
                stage,
                format!("{id} is a {}, expected a work item", other.label()),
            )),
        }
    }

    /// Move a token one stage along its direction. Returns `(from, to)`.
    pub fn step(&mut self, id: TokenId, stage_count: usize) -> PipelineResult<(StageId, StageId)> {
        let token = self.get_mut(id)?;
        let from = token.position;
        if token.removed {
            return Err(PipelineError::invariant(
                from,
                format!("{id} moved after removal"),
            ));
        }
        let to = match token.kind.direction() {
            Some(Direction::Downstream) => from.downstream(),
            Some(Direction::Upstream) => {
                Some(from.upstream()).filter(|s| s.index() < stage_count)
            }
            None => {
                return Err(PipelineError::invariant(
                    from,
                    format!("work item {id} cannot travel"),
                ))
            }
        };
        let to = to.ok_or_else(|| {
            PipelineError::invariant(
                from,
                format!("{} {id} would leave the pipeline", token.kind.label()),
            )
        })?;
        token.position = to;
        Ok((from, to))
    }

    /// Fill a token. Returns the continuation that is now ready to run.
    pub fn fill(&mut self, id: TokenId, now: u64) -> PipelineResult<Option<Continuation>> {
        let token = self.get_mut(id)?;
        if token.filled {
            return Err(PipelineError::invariant(
                token.position,
                format!("{} {id} filled twice", token.kind.label()),
            ));
        }
        token.filled = true;
        token.filled_at = Some(now);
        if let TokenKind::WorkItem(w) = &mut token.kind {
            w.progress = WorkProgress::Complete;
        }
        Ok(token.continuation.take())
    }

    /// Attach a continuation. If the token is already filled the continuation
    /// is returned right away and never stored.
    pub fn register(
        &mut self,
        id: TokenId,
        continuation: Continuation,
    ) -> PipelineResult<Option<Continuation>> {
        let token = self.get_mut(id)?;
        if token.continuation.is_some() {
            return Err(PipelineError::invariant(
                token.position,
                format!("{id} already has a continuation"),
            ));
        }
        if token.filled {
            return Ok(Some(continuation));
        }
        token.continuation = Some(continuation);
        Ok(None)
    }

    pub fn remove(&mut self, id: TokenId) -> PipelineResult<()> {
        let token = self.get_mut(id)?;
        if token.removed {
            return Err(PipelineError::invariant(
                token.position,
                format!("{id} removed twice"),
            ));
        }
        token.removed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cont(stage: u32, source: TokenId) -> Continuation {
        Continuation {
            stage: StageId(stage),
            source,
        }
    }

    #[test]
    fn test_request_moves_downstream_only() {
        let mut arena = TokenArena::new();
        let req = arena.insert(TokenKind::Request, StageId(1), 0, false);
        assert_eq!(arena.step(req, 2).unwrap(), (StageId(1), StageId(0)));
        assert!(arena.step(req, 2).unwrap_err().is_invariant_violation());
    }

    #[test]
    fn test_future_cannot_leave_top_stage() {
        let mut arena = TokenArena::new();
        let fut = arena.insert(TokenKind::Future, StageId(0), 0, false);
        assert_eq!(arena.step(fut, 2).unwrap(), (StageId(0), StageId(1)));
        assert!(arena.step(fut, 2).is_err());
    }

    #[test]
    fn test_fill_once() {
        let mut arena = TokenArena::new();
        let fut = arena.insert(TokenKind::Future, StageId(0), 0, false);
        assert_eq!(arena.fill(fut, 10).unwrap(), None);
        assert_eq!(arena.get(fut).unwrap().filled_at, Some(10));
        assert!(arena.fill(fut, 20).unwrap_err().is_invariant_violation());
    }

    #[test]
    fn test_continuation_fires_at_fill() {
        let mut arena = TokenArena::new();
        let fut = arena.insert(TokenKind::Future, StageId(0), 0, false);
        assert_eq!(arena.register(fut, cont(1, fut)).unwrap(), None);
        assert!(arena.get(fut).unwrap().has_continuation());
        assert_eq!(arena.fill(fut, 5).unwrap(), Some(cont(1, fut)));
        assert!(!arena.get(fut).unwrap().has_continuation());
    }

    #[test]
    fn test_continuation_on_filled_token_is_immediate() {
        let mut arena = TokenArena::new();
        let fut = arena.insert(TokenKind::Future, StageId(0), 0, true);
        assert_eq!(arena.register(fut, cont(1, fut)).unwrap(), Some(cont(1, fut)));
        assert!(!arena.get(fut).unwrap().has_continuation());
    }

    #[test]
    fn test_double_registration_rejected() {
        let mut arena = TokenArena::new();
        let fut = arena.insert(TokenKind::Future, StageId(0), 0, false);
        arena.register(fut, cont(1, fut)).unwrap();
        assert!(arena.register(fut, cont(1, fut)).is_err());
    }

    #[test]
    fn test_work_item_stays_put() {
        let mut arena = TokenArena::new();
        let item = arena.insert(
            TokenKind::WorkItem(WorkItem {
                future: None,
                slot: 0,
                progress: WorkProgress::Idle,
            }),
            StageId(0),
            0,
            false,
        );
        assert!(arena.step(item, 3).is_err());
        arena.fill(item, 1).unwrap();
        assert_eq!(
            arena.get(item).unwrap().work_item().unwrap().progress,
            WorkProgress::Complete
        );
    }
}
