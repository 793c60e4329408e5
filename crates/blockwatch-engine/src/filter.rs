//! Composable boolean filter algebra.
//!
//! Composite filters start all their children at once and settle as soon as
//! the outcome is decided: AND on the first `false`, OR on the first `true`.
//! Children still running at that point are dropped. Their collector fetches
//! keep running inside the [`DataContext`], but their outcome, including any
//! error they would have produced, is never observed.

use async_trait::async_trait;
use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Notify;

use crate::classifier::ClassifierRef;
use crate::context::DataContext;
use crate::error::EngineError;

/// A predicate over one tick's data.
#[async_trait]
pub trait Filter: Send + Sync {
    /// Evaluates the predicate against this tick's context.
    async fn matches(&self, ctx: &DataContext) -> Result<bool, EngineError>;

    /// Classifiers this filter reads. Must include everything any branch
    /// might read, whether or not it ends up evaluated.
    fn used_contexts(&self) -> Vec<ClassifierRef>;

    /// Abandons any evaluation of this filter that is in flight.
    fn cancel(&self) {}
}

/// How a composite combines its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    /// Logical AND.
    All,
    /// Logical OR.
    Any,
}

impl Combinator {
    /// The child outcome that settles the composite on its own.
    fn decisive(self) -> bool {
        match self {
            Self::All => false,
            Self::Any => true,
        }
    }
}

async fn race(combinator: Combinator, children: &[Box<dyn Filter>], ctx: &DataContext) -> Result<bool, EngineError> {
    let decisive = combinator.decisive();
    let mut pending: FuturesUnordered<_> = children.iter().map(|child| child.matches(ctx)).collect();

    while let Some(outcome) = pending.next().await {
        if outcome? == decisive {
            if !pending.is_empty() {
                tracing::trace!(?combinator, abandoned = pending.len(), "composite settled early");
            }
            return Ok(decisive);
        }
    }
    Ok(!decisive)
}

fn union(children: &[Box<dyn Filter>]) -> Vec<ClassifierRef> {
    children.iter().flat_map(|child| child.used_contexts()).collect()
}

/// AND / OR over child filters.
pub struct CompositeFilter {
    combinator: Combinator,
    children: Vec<Box<dyn Filter>>,
}

impl CompositeFilter {
    pub fn new(combinator: Combinator, children: Vec<Box<dyn Filter>>) -> Self {
        Self {
            combinator,
            children,
        }
    }

    pub fn and(children: Vec<Box<dyn Filter>>) -> Self {
        Self::new(Combinator::All, children)
    }

    pub fn or(children: Vec<Box<dyn Filter>>) -> Self {
        Self::new(Combinator::Any, children)
    }

    pub fn combinator(&self) -> Combinator {
        self.combinator
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

#[async_trait]
impl Filter for CompositeFilter {
    async fn matches(&self, ctx: &DataContext) -> Result<bool, EngineError> {
        race(self.combinator, &self.children, ctx).await
    }

    fn used_contexts(&self) -> Vec<ClassifierRef> {
        union(&self.children)
    }

    fn cancel(&self) {
        for child in &self.children {
            child.cancel();
        }
    }
}

/// The filters committed for one subscription clause.
///
/// Members are combined with AND unless the container was built from
/// several alternatives, in which case it is an OR over them. A container
/// can be cancelled: every evaluation of it in flight at that moment settles
/// `false` without error.
pub struct FilterContainer {
    combinator: Combinator,
    members: Vec<Box<dyn Filter>>,
    cancelled: Notify,
}

impl Default for FilterContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterContainer {
    /// Empty AND container. Matches every tick until a member is added.
    pub fn new() -> Self {
        Self::all(Vec::new())
    }

    pub fn all(members: Vec<Box<dyn Filter>>) -> Self {
        Self {
            combinator: Combinator::All,
            members,
            cancelled: Notify::new(),
        }
    }

    pub fn any(members: Vec<Box<dyn Filter>>) -> Self {
        Self {
            combinator: Combinator::Any,
            members,
            cancelled: Notify::new(),
        }
    }

    /// Combines clauses built as top-level alternatives.
    ///
    /// A single clause is returned as is; several become an OR over them.
    pub fn alternatives(mut clauses: Vec<FilterContainer>) -> Self {
        if clauses.len() == 1 {
            if let Some(clause) = clauses.pop() {
                return clause;
            }
        }
        Self::any(
            clauses
                .into_iter()
                .map(|clause| Box::new(clause) as Box<dyn Filter>)
                .collect(),
        )
    }

    /// Commits another filter to this clause.
    pub fn push(&mut self, filter: impl Filter + 'static) -> &mut Self {
        self.members.push(Box::new(filter));
        self
    }

    /// Builder form of [`FilterContainer::push`].
    pub fn with(mut self, filter: impl Filter + 'static) -> Self {
        self.push(filter);
        self
    }

    pub fn combinator(&self) -> Combinator {
        self.combinator
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[async_trait]
impl Filter for FilterContainer {
    async fn matches(&self, ctx: &DataContext) -> Result<bool, EngineError> {
        // Created before racing so a cancel issued at any point after this
        // line reaches it.
        let cancelled = self.cancelled.notified();
        tokio::select! {
            biased;
            () = cancelled => {
                tracing::debug!(tick = ctx.tick(), "filter container cancelled");
                Ok(false)
            }
            outcome = race(self.combinator, &self.members, ctx) => outcome,
        }
    }

    fn used_contexts(&self) -> Vec<ClassifierRef> {
        union(&self.members)
    }

    fn cancel(&self) {
        self.cancelled.notify_waiters();
        for member in &self.members {
            member.cancel();
        }
    }
}
