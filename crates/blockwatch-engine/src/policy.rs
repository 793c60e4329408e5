//! Tick policies: what a factory does around every tick.
//!
//! A policy may register a baseline classifier before the first tick (so a
//! clock exists before any user filter runs) and decides after each tick
//! whether the tick loop keeps going.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::classifier::{Classifier, ClassifierRef};
use crate::context::DataContext;
use crate::error::EngineError;
use crate::factory::CollectorFactory;

/// Whether the tick loop continues after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickControl {
    Continue,
    Stop,
}

/// Hooks a factory runs around every tick.
#[async_trait]
pub trait TickPolicy: Send + Sync {
    /// Called before the tick's context is built.
    fn pre_notify(&self, _factory: &CollectorFactory) -> Result<(), EngineError> {
        Ok(())
    }

    /// Called once every subscriber of the tick has settled.
    async fn post_notify(&self, _ctx: &DataContext) -> Result<TickControl, EngineError> {
        Ok(TickControl::Continue)
    }
}

/// No baseline, never stops.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContinuousPolicy;

impl TickPolicy for ContinuousPolicy {}

/// Data that knows which block the chain head is at.
pub trait HeadBlock {
    fn head_block(&self) -> u64;
}

/// Registers `C` once as a baseline clock.
struct Baseline<C> {
    registered: AtomicBool,
    _classifier: PhantomData<fn() -> C>,
}

impl<C: Classifier> Baseline<C> {
    fn new() -> Self {
        Self {
            registered: AtomicBool::new(false),
            _classifier: PhantomData,
        }
    }

    fn ensure(&self, factory: &CollectorFactory) -> Result<(), EngineError> {
        if self.registered.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Err(e) = factory.push_classifier(&ClassifierRef::of::<C>(), "baseline") {
            self.registered.store(false, Ordering::Release);
            return Err(e);
        }
        tracing::info!(factory = factory.name(), classifier = C::NAME, "registered baseline clock");
        Ok(())
    }
}

/// Live watching: keeps classifier `C` active as the clock and never stops.
pub struct LivePolicy<C> {
    baseline: Baseline<C>,
}

impl<C: Classifier> LivePolicy<C> {
    pub fn new() -> Self {
        Self {
            baseline: Baseline::new(),
        }
    }
}

impl<C: Classifier> Default for LivePolicy<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<C: Classifier> TickPolicy for LivePolicy<C> {
    fn pre_notify(&self, factory: &CollectorFactory) -> Result<(), EngineError> {
        self.baseline.ensure(factory)
    }
}

/// Bounded historical replay.
///
/// Keeps classifier `C` active as the clock and stops the loop once the
/// clock reaches `until`, or when the head did not advance since the
/// previous tick.
pub struct ReplayPolicy<C> {
    baseline: Baseline<C>,
    until: u64,
    last_head: Mutex<Option<u64>>,
}

impl<C: Classifier> ReplayPolicy<C> {
    pub fn new(until: u64) -> Self {
        Self {
            baseline: Baseline::new(),
            until,
            last_head: Mutex::new(None),
        }
    }

    pub fn until(&self) -> u64 {
        self.until
    }
}

#[async_trait]
impl<C> TickPolicy for ReplayPolicy<C>
where
    C: Classifier,
    C::Data: HeadBlock,
{
    fn pre_notify(&self, factory: &CollectorFactory) -> Result<(), EngineError> {
        self.baseline.ensure(factory)
    }

    async fn post_notify(&self, ctx: &DataContext) -> Result<TickControl, EngineError> {
        let head = ctx.get::<C>().await?.head_block();
        let previous = self
            .last_head
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(head);

        if head >= self.until {
            tracing::info!(head, until = self.until, "replay reached its upper bound");
            return Ok(TickControl::Stop);
        }
        if previous == Some(head) {
            tracing::info!(head, "replay head stalled, stopping");
            return Ok(TickControl::Stop);
        }
        Ok(TickControl::Continue)
    }
}
