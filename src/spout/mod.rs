//! Virtual spouts and their coordinator.
//!
//! A [`VirtualSpout`] is one bounded, filtered, at-least-once consumer
//! instance; the [`SpoutCoordinator`] runs many of them on parallel workers
//! and multiplexes their messages onto a single output queue. The
//! [`SidelineHandler`] translates sideline triggers into spout lifecycle
//! events on the coordinator.

mod coordinator;
mod handler;
mod virtual_spout;

pub use coordinator::{SharedSpout, SpoutCoordinator};
pub use handler::{SidelineHandler, SidelineTrigger};
pub use virtual_spout::{FilterChainHandle, StopHandle, VirtualSpout};

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a virtual spout.
///
/// `Created → Open → StopRequested → Closed`, never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SpoutState {
    Created = 0,
    Open = 1,
    StopRequested = 2,
    Closed = 3,
}

impl SpoutState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SpoutState::Created,
            1 => SpoutState::Open,
            2 => SpoutState::StopRequested,
            _ => SpoutState::Closed,
        }
    }
}

/// Shared, monotone lifecycle flag.
///
/// The owning worker drives `Created → Open` and `→ Closed`; any holder of
/// a clone may request a stop. Transitions only ever move forward.
#[derive(Debug)]
pub(crate) struct Lifecycle(AtomicU8);

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(SpoutState::Created as u8))
    }

    pub(crate) fn state(&self) -> SpoutState {
        SpoutState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Advance to `next` unless the current state is already past it.
    pub(crate) fn advance(&self, next: SpoutState) {
        self.0.fetch_max(next as u8, Ordering::AcqRel);
    }

    /// `Created → Open`; anything else reports the offending state.
    pub(crate) fn try_open(&self) -> std::result::Result<(), SpoutState> {
        self.0
            .compare_exchange(
                SpoutState::Created as u8,
                SpoutState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(SpoutState::from_u8)
    }
}
