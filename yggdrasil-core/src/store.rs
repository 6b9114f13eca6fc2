//! The single-writer state store.
//!
//! Exactly one `ShowStore` exists per process; every mutation funnels
//! through [`ShowStore::apply`], which keeps the serialiser discipline:
//! commands are processed one at a time and projections are value copies,
//! so callers can fan them out without holding a borrow.

use yggdrasil_types::projection::{
    audience_view, controller_view, projector_view, AudienceView, ControllerView, ProjectorView,
};
use yggdrasil_types::{ShowCommand, ShowEvent, ShowState, Timestamp, UserId};

use crate::conductor::Conductor;

pub struct ShowStore {
    state: ShowState,
}

impl ShowStore {
    pub fn new(state: ShowState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &ShowState {
        &self.state
    }

    pub fn version(&self) -> u64 {
        self.state.version
    }

    /// Run one command through the conductor.
    pub fn apply(
        &mut self,
        conductor: &mut Conductor,
        cmd: &ShowCommand,
        now: Timestamp,
    ) -> Vec<ShowEvent> {
        conductor.process(&mut self.state, cmd, now)
    }

    pub fn controller_view(&self) -> ControllerView {
        controller_view(&self.state)
    }

    pub fn projector_view(&self) -> ProjectorView {
        projector_view(&self.state)
    }

    pub fn audience_view(&self, user_id: &UserId) -> AudienceView {
        audience_view(&self.state, user_id)
    }
}
