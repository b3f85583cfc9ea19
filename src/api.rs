//! HTTP front end for the relay

mod handlers;
mod types;

pub use handlers::create_router;

use crate::dispatch::Dispatcher;
use crate::session::{SessionFactory, SessionSupervisor};
use std::sync::Arc;

/// Application state shared across handlers
pub struct AppState<F: SessionFactory> {
    pub supervisor: Arc<SessionSupervisor<F>>,
    pub dispatcher: Arc<Dispatcher<F>>,
}

impl<F: SessionFactory> Clone for AppState<F> {
    fn clone(&self) -> Self {
        Self {
            supervisor: Arc::clone(&self.supervisor),
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }
}
