//! Process-wide application context.
//!
//! One `AppContext` is built at startup and handed to every session and
//! dispatcher. Sessions reach the backend only through the injected channel
//! factory, so tests substitute scripted hardware and nothing in the crate
//! touches global state.

use std::sync::Arc;

use crate::backend::ChannelFactory;
use crate::config::Settings;

pub struct AppContext {
    pub settings: Settings,
    pub factory: Arc<dyn ChannelFactory>,
}

impl AppContext {
    pub fn new(settings: Settings, factory: Arc<dyn ChannelFactory>) -> Arc<Self> {
        Arc::new(Self { settings, factory })
    }
}
