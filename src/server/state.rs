//! Shared handler state

use crate::auth::{AccessResolver, SessionProtocol};
use crate::calendar::{EntryService, LensService};
use crate::config::Settings;
use crate::live::LiveBroker;
use crate::ratelimit::RateLimiter;
use crate::storage::AuthStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: Arc<dyn AuthStore>,
    pub broker: Arc<LiveBroker>,
    pub sessions: Arc<SessionProtocol>,
    pub access: Arc<AccessResolver>,
    pub lenses: Arc<LensService>,
    pub entries: Arc<EntryService>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(
        settings: Arc<Settings>,
        store: Arc<dyn AuthStore>,
        broker: Arc<LiveBroker>,
    ) -> Self {
        let sessions = Arc::new(SessionProtocol::new(
            Arc::clone(&store),
            Arc::clone(&settings),
        ));
        let access = Arc::new(AccessResolver::new(Arc::clone(&store)));
        let lenses = Arc::new(LensService::new(Arc::clone(&store), Arc::clone(&broker)));
        let entries = Arc::new(EntryService::new(Arc::clone(&store), Arc::clone(&broker)));
        Self {
            settings,
            store,
            broker,
            sessions,
            access,
            lenses,
            entries,
            limiter: Arc::new(RateLimiter::new()),
        }
    }
}
