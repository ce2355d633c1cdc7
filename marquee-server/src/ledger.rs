use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;

/// Tracks jobs currently in flight so identical submissions are rejected
/// instead of duplicated.
///
/// Owned by `AppState` and threaded explicitly to the handlers that need it;
/// there is deliberately no process-wide instance.
#[derive(Clone, Debug, Default)]
pub struct SeenLedger {
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl SeenLedger {
    /// Claim a key. Returns false when an identical job is already running.
    pub async fn begin(&self, key: &str) -> bool {
        self.in_flight.lock().await.insert(key.to_string())
    }

    pub async fn finish(&self, key: &str) {
        self.in_flight.lock().await.remove(key);
    }
}
