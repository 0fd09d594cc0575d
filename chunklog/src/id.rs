//! Record and chunk identifiers.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use common::{Clock, SystemClock};
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::model::Id;

/// Mints strictly increasing ULIDs.
///
/// Two IDs minted in the same millisecond (or after the clock stepped back)
/// are ordered by incrementing the random part of the previous one.
pub struct IdMinter {
    clock: Arc<dyn Clock>,
    last: Mutex<Ulid>,
}

impl std::fmt::Debug for IdMinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdMinter").finish_non_exhaustive()
    }
}

impl Default for IdMinter {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl IdMinter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            last: Mutex::new(Ulid::nil()),
        }
    }

    pub fn next(&self) -> Id {
        let fresh = Ulid::from_datetime(self.clock.now());
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let id = if fresh > *last {
            fresh
        } else {
            last.increment()
                .unwrap_or_else(|| Ulid::from_parts(last.timestamp_ms() + 1, 0))
        };
        *last = id;
        id
    }
}

/// Parses a ULID string, failing with [`Error::Invalid`].
pub fn parse_id(s: &str) -> Result<Id> {
    Ulid::from_string(s).map_err(|e| Error::Invalid(format!("malformed id {s:?}: {e}")))
}

/// The smallest ID greater than `id`.
pub fn next_id(id: Id) -> Id {
    Ulid(id.0.saturating_add(1))
}

/// The largest ID smaller than `id`.
pub fn prev_id(id: Id) -> Id {
    Ulid(id.0.saturating_sub(1))
}

/// The timestamp encoded in `id`.
pub fn time_of(id: Id) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(id.timestamp_ms() as i64).unwrap_or(DateTime::<Utc>::MIN_UTC)
}
