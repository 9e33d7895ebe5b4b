use chrono::{DateTime, Utc};
use tracing::info;

use crate::persistence::{StateStore, StoreError, OPERATOR_START_TIME};

/// Returns the persisted start time of this deployment, recording `now` on the first ever start.
pub fn setup_operator_start_time(
    store: &StateStore,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, StoreError> {
    let start_time = match store.load(&OPERATOR_START_TIME)? {
        Some(start_time) => start_time,
        None => {
            info!("stored operator start time not found, saving current time");
            store.save(&OPERATOR_START_TIME, &now)?;
            now
        }
    };
    info!(%start_time, "operator start time");
    Ok(start_time)
}
