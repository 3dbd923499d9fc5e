//! Process-wide, load-once registry for rendering backend assets.
//!
//! Each resource key (usually the asset URL) gets one cell. The first caller
//! runs the load; callers arriving while it is in flight wait on the same
//! cell. A failed load leaves the cell empty so the next caller retries.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::ChartError;

type Registry = Mutex<HashMap<String, Arc<OnceCell<()>>>>;

static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn cell_for(key: &str) -> Arc<OnceCell<()>> {
    let registry = REGISTRY.get_or_init(|| Mutex::new(HashMap::new()));
    let mut cells = registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    Arc::clone(
        cells
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new())),
    )
}

pub async fn ensure_loaded<F, Fut>(key: &str, load: F) -> Result<(), ChartError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), ChartError>>,
{
    let cell = cell_for(key);
    if cell.initialized() {
        debug!("Resource {} already loaded", key);
        return Ok(());
    }

    cell.get_or_try_init(|| async move {
        debug!("Loading resource {}", key);
        load().await?;
        info!("Resource {} loaded", key);
        Ok::<(), ChartError>(())
    })
    .await?;
    Ok(())
}

pub fn is_loaded(key: &str) -> bool {
    cell_for(key).initialized()
}
