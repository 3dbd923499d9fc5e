use async_trait::async_trait;
use std::time::Duration;
use tracing::{error, info, warn};

use super::loader::ensure_loaded;
use super::surface::{RenderingSurface, SeriesId, SeriesKind};
use crate::config::RenderSettings;
use crate::error::ChartError;

/// Builds surfaces for one chart backend.
#[async_trait]
pub trait SurfaceFactory: Send + Sync {
    type Surface: RenderingSurface;

    /// Key of the backend's assets in the process-wide loader.
    fn resource_key(&self) -> &str;

    async fn load_resources(&self) -> Result<(), ChartError> {
        Ok(())
    }

    /// Widgets may come up before their drawing API is attached; callers
    /// check [`RenderingSurface::capabilities`] before use.
    fn create(&mut self) -> Self::Surface;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &RenderSettings) -> Self {
        Self {
            retries: settings.init_retries,
            backoff: settings.init_backoff(),
        }
    }

    /// Linear backoff: the n-th retry waits `n * backoff`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.backoff * retry
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RenderSettings::default())
    }
}

/// A surface whose primary series exists and whose series kind has been
/// resolved once.
#[derive(Debug)]
pub struct PreparedSurface<S> {
    pub surface: S,
    pub primary: SeriesId,
    pub kind: SeriesKind,
}

pub async fn initialize_surface<F: SurfaceFactory>(
    factory: &mut F,
    policy: RetryPolicy,
) -> Result<PreparedSurface<F::Surface>, ChartError> {
    {
        let factory = &*factory;
        ensure_loaded(factory.resource_key(), || factory.load_resources()).await?;
    }

    let mut retry = 0;
    loop {
        let mut surface = factory.create();
        let caps = surface.capabilities();

        let created = SeriesKind::PREFERENCE
            .into_iter()
            .filter(|kind| caps.supports(*kind))
            .find_map(|kind| surface.create_series(kind).map(|id| (kind, id)));

        if let Some((kind, primary)) = created {
            info!("Chart surface ready with {:?} primary series", kind);
            return Ok(PreparedSurface {
                surface,
                primary,
                kind,
            });
        }

        surface.release();

        if retry >= policy.retries {
            let attempts = retry + 1;
            error!("Chart surface missing series methods after {} attempts", attempts);
            return Err(ChartError::RenderInit { attempts });
        }

        retry += 1;
        let delay = policy.delay_for(retry);
        warn!("Chart API not ready, retrying ({}/{}) in {:?}", retry, policy.retries, delay);
        tokio::time::sleep(delay).await;
    }
}
