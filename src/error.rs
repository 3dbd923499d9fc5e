use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChartError {
    /// History or backfill request failed. `status` is `None` when the
    /// request never produced an HTTP response.
    #[error("Fetch failed{}: {body}", status_suffix(.status))]
    Fetch { status: Option<u16>, body: String },

    #[error("Stream: {0}")]
    Stream(String),

    #[error("Rendering surface not ready after {attempts} attempts")]
    RenderInit { attempts: u32 },

    #[error("Invalid symbol: {0:?}")]
    InvalidSymbol(String),

    #[error("Invalid interval: {0:?}")]
    InvalidInterval(String),

    #[error("Config: {0}")]
    Config(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({})", s)).unwrap_or_default()
}

impl ChartError {
    pub fn fetch(status: Option<u16>, body: impl Into<String>) -> Self {
        ChartError::Fetch {
            status,
            body: body.into(),
        }
    }

    /// Terminal errors stop the chart instance; everything else is retried
    /// by a later load, scroll or resubscription.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ChartError::RenderInit { .. })
    }
}

impl From<reqwest::Error> for ChartError {
    fn from(e: reqwest::Error) -> Self {
        ChartError::fetch(e.status().map(|s| s.as_u16()), e.to_string())
    }
}
