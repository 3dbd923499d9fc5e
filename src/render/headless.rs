//! In-memory rendering surface. Records every primitive it is handed so the
//! CLI can report what would be drawn and tests can assert on it.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

use super::init::SurfaceFactory;
use super::surface::*;

#[derive(Debug, Default)]
struct HeadlessSeries {
    kind: Option<SeriesKind>,
    options: Option<LineSeriesOptions>,
    data: Vec<SeriesPoint>,
    markers: Vec<Marker>,
    set_data_calls: usize,
    update_calls: usize,
}

pub struct HeadlessSurface {
    capabilities: SurfaceCapabilities,
    next_id: u64,
    series: BTreeMap<SeriesId, HeadlessSeries>,
    price_lines: BTreeMap<PriceLineId, (SeriesId, PriceLine)>,
    range_callback: Option<RangeCallback>,
    released: bool,
    release_counter: Option<Arc<AtomicUsize>>,
}

impl HeadlessSurface {
    pub fn new(capabilities: SurfaceCapabilities) -> Self {
        Self {
            capabilities,
            next_id: 1,
            series: BTreeMap::new(),
            price_lines: BTreeMap::new(),
            range_callback: None,
            released: false,
            release_counter: None,
        }
    }

    fn allocate(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn data(&self, series: SeriesId) -> &[SeriesPoint] {
        self.series
            .get(&series)
            .map(|s| s.data.as_slice())
            .unwrap_or(&[])
    }

    pub fn series_kind(&self, series: SeriesId) -> Option<SeriesKind> {
        self.series.get(&series).and_then(|s| s.kind)
    }

    /// Auxiliary line series with their options and points.
    pub fn line_series(&self) -> Vec<(&LineSeriesOptions, &[SeriesPoint])> {
        self.series
            .values()
            .filter_map(|s| s.options.as_ref().map(|o| (o, s.data.as_slice())))
            .collect()
    }

    pub fn price_lines(&self) -> Vec<&PriceLine> {
        self.price_lines.values().map(|(_, line)| line).collect()
    }

    pub fn markers(&self, series: SeriesId) -> &[Marker] {
        self.series
            .get(&series)
            .map(|s| s.markers.as_slice())
            .unwrap_or(&[])
    }

    pub fn set_data_count(&self, series: SeriesId) -> usize {
        self.series.get(&series).map_or(0, |s| s.set_data_calls)
    }

    pub fn update_count(&self, series: SeriesId) -> usize {
        self.series.get(&series).map_or(0, |s| s.update_calls)
    }

    pub fn has_range_listener(&self) -> bool {
        self.range_callback.is_some()
    }

    /// Simulates the user scrolling the time axis.
    pub fn emit_visible_range(&self, range: LogicalRange) {
        if let Some(callback) = &self.range_callback {
            callback(range);
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl std::fmt::Debug for HeadlessSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessSurface")
            .field("capabilities", &self.capabilities)
            .field("series", &self.series.len())
            .field("price_lines", &self.price_lines.len())
            .field("released", &self.released)
            .finish()
    }
}

impl RenderingSurface for HeadlessSurface {
    fn capabilities(&self) -> SurfaceCapabilities {
        self.capabilities
    }

    fn create_series(&mut self, kind: SeriesKind) -> Option<SeriesId> {
        if self.released || !self.capabilities.supports(kind) {
            return None;
        }
        let id = SeriesId(self.allocate());
        self.series.insert(
            id,
            HeadlessSeries {
                kind: Some(kind),
                ..Default::default()
            },
        );
        trace!("create_series {:?} -> {:?}", kind, id);
        Some(id)
    }

    fn set_data(&mut self, series: SeriesId, data: Vec<SeriesPoint>) {
        match self.series.get_mut(&series) {
            Some(s) => {
                trace!("set_data {:?}: {} points", series, data.len());
                s.data = data;
                s.set_data_calls += 1;
            }
            None => warn!("set_data on unknown series {:?}", series),
        }
    }

    fn update_point(&mut self, series: SeriesId, point: SeriesPoint) {
        let Some(s) = self.series.get_mut(&series) else {
            warn!("update on unknown series {:?}", series);
            return;
        };
        s.update_calls += 1;
        match s.data.last().map(|p| p.time()) {
            Some(last) if point.time() < last => {
                warn!("Ignoring update older than last point ({} < {})", point.time(), last);
            }
            Some(last) if point.time() == last => {
                trace!("update {:?}: replace {}", series, last);
                if let Some(tail) = s.data.last_mut() {
                    *tail = point;
                }
            }
            _ => {
                trace!("update {:?}: append {}", series, point.time());
                s.data.push(point);
            }
        }
    }

    fn add_line_series(&mut self, options: LineSeriesOptions) -> SeriesId {
        let id = SeriesId(self.allocate());
        trace!("add_line_series {:?} ({})", id, options.color);
        self.series.insert(
            id,
            HeadlessSeries {
                options: Some(options),
                ..Default::default()
            },
        );
        id
    }

    fn remove_series(&mut self, series: SeriesId) {
        trace!("remove_series {:?}", series);
        self.series.remove(&series);
        self.price_lines.retain(|_, (owner, _)| *owner != series);
    }

    fn create_price_line(&mut self, series: SeriesId, line: PriceLine) -> PriceLineId {
        let id = PriceLineId(self.allocate());
        trace!("create_price_line {:?} at {}", id, line.price);
        self.price_lines.insert(id, (series, line));
        id
    }

    fn remove_price_line(&mut self, _series: SeriesId, line: PriceLineId) {
        trace!("remove_price_line {:?}", line);
        self.price_lines.remove(&line);
    }

    fn set_markers(&mut self, series: SeriesId, markers: Vec<Marker>) {
        if let Some(s) = self.series.get_mut(&series) {
            trace!("set_markers {:?}: {}", series, markers.len());
            s.markers = markers;
        }
    }

    fn subscribe_visible_range(&mut self, callback: RangeCallback) {
        self.range_callback = Some(callback);
    }

    fn unsubscribe_visible_range(&mut self) {
        self.range_callback = None;
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.range_callback = None;
        self.series.clear();
        self.price_lines.clear();
        if let Some(counter) = &self.release_counter {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        trace!("surface released");
    }
}

/// Builds headless surfaces. `ready_after(n)` makes the first `n` surfaces
/// come up without any series factory, the way a widget that has not
/// attached its API yet does.
pub struct HeadlessFactory {
    capabilities: SurfaceCapabilities,
    not_ready: usize,
    created: usize,
    released: Arc<AtomicUsize>,
}

impl HeadlessFactory {
    pub fn new() -> Self {
        Self::with_capabilities(SurfaceCapabilities::all())
    }

    pub fn with_capabilities(capabilities: SurfaceCapabilities) -> Self {
        Self {
            capabilities,
            not_ready: 0,
            created: 0,
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn ready_after(mut self, attempts: usize) -> Self {
        self.not_ready = attempts;
        self
    }

    pub fn created(&self) -> usize {
        self.created
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl Default for HeadlessFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SurfaceFactory for HeadlessFactory {
    type Surface = HeadlessSurface;

    fn resource_key(&self) -> &str {
        "headless"
    }

    fn create(&mut self) -> HeadlessSurface {
        let capabilities = if self.created < self.not_ready {
            SurfaceCapabilities::default()
        } else {
            self.capabilities
        };
        self.created += 1;

        let mut surface = HeadlessSurface::new(capabilities);
        surface.release_counter = Some(Arc::clone(&self.released));
        surface
    }
}
