//! Import configuration.

use geodex::{GeodexError, GeodexResult, MAX_INDEX_LEVEL};

use crate::simplify::SimplifyMethod;

/// State assumed for grid border cells no coastline ever touched.
/// Datasets clipped from a continent default to `Land`; island extracts
/// default to `Water`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorderHint {
    Land,
    Water,
}

/// Validated configuration for an import run.
///
/// Built via [`ImportParameter::builder`]; every field has a sensible
/// default.
#[derive(Debug, Clone)]
pub struct ImportParameter {
    area_index_max_level: u32,
    water_index_min_mag: u32,
    water_index_max_mag: u32,
    border_hint: BorderHint,
    optimization_zoom_steps: Vec<u32>,
    screen_width: u32,
    screen_height: u32,
    dpi: f64,
    simplify_method: SimplifyMethod,
    worker_count: usize,
    queue_depth: usize,
    batch_size: usize,
}

impl ImportParameter {
    pub fn builder() -> ImportParameterBuilder {
        ImportParameterBuilder::default()
    }

    pub fn area_index_max_level(&self) -> u32 {
        self.area_index_max_level
    }

    pub fn water_index_min_mag(&self) -> u32 {
        self.water_index_min_mag
    }

    pub fn water_index_max_mag(&self) -> u32 {
        self.water_index_max_mag
    }

    pub fn border_hint(&self) -> BorderHint {
        self.border_hint
    }

    pub fn optimization_zoom_steps(&self) -> &[u32] {
        &self.optimization_zoom_steps
    }

    pub fn screen_width(&self) -> u32 {
        self.screen_width
    }

    pub fn screen_height(&self) -> u32 {
        self.screen_height
    }

    pub fn dpi(&self) -> f64 {
        self.dpi
    }

    pub fn simplify_method(&self) -> SimplifyMethod {
        self.simplify_method
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl Default for ImportParameter {
    fn default() -> Self {
        ImportParameter::builder().build().expect("defaults are valid")
    }
}

/// Builder for [`ImportParameter`].
#[derive(Debug, Clone)]
pub struct ImportParameterBuilder {
    area_index_max_level: u32,
    water_index_min_mag: u32,
    water_index_max_mag: u32,
    border_hint: BorderHint,
    optimization_zoom_steps: Vec<u32>,
    screen_width: u32,
    screen_height: u32,
    dpi: f64,
    simplify_method: SimplifyMethod,
    worker_count: usize,
    queue_depth: usize,
    batch_size: usize,
}

impl Default for ImportParameterBuilder {
    fn default() -> Self {
        ImportParameterBuilder {
            area_index_max_level: 14,
            water_index_min_mag: 6,
            water_index_max_mag: 11,
            border_hint: BorderHint::Land,
            optimization_zoom_steps: vec![4, 6, 8],
            screen_width: 1024,
            screen_height: 768,
            dpi: 96.0,
            simplify_method: SimplifyMethod::Quality,
            worker_count: 4,
            queue_depth: 256,
            batch_size: 512,
        }
    }
}

impl ImportParameterBuilder {
    pub fn area_index_max_level(mut self, level: u32) -> Self {
        self.area_index_max_level = level;
        self
    }

    pub fn water_index_magnifications(mut self, min: u32, max: u32) -> Self {
        self.water_index_min_mag = min;
        self.water_index_max_mag = max;
        self
    }

    pub fn border_hint(mut self, hint: BorderHint) -> Self {
        self.border_hint = hint;
        self
    }

    pub fn optimization_zoom_steps(mut self, steps: Vec<u32>) -> Self {
        self.optimization_zoom_steps = steps;
        self
    }

    pub fn screen(mut self, width: u32, height: u32, dpi: f64) -> Self {
        self.screen_width = width;
        self.screen_height = height;
        self.dpi = dpi;
        self
    }

    pub fn simplify_method(mut self, method: SimplifyMethod) -> Self {
        self.simplify_method = method;
        self
    }

    pub fn worker_count(mut self, workers: usize) -> Self {
        self.worker_count = workers;
        self
    }

    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn build(self) -> GeodexResult<ImportParameter> {
        if self.area_index_max_level == 0 || self.area_index_max_level > MAX_INDEX_LEVEL {
            return Err(GeodexError::InvalidParameter(format!(
                "area index max level {} outside 1..={}",
                self.area_index_max_level, MAX_INDEX_LEVEL
            )));
        }
        if self.water_index_min_mag > self.water_index_max_mag {
            return Err(GeodexError::InvalidParameter(format!(
                "water index magnification range {}..{} is inverted",
                self.water_index_min_mag, self.water_index_max_mag
            )));
        }
        if self.water_index_max_mag > MAX_INDEX_LEVEL {
            return Err(GeodexError::InvalidParameter(format!(
                "water index max magnification {} exceeds {}",
                self.water_index_max_mag, MAX_INDEX_LEVEL
            )));
        }
        if !self
            .optimization_zoom_steps
            .windows(2)
            .all(|pair| pair[0] < pair[1])
        {
            return Err(GeodexError::InvalidParameter(
                "optimization zoom steps must be strictly increasing".to_string(),
            ));
        }
        if let Some(last) = self.optimization_zoom_steps.last() {
            if *last > MAX_INDEX_LEVEL {
                return Err(GeodexError::InvalidParameter(format!(
                    "optimization zoom step {} exceeds {}",
                    last, MAX_INDEX_LEVEL
                )));
            }
        }
        if self.screen_width == 0 || self.screen_height == 0 || !(self.dpi > 0.0) {
            return Err(GeodexError::InvalidParameter(
                "screen dimensions and dpi must be positive".to_string(),
            ));
        }
        if self.worker_count == 0 || self.queue_depth == 0 || self.batch_size == 0 {
            return Err(GeodexError::InvalidParameter(
                "worker count, queue depth and batch size must be positive".to_string(),
            ));
        }

        Ok(ImportParameter {
            area_index_max_level: self.area_index_max_level,
            water_index_min_mag: self.water_index_min_mag,
            water_index_max_mag: self.water_index_max_mag,
            border_hint: self.border_hint,
            optimization_zoom_steps: self.optimization_zoom_steps,
            screen_width: self.screen_width,
            screen_height: self.screen_height,
            dpi: self.dpi,
            simplify_method: self.simplify_method,
            worker_count: self.worker_count,
            queue_depth: self.queue_depth,
            batch_size: self.batch_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let parameter = ImportParameter::default();
        assert_eq!(parameter.area_index_max_level(), 14);
        assert_eq!(parameter.border_hint(), BorderHint::Land);
        assert_eq!(parameter.optimization_zoom_steps(), &[4, 6, 8]);
    }

    #[test]
    fn test_rejects_inverted_water_range() {
        let result = ImportParameter::builder()
            .water_index_magnifications(10, 4)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_unsorted_zoom_steps() {
        let result = ImportParameter::builder()
            .optimization_zoom_steps(vec![8, 4])
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_zero_workers() {
        let result = ImportParameter::builder().worker_count(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_zoom_steps_disable_optimization() {
        let parameter = ImportParameter::builder()
            .optimization_zoom_steps(Vec::new())
            .build()
            .unwrap();
        assert!(parameter.optimization_zoom_steps().is_empty());
    }

    #[test]
    fn test_builder_round_trip() {
        let parameter = ImportParameter::builder()
            .area_index_max_level(12)
            .water_index_magnifications(5, 9)
            .border_hint(BorderHint::Water)
            .screen(800, 480, 120.0)
            .worker_count(2)
            .build()
            .unwrap();

        assert_eq!(parameter.area_index_max_level(), 12);
        assert_eq!(parameter.water_index_min_mag(), 5);
        assert_eq!(parameter.water_index_max_mag(), 9);
        assert_eq!(parameter.border_hint(), BorderHint::Water);
        assert_eq!(parameter.screen_width(), 800);
        assert_eq!(parameter.worker_count(), 2);
    }
}
