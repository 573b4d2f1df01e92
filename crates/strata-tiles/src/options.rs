//! Validated tileset options.
//!
//! Setters reject out-of-range values with [`TilesError::InvalidOption`]
//! and leave the previous value in place; nothing is clamped.

use strata_config::TilesetConfig;

use crate::dynamic_sse::DynamicSseSettings;
use crate::error::{TilesError, TilesResult};

/// Level-of-detail, memory and streaming knobs of a [`Tileset`](crate::tileset::Tileset).
#[derive(Clone, Debug, PartialEq)]
pub struct TilesetOptions {
    maximum_screen_space_error: f64,
    maximum_memory_usage: u64,
    skip_level_of_detail: bool,
    base_screen_space_error: f64,
    skip_screen_space_error_factor: f64,
    skip_levels: u32,
    immediately_load_desired_level_of_detail: bool,
    load_siblings: bool,
    cull_with_children_bounds: bool,
    dynamic_screen_space_error: bool,
    dynamic_screen_space_error_settings: DynamicSseSettings,
    prefer_leaves: bool,
}

impl Default for TilesetOptions {
    fn default() -> Self {
        Self {
            maximum_screen_space_error: 16.0,
            maximum_memory_usage: 512 * 1024 * 1024,
            skip_level_of_detail: false,
            base_screen_space_error: 1024.0,
            skip_screen_space_error_factor: 16.0,
            skip_levels: 1,
            immediately_load_desired_level_of_detail: false,
            load_siblings: false,
            cull_with_children_bounds: true,
            dynamic_screen_space_error: false,
            dynamic_screen_space_error_settings: DynamicSseSettings::default(),
            prefer_leaves: false,
        }
    }
}

fn non_negative(name: &'static str, value: f64) -> TilesResult<f64> {
    if value.is_nan() || value < 0.0 {
        return Err(TilesError::InvalidOption {
            name,
            value: value.to_string(),
        });
    }
    Ok(value)
}

impl TilesetOptions {
    /// Target screen-space error in pixels. Tiles refine while above it.
    pub fn maximum_screen_space_error(&self) -> f64 {
        self.maximum_screen_space_error
    }

    /// Fails on negative or NaN values.
    pub fn set_maximum_screen_space_error(&mut self, value: f64) -> TilesResult<()> {
        self.maximum_screen_space_error = non_negative("maximum_screen_space_error", value)?;
        Ok(())
    }

    /// Resident content budget in bytes.
    pub fn maximum_memory_usage(&self) -> u64 {
        self.maximum_memory_usage
    }

    /// Set the budget in bytes. Zero evicts everything not used this frame.
    pub fn set_maximum_memory_usage(&mut self, bytes: u64) {
        self.maximum_memory_usage = bytes;
    }

    /// Whether descendants may load and draw before their ancestors' full child sets.
    pub fn skip_level_of_detail(&self) -> bool {
        self.skip_level_of_detail
    }

    /// Enable or disable skipping levels of detail.
    pub fn set_skip_level_of_detail(&mut self, enabled: bool) {
        self.skip_level_of_detail = enabled;
    }

    /// Error that must be reached before levels may be skipped.
    pub fn base_screen_space_error(&self) -> f64 {
        self.base_screen_space_error
    }

    /// Fails on negative or NaN values.
    pub fn set_base_screen_space_error(&mut self, value: f64) -> TilesResult<()> {
        self.base_screen_space_error = non_negative("base_screen_space_error", value)?;
        Ok(())
    }

    /// Required error ratio between a tile and its nearest loaded ancestor.
    pub fn skip_screen_space_error_factor(&self) -> f64 {
        self.skip_screen_space_error_factor
    }

    /// Fails on negative or NaN values.
    pub fn set_skip_screen_space_error_factor(&mut self, value: f64) -> TilesResult<()> {
        self.skip_screen_space_error_factor = non_negative("skip_screen_space_error_factor", value)?;
        Ok(())
    }

    /// Minimum depth difference between a tile and its loaded ancestor.
    pub fn skip_levels(&self) -> u32 {
        self.skip_levels
    }

    /// Set the minimum depth difference for skipped loads.
    pub fn set_skip_levels(&mut self, levels: u32) {
        self.skip_levels = levels;
    }

    /// Load only tiles that meet the error target, never their ancestors.
    pub fn immediately_load_desired_level_of_detail(&self) -> bool {
        self.immediately_load_desired_level_of_detail
    }

    /// Toggle loading only the desired level of detail.
    pub fn set_immediately_load_desired_level_of_detail(&mut self, enabled: bool) {
        self.immediately_load_desired_level_of_detail = enabled;
    }

    /// Also load culled siblings of visible tiles when skipping.
    pub fn load_siblings(&self) -> bool {
        self.load_siblings
    }

    /// Toggle loading of culled siblings.
    pub fn set_load_siblings(&mut self, enabled: bool) {
        self.load_siblings = enabled;
    }

    /// Cull a replacement tile when none of its children is visible.
    pub fn cull_with_children_bounds(&self) -> bool {
        self.cull_with_children_bounds
    }

    /// Toggle culling against the union of child bounds.
    pub fn set_cull_with_children_bounds(&mut self, enabled: bool) {
        self.cull_with_children_bounds = enabled;
    }

    /// Relax the error of distant tiles in low, oblique views.
    pub fn dynamic_screen_space_error(&self) -> bool {
        self.dynamic_screen_space_error
    }

    /// Toggle the dynamic error term.
    pub fn set_dynamic_screen_space_error(&mut self, enabled: bool) {
        self.dynamic_screen_space_error = enabled;
    }

    /// Density, factor and height falloff of the dynamic error term.
    pub fn dynamic_screen_space_error_settings(&self) -> &DynamicSseSettings {
        &self.dynamic_screen_space_error_settings
    }

    /// Replace density, factor and height falloff together.
    ///
    /// All three must be non-negative and the falloff at most one.
    pub fn set_dynamic_screen_space_error_settings(&mut self, settings: DynamicSseSettings) -> TilesResult<()> {
        non_negative("dynamic_screen_space_error_density", settings.density)?;
        non_negative("dynamic_screen_space_error_factor", settings.factor)?;
        let falloff = non_negative("dynamic_screen_space_error_height_falloff", settings.height_falloff)?;
        if falloff > 1.0 {
            return Err(TilesError::InvalidOption {
                name: "dynamic_screen_space_error_height_falloff",
                value: falloff.to_string(),
            });
        }
        self.dynamic_screen_space_error_settings = settings;
        Ok(())
    }

    /// Request deeper tiles before shallower ones.
    pub fn prefer_leaves(&self) -> bool {
        self.prefer_leaves
    }

    /// Toggle preferring deeper tiles in request order.
    pub fn set_prefer_leaves(&mut self, enabled: bool) {
        self.prefer_leaves = enabled;
    }
}

impl TryFrom<&TilesetConfig> for TilesetOptions {
    type Error = TilesError;

    fn try_from(config: &TilesetConfig) -> TilesResult<Self> {
        let mut options = Self::default();
        options.set_maximum_screen_space_error(config.maximum_screen_space_error)?;
        let bytes = config
            .maximum_memory_usage_mb
            .checked_mul(1024 * 1024)
            .ok_or_else(|| TilesError::InvalidOption {
                name: "maximum_memory_usage_mb",
                value: config.maximum_memory_usage_mb.to_string(),
            })?;
        options.set_maximum_memory_usage(bytes);
        options.set_skip_level_of_detail(config.skip_level_of_detail);
        options.set_base_screen_space_error(config.base_screen_space_error)?;
        options.set_skip_screen_space_error_factor(config.skip_screen_space_error_factor)?;
        options.set_skip_levels(config.skip_levels);
        options.set_immediately_load_desired_level_of_detail(config.immediately_load_desired_level_of_detail);
        options.set_load_siblings(config.load_siblings);
        options.set_cull_with_children_bounds(config.cull_with_children_bounds);
        options.set_dynamic_screen_space_error(config.dynamic_screen_space_error);
        options.set_dynamic_screen_space_error_settings(DynamicSseSettings {
            density: config.dynamic_screen_space_error_density,
            factor: config.dynamic_screen_space_error_factor,
            height_falloff: config.dynamic_screen_space_error_height_falloff,
        })?;
        options.set_prefer_leaves(config.prefer_leaves);
        Ok(options)
    }
}
