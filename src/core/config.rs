use crate::core::errors::ConfigError;
use std::env;
use tracing::Level;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub log_level: Level,
}

/// Region grouping configuration (OCR tokens -> lines -> paragraphs)
#[derive(Debug, Clone)]
pub struct GroupingConfig {
    /// Tokens whose vertical center is within this factor of the median
    /// token height join an existing line group.
    pub line_center_factor: f64,
    /// Minimum vertical overlap ratio for joining a line group.
    pub line_overlap_min: f64,
    /// Lines merge into a paragraph while the gap is within this factor
    /// of the median line height.
    pub paragraph_gap_factor: f64,
}

/// Mask and inpainting configuration
#[derive(Debug, Clone)]
pub struct InpaintConfig {
    /// Minimum padding around region boxes when computing work windows; the
    /// effective padding never drops below the dilation radius.
    pub mask_padding: f64,
    /// Dilation radius = clamp(round(scale * median(min dim)) + 1, min, max).
    pub dilation_scale: f64,
    pub dilation_min: u32,
    pub dilation_max: u32,
    /// Regions whose bounds are within this many pixels share an inpaint group.
    pub group_gap_px: u32,
    /// Mask density above which a group is inpainted as one union mask.
    pub union_density: f64,
    /// Member-area/union-area ratio above which a group is union-inpainted.
    pub union_area_ratio: f64,
    /// Radial strategy: capped search distance along each compass direction.
    pub max_search_distance: u32,
    /// Default strategy name: "radial" or "flood".
    pub strategy: String,
}

/// Text rendering configuration
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Gaussian-ish blur radius applied to the shadow pass.
    pub shadow_blur: f32,
    pub shadow_offset_x: i32,
    pub shadow_offset_y: i32,
    /// Texture grain modulation applied to main-text alpha (fraction, e.g. 0.18).
    pub texture_grain: f32,
    /// Amplitude of the final per-pixel noise pass.
    pub noise_amplitude: f32,
    /// Directory scanned for font files at startup.
    pub fonts_dir: String,
}

/// Translation collaborator configuration
#[derive(Debug, Clone)]
pub struct TranslatorConfig {
    pub endpoint: String,
    pub timeout_seconds: u64,
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub grouping: GroupingConfig,
    pub inpaint: InpaintConfig,
    pub render: RenderConfig,
    pub translator: TranslatorConfig,
}

impl Config {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Self::load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_env() -> Result<Self, ConfigError> {
        let log_level = env::var("LOG_LEVEL")
            .ok()
            .and_then(|s| match s.to_lowercase().as_str() {
                "trace" => Some(Level::TRACE),
                "debug" => Some(Level::DEBUG),
                "info" => Some(Level::INFO),
                "warn" | "warning" => Some(Level::WARN),
                "error" => Some(Level::ERROR),
                _ => None,
            })
            .unwrap_or(Level::INFO);

        Ok(Self {
            server: ServerConfig {
                port: env_parsed("SERVER_PORT", 7850),
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                log_level,
            },
            grouping: GroupingConfig {
                line_center_factor: env_parsed("LINE_CENTER_FACTOR", 0.8),
                line_overlap_min: env_parsed("LINE_OVERLAP_MIN", 0.5),
                paragraph_gap_factor: env_parsed("PARAGRAPH_GAP_FACTOR", 0.7),
            },
            inpaint: InpaintConfig {
                mask_padding: env_parsed("MASK_PADDING_PX", 8.0),
                dilation_scale: env_parsed("DILATION_SCALE", 0.04),
                dilation_min: env_parsed("DILATION_MIN", 2),
                dilation_max: env_parsed("DILATION_MAX", 14),
                group_gap_px: env_parsed("INPAINT_GROUP_GAP_PX", 12),
                union_density: env_parsed("INPAINT_UNION_DENSITY", 0.35),
                union_area_ratio: env_parsed("INPAINT_UNION_AREA_RATIO", 0.5),
                max_search_distance: env_parsed("INPAINT_MAX_SEARCH", 48),
                strategy: env::var("INPAINT_STRATEGY").unwrap_or_else(|_| "radial".to_string()),
            },
            render: RenderConfig {
                shadow_blur: env_parsed("SHADOW_BLUR", 2.0),
                shadow_offset_x: env_parsed("SHADOW_OFFSET_X", 1),
                shadow_offset_y: env_parsed("SHADOW_OFFSET_Y", 1),
                texture_grain: env_parsed("TEXTURE_GRAIN", 0.18),
                noise_amplitude: env_parsed("NOISE_AMPLITUDE", 1.5),
                fonts_dir: env::var("FONTS_DIR").unwrap_or_else(|_| "fonts".to_string()),
            },
            translator: TranslatorConfig {
                endpoint: env::var("TRANSLATE_ENDPOINT")
                    .unwrap_or_else(|_| "http://127.0.0.1:7851/translate".to_string()),
                timeout_seconds: env_parsed("TRANSLATE_TIMEOUT_SECONDS", 30),
            },
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=4.0).contains(&self.grouping.line_center_factor)
            || self.grouping.line_center_factor == 0.0
        {
            return Err(ConfigError::InvalidLineFactor(
                self.grouping.line_center_factor,
            ));
        }

        if !(0.0..=1.0).contains(&self.grouping.line_overlap_min) {
            return Err(ConfigError::InvalidOverlapThreshold(
                self.grouping.line_overlap_min,
            ));
        }

        if !(0.0..=4.0).contains(&self.grouping.paragraph_gap_factor)
            || self.grouping.paragraph_gap_factor == 0.0
        {
            return Err(ConfigError::InvalidParagraphGapFactor(
                self.grouping.paragraph_gap_factor,
            ));
        }

        if self.inpaint.dilation_min > self.inpaint.dilation_max {
            return Err(ConfigError::InvalidInpaintConfig(format!(
                "dilation_min ({}) exceeds dilation_max ({})",
                self.inpaint.dilation_min, self.inpaint.dilation_max
            )));
        }

        if !(0.0..=1.0).contains(&self.inpaint.union_density) {
            return Err(ConfigError::InvalidInpaintConfig(format!(
                "union_density must be between 0.0 and 1.0, got {}",
                self.inpaint.union_density
            )));
        }

        if self.inpaint.max_search_distance == 0 {
            return Err(ConfigError::InvalidInpaintConfig(
                "max_search_distance must be > 0".to_string(),
            ));
        }

        match self.inpaint.strategy.as_str() {
            "radial" | "flood" => {}
            other => {
                return Err(ConfigError::InvalidInpaintConfig(format!(
                    "strategy must be \"radial\" or \"flood\", got \"{other}\""
                )))
            }
        }

        if self.render.texture_grain < 0.0 || self.render.texture_grain > 1.0 {
            return Err(ConfigError::InvalidRenderingConfig(format!(
                "texture_grain must be between 0.0 and 1.0, got {}",
                self.render.texture_grain
            )));
        }

        if self.render.noise_amplitude < 0.0 || self.render.noise_amplitude > 16.0 {
            return Err(ConfigError::InvalidRenderingConfig(format!(
                "noise_amplitude must be between 0.0 and 16.0, got {}",
                self.render.noise_amplitude
            )));
        }

        Ok(())
    }

    pub fn server_port(&self) -> u16 {
        self.server.port
    }

    pub fn server_host(&self) -> &str {
        &self.server.host
    }

    pub fn log_level(&self) -> Level {
        self.server.log_level
    }

    pub fn mask_padding(&self) -> f64 {
        self.inpaint.mask_padding
    }

    pub fn fonts_dir(&self) -> &str {
        &self.render.fonts_dir
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

// Note: No Default implementation because Config::new() can fail.
// Tests construct a baseline config through Config::for_tests().
impl Config {
    /// Baseline configuration with all defaults, independent of the environment.
    pub fn for_tests() -> Self {
        Self {
            server: ServerConfig {
                port: 0,
                host: "127.0.0.1".to_string(),
                log_level: Level::WARN,
            },
            grouping: GroupingConfig {
                line_center_factor: 0.8,
                line_overlap_min: 0.5,
                paragraph_gap_factor: 0.7,
            },
            inpaint: InpaintConfig {
                mask_padding: 8.0,
                dilation_scale: 0.04,
                dilation_min: 2,
                dilation_max: 14,
                group_gap_px: 12,
                union_density: 0.35,
                union_area_ratio: 0.5,
                max_search_distance: 48,
                strategy: "radial".to_string(),
            },
            render: RenderConfig {
                shadow_blur: 2.0,
                shadow_offset_x: 1,
                shadow_offset_y: 1,
                texture_grain: 0.18,
                noise_amplitude: 1.5,
                fonts_dir: "fonts".to_string(),
            },
            translator: TranslatorConfig {
                endpoint: "http://127.0.0.1:0/translate".to_string(),
                timeout_seconds: 5,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = Config::for_tests();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_strategy() {
        let mut config = Config::for_tests();
        config.inpaint.strategy = "telepathy".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidInpaintConfig(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_overlap() {
        let mut config = Config::for_tests();
        config.grouping.line_overlap_min = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidOverlapThreshold(_))
        ));
    }
}
