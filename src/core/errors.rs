// Custom error types for the translation pipeline.
//
// Using thiserror for ergonomic error definitions with:
// - Context preservation
// - Type-safe error matching
// - Source error chaining

use thiserror::Error;

/// Translation collaborator errors.
#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("API request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Translation backend rejected the request: {status}")]
    Rejected { status: u16 },
}

/// Homography/warp errors.
#[derive(Debug, Error)]
pub enum WarpError {
    #[error("Homography solve failed. Near-singular system (pivot {pivot:.3e})")]
    SingularSystem { pivot: f64 },

    #[error("Homography solve failed. Degenerate matrix (determinant {det:.3e})")]
    SingularMatrix { det: f64 },

    #[error("Degenerate quad: zero-area destination")]
    DegenerateQuad,
}

/// Pipeline orchestration errors. All failures abort the whole call;
/// no partial results are returned.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No OCR regions available for translation.")]
    NoOcrRegions,

    #[error("Invalid OCR dimensions: {width}x{height}")]
    InvalidOcrDimensions { width: u32, height: u32 },

    #[error("Unable to compute translation bounds.")]
    BoundsUnavailable,

    #[error("No translated text to render.")]
    NoTranslatedText,

    #[error("Translation failed for {region_id}: {source}")]
    TranslationFailed {
        region_id: String,
        #[source]
        source: TranslationError,
    },

    #[error("Warp failed for {region_id}: {source}")]
    WarpFailed {
        region_id: String,
        #[source]
        source: WarpError,
    },

    #[error("Failed to encode translated image: {0}")]
    EncodeFailed(#[from] image::ImageError),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Line grouping factor must be in (0.0, 4.0], got {0}")]
    InvalidLineFactor(f64),

    #[error("Overlap threshold must be in [0.0, 1.0], got {0}")]
    InvalidOverlapThreshold(f64),

    #[error("Paragraph gap factor must be in (0.0, 4.0], got {0}")]
    InvalidParagraphGapFactor(f64),

    #[error("Invalid inpaint config: {0}")]
    InvalidInpaintConfig(String),

    #[error("Invalid rendering config: {0}")]
    InvalidRenderingConfig(String),

    #[error("Environment variable parsing failed: {0}")]
    EnvVarError(String),
}

// Convenience type aliases for Results
pub type TranslationResult<T> = Result<T, TranslationError>;
pub type WarpResult<T> = Result<T, WarpError>;
pub type PipelineResult<T> = Result<T, PipelineError>;
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Helper trait for attaching the failing region to collaborator errors.
pub trait RegionContext<T> {
    fn with_region_context(self, region_id: &str) -> PipelineResult<T>;
}

impl<T> RegionContext<T> for TranslationResult<T> {
    fn with_region_context(self, region_id: &str) -> PipelineResult<T> {
        self.map_err(|e| PipelineError::TranslationFailed {
            region_id: region_id.to_string(),
            source: e,
        })
    }
}

impl<T> RegionContext<T> for WarpResult<T> {
    fn with_region_context(self, region_id: &str) -> PipelineResult<T> {
        self.map_err(|e| PipelineError::WarpFailed {
            region_id: region_id.to_string(),
            source: e,
        })
    }
}
