// Library exports for the image text translation pipeline.

pub mod core;
pub mod orchestration;
pub mod pipeline;
pub mod services;
pub mod utils;

// Re-export commonly used types and functions
pub use crate::core::{
    config::Config,
    errors::{ConfigError, PipelineError, TranslationError, WarpError},
    types::{BoundingBox, OcrItem, Quad, Region, TranslatedImage},
};

pub use orchestration::{ImageTranslator, TranslateImageRequest};

pub use pipeline::layout::TextLayoutEngine;

pub use services::translation::{HttpTranslator, MockTranslator, Translator};

pub use utils::{image_ops::load_image_from_memory_async, Metrics};
