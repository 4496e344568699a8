pub mod translate_image;

pub use translate_image::{ImageTranslator, TranslateImageRequest};
