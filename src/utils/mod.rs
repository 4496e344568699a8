pub mod image_ops;
pub mod metrics;

pub use metrics::Metrics;
