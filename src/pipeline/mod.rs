// Image translation pipeline stages, in invocation order: region grouping,
// mask rasterization, inpainting, texture sampling, text layout, warping.

pub mod inpaint;
pub mod layout;
pub mod mask;
pub mod regions;
pub mod texture;
pub mod warp;
