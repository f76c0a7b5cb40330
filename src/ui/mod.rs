//! Rendering into the scan-out surface.

pub mod renderer;
