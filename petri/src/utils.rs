/// Serde helpers for the camera image formats and frame regions.
pub mod image;
/// Macros used by the test suites to locate configuration files.
pub mod tests;
