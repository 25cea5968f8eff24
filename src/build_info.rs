//! Build metadata embedded by `build.rs`.

/// Git SHA of the commit this binary was built from ("unknown" outside git).
pub const BUILD_SHA: &str = env!("FARMD_GIT_SHA");

/// Commit timestamp in Unix epoch seconds (0 outside git).
pub const BUILD_TIMESTAMP: &str = env!("FARMD_BUILD_TIMESTAMP");
