/// The current version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version of the generated artifact format.
/// Bump this when proxy or rewrite output changes shape, so stale
/// artifacts on disk are not reused.
pub const ARTIFACT_SCHEMA_VERSION: u32 = 1;

/// Key mixed into artifact hashes.
#[must_use]
pub fn artifact_key() -> String {
    format!("webmod {VERSION} v{ARTIFACT_SCHEMA_VERSION}")
}
