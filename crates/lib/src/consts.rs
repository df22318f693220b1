//! Fixed names shared across the crate.

pub const APP_NAME: &str = "fnpack";

/// Build output directory, relative to the source root.
pub const BUILD_DIR: &str = "build";

/// Directory under [`BUILD_DIR`] holding one subdirectory per module.
pub const MODULES_DIR: &str = "modules";

/// Extension of compiled function bundles.
pub const COMPILED_EXT: &str = "js";

/// Extension of packaged function archives.
pub const ARCHIVE_EXT: &str = "zip";

/// Default cache store location, relative to the working directory.
pub const DEFAULT_CACHE_FILE: &str = ".fnpack-cache.json";

/// Cache key under which the build step result is recorded.
pub const BUILD_CACHE_KEY: &str = "build";

/// Directory name prefixes never treated as modules.
pub const DEFAULT_EXCLUDED_PREFIXES: &[&str] = &["build", "node_modules", "."];

/// Source extension used when none is configured.
pub const DEFAULT_SOURCE_EXT: &str = "ts";

/// January 1, 1980 00:00:00 UTC, the zip epoch.
pub const SOURCE_DATE_EPOCH: &str = "315532800";
