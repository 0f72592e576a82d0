// Copyright (c) 2023 Mike Tsao. All rights reserved.

// https://stackoverflow.com/a/65972328/344467
/// The build's version for logs and `--version`. A `GIT_DESCRIBE` set at
/// build time wins over the package version.
pub fn app_version() -> &'static str {
    option_env!("GIT_DESCRIBE").unwrap_or(env!("CARGO_PKG_VERSION"))
}
