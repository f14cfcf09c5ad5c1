pub(crate) mod logging;

pub use self::logging::{init_logging, tracing_err};

/// Version info attached to the startup log record
pub const BUILD_LABELS: &[(&str, &str)] = &[
    ("app_version", env!("CARGO_PKG_VERSION")),
    ("app_git_commit", env!("VERGEN_GIT_SHA")),
    ("app_git_branch", env!("VERGEN_GIT_BRANCH")),
    ("app_build_timestamp", env!("VERGEN_BUILD_TIMESTAMP")),
];
