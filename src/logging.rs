//! Diagnostic output on stderr via `tracing`.
//!
//! Scheduled runs stay silent unless something is wrong: ordinary outcomes
//! are logged at `info`, which is only shown with `--verbose`.

use tracing_subscriber::EnvFilter;

/// Filter directive for a `-v` count, used when `RUST_LOG` is not set.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "synctick=warn",
        1 => "synctick=info",
        _ => "synctick=debug",
    }
}

pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    // A second init (e.g. in tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_raises_level() {
        assert_eq!(default_directive(0), "synctick=warn");
        assert_eq!(default_directive(1), "synctick=info");
        assert_eq!(default_directive(4), "synctick=debug");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init(0);
        init(2);
    }
}
