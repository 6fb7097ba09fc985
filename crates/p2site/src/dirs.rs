//! Platform directories used for configuration discovery

use std::path::PathBuf;

use etcetera::{BaseStrategy, choose_base_strategy};
use log::debug;

/// Application directory name below the platform config directory
pub const APP_DIR: &str = "p2site";

/// `<config dir>/p2site`, or `None` when no home directory can be found
pub fn user_config_dir() -> Option<PathBuf> {
    match choose_base_strategy() {
        Ok(strategy) => Some(strategy.config_dir().join(APP_DIR)),
        Err(e) => {
            debug!("No user config directory: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_config_dir_ends_with_app_dir() {
        if let Some(dir) = user_config_dir() {
            assert!(dir.ends_with(APP_DIR));
        }
    }
}
