//
// isi-core - acquisition and analysis core for retinotopic mapping
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Default filesystem locations. `ParameterStore` owns all
//! scientifically-meaningful configuration (`spec.md` §3); this module
//! only resolves where its document and recorded sessions live absent
//! an explicit `--config`/`--sessions-dir` override, the way the
//! teacher's `config_file_path` resolved its key-file's location.
//!

use std::path::PathBuf;

const APP_DIR: &str = "isi-core";

pub fn default_parameter_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("parameters.json")
}

pub fn default_sessions_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("sessions")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_are_rooted_under_the_app_directory() {
        assert!(default_parameter_file_path().ends_with("isi-core/parameters.json"));
        assert!(default_sessions_dir().ends_with("isi-core/sessions"));
    }
}
