//
// isi-core - acquisition and analysis core for retinotopic mapping
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Command-line argument parsing.
//!
//! `serve` runs the headless acquisition/control-plane process;
//! `analyze` runs `AnalysisPipeline` once over an already-recorded
//! session and exits. Unrecognized input is an invalid-arguments error
//! (`spec.md` §6 exit code 2), not a silent fall-back to defaults, the
//! way the teacher's hand-rolled parser fell back for bad flags.
//!

use std::path::PathBuf;

mod cmdline {
    pub const ENABLE_LOGGING: &str = "log";
    pub const CONFIG: &str = "config";
    pub const SESSIONS_DIR: &str = "sessions-dir";
    pub const SIMULATE_CAMERA: &str = "simulate-camera";
}

#[derive(Debug, PartialEq)]
pub enum Command {
    Serve { simulate_camera: bool },
    Analyze { session_dir: PathBuf },
}

#[derive(Debug, PartialEq)]
pub struct Args {
    pub command: Command,
    pub config_path: Option<PathBuf>,
    pub sessions_dir: Option<PathBuf>,
    pub logging: bool,
}

pub fn parse_command_line<I: Iterator<Item = String>>(stream: I) -> Result<Args, String> {
    let allowed_options =
        [cmdline::ENABLE_LOGGING, cmdline::CONFIG, cmdline::SESSIONS_DIR, cmdline::SIMULATE_CAMERA];

    let mut option_values = std::collections::HashMap::<String, Vec<String>>::new();
    let mut positionals: Vec<String> = Vec::new();
    let mut current: Option<&mut Vec<String>> = None;

    for arg in stream.skip(1) /* skip the binary name */ {
        if let Some(opt) = arg.strip_prefix("--") {
            if !allowed_options.contains(&opt) {
                return Err(format!("unknown command-line option: {opt}"));
            }
            current = Some(option_values.entry(opt.to_string()).or_default());
        } else if let Some(values) = current.as_mut() {
            values.push(arg);
        } else {
            positionals.push(arg);
        }
    }

    let config_path = option_values.get(cmdline::CONFIG).and_then(|v| v.first()).map(PathBuf::from);
    let sessions_dir =
        option_values.get(cmdline::SESSIONS_DIR).and_then(|v| v.first()).map(PathBuf::from);
    let logging = option_values.contains_key(cmdline::ENABLE_LOGGING);
    let simulate_camera = option_values.contains_key(cmdline::SIMULATE_CAMERA);

    let command = match positionals.first().map(String::as_str) {
        None | Some("serve") => Command::Serve { simulate_camera },
        Some("analyze") => {
            let session_dir = positionals
                .get(1)
                .map(PathBuf::from)
                .ok_or_else(|| "`analyze` requires a session directory argument".to_string())?;
            Command::Analyze { session_dir }
        }
        Some(other) => return Err(format!("unknown subcommand: {other}")),
    };

    Ok(Args { command, config_path, sessions_dir, logging })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(tokens: &[&str]) -> Result<Args, String> {
        let mut v = vec!["isi-core".to_string()];
        v.extend(tokens.iter().map(|s| s.to_string()));
        parse_command_line(v.into_iter())
    }

    #[test]
    fn no_arguments_defaults_to_serve() {
        let parsed = args(&[]).unwrap();
        assert_eq!(parsed.command, Command::Serve { simulate_camera: false });
        assert!(!parsed.logging);
    }

    #[test]
    fn analyze_requires_a_session_directory() {
        assert!(args(&["analyze"]).is_err());
        let parsed = args(&["analyze", "/tmp/sess1"]).unwrap();
        assert_eq!(parsed.command, Command::Analyze { session_dir: PathBuf::from("/tmp/sess1") });
    }

    #[test]
    fn unknown_subcommand_is_rejected() {
        assert!(args(&["frobnicate"]).is_err());
    }

    #[test]
    fn unknown_option_is_rejected() {
        assert!(args(&["--bogus"]).is_err());
    }

    #[test]
    fn simulate_camera_flag_is_parsed() {
        let parsed = args(&["--simulate-camera"]).unwrap();
        assert_eq!(parsed.command, Command::Serve { simulate_camera: true });
    }

    #[test]
    fn config_and_sessions_dir_flags_are_parsed() {
        let parsed = args(&["--config", "/etc/isi.json", "--sessions-dir", "/data", "--log"]).unwrap();
        assert_eq!(parsed.config_path, Some(PathBuf::from("/etc/isi.json")));
        assert_eq!(parsed.sessions_dir, Some(PathBuf::from("/data")));
        assert!(parsed.logging);
    }
}
