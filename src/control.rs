//
// isi-core - acquisition and analysis core for retinotopic mapping
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! `ControlPlane`: the external command surface (`spec.md` §4.8/§6).
//!
//! Each handler closes over a `Services` composition-root context
//! (explicit dependency injection) rather than any global/service-
//! locator state, mirroring the teacher's own composition-root wiring
//! of `ProgramData` in `main()` — without the GTK coupling.
//!

use crate::acquisition::AcquisitionCoordinator;
use crate::analysis;
use crate::error::ControlError;
use crate::frame::PixelDepth;
use crate::parameters::ParameterStore;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug)]
enum AnalysisStatus {
    Idle,
    Running { session_id: String },
    Completed { session_id: String, output_dir: PathBuf },
    Failed { session_id: String, error: String },
}

/// Dependencies every command handler may need, built once in `main`.
pub struct Services {
    pub parameters: Arc<ParameterStore>,
    pub acquisition: Arc<AcquisitionCoordinator>,
    pub sessions_dir: PathBuf,
    pub camera_width: u32,
    pub camera_height: u32,
    pub camera_depth: PixelDepth,
    analysis_status: Arc<Mutex<AnalysisStatus>>,
}

impl Services {
    pub fn new(
        parameters: Arc<ParameterStore>,
        acquisition: Arc<AcquisitionCoordinator>,
        sessions_dir: PathBuf,
        camera_width: u32,
        camera_height: u32,
        camera_depth: PixelDepth,
    ) -> Services {
        Services {
            parameters,
            acquisition,
            sessions_dir,
            camera_width,
            camera_height,
            camera_depth,
            analysis_status: Arc::new(Mutex::new(AnalysisStatus::Idle)),
        }
    }
}

/// A dispatch result, `spec.md` §6: `{"success": bool, "error"?: string, ...}`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CommandResponse {
    pub success: bool,
    pub error: Option<String>,
    #[serde(flatten)]
    pub data: Value,
}

impl CommandResponse {
    fn ok(data: Value) -> CommandResponse {
        CommandResponse { success: true, error: None, data }
    }

    /// Builds a structured error response directly, for callers outside
    /// this module's handler table (e.g. the composition root rejecting
    /// a request before it ever reaches `dispatch`).
    pub fn err(error: impl ToString) -> CommandResponse {
        CommandResponse { success: false, error: Some(error.to_string()), data: Value::Null }
    }
}

type Handler = Box<dyn Fn(&Services, Value) -> CommandResponse + Send + Sync>;

/// Command-name to handler table, built once; dispatch is a single
/// hash lookup plus a call, never a match arm to extend per command.
pub struct ControlPlane {
    handlers: std::collections::HashMap<&'static str, Handler>,
}

impl ControlPlane {
    pub fn new() -> ControlPlane {
        let mut handlers: std::collections::HashMap<&'static str, Handler> = std::collections::HashMap::new();

        handlers.insert("ping", Box::new(handle_ping));
        handlers.insert("get_parameter_group", Box::new(handle_get_parameter_group));
        handlers.insert("update_parameter_group", Box::new(handle_update_parameter_group));
        handlers.insert("start_acquisition", Box::new(handle_start_acquisition));
        handlers.insert("stop_acquisition", Box::new(handle_stop_acquisition));
        handlers.insert("set_acquisition_mode", Box::new(handle_set_acquisition_mode));
        handlers.insert("start_analysis", Box::new(handle_start_analysis));
        handlers.insert("get_analysis_status", Box::new(handle_get_analysis_status));
        handlers.insert("detect_cameras", Box::new(handle_detect_cameras));

        ControlPlane { handlers }
    }

    /// Dispatches one command. An unknown command name or a handler
    /// panic is caught, logged, and converted to a structured error
    /// response rather than propagated (`spec.md` §4.8).
    pub fn dispatch(&self, services: &Services, command: &str, payload: Value) -> CommandResponse {
        let Some(handler) = self.handlers.get(command) else {
            let err = ControlError::UnknownCommand(command.to_string());
            log::warn!("ControlPlane: {err}");
            return CommandResponse::err(err);
        };

        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(services, payload))) {
            Ok(response) => response,
            Err(_) => {
                log::error!("ControlPlane: handler for '{command}' panicked");
                CommandResponse::err(format!("internal error dispatching '{command}'"))
            }
        }
    }
}

impl Default for ControlPlane {
    fn default() -> Self {
        ControlPlane::new()
    }
}

fn handle_ping(_services: &Services, _payload: Value) -> CommandResponse {
    let version = env!("CARGO_PKG_VERSION");
    let git_hash = include_str!(concat!(env!("OUT_DIR"), "/version"));
    CommandResponse::ok(json!({ "version": version, "git_hash": git_hash }))
}

fn handle_get_parameter_group(services: &Services, payload: Value) -> CommandResponse {
    let Some(group) = payload.get("group").and_then(Value::as_str) else {
        return CommandResponse::err(ControlError::MalformedPayload("missing 'group'".to_string()));
    };
    match services.parameters.get_group(group) {
        Ok(value) => CommandResponse::ok(json!({ "group": group, "values": value })),
        Err(err) => CommandResponse::err(err),
    }
}

fn handle_update_parameter_group(services: &Services, payload: Value) -> CommandResponse {
    let Some(group) = payload.get("group").and_then(Value::as_str) else {
        return CommandResponse::err(ControlError::MalformedPayload("missing 'group'".to_string()));
    };
    let Some(updates) = payload.get("values").cloned() else {
        return CommandResponse::err(ControlError::MalformedPayload("missing 'values'".to_string()));
    };
    if services.acquisition.rejects_parameter_change(group) {
        return CommandResponse::err(format!(
            "parameter group '{group}' cannot change while acquisition is active"
        ));
    }
    match services.parameters.update_group(group, updates) {
        Ok(()) => CommandResponse::ok(json!({ "group": group })),
        Err(err) => CommandResponse::err(err),
    }
}

fn handle_start_acquisition(services: &Services, _payload: Value) -> CommandResponse {
    let groups = services.parameters.get_all();
    let session_id = format!("session-{}", crate::sync::wall_clock_us());

    match services.acquisition.start(
        &groups.acquisition,
        &groups.monitor,
        &groups.stimulus,
        &services.sessions_dir,
        &session_id,
        services.camera_width,
        services.camera_height,
        services.camera_depth,
        groups,
    ) {
        Ok(()) => CommandResponse::ok(json!({ "session_id": session_id })),
        Err(err) => CommandResponse::err(err),
    }
}

fn handle_stop_acquisition(services: &Services, _payload: Value) -> CommandResponse {
    match services.acquisition.stop() {
        Ok(()) => CommandResponse::ok(Value::Null),
        Err(err) => CommandResponse::err(err),
    }
}

fn handle_set_acquisition_mode(_services: &Services, payload: Value) -> CommandResponse {
    // `spec.md` §4.8 lists this among the illustrative command set
    // without a dedicated coordinator mode switch of its own; the only
    // modes the state machine distinguishes are driven by `start`/
    // `stop`, so this validates the requested mode name and otherwise
    // no-ops.
    match payload.get("mode").and_then(Value::as_str) {
        Some("sweep") | None => CommandResponse::ok(Value::Null),
        Some(other) => CommandResponse::err(format!("unknown acquisition mode '{other}'")),
    }
}

fn handle_start_analysis(services: &Services, payload: Value) -> CommandResponse {
    let Some(session_id) = payload.get("session_id").and_then(Value::as_str).map(str::to_string) else {
        return CommandResponse::err(ControlError::MalformedPayload("missing 'session_id'".to_string()));
    };

    *services.analysis_status.lock().unwrap() =
        AnalysisStatus::Running { session_id: session_id.clone() };

    let session_dir = services.sessions_dir.join(&session_id);
    let output_dir = services.sessions_dir.join(format!("{session_id}-analysis"));
    let status = Arc::clone(&services.analysis_status);

    std::thread::spawn(move || {
        let result = analysis::run(&session_dir).and_then(|result| {
            analysis::persist(&result, &output_dir)?;
            Ok(())
        });

        let mut guard = status.lock().unwrap();
        *guard = match result {
            Ok(()) => AnalysisStatus::Completed { session_id, output_dir },
            Err(err) => {
                log::error!("AnalysisPipeline failed for session: {err}");
                AnalysisStatus::Failed { session_id, error: err.to_string() }
            }
        };
    });

    CommandResponse::ok(Value::Null)
}

fn handle_get_analysis_status(services: &Services, _payload: Value) -> CommandResponse {
    let status = services.analysis_status.lock().unwrap().clone();
    let data = match status {
        AnalysisStatus::Idle => json!({ "state": "idle" }),
        AnalysisStatus::Running { session_id } => json!({ "state": "running", "session_id": session_id }),
        AnalysisStatus::Completed { session_id, output_dir } => json!({
            "state": "completed",
            "session_id": session_id,
            "output_dir": output_dir.display().to_string(),
        }),
        AnalysisStatus::Failed { session_id, error } => {
            json!({ "state": "failed", "session_id": session_id, "error": error })
        }
    };
    CommandResponse::ok(data)
}

fn handle_detect_cameras(services: &Services, _payload: Value) -> CommandResponse {
    // Camera hardware is an external collaborator (`spec.md` §1); this
    // reports the one `FrameSource` configuration the composition root
    // was given rather than enumerating hardware itself.
    CommandResponse::ok(json!({
        "cameras": [{
            "width_px": services.camera_width,
            "height_px": services.camera_height,
        }]
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::ParameterStore;
    use crate::stimulus::StimulusEngine;
    use crate::sync::SyncTracker;

    fn test_services() -> Services {
        let dir = std::env::temp_dir().join(format!("isi-core-control-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let parameters = Arc::new(ParameterStore::load(dir.join("parameters.json")));
        let stimulus = Arc::new(StimulusEngine::new());
        let sync = Arc::new(SyncTracker::new());
        let acquisition = Arc::new(AcquisitionCoordinator::new(stimulus, sync));
        Services::new(parameters, acquisition, dir, 4, 4, PixelDepth::Eight)
    }

    #[test]
    fn ping_reports_version_and_git_hash() {
        let services = test_services();
        let plane = ControlPlane::new();
        let response = plane.dispatch(&services, "ping", Value::Null);
        assert!(response.success);
        assert!(response.data.get("version").is_some());
    }

    #[test]
    fn unknown_command_returns_a_structured_error() {
        let services = test_services();
        let plane = ControlPlane::new();
        let response = plane.dispatch(&services, "does_not_exist", Value::Null);
        assert!(!response.success);
        assert!(response.error.is_some());
    }

    #[test]
    fn get_parameter_group_requires_a_group_field() {
        let services = test_services();
        let plane = ControlPlane::new();
        let response = plane.dispatch(&services, "get_parameter_group", json!({}));
        assert!(!response.success);
    }

    #[test]
    fn get_parameter_group_round_trips_a_known_group() {
        let services = test_services();
        let plane = ControlPlane::new();
        let response = plane.dispatch(&services, "get_parameter_group", json!({"group": "stimulus"}));
        assert!(response.success);
        assert!(response.data.get("values").is_some());
    }

    #[test]
    fn analysis_status_starts_idle() {
        let services = test_services();
        let plane = ControlPlane::new();
        let response = plane.dispatch(&services, "get_analysis_status", Value::Null);
        assert_eq!(response.data.get("state").and_then(Value::as_str), Some("idle"));
    }
}
