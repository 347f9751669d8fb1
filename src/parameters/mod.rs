//
// isi-core - acquisition and analysis core for retinotopic mapping
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! `ParameterStore`: the authoritative runtime configuration core.
//!
//! Generalizes the teacher's GTK key-file config (`config.rs`) into a
//! JSON document with named groups, invariant validation, and a
//! subscriber-notification mechanism, following
//! `original_source/apps/backend/src/parameters/manager.py`'s
//! volatile-group exclusion and write-temp-then-rename persistence.
//!

pub mod schema;

use crate::error::ParameterError;
use chrono::{DateTime, Utc};
use schema::{ParameterGroups, GROUP_NAMES, VOLATILE_GROUPS};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub type SubscriberId = u64;
type Subscriber = Box<dyn Fn(&str, &Value) + Send>;

#[derive(serde::Serialize, serde::Deserialize)]
struct Document {
    #[serde(default)]
    config: Value,
    current: ParameterGroups,
    default: ParameterGroups,
    #[serde(default = "default_timestamp")]
    last_modified: DateTime<Utc>,
}

fn default_timestamp() -> DateTime<Utc> {
    // Only used when deserializing a document written before this field
    // existed; callers never see this value persist unmodified because
    // the next successful `update_group` overwrites it.
    DateTime::UNIX_EPOCH
}

struct Inner {
    current: ParameterGroups,
    defaults: ParameterGroups,
    config_meta: Value,
}

pub struct ParameterStore {
    path: PathBuf,
    inner: Mutex<Inner>,
    subscribers: Mutex<HashMap<String, Vec<(SubscriberId, Subscriber)>>>,
    next_subscriber_id: AtomicU64,
}

impl ParameterStore {
    /// Loads from `path` if it exists, otherwise starts from defaults.
    /// Volatile groups (`monitor`, `camera`) are always reset to their
    /// defaults at startup, regardless of what is on disk.
    pub fn load(path: impl Into<PathBuf>) -> ParameterStore {
        let path = path.into();
        let defaults = ParameterGroups::default();

        let (mut current, config_meta) = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<Document>(&text) {
                Ok(doc) => (doc.current, doc.config),
                Err(err) => {
                    log::warn!(
                        "Failed to parse configuration file {}: {}. Using defaults.",
                        path.display(),
                        err
                    );
                    (defaults.clone(), Value::Object(Default::default()))
                }
            },
            Err(_) => {
                log::info!(
                    "No configuration file at {}; starting from defaults.",
                    path.display()
                );
                (defaults.clone(), Value::Object(Default::default()))
            }
        };

        // Volatile groups are always re-detected; never trust the file.
        copy_volatile_groups(&mut current, &defaults);

        ParameterStore {
            path,
            inner: Mutex::new(Inner { current, defaults, config_meta }),
            subscribers: Mutex::new(HashMap::new()),
            next_subscriber_id: AtomicU64::new(0),
        }
    }

    /// Returns the named group as a JSON value. `name` must be one of
    /// `spec.md`'s five group names.
    pub fn get_group(&self, name: &str) -> Result<Value, ParameterError> {
        let inner = self.inner.lock().unwrap();
        group_value(&inner.current, name)
    }

    pub fn get_all(&self) -> ParameterGroups {
        self.inner.lock().unwrap().current.clone()
    }

    /// Merges `partial_updates` into the named group, validates the
    /// merged result, and atomically commits it. On success, persists
    /// to disk (minus volatile groups) and notifies subscribers of
    /// `name` after the internal lock has been released.
    pub fn update_group(
        &self,
        name: &str,
        partial_updates: Value,
    ) -> Result<(), ParameterError> {
        let merged_value;
        {
            let mut inner = self.inner.lock().unwrap();
            let mut current_value = group_value(&inner.current, name)?;
            merge_json(&mut current_value, &partial_updates);
            validate_group(name, &current_value)?;

            let mut candidate = inner.current.clone();
            set_group_value(&mut candidate, name, current_value.clone())
                .map_err(|_| ParameterError::UnknownGroup(name.to_string()))?;
            inner.current = candidate;
            merged_value = current_value;

            if let Err(err) = self.save_locked(&inner) {
                log::error!("Failed to save parameter file: {err}");
            }
        }

        self.notify(name, &merged_value);
        Ok(())
    }

    pub fn reset_to_defaults(&self) {
        let snapshot;
        {
            let mut inner = self.inner.lock().unwrap();
            inner.current = inner.defaults.clone();
            snapshot = inner.current.clone();
            if let Err(err) = self.save_locked(&inner) {
                log::error!("Failed to save parameter file: {err}");
            }
        }
        for name in GROUP_NAMES {
            if let Ok(value) = group_value(&snapshot, name) {
                self.notify(name, &value);
            }
        }
    }

    /// Force-reloads from disk and notifies subscribers only for groups
    /// whose content actually changed (volatile groups are exempt, as
    /// they are never read from disk).
    pub fn reload_from_disk(&self) {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) => {
                log::warn!("reload_from_disk: {err}");
                return;
            }
        };
        let doc: Document = match serde_json::from_str(&text) {
            Ok(doc) => doc,
            Err(err) => {
                log::warn!("reload_from_disk: invalid JSON: {err}");
                return;
            }
        };

        let mut changed = Vec::new();
        {
            let mut inner = self.inner.lock().unwrap();
            let mut new_current = doc.current;
            copy_volatile_groups(&mut new_current, &inner.current);

            for name in GROUP_NAMES {
                if group_value(&inner.current, name).ok()
                    != group_value(&new_current, name).ok()
                {
                    changed.push(name.to_string());
                }
            }
            inner.current = new_current;
        }

        let snapshot = self.inner.lock().unwrap().current.clone();
        for name in &changed {
            if let Ok(value) = group_value(&snapshot, name) {
                self.notify(name, &value);
            }
        }
    }

    /// Registers `callback` for changes to `group_name`; returns an id
    /// usable with `unsubscribe`. Callbacks run synchronously, in
    /// registration order, after the internal lock is released.
    pub fn subscribe(
        &self,
        group_name: &str,
        callback: impl Fn(&str, &Value) + Send + 'static,
    ) -> SubscriberId {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .unwrap()
            .entry(group_name.to_string())
            .or_default()
            .push((id, Box::new(callback)));
        id
    }

    pub fn unsubscribe(&self, group_name: &str, id: SubscriberId) {
        if let Some(subs) = self.subscribers.lock().unwrap().get_mut(group_name) {
            subs.retain(|(sub_id, _)| *sub_id != id);
        }
    }

    fn notify(&self, name: &str, value: &Value) {
        // `Box<dyn Fn>` isn't `Clone`, so the callback list is held under
        // the subscriber lock for the duration of the chain; this is
        // distinct from `self.inner`'s lock (already released by the
        // caller), so a callback reading another group cannot deadlock.
        let subs = self.subscribers.lock().unwrap();
        if let Some(list) = subs.get(name) {
            for (_, callback) in list {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    callback(name, value);
                }));
                if let Err(panic) = result {
                    log::error!(
                        "Subscriber for parameter group '{name}' panicked: {:?}",
                        panic_message(&panic)
                    );
                }
            }
        }
    }

    fn save_locked(&self, inner: &Inner) -> std::io::Result<()> {
        let mut to_save = inner.current.clone();
        // Volatile groups are always written as their defaults.
        copy_volatile_groups(&mut to_save, &inner.defaults);

        let doc = Document {
            config: inner.config_meta.clone(),
            current: to_save,
            default: inner.defaults.clone(),
            last_modified: Utc::now(),
        };

        let text = serde_json::to_string_pretty(&doc)
            .expect("ParameterGroups serialization cannot fail");

        write_atomic(&self.path, text.as_bytes())
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, bytes)?;
    std::fs::rename(&tmp_path, path)
}

/// Overwrites `target`'s volatile groups (`VOLATILE_GROUPS`) with the
/// corresponding groups from `source` — the one place that list of
/// names is actually consulted, rather than hardcoding `monitor`/
/// `camera` at each call site.
fn copy_volatile_groups(target: &mut ParameterGroups, source: &ParameterGroups) {
    for name in VOLATILE_GROUPS {
        match name {
            "monitor" => target.monitor = source.monitor.clone(),
            "camera" => target.camera = source.camera.clone(),
            other => unreachable!("unhandled volatile group '{other}'"),
        }
    }
}

fn group_value(groups: &ParameterGroups, name: &str) -> Result<Value, ParameterError> {
    let value = match name {
        "monitor" => serde_json::to_value(&groups.monitor),
        "camera" => serde_json::to_value(&groups.camera),
        "stimulus" => serde_json::to_value(&groups.stimulus),
        "acquisition" => serde_json::to_value(&groups.acquisition),
        "analysis" => serde_json::to_value(&groups.analysis),
        other => return Err(ParameterError::UnknownGroup(other.to_string())),
    };
    Ok(value.expect("typed parameter groups always serialize"))
}

fn set_group_value(groups: &mut ParameterGroups, name: &str, value: Value) -> Result<(), ()> {
    match name {
        "monitor" => groups.monitor = serde_json::from_value(value).map_err(|_| ())?,
        "camera" => groups.camera = serde_json::from_value(value).map_err(|_| ())?,
        "stimulus" => groups.stimulus = serde_json::from_value(value).map_err(|_| ())?,
        "acquisition" => groups.acquisition = serde_json::from_value(value).map_err(|_| ())?,
        "analysis" => groups.analysis = serde_json::from_value(value).map_err(|_| ())?,
        _ => return Err(()),
    }
    Ok(())
}

fn validate_group(name: &str, value: &Value) -> Result<(), ParameterError> {
    match name {
        "stimulus" => {
            let parsed: schema::StimulusParams =
                serde_json::from_value(value.clone()).map_err(|e| invalid(name, e))?;
            parsed.validate().map_err(|keys| ParameterError::Invalid {
                group: name.to_string(),
                keys,
                reason: "background_luminance must be >= contrast; values must be in range"
                    .to_string(),
            })
        }
        "acquisition" => {
            let parsed: schema::AcquisitionParams =
                serde_json::from_value(value.clone()).map_err(|e| invalid(name, e))?;
            parsed.validate().map_err(|keys| ParameterError::Invalid {
                group: name.to_string(),
                keys,
                reason: "cycles must be >= 1 and durations non-negative".to_string(),
            })
        }
        "analysis" => {
            let parsed: schema::AnalysisParams =
                serde_json::from_value(value.clone()).map_err(|e| invalid(name, e))?;
            parsed.validate().map_err(|keys| ParameterError::Invalid {
                group: name.to_string(),
                keys,
                reason: "vfs_threshold and sigmas must be in valid ranges".to_string(),
            })
        }
        "monitor" => {
            serde_json::from_value::<schema::MonitorParams>(value.clone())
                .map(|_| ())
                .map_err(|e| invalid(name, e))
        }
        "camera" => {
            serde_json::from_value::<schema::CameraParams>(value.clone())
                .map(|_| ())
                .map_err(|e| invalid(name, e))
        }
        other => Err(ParameterError::UnknownGroup(other.to_string())),
    }
}

fn invalid(group: &str, err: serde_json::Error) -> ParameterError {
    ParameterError::Invalid {
        group: group.to_string(),
        keys: vec![],
        reason: err.to_string(),
    }
}

/// Recursively merges `patch` into `target` (object fields overwrite,
/// scalars/arrays replace wholesale).
fn merge_json(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                merge_json(
                    target_map.entry(key.clone()).or_insert(Value::Null),
                    patch_value,
                );
            }
        }
        (target_slot, patch_value) => {
            *target_slot = patch_value.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("isi-core-test-{name}-{}.json", std::process::id()))
    }

    #[test]
    fn s1_rejects_invalid_stimulus_update_leaving_state_unchanged() {
        let path = temp_path("s1");
        let store = ParameterStore::load(&path);
        store
            .update_group(
                "stimulus",
                serde_json::json!({"background_luminance": 0.3, "contrast": 0.5}),
            )
            .unwrap();

        let err = store
            .update_group("stimulus", serde_json::json!({"background_luminance": 0.2}))
            .unwrap_err();
        assert!(matches!(err, ParameterError::Invalid { .. }));

        let group = store.get_group("stimulus").unwrap();
        assert_eq!(group["background_luminance"], 0.3);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn volatile_groups_never_persist_across_reload() {
        let path = temp_path("volatile");
        let store = ParameterStore::load(&path);
        store
            .update_group("monitor", serde_json::json!({"width_px": 2560}))
            .unwrap();

        let on_disk = std::fs::read_to_string(&path).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&on_disk).unwrap();
        assert_eq!(doc["current"]["monitor"]["width_px"], 1920);

        let reloaded = ParameterStore::load(&path);
        assert_eq!(reloaded.get_group("monitor").unwrap()["width_px"], 1920);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn unknown_group_is_rejected() {
        let path = temp_path("unknown");
        let store = ParameterStore::load(&path);
        let err = store.get_group("bogus").unwrap_err();
        assert_eq!(err, ParameterError::UnknownGroup("bogus".to_string()));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn subscribers_are_notified_after_update_and_see_consistent_state() {
        let path = temp_path("subscribe");
        let store = Arc::new(ParameterStore::load(&path));
        let seen = Arc::new(AtomicBool::new(false));
        let seen_clone = Arc::clone(&seen);
        let store_clone = Arc::clone(&store);
        store.subscribe("acquisition", move |_name, _value| {
            // Reading another group from within a callback must not deadlock.
            let _ = store_clone.get_group("stimulus").unwrap();
            seen_clone.store(true, Ordering::SeqCst);
        });

        store
            .update_group("acquisition", serde_json::json!({"cycles": 3}))
            .unwrap();

        assert!(seen.load(Ordering::SeqCst));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn panicking_subscriber_does_not_abort_notification_chain() {
        let path = temp_path("panic-sub");
        let store = ParameterStore::load(&path);
        let second_ran = Arc::new(AtomicBool::new(false));
        let second_ran_clone = Arc::clone(&second_ran);

        store.subscribe("acquisition", |_, _| panic!("boom"));
        store.subscribe("acquisition", move |_, _| {
            second_ran_clone.store(true, Ordering::SeqCst);
        });

        store
            .update_group("acquisition", serde_json::json!({"cycles": 2}))
            .unwrap();

        assert!(second_ran.load(Ordering::SeqCst));
        let _ = std::fs::remove_file(&path);
    }
}
