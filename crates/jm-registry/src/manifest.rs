//! Manifest bootstrap (§4.3, §6.2).

use std::collections::HashMap;
use std::sync::Arc;

use jm_core::adapter::{BridgeAdapter, Capability};
use jm_core::error::{FatalRequiredBridgeError, LifecycleDiagnostic};
use jm_core::signals::SignalBus;
use serde::Deserialize;

use crate::registry::{BridgeManifest, BridgeRegistry};

/// A factory that constructs the adapter for a given `adapter_module`
/// name. Concrete wire codecs are out of scope here; callers (the dev
/// binary, tests) register factories for whatever adapters they have.
pub type AdapterFactory = Arc<dyn Fn() -> Arc<dyn BridgeAdapter> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionPolicy {
    PreferFirst,
    PreferLast,
}

impl CollisionPolicy {
    pub fn parse(raw: &str) -> Option<CollisionPolicy> {
        match raw {
            "prefer_first" => Some(CollisionPolicy::PreferFirst),
            "prefer_last" => Some(CollisionPolicy::PreferLast),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            CollisionPolicy::PreferFirst => "prefer_first",
            CollisionPolicy::PreferLast => "prefer_last",
        }
    }
}

#[derive(Debug, Deserialize)]
struct ManifestFile {
    manifest_version: u32,
    id: String,
    adapter_module: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    adapters: HashMap<String, String>,
}

pub struct BootstrapInput {
    pub manifest_paths: Vec<String>,
    pub collision_policy: CollisionPolicy,
    pub required_bridges: std::collections::HashSet<String>,
    pub clear_existing: bool,
}

#[derive(Debug, Clone)]
pub struct CollisionRecord {
    pub bridge_id: String,
    pub winner_path: String,
    pub discarded_path: String,
}

#[derive(Debug, Default)]
pub struct BootstrapReport {
    pub loaded: Vec<String>,
    pub diagnostics: Vec<LifecycleDiagnostic>,
    pub collisions: Vec<CollisionRecord>,
}

struct Candidate {
    path: String,
    manifest: ManifestFile,
}

/// Parses and registers every manifest in `input.manifest_paths`, in
/// order. A diagnostic on a required bridge fails the whole bootstrap
/// immediately (`FatalRequiredBridgeError`); on an optional bridge it
/// degrades (recorded in the report, bootstrap continues).
pub fn bootstrap(
    registry: &BridgeRegistry,
    factories: &HashMap<String, AdapterFactory>,
    input: BootstrapInput,
    signals: &SignalBus,
) -> Result<BootstrapReport, FatalRequiredBridgeError> {
    if input.clear_existing {
        registry.clear();
    }

    let mut report = BootstrapReport::default();
    let mut winners: HashMap<String, Candidate> = HashMap::new();

    for path in &input.manifest_paths {
        let raise = |diagnostic_type: &str, bridge_id: Option<String>| LifecycleDiagnostic {
            diagnostic_type: diagnostic_type.to_string(),
            bridge_id: bridge_id.clone(),
            path: path.clone(),
            policy: input.collision_policy.label().to_string(),
        };

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => {
                let diagnostic = raise("unreadable_manifest", None);
                emit_manifest_load(signals, path, false);
                degrade_or_fail(&mut report, diagnostic, &input.required_bridges, None)?;
                continue;
            }
        };

        let manifest: ManifestFile = match serde_json::from_str(&content) {
            Ok(m) => m,
            Err(_) => {
                let diagnostic = raise("invalid_manifest_json", None);
                emit_manifest_load(signals, path, false);
                degrade_or_fail(&mut report, diagnostic, &input.required_bridges, None)?;
                continue;
            }
        };

        if manifest.manifest_version != 1 {
            let diagnostic = raise("unknown_manifest_version", Some(manifest.id.clone()));
            emit_manifest_load(signals, path, false);
            degrade_or_fail(&mut report, diagnostic, &input.required_bridges, Some(&manifest.id))?;
            continue;
        }

        if !factories.contains_key(&manifest.adapter_module) {
            let diagnostic = raise("unknown_adapter_module", Some(manifest.id.clone()));
            emit_manifest_load(signals, path, false);
            degrade_or_fail(&mut report, diagnostic, &input.required_bridges, Some(&manifest.id))?;
            continue;
        }

        let mut unknown_capability = false;
        for capability_name in manifest.adapters.keys() {
            if Capability::parse(capability_name).is_none() {
                unknown_capability = true;
            }
        }
        if unknown_capability {
            let diagnostic = raise("unknown_capability", Some(manifest.id.clone()));
            emit_manifest_load(signals, path, false);
            degrade_or_fail(&mut report, diagnostic, &input.required_bridges, Some(&manifest.id))?;
            continue;
        }

        emit_manifest_load(signals, path, true);

        match winners.remove(&manifest.id) {
            None => {
                winners.insert(manifest.id.clone(), Candidate { path: path.clone(), manifest });
            }
            Some(existing) => {
                let (winner, discarded_path) = match input.collision_policy {
                    CollisionPolicy::PreferFirst => {
                        let discarded = path.clone();
                        (existing, discarded)
                    }
                    CollisionPolicy::PreferLast => {
                        let discarded = existing.path.clone();
                        (Candidate { path: path.clone(), manifest }, discarded)
                    }
                };
                report.collisions.push(CollisionRecord {
                    bridge_id: winner.manifest.id.clone(),
                    winner_path: winner.path.clone(),
                    discarded_path,
                });
                winners.insert(winner.manifest.id.clone(), winner);
            }
        }
    }

    let mut loaded_ids: Vec<String> = winners.keys().cloned().collect();
    loaded_ids.sort();

    for id in &loaded_ids {
        let candidate = winners.remove(id).expect("id came from this map's own keys");
        let factory = factories.get(&candidate.manifest.adapter_module).expect("checked above");
        let adapter = factory();
        let capabilities = adapter.capabilities();
        let secondary_adapters = candidate
            .manifest
            .adapters
            .iter()
            .filter_map(|(name, module)| Capability::parse(name).map(|cap| (cap, module.clone())))
            .collect();
        let manifest = BridgeManifest {
            id: candidate.manifest.id.clone(),
            adapter_module: candidate.manifest.adapter_module.clone(),
            label: candidate.manifest.label.clone(),
            capabilities,
            secondary_adapters,
        };
        registry.register(manifest, adapter);
        report.loaded.push(id.clone());
    }

    let mut measurements = jm_core::signals::measurements();
    measurements.insert("loaded".into(), report.loaded.len().into());
    measurements.insert("diagnostics".into(), report.diagnostics.len().into());
    measurements.insert("collisions".into(), report.collisions.len().into());
    signals.emit("bridge_registry.bootstrap", measurements, jm_core::signals::metadata());

    Ok(report)
}

fn degrade_or_fail(
    report: &mut BootstrapReport,
    diagnostic: LifecycleDiagnostic,
    required_bridges: &std::collections::HashSet<String>,
    bridge_id: Option<&str>,
) -> Result<(), FatalRequiredBridgeError> {
    let is_required = bridge_id.map(|id| required_bridges.contains(id)).unwrap_or(false);
    if is_required {
        return Err(FatalRequiredBridgeError { diagnostic });
    }
    report.diagnostics.push(diagnostic);
    Ok(())
}

fn emit_manifest_load(signals: &SignalBus, path: &str, success: bool) {
    let mut metadata = jm_core::signals::metadata();
    metadata.insert("path".into(), path.into());
    metadata.insert("success".into(), success.into());
    signals.emit("bridge_registry.manifest.load", jm_core::signals::measurements(), metadata);
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use jm_core::adapter::Incoming;
    use jm_core::error::Reason;
    use std::collections::HashSet;

    struct StubAdapter;
    #[async_trait]
    impl BridgeAdapter for StubAdapter {
        fn channel_type(&self) -> &str {
            "stub"
        }
        fn transform_incoming(&self, _payload: &serde_json::Value) -> Result<Incoming, Reason> {
            Err(Reason::UnknownCapability)
        }
        async fn send_message(&self, _external_room_id: &str, _text: &str) -> Result<jm_core::adapter::SendResult, Reason> {
            Err(Reason::UnknownCapability)
        }
    }

    fn factories() -> HashMap<String, AdapterFactory> {
        let mut map: HashMap<String, AdapterFactory> = HashMap::new();
        map.insert("stub_adapter".to_string(), Arc::new(|| Arc::new(StubAdapter) as Arc<dyn BridgeAdapter>));
        map
    }

    fn write_manifest(dir: &tempfile::TempDir, name: &str, body: &str) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    fn loads_valid_manifests_and_registers_them() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(&dir, "tg.json", r#"{"manifest_version":1,"id":"bridge_tg","adapter_module":"stub_adapter"}"#);

        let registry = BridgeRegistry::new();
        let report = bootstrap(
            &registry,
            &factories(),
            BootstrapInput { manifest_paths: vec![path], collision_policy: CollisionPolicy::PreferLast, required_bridges: HashSet::new(), clear_existing: false },
            &SignalBus::new(),
        )
        .unwrap();

        assert_eq!(report.loaded, vec!["bridge_tg".to_string()]);
        assert!(registry.contains("bridge_tg"));
    }

    #[test]
    fn invalid_json_on_an_optional_bridge_degrades_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let bad = write_manifest(&dir, "bad.json", "not json");
        let good = write_manifest(&dir, "good.json", r#"{"manifest_version":1,"id":"bridge_discord","adapter_module":"stub_adapter"}"#);

        let registry = BridgeRegistry::new();
        let report = bootstrap(
            &registry,
            &factories(),
            BootstrapInput { manifest_paths: vec![bad, good], collision_policy: CollisionPolicy::PreferLast, required_bridges: HashSet::new(), clear_existing: false },
            &SignalBus::new(),
        )
        .unwrap();

        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].diagnostic_type, "invalid_manifest_json");
        assert_eq!(report.loaded, vec!["bridge_discord".to_string()]);
    }

    #[test]
    fn invalid_manifest_on_a_required_bridge_fails_bootstrap_fast() {
        let dir = tempfile::tempdir().unwrap();
        let bad = write_manifest(&dir, "bad.json", "not json");

        let registry = BridgeRegistry::new();
        let mut required = HashSet::new();
        // a required bridge named in config, but the manifest that would
        // declare it never parses — the id is unknown, so §4.3's fast-fail
        // triggers on the next check instead: an unknown adapter module.
        required.insert("bridge_required".to_string());
        let unknown_module =
            write_manifest(&dir, "unknown.json", r#"{"manifest_version":1,"id":"bridge_required","adapter_module":"no_such_module"}"#);

        let err = bootstrap(
            &registry,
            &factories(),
            BootstrapInput { manifest_paths: vec![bad, unknown_module], collision_policy: CollisionPolicy::PreferLast, required_bridges: required, clear_existing: false },
            &SignalBus::new(),
        )
        .unwrap_err();

        assert_eq!(err.diagnostic.diagnostic_type, "unknown_adapter_module");
        assert_eq!(err.diagnostic.bridge_id.as_deref(), Some("bridge_required"));
    }

    #[test]
    fn collision_prefer_last_keeps_the_later_path() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_manifest(&dir, "a.json", r#"{"manifest_version":1,"id":"bridge_tg","adapter_module":"stub_adapter","label":"first"}"#);
        let second = write_manifest(&dir, "b.json", r#"{"manifest_version":1,"id":"bridge_tg","adapter_module":"stub_adapter","label":"second"}"#);

        let registry = BridgeRegistry::new();
        let report = bootstrap(
            &registry,
            &factories(),
            BootstrapInput { manifest_paths: vec![first.clone(), second.clone()], collision_policy: CollisionPolicy::PreferLast, required_bridges: HashSet::new(), clear_existing: false },
            &SignalBus::new(),
        )
        .unwrap();

        assert_eq!(report.collisions.len(), 1);
        assert_eq!(report.collisions[0].winner_path, second);
        assert_eq!(report.collisions[0].discarded_path, first);
        assert_eq!(registry.get_manifest("bridge_tg").unwrap().label.as_deref(), Some("second"), "prefer_last keeps the later manifest's fields");
    }

    #[test]
    fn collision_prefer_first_keeps_the_earlier_path() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_manifest(&dir, "a.json", r#"{"manifest_version":1,"id":"bridge_tg","adapter_module":"stub_adapter","label":"first"}"#);
        let second = write_manifest(&dir, "b.json", r#"{"manifest_version":1,"id":"bridge_tg","adapter_module":"stub_adapter","label":"second"}"#);

        let registry = BridgeRegistry::new();
        let report = bootstrap(
            &registry,
            &factories(),
            BootstrapInput { manifest_paths: vec![first.clone(), second.clone()], collision_policy: CollisionPolicy::PreferFirst, required_bridges: HashSet::new(), clear_existing: false },
            &SignalBus::new(),
        )
        .unwrap();

        assert_eq!(report.collisions.len(), 1);
        assert_eq!(report.collisions[0].winner_path, first);
        assert_eq!(report.collisions[0].discarded_path, second);
        assert_eq!(registry.get_manifest("bridge_tg").unwrap().label.as_deref(), Some("first"), "prefer_first keeps the earlier manifest's fields");
    }
}