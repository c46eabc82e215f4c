#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! The engine registry: a declarative, config-loaded catalog describing how
//! to stage and observe each kind of compute job on a worker host.

use std::collections::HashMap;

use serde::Deserialize;

/// One engine's capability set: its declared input/output files, its spawn
/// command template, and how to tell whether an instance is running.
///
/// Immutable after daemon start — this is plain data loaded once from
/// configuration, not a trait, since there is no behavior to dispatch.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineDescriptor {
    /// Filenames the engine expects staged into `remote_folder` before
    /// spawn, in declaration order. Each must have a matching key in a
    /// task's metadata at submission time.
    pub input_files: Vec<String>,
    /// Filenames the engine writes into `remote_folder`, fetched back to the
    /// submitter's local data dir on completion, in declaration order.
    pub output_files: Vec<String>,
    /// Spawn command template. Supports the `{path}` (remote_folder) and
    /// `{ncpus}` placeholders.
    pub spawn: String,
    /// Substring that appears in the process table iff an instance of this
    /// engine is running. Must not collide with another engine's marker or
    /// an unrelated process.
    pub run_marker: String,
    /// Shell fragment run to probe for `run_marker`, e.g. `ps aux | grep foo`.
    pub check_cmd: String,
}

/// The loaded catalog of engines, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct EngineRegistry {
    engines: HashMap<String, EngineDescriptor>,
}

impl EngineRegistry {
    /// Build a registry from an already-deserialized `name -> descriptor` map
    /// (the daemon deserializes the `[engines.*]` TOML tables into this map
    /// before handing it here).
    pub fn new(engines: HashMap<String, EngineDescriptor>) -> Self {
        Self { engines }
    }

    /// The full name→descriptor catalog.
    pub fn engines(&self) -> &HashMap<String, EngineDescriptor> {
        &self.engines
    }

    /// Look up a single engine by name.
    pub fn get(&self, name: &str) -> Option<&EngineDescriptor> {
        self.engines.get(name)
    }

    /// True iff `name` is a known engine.
    pub fn contains(&self, name: &str) -> bool {
        self.engines.contains_key(name)
    }

    /// One shell command whose stdout contains every currently-running
    /// engine's `run_marker`. Built by joining every registered engine's
    /// `check_cmd` with `;` so the whole probe is a single round trip over
    /// one remote-shell exec.
    pub fn aggregate_check_cmd(&self) -> String {
        self.engines
            .values()
            .map(|engine| engine.check_cmd.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_registry() -> EngineRegistry {
        let mut engines = HashMap::new();
        engines.insert(
            "crystal".to_string(),
            EngineDescriptor {
                input_files: vec!["input.d12".to_string()],
                output_files: vec!["output.out".to_string()],
                spawn: "cd {path} && crystal {ncpus} > output.out".to_string(),
                run_marker: "Pcrystal".to_string(),
                check_cmd: "ps aux | grep -v grep | grep Pcrystal".to_string(),
            },
        );
        engines.insert(
            "vasp".to_string(),
            EngineDescriptor {
                input_files: vec!["INCAR".to_string(), "POSCAR".to_string()],
                output_files: vec!["OUTCAR".to_string()],
                spawn: "cd {path} && mpirun -np {ncpus} vasp".to_string(),
                run_marker: "vasp_std".to_string(),
                check_cmd: "ps aux | grep -v grep | grep vasp_std".to_string(),
            },
        );
        EngineRegistry::new(engines)
    }

    #[test]
    fn aggregate_check_cmd_contains_every_engine_check_cmd() {
        let registry = sample_registry();
        let aggregate = registry.aggregate_check_cmd();
        for engine in registry.engines().values() {
            assert!(aggregate.contains(&engine.check_cmd));
        }
    }

    #[test]
    fn unknown_engine_is_not_found() {
        let registry = sample_registry();
        assert!(registry.get("gromacs").is_none());
        assert!(!registry.contains("gromacs"));
        assert!(registry.contains("vasp"));
    }
}
