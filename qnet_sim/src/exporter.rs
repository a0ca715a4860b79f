//! JSON exporter for trial journals.
//!
//! Writes every trial of a scenario (journal, agent state, device counters
//! and the resulting program text) to one JSON document.

use crate::runner::ScenarioResult;
use crate::simulation::{AgentReport, TrialOutcome};
use qnet_core::DeviceReport;
use qnet_env::{NetError, Result, TransferEvent};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// One trial in exported form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialExport {
    pub trial: usize,

    /// Master clock time at the end of the trial
    pub final_time: f64,

    pub journal: Vec<TransferEvent>,

    pub agents: Vec<AgentReport>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub devices: Vec<DeviceReport>,

    /// Program rendered as text, one instruction per line
    pub program: String,
}

impl From<&TrialOutcome> for TrialExport {
    fn from(outcome: &TrialOutcome) -> Self {
        Self {
            trial: outcome.trial,
            final_time: outcome.final_time,
            journal: outcome.journal.clone(),
            agents: outcome.agents.clone(),
            devices: outcome.devices.clone(),
            program: outcome.program.to_string(),
        }
    }
}

/// Complete journal export of a scenario run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    pub trials: Vec<TrialExport>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl JournalExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            trials: Vec::new(),
            passed: false,
            failure_reason: None,
        }
    }

    /// Builds an export from a finished scenario run.
    pub fn from_run(result: &ScenarioResult, outcomes: &[TrialOutcome]) -> Self {
        let mut export = Self::new(result.scenario.name(), result.seed);
        for outcome in outcomes {
            export.add_trial(outcome);
        }
        export.finalize(result.passed, result.failure_reason.clone());
        export
    }

    /// Adds a trial.
    pub fn add_trial(&mut self, outcome: &TrialOutcome) {
        self.trials.push(TrialExport::from(outcome));
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| NetError::Export(format!("serialize: {}", e)))?;
        let mut file = File::create(path)
            .map_err(|e| NetError::Export(format!("create {}: {}", path.display(), e)))?;
        file.write_all(json.as_bytes())
            .map_err(|e| NetError::Export(format!("write {}: {}", path.display(), e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ScenarioRunner;
    use crate::scenarios::ScenarioId;

    #[test]
    fn test_export_round_trip_through_file() {
        let (result, outcomes) = ScenarioRunner::new(1).run_with_outcomes(ScenarioId::Superdense);
        let export = JournalExport::from_run(&result, &outcomes);
        assert_eq!(export.trials.len(), 1);
        assert!(export.trials[0].program.contains("MEASURE"));

        let path = std::env::temp_dir().join(format!("qnet-export-{}.json", std::process::id()));
        export.write_to_file(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: JournalExport = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.scenario, "superdense");
        let payloads = |e: &JournalExport| -> Vec<_> {
            e.trials[0].journal.iter().map(|t| t.payload.clone()).collect()
        };
        assert_eq!(payloads(&parsed), payloads(&export));
        assert_eq!(parsed.trials[0].program, export.trials[0].program);
        assert!(!text.contains("failure_reason"));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_write_to_missing_directory_fails() {
        let export = JournalExport::new("ping_pong", 3);
        let err = export
            .write_to_file("/nonexistent-qnet-dir/out.json")
            .unwrap_err();
        assert!(matches!(err, NetError::Export(_)));
    }
}
