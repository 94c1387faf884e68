//! A program described entirely by a plan: one executable, a JSON input
//! file and regular expressions over its log.

use crate::error::{ManagerError, Result};
use crate::program::{Collected, FailureKind, Reader, StageContext, Writer};
use autogen_client::runner::ScriptLine;
use autogen_client::script::sanitize_name;
use autogen_client::targets::common::shell_quote;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailurePattern {
    pub pattern: String,
    pub kind: FailureKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSpec {
    /// Name looked up in `[executables]`, or a path.
    pub executable: String,
    /// Arguments; `{input}` and `{name}` are substituted. Defaults to the
    /// input file.
    pub args: Vec<String>,
    /// Shell lines run before the program on every attempt.
    pub setup: Vec<String>,
    /// Files besides the log whose presence means the program started.
    pub outputs: Vec<String>,
    /// Must appear in the log of a successful run.
    pub success: Option<String>,
    /// Checked in order before `success`.
    pub failures: Vec<FailurePattern>,
    /// Values to extract from the log; the first capture group of the last
    /// match is kept.
    pub results: BTreeMap<String, String>,
    /// Artifact name to file, exported to dependent tasks once present.
    pub artifacts: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct CommandProgram {
    spec: CommandSpec,
    success: Option<Regex>,
    failures: Vec<(Regex, FailureKind)>,
    results: Vec<(String, Regex)>,
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| ManagerError::InvalidPlan(format!("bad pattern '{}': {}", pattern, e)))
}

impl CommandProgram {
    pub fn new(spec: CommandSpec) -> Result<Self> {
        if spec.executable.trim().is_empty() {
            return Err(ManagerError::InvalidPlan(
                "a task needs an executable".to_string(),
            ));
        }
        let success = spec.success.as_deref().map(compile).transpose()?;
        let failures = spec
            .failures
            .iter()
            .map(|f| Ok((compile(&f.pattern)?, f.kind)))
            .collect::<Result<Vec<_>>>()?;
        let results = spec
            .results
            .iter()
            .map(|(key, pattern)| Ok((key.clone(), compile(pattern)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            spec,
            success,
            failures,
            results,
        })
    }

    pub fn input_file(name: &str) -> String {
        format!("{}.in.json", sanitize_name(name))
    }

    pub fn log_file(name: &str) -> String {
        format!("{}.out", sanitize_name(name))
    }

    fn expand(&self, template: &str, name: &str) -> String {
        template
            .replace("{input}", &Self::input_file(name))
            .replace("{name}", &sanitize_name(name))
    }

    fn extract(&self, log: &str) -> Value {
        let mut values = serde_json::Map::new();
        for (key, re) in &self.results {
            let Some(captures) = re.captures_iter(log).last() else {
                tracing::debug!("No match for result '{}'", key);
                continue;
            };
            let Some(raw) = captures.get(1).map(|m| m.as_str().trim()) else {
                continue;
            };
            let value = match raw.parse::<f64>() {
                Ok(number) => json!(number),
                Err(_) => json!(raw),
            };
            values.insert(key.clone(), value);
        }
        Value::Object(values)
    }
}

impl Writer for CommandProgram {
    fn write_inputs(&self, ctx: &StageContext<'_>) -> Result<()> {
        let inputs: BTreeMap<&String, String> = ctx
            .inputs
            .iter()
            .map(|(k, v)| (k, v.to_string_lossy().to_string()))
            .collect();
        let document = json!({
            "name": ctx.name,
            "config": ctx.config,
            "inputs": inputs,
        });
        let mut content = serde_json::to_string_pretty(&document)?;
        content.push('\n');
        fs_err::write(ctx.dir.join(Self::input_file(ctx.name)), content)?;
        Ok(())
    }

    fn run_lines(&self, ctx: &StageContext<'_>) -> Vec<ScriptLine> {
        let mut lines: Vec<ScriptLine> = self
            .spec
            .setup
            .iter()
            .map(|line| ScriptLine::Command(self.expand(line, ctx.name)))
            .collect();

        let executable = ctx.env.executable(&self.spec.executable);
        let mut command = vec![shell_quote(&executable.to_string_lossy())];
        if self.spec.args.is_empty() {
            command.push(Self::input_file(ctx.name));
        } else {
            command.extend(self.spec.args.iter().map(|a| self.expand(a, ctx.name)));
        }
        lines.push(ScriptLine::Task(format!(
            "{} > {} 2>&1",
            command.join(" "),
            Self::log_file(ctx.name)
        )));
        lines
    }

    fn input_files(&self, name: &str) -> Vec<String> {
        vec![Self::input_file(name)]
    }

    fn signature(&self) -> Value {
        serde_json::to_value(&self.spec).unwrap_or_default()
    }

    fn expected_outputs(&self, name: &str) -> Vec<String> {
        let mut outputs = vec![Self::log_file(name)];
        outputs.extend(self.spec.outputs.iter().map(|o| self.expand(o, name)));
        outputs
    }
}

impl Reader for CommandProgram {
    fn collect(&self, ctx: &StageContext<'_>) -> Result<Collected> {
        let log = fs_err::read_to_string(ctx.dir.join(Self::log_file(ctx.name)))?;

        for (re, kind) in &self.failures {
            if re.is_match(&log) {
                return Ok(Collected::failure(
                    *kind,
                    format!("log matches '{}'", re.as_str()),
                ));
            }
        }
        if let Some(success) = &self.success {
            if !success.is_match(&log) {
                return Ok(Collected::failure(
                    FailureKind::Killed,
                    format!("log ends before '{}'", success.as_str()),
                ));
            }
        }

        let mut collected = Collected::success(self.extract(&log));
        for (artifact, file) in &self.spec.artifacts {
            let file = self.expand(file, ctx.name);
            if ctx.dir.join(&file).exists() {
                collected = collected.with_artifact(artifact, &file);
            } else {
                tracing::warn!("Artifact '{}' ({}) was not produced", artifact, file);
            }
        }
        Ok(collected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Outcome;
    use autogen_core::config::Config;
    use autogen_core::environment::Environment;
    use autogen_core::reconcile::Fields;
    use std::path::PathBuf;

    fn spec() -> CommandSpec {
        CommandSpec {
            executable: "crystal".into(),
            success: Some("SCF ENDED - CONVERGENCE ON ENERGY".into()),
            failures: vec![
                FailurePattern {
                    pattern: "TOO MANY CYCLES".into(),
                    kind: FailureKind::Diverged,
                },
                FailurePattern {
                    pattern: "ERROR".into(),
                    kind: FailureKind::Crashed,
                },
            ],
            results: BTreeMap::from([
                ("energy".into(), r"TOTAL ENERGY\s+(\S+)".into()),
                ("basis".into(), r"BASIS\s+(\S+)".into()),
            ]),
            artifacts: BTreeMap::from([("wavefunction".into(), "fort.9".into())]),
            ..Default::default()
        }
    }

    fn env() -> Environment {
        let mut config = Config::default();
        config
            .executables
            .insert("crystal".into(), "/opt/crystal/Pcrystal".into());
        Environment::new(config).unwrap()
    }

    fn collect(log: &str, with_artifact: bool) -> Collected {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("scf.out"), log).unwrap();
        if with_artifact {
            std::fs::write(dir.path().join("fort.9"), "").unwrap();
        }
        let env = env();
        let config = Fields::new();
        let inputs = BTreeMap::new();
        let ctx = StageContext {
            name: "scf",
            dir: dir.path(),
            config: &config,
            inputs: &inputs,
            env: &env,
        };
        CommandProgram::new(spec()).unwrap().collect(&ctx).unwrap()
    }

    #[test]
    fn test_success_extracts_last_values() {
        let log = "BASIS sto-3g\nTOTAL ENERGY -1.0\nTOTAL ENERGY -1.125\nSCF ENDED - CONVERGENCE ON ENERGY\n";
        let collected = collect(log, true);
        assert_eq!(collected.outcome, Outcome::Success);
        assert_eq!(collected.output["energy"], json!(-1.125));
        assert_eq!(collected.output["basis"], json!("sto-3g"));
        assert_eq!(collected.artifacts["wavefunction"], "fort.9");
    }

    #[test]
    fn test_failure_patterns_win_over_success() {
        let log = "TOO MANY CYCLES\nSCF ENDED - CONVERGENCE ON ENERGY\n";
        assert_eq!(
            collect(log, false).outcome,
            Outcome::Failure(FailureKind::Diverged)
        );
        assert_eq!(
            collect("ERROR in input\n", false).outcome,
            Outcome::Failure(FailureKind::Crashed)
        );
    }

    #[test]
    fn test_truncated_log_means_killed() {
        let collected = collect("TOTAL ENERGY -1.0\n", true);
        assert_eq!(collected.outcome, Outcome::Failure(FailureKind::Killed));
        assert!(collected.artifacts.is_empty());
    }

    #[test]
    fn test_run_lines_and_files() {
        let program = CommandProgram::new(CommandSpec {
            executable: "crystal".into(),
            args: vec!["--input".into(), "{input}".into()],
            setup: vec!["cp {name}.guess fort.20".into()],
            outputs: vec!["fort.9".into()],
            ..Default::default()
        })
        .unwrap();
        let env = env();
        let config = Fields::new();
        let inputs = BTreeMap::new();
        let dir = PathBuf::from("/scratch/h2");
        let ctx = StageContext {
            name: "scf",
            dir: &dir,
            config: &config,
            inputs: &inputs,
            env: &env,
        };

        assert_eq!(
            program.run_lines(&ctx),
            vec![
                ScriptLine::Command("cp scf.guess fort.20".into()),
                ScriptLine::Task("/opt/crystal/Pcrystal --input scf.in.json > scf.out 2>&1".into()),
            ]
        );
        assert_eq!(program.expected_outputs("scf"), vec!["scf.out", "fort.9"]);
        assert_eq!(
            program.attempt_files("scf"),
            vec!["scf.in.json", "scf.out", "fort.9"]
        );
    }

    #[test]
    fn test_signature_follows_invocation() {
        let program = CommandProgram::new(spec()).unwrap();
        let signature = program.signature();
        assert_eq!(signature["executable"], json!("crystal"));

        let mut edited = spec();
        edited.args = vec!["--restart".into()];
        assert_ne!(CommandProgram::new(edited).unwrap().signature(), signature);
        assert_eq!(CommandProgram::new(spec()).unwrap().signature(), signature);
    }

    #[test]
    fn test_invalid_pattern_is_plan_error() {
        let err = CommandProgram::new(CommandSpec {
            executable: "crystal".into(),
            success: Some("(unclosed".into()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, ManagerError::InvalidPlan(_)));
    }

    #[test]
    fn test_write_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let env = env();
        let mut config = Fields::new();
        config.insert("basis".into(), json!("cc-pvdz"));
        let inputs = BTreeMap::from([("guess".to_string(), PathBuf::from("/scratch/h2/fort.9"))]);
        let ctx = StageContext {
            name: "opt",
            dir: dir.path(),
            config: &config,
            inputs: &inputs,
            env: &env,
        };
        CommandProgram::new(spec()).unwrap().write_inputs(&ctx).unwrap();

        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("opt.in.json")).unwrap())
                .unwrap();
        assert_eq!(written["name"], "opt");
        assert_eq!(written["config"]["basis"], "cc-pvdz");
        assert_eq!(written["inputs"]["guess"], "/scratch/h2/fort.9");
    }
}
