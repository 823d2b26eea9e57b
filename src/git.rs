//! Post-deployment git consumption
//!
//! After a confirmed-successful production run, the hand-written phase
//! scripts are spent: they are deleted from the working tree, recorded in a
//! versioned history file, and the whole change is committed and pushed.
//! Runs strictly after execution, never as part of planning.

use crate::client::GitClient;
use crate::config::Settings;
use crate::error::{DeployResult, GitError};
use crate::metadata::ConsumedScript;
use crate::phases::PHASES;
use crate::scripts::{SqlScriptDiscovery, COMPILED_PREFIX};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// CI environment markers; a push failure under any of these is downgraded
/// to a warning because the pipeline owns the remote
const CI_ENV_VARS: [&str; 4] = ["CI", "GITHUB_ACTIONS", "TF_BUILD", "GITLAB_CI"];

/// The durable record written alongside the consumed scripts
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentHistoryRecord {
    pub version: String,
    pub repository: String,
    pub branch: String,
    pub commit: String,
    pub deployed_at: chrono::DateTime<Utc>,
    pub compiled_artifact: String,
    pub consumed_scripts: Vec<ConsumedScript>,
}

/// What consumption did: which scripts were spent, where the history record
/// landed, and whether the commit reached the remote
#[derive(Debug)]
pub struct ConsumptionOutcome {
    pub consumed: Vec<ConsumedScript>,
    pub history_path: PathBuf,
    pub committed: bool,
    pub pushed: bool,
}

/// Consumes deployed scripts and records the deployment in git
pub struct GitIntegrationService<'a> {
    git: &'a dyn GitClient,
    settings: Settings,
    in_ci: bool,
}

impl<'a> GitIntegrationService<'a> {
    pub fn new(git: &'a dyn GitClient, settings: Settings) -> Self {
        let in_ci = CI_ENV_VARS
            .iter()
            .any(|v| std::env::var(v).map(|s| !s.is_empty()).unwrap_or(false));
        Self {
            git,
            settings,
            in_ci,
        }
    }

    #[cfg(test)]
    fn with_ci(mut self, in_ci: bool) -> Self {
        self.in_ci = in_ci;
        self
    }

    /// Full consumption flow: delete spent scripts, write the history record,
    /// commit and push
    pub fn consume_after_deployment(
        &self,
        compiled_artifact: &str,
    ) -> DeployResult<ConsumptionOutcome> {
        let consumed = self.consume_scripts()?;
        let (branch, commit) = self.capture_head()?;

        let record = DeploymentHistoryRecord {
            version: self.settings.domain_version.clone(),
            repository: self.settings.repository.clone(),
            branch,
            commit,
            deployed_at: Utc::now(),
            compiled_artifact: compiled_artifact.to_string(),
            consumed_scripts: consumed.clone(),
        };
        let history_path = self.settings.scripts.script_root.join(format!(
            "deployment_history_v{}.json",
            self.settings.domain_version
        ));
        fs::create_dir_all(&self.settings.scripts.script_root).map_err(GitError::Io)?;
        fs::write(&history_path, serde_json::to_string_pretty(&record)?).map_err(GitError::Io)?;

        let message = self.commit_message(compiled_artifact, &consumed);
        let (committed, pushed) = self.commit_and_push(&message)?;

        info!(
            consumed = consumed.len(),
            committed,
            pushed,
            history = %history_path.display(),
            "script consumption complete"
        );
        Ok(ConsumptionOutcome {
            consumed,
            history_path,
            committed,
            pushed,
        })
    }

    /// Delete every non-compiled `*.sql` under the 29 phase directories,
    /// recording each deletion. Walks each phase directory with the same
    /// recursive collection discovery uses, so nested scripts are spent too.
    /// Emptied directories are removed bottom-up.
    fn consume_scripts(&self) -> DeployResult<Vec<ConsumedScript>> {
        let discovery = SqlScriptDiscovery::new(&self.settings.scripts.script_root);
        let mut consumed = Vec::new();

        for phase in PHASES.iter() {
            let Some(dir) = discovery.phase_directory(phase) else {
                continue;
            };
            let mut files = Vec::new();
            SqlScriptDiscovery::collect_sql_files(&dir, &mut files).map_err(GitError::Io)?;

            for path in files {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                if name.starts_with(COMPILED_PREFIX) {
                    continue;
                }
                let content = fs::read_to_string(&path).map_err(GitError::Io)?;
                fs::remove_file(&path).map_err(GitError::Io)?;
                debug!(script = %path.display(), "consumed script deleted");
                consumed.push(ConsumedScript {
                    file_name: name,
                    original_path: path.to_string_lossy().to_string(),
                    phase: phase.number,
                    hash: SqlScriptDiscovery::content_hash(&content),
                    consumed_at: Utc::now(),
                });
            }

            Self::prune_empty_dirs(&dir).map_err(GitError::Io)?;
            // Best effort on the phase directory itself: fails harmlessly if
            // anything (a compiled artifact, say) remains
            let _ = fs::remove_dir(&dir);
        }
        Ok(consumed)
    }

    /// Remove emptied subdirectories bottom-up; non-empty ones stay
    fn prune_empty_dirs(dir: &Path) -> std::io::Result<()> {
        for entry in fs::read_dir(dir)?.flatten() {
            let path = entry.path();
            if path.is_dir() {
                Self::prune_empty_dirs(&path)?;
                let _ = fs::remove_dir(&path);
            }
        }
        Ok(())
    }

    fn capture_head(&self) -> DeployResult<(String, String)> {
        let branch = self
            .run_checked(&["branch", "--show-current"])?
            .trim()
            .to_string();
        let commit = self.run_checked(&["rev-parse", "HEAD"])?.trim().to_string();
        Ok((branch, commit))
    }

    /// Commit message: version header, artifact, consumed scripts grouped by
    /// phase with their hashes, and a CI-skip trailer so the consumption
    /// commit never re-triggers the pipeline
    fn commit_message(&self, compiled_artifact: &str, consumed: &[ConsumedScript]) -> String {
        let mut message = format!(
            "Deploy schema v{version}\n\nRepository: {repo}\nCompiled artifact: {artifact}\n",
            version = self.settings.domain_version,
            repo = self.settings.repository,
            artifact = compiled_artifact,
        );

        if consumed.is_empty() {
            message.push_str("No scripts consumed.\n");
        } else {
            message.push_str(&format!("Consumed {} script(s):\n", consumed.len()));
            let mut by_phase: BTreeMap<u8, Vec<&ConsumedScript>> = BTreeMap::new();
            for script in consumed {
                by_phase.entry(script.phase).or_default().push(script);
            }
            for (phase, scripts) in by_phase {
                let slug = crate::phases::phase_info(phase)
                    .map(|p| p.slug)
                    .unwrap_or("unknown");
                message.push_str(&format!("\nPhase {phase:02} ({slug}):\n"));
                for script in scripts {
                    message.push_str(&format!("  - {} [{}]\n", script.file_name, script.hash));
                }
            }
        }

        message.push_str("\n[skip ci]\n");
        message
    }

    /// add / commit / push. "nothing to commit" is a success; a push failure
    /// inside CI is downgraded to a warning.
    fn commit_and_push(&self, message: &str) -> DeployResult<(bool, bool)> {
        self.run_checked(&["add", "-A"])?;

        let commit = self.git.run(&["commit", "-m", message]).map_err(GitError::Io)?;
        if !commit.success() {
            let combined = format!("{}{}", commit.stdout, commit.stderr);
            if combined.contains("nothing to commit") {
                info!("nothing to commit after consumption");
                return Ok((false, false));
            }
            return Err(GitError::CommandFailed {
                command: "commit".to_string(),
                exit_code: commit.exit_code,
                stderr: commit.stderr,
            }
            .into());
        }

        let push = self
            .git
            .run(&["push", "origin", "HEAD"])
            .map_err(GitError::Io)?;
        if !push.success() {
            if self.in_ci {
                warn!(stderr = %push.stderr, "push failed inside CI, commit stays local");
                return Ok((true, false));
            }
            return Err(GitError::PushFailed {
                stderr: push.stderr,
            }
            .into());
        }
        Ok((true, true))
    }

    fn run_checked(&self, args: &[&str]) -> DeployResult<String> {
        let out = self.git.run(args).map_err(GitError::Io)?;
        if !out.success() {
            return Err(GitError::CommandFailed {
                command: args.join(" "),
                exit_code: out.exit_code,
                stderr: out.stderr,
            }
            .into());
        }
        Ok(out.stdout)
    }
}
