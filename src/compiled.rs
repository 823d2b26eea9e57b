//! Compiled deployment artifact generation
//!
//! Renders one deployment plan into a single executable T-SQL artifact plus a
//! human-readable markdown summary. Production mode wraps the whole run in a
//! transaction with TRY/CATCH rollback; non-production output is the bare
//! phase sequence for inspection.

use crate::config::ScriptConfig;
use crate::error::DeployResult;
use crate::orchestrator::{DeploymentPlan, PhaseExecution};
use crate::scripts::COMPILED_PREFIX;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Statement prefixes that run fine inside a shared batch and get no `GO`
const SIMPLE_PREFIXES: [&str; 7] = [
    "PRINT", "DECLARE", "SET", "SELECT", "INSERT", "UPDATE", "DELETE",
];

/// A rendered artifact pair on disk
#[derive(Debug, Clone)]
pub struct CompiledDeployment {
    pub file_name: String,
    pub sql_path: PathBuf,
    pub summary_path: PathBuf,
    pub sql: String,
    pub summary: String,
}

/// Renders deployment plans into compiled SQL artifacts and manages the
/// retention window of previously compiled output
pub struct CompiledDeploymentGenerator {
    config: ScriptConfig,
}

impl CompiledDeploymentGenerator {
    pub fn new(config: ScriptConfig) -> Self {
        Self { config }
    }

    /// Render the plan and write the `.sql` + `.md` pair, then prune older
    /// artifacts beyond the retention window
    pub fn generate(
        &self,
        plan: &DeploymentPlan,
        production: bool,
    ) -> DeployResult<CompiledDeployment> {
        let file_name = format!("{COMPILED_PREFIX}_v{}.sql", plan.domain_version);
        let sql = Self::render_sql(plan, production);
        let summary = Self::render_summary(plan, production);

        fs::create_dir_all(&self.config.compiled_dir)?;
        let sql_path = self.config.compiled_dir.join(&file_name);
        let summary_path = sql_path.with_extension("md");
        fs::write(&sql_path, &sql)?;
        fs::write(&summary_path, &summary)?;

        self.apply_retention()?;

        info!(
            artifact = %sql_path.display(),
            production,
            phases = plan.active_phases().count(),
            "compiled deployment written"
        );
        Ok(CompiledDeployment {
            file_name,
            sql_path,
            summary_path,
            sql,
            summary,
        })
    }

    /// Pure rendering of the executable artifact
    pub fn render_sql(plan: &DeploymentPlan, production: bool) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "-- ============================================================\n\
             -- Compiled deployment v{version}\n\
             -- Repository: {repo}\n\
             -- Generated:  {generated}\n\
             -- Mode:       {mode}\n\
             -- Phases:     {phases} active / 29\n\
             -- Statements: {statements}   Scripts: {scripts}\n",
            version = plan.domain_version,
            repo = plan.repository,
            generated = plan.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
            mode = if production { "PRODUCTION" } else { "REVIEW" },
            phases = plan.active_phases().count(),
            statements = plan.total_statements,
            scripts = plan.total_scripts,
        ));
        if plan.has_warnings {
            out.push_str(
                "-- ⚠️ WARNING: this deployment touches security, partitioning or\n\
                 -- database options. Review the flagged phases before running.\n",
            );
        }
        out.push_str("-- ============================================================\n\n");

        if production {
            out.push_str("SET XACT_ABORT ON;\nGO\n\nBEGIN TRANSACTION;\nBEGIN TRY\n\n");
        }

        for phase in plan.active_phases() {
            Self::render_phase(&mut out, phase);
        }

        if production {
            out.push_str(
                "COMMIT TRANSACTION;\n\
                 PRINT 'Deployment committed.';\n\
                 END TRY\n\
                 BEGIN CATCH\n\
                 \x20   DECLARE @ErrMsg NVARCHAR(4000) = ERROR_MESSAGE();\n\
                 \x20   DECLARE @ErrSeverity INT = ERROR_SEVERITY();\n\
                 \x20   DECLARE @ErrState INT = ERROR_STATE();\n\
                 \x20   IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION;\n\
                 \x20   PRINT 'Deployment rolled back: ' + @ErrMsg;\n\
                 \x20   RAISERROR(@ErrMsg, @ErrSeverity, @ErrState);\n\
                 END CATCH\n",
            );
        }

        out.push_str(&Self::render_history_footer(plan));
        out
    }

    fn render_phase(out: &mut String, phase: &PhaseExecution) {
        out.push_str(&format!(
            "-- ------------------------------------------------------------\n\
             -- Phase {:02}: {} — {}\n",
            phase.phase, phase.phase_info.slug, phase.phase_info.description
        ));
        if phase.requires_warning {
            out.push_str("-- ⚠️ Review required before execution\n");
        }
        out.push_str("-- ------------------------------------------------------------\n");
        out.push_str(&format!(
            "DECLARE @phase{n}_start DATETIME2 = SYSUTCDATETIME();\n\
             PRINT 'Phase {n:02} ({slug}) starting...';\n\n",
            n = phase.phase,
            slug = phase.phase_info.slug,
        ));

        for statement in &phase.statements {
            out.push_str(statement.trim_end());
            out.push('\n');
            if !Self::is_simple_statement(statement) {
                out.push_str("GO\n");
            }
        }

        for script in &phase.scripts {
            out.push_str(&format!("-- Script: {}\n", script.file_name));
            let body = script.effective_content().trim_end();
            out.push_str(body);
            out.push('\n');
            if !body.to_uppercase().trim_end().ends_with("GO") {
                out.push_str("GO\n");
            }
        }

        out.push_str(&format!(
            "\nPRINT 'Phase {n:02} complete in ' + \
             CAST(DATEDIFF(SECOND, @phase{n}_start, SYSUTCDATETIME()) AS NVARCHAR(10)) + 's';\n\n",
            n = phase.phase,
        ));
    }

    /// Statements that stay in the current batch; everything else (DDL,
    /// CREATE PROCEDURE, ALTER ...) gets its own batch via `GO`
    fn is_simple_statement(statement: &str) -> bool {
        let upper = statement.trim_start().to_uppercase();
        SIMPLE_PREFIXES.iter().any(|p| upper.starts_with(p))
    }

    /// Best-effort history record; skipped silently if the table is absent
    fn render_history_footer(plan: &DeploymentPlan) -> String {
        format!(
            "\n-- Deployment history (best effort)\n\
             IF OBJECT_ID(N'dbo.DeploymentHistory', N'U') IS NOT NULL\n\
             BEGIN\n\
             \x20   INSERT INTO dbo.DeploymentHistory\n\
             \x20       (Version, Repository, DeployedAt, StatementCount, ScriptCount)\n\
             \x20   VALUES\n\
             \x20       (N'{version}', N'{repo}', SYSUTCDATETIME(), {statements}, {scripts});\n\
             END\nGO\n",
            version = plan.domain_version,
            repo = plan.repository,
            statements = plan.total_statements,
            scripts = plan.total_scripts,
        )
    }

    /// Pure rendering of the markdown summary
    pub fn render_summary(plan: &DeploymentPlan, production: bool) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "# Compiled deployment v{}\n\n\
             - Repository: `{}`\n\
             - Generated: {}\n\
             - Mode: {}\n\
             - Statements: {} | Scripts: {}\n\n## Phases\n\n",
            plan.domain_version,
            plan.repository,
            plan.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
            if production { "production" } else { "review" },
            plan.total_statements,
            plan.total_scripts,
        ));

        for phase in plan.active_phases() {
            let marker = if phase.requires_warning { "⚠️" } else { "✅" };
            out.push_str(&format!(
                "### {} Phase {:02} — {}\n\n",
                marker, phase.phase, phase.phase_info.description
            ));
            if !phase.statements.is_empty() {
                out.push_str(&format!(
                    "- {} generated statement(s)\n",
                    phase.statements.len()
                ));
            }
            for script in &phase.scripts {
                let mut tags = Vec::new();
                if script.is_new {
                    tags.push("NEW");
                }
                if script.is_modified {
                    tags.push("MODIFIED");
                }
                let tag = if tags.is_empty() {
                    String::new()
                } else {
                    format!(" **{}**", tags.join(", "))
                };
                out.push_str(&format!(
                    "- `{}` (order {}, hash `{}`){}\n",
                    script.file_name, script.order, script.hash, tag
                ));
            }
            out.push('\n');
        }

        if plan.active_phases().count() == 0 {
            out.push_str("_No changes: the live schema already matches._\n");
        }
        out
    }

    /// Keep the newest N compiled `.sql` artifacts; delete older pairs
    fn apply_retention(&self) -> DeployResult<()> {
        let mut artifacts: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
        let entries = match fs::read_dir(&self.config.compiled_dir) {
            Ok(e) => e,
            Err(_) => return Ok(()),
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if name.starts_with(COMPILED_PREFIX)
                && path.extension().map(|e| e == "sql").unwrap_or(false)
            {
                let modified = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
                artifacts.push((path, modified));
            }
        }

        if artifacts.len() <= self.config.retain_compiled {
            return Ok(());
        }
        artifacts.sort_by(|a, b| b.1.cmp(&a.1));
        for (path, _) in artifacts.into_iter().skip(self.config.retain_compiled) {
            debug!(artifact = %path.display(), "retention pruning compiled artifact");
            if let Err(e) = fs::remove_file(&path) {
                warn!(artifact = %path.display(), error = %e, "failed to prune artifact");
            }
            let md = path.with_extension("md");
            if md.exists() {
                let _ = fs::remove_file(md);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::LiveSchema;
    use crate::orchestrator::{tests::test_settings, DeploymentOrchestrator};
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn plan_with_script() -> DeploymentPlan {
        let script = crate::metadata::SqlScriptFile {
            file_name: "001_seed.sql".to_string(),
            file_path: "SqlScripts/04-reference-data/001_seed.sql".to_string(),
            phase: 4,
            order: 1,
            content: "INSERT INTO [Core].[Country] VALUES (1);".to_string(),
            enhanced_content: None,
            hash: "ab".repeat(8),
            last_modified: Utc::now(),
            is_new: true,
            is_modified: false,
            requires_warning: false,
        };
        DeploymentOrchestrator::new(test_settings())
            .assemble_plan(&[], &LiveSchema::empty(), vec![script])
            .unwrap()
    }

    #[test]
    fn test_production_artifact_has_transaction_wrapper() {
        let sql = CompiledDeploymentGenerator::render_sql(&plan_with_script(), true);
        assert!(sql.contains("BEGIN TRANSACTION;"));
        assert!(sql.contains("COMMIT TRANSACTION;"));
        assert!(sql.contains("BEGIN CATCH"));
        assert!(sql.contains("ROLLBACK TRANSACTION;"));
        assert!(sql.contains("RAISERROR(@ErrMsg, @ErrSeverity, @ErrState);"));
    }

    #[test]
    fn test_review_artifact_has_no_transaction_wrapper() {
        let sql = CompiledDeploymentGenerator::render_sql(&plan_with_script(), false);
        assert!(!sql.contains("BEGIN TRANSACTION"));
        assert!(!sql.contains("BEGIN CATCH"));
        assert!(sql.contains("Mode:       REVIEW"));
    }

    #[test]
    fn test_empty_phases_are_omitted() {
        let sql = CompiledDeploymentGenerator::render_sql(&plan_with_script(), false);
        assert!(sql.contains("Phase 04"));
        assert!(!sql.contains("Phase 13"));
        assert!(!sql.contains("Phase 29"));
    }

    #[test]
    fn test_simple_statements_do_not_get_go() {
        assert!(CompiledDeploymentGenerator::is_simple_statement(
            "INSERT INTO x VALUES (1);"
        ));
        assert!(CompiledDeploymentGenerator::is_simple_statement(
            "  print 'hi';"
        ));
        assert!(!CompiledDeploymentGenerator::is_simple_statement(
            "CREATE TABLE [Core].[User] ([Id] INT);"
        ));
        assert!(!CompiledDeploymentGenerator::is_simple_statement(
            "ALTER TABLE [Core].[User] ADD [X] INT;"
        ));
    }

    #[test]
    fn test_phase_timing_and_history_footer() {
        let sql = CompiledDeploymentGenerator::render_sql(&plan_with_script(), true);
        assert!(sql.contains("DECLARE @phase4_start DATETIME2 = SYSUTCDATETIME();"));
        assert!(sql.contains("DATEDIFF(SECOND, @phase4_start"));
        assert!(sql.contains("IF OBJECT_ID(N'dbo.DeploymentHistory', N'U') IS NOT NULL"));
        assert!(sql.contains("N'1.2.3'"));
    }

    #[test]
    fn test_summary_lists_scripts_with_tags() {
        let summary = CompiledDeploymentGenerator::render_summary(&plan_with_script(), true);
        assert!(summary.contains("✅ Phase 04"));
        assert!(summary.contains("`001_seed.sql`"));
        assert!(summary.contains("**NEW**"));
    }

    #[test]
    fn test_generate_writes_pair_and_applies_retention() {
        let tmp = TempDir::new().unwrap();
        let config = ScriptConfig {
            script_root: tmp.path().join("scripts"),
            compiled_dir: tmp.path().join("compiled"),
            retain_compiled: 1,
        };
        // Pre-existing older artifact pair past the retention window
        std::fs::create_dir_all(&config.compiled_dir).unwrap();
        let old_sql = config.compiled_dir.join("_compiled_deployment_v0.9.0.sql");
        let old_md = config.compiled_dir.join("_compiled_deployment_v0.9.0.md");
        std::fs::write(&old_sql, "-- old").unwrap();
        std::fs::write(&old_md, "# old").unwrap();
        // Push the old pair's mtime into the past
        let past = std::time::SystemTime::now() - std::time::Duration::from_secs(3600);
        let _ = filetime_set(&old_sql, past);

        let generator = CompiledDeploymentGenerator::new(config.clone());
        let artifact = generator.generate(&plan_with_script(), true).unwrap();

        assert!(artifact.sql_path.exists());
        assert!(artifact.summary_path.exists());
        assert_eq!(artifact.file_name, "_compiled_deployment_v1.2.3.sql");
        assert!(!old_sql.exists());
        assert!(!old_md.exists());
    }

    // TempDir writes land within the same second; nudge mtimes apart without
    // pulling in a filetime dependency
    fn filetime_set(path: &std::path::Path, time: std::time::SystemTime) -> std::io::Result<()> {
        let file = std::fs::OpenOptions::new().write(true).open(path)?;
        file.set_times(std::fs::FileTimes::new().set_modified(time))?;
        Ok(())
    }
}
