//! Deployment plan assembly
//!
//! Walks the fixed 29-phase model, combining generated delta DDL with
//! discovered-and-enhanced scripts into one immutable [`DeploymentPlan`].
//! A phase with neither statements nor scripts stays in the plan (the model
//! is always 29 phases) but is dropped from compiled output.

use crate::analyzer::{DatabaseSchemaAnalyzer, LiveSchema};
use crate::client::SqlClient;
use crate::config::Settings;
use crate::error::DeployResult;
use crate::generator::SchemaGenerator;
use crate::graph::DependencyGraphBuilder;
use crate::metadata::{EntityMetadata, SqlScriptFile};
use crate::phases::{PhaseInfo, PHASES};
use crate::scripts::{SqlScriptDiscovery, SqlScriptEnhancer};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

/// One phase of a deployment plan
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseExecution {
    pub phase: u8,
    pub phase_info: &'static PhaseInfo,
    pub statements: Vec<String>,
    pub scripts: Vec<SqlScriptFile>,
    pub requires_warning: bool,
}

impl PhaseExecution {
    pub fn has_content(&self) -> bool {
        !self.statements.is_empty() || !self.scripts.is_empty()
    }
}

/// The complete deployment plan: exactly 29 phases, in order. Built once per
/// run and consumed by exactly one compiled-deployment generation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentPlan {
    pub repository: String,
    pub domain_version: String,
    pub generated_at: DateTime<Utc>,
    pub phases: Vec<PhaseExecution>,
    pub total_statements: usize,
    pub total_scripts: usize,
    pub has_warnings: bool,
}

impl DeploymentPlan {
    /// Phases that actually carry work
    pub fn active_phases(&self) -> impl Iterator<Item = &PhaseExecution> {
        self.phases.iter().filter(|p| p.has_content())
    }

    /// Every statement and enhanced script body, in execution order.
    /// This is the input to production validation.
    pub fn all_statements(&self) -> Vec<String> {
        let mut out = Vec::new();
        for phase in self.active_phases() {
            out.extend(phase.statements.iter().cloned());
            out.extend(
                phase
                    .scripts
                    .iter()
                    .map(|s| s.effective_content().to_string()),
            );
        }
        out
    }
}

/// Assembles deployment plans from entity metadata, the live schema and the
/// discovered script set
pub struct DeploymentOrchestrator {
    settings: Settings,
}

impl DeploymentOrchestrator {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Full pipeline: introspect the live schema, discover and enhance phase
    /// scripts, then assemble the plan
    pub async fn generate_deployment_plan(
        &self,
        entities: &[EntityMetadata],
        client: &dyn SqlClient,
    ) -> DeployResult<DeploymentPlan> {
        let analyzer =
            DatabaseSchemaAnalyzer::new(client, self.settings.schemas.allowed_schemas.clone());
        let live = analyzer.snapshot().await?;

        let discovery = SqlScriptDiscovery::new(&self.settings.scripts.script_root);
        let scripts = discovery.discover_all()?;
        let scripts = SqlScriptEnhancer::enhance_all(scripts).await;

        self.assemble_plan(entities, &live, scripts)
    }

    /// Assemble a plan from already-loaded inputs. Entities are ordered
    /// topologically first; table creation in phase 1 follows that order.
    pub fn assemble_plan(
        &self,
        entities: &[EntityMetadata],
        live: &LiveSchema,
        scripts: Vec<SqlScriptFile>,
    ) -> DeployResult<DeploymentPlan> {
        let graph = DependencyGraphBuilder::build(entities)?;
        DependencyGraphBuilder::ensure_valid(&graph)?;
        let sorted = DependencyGraphBuilder::sort(&graph)?;

        let mut phases = Vec::with_capacity(PHASES.len());
        for info in PHASES.iter() {
            let statements =
                SchemaGenerator::generate_phase_statements(info.number, &sorted, live);

            let mut phase_scripts: Vec<SqlScriptFile> = scripts
                .iter()
                .filter(|s| s.phase == info.number)
                .cloned()
                .collect();
            phase_scripts.sort_by(|a, b| {
                (a.order, a.file_name.as_str()).cmp(&(b.order, b.file_name.as_str()))
            });

            let requires_warning = info.requires_warning
                || phase_scripts.iter().any(|s| s.requires_warning);

            debug!(
                phase = info.number,
                statements = statements.len(),
                scripts = phase_scripts.len(),
                "phase assembled"
            );

            phases.push(PhaseExecution {
                phase: info.number,
                phase_info: info,
                statements,
                scripts: phase_scripts,
                requires_warning,
            });
        }

        let total_statements = phases.iter().map(|p| p.statements.len()).sum();
        let total_scripts = phases.iter().map(|p| p.scripts.len()).sum();
        let has_warnings = phases
            .iter()
            .any(|p| p.has_content() && p.requires_warning);

        let plan = DeploymentPlan {
            repository: self.settings.repository.clone(),
            domain_version: self.settings.domain_version.clone(),
            generated_at: Utc::now(),
            phases,
            total_statements,
            total_scripts,
            has_warnings,
        };

        info!(
            version = %plan.domain_version,
            statements = plan.total_statements,
            scripts = plan.total_scripts,
            warnings = plan.has_warnings,
            "deployment plan assembled"
        );
        Ok(plan)
    }
}
