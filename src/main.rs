//! Offline planning entry point
//!
//! Loads entity metadata from a JSON file, discovers and enhances the phase
//! scripts under the configured script root, assembles a deployment plan
//! against an empty live schema and writes the compiled artifact pair.
//!
//! Live introspection, execution and git consumption need a SQL transport
//! and are wired by the embedding deployment tool; this binary covers the
//! review workflow: "what would this metadata deploy as".

use schemadeploy::analyzer::LiveSchema;
use schemadeploy::compiled::CompiledDeploymentGenerator;
use schemadeploy::config::Settings;
use schemadeploy::metadata::EntityMetadata;
use schemadeploy::orchestrator::DeploymentOrchestrator;
use schemadeploy::scripts::{SqlScriptDiscovery, SqlScriptEnhancer};
use schemadeploy::validator::{OverallResult, ProductionValidator, Severity};
use std::fs;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let settings = Settings::load()?;
    let metadata_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "entities.json".to_string());

    info!(path = %metadata_path, "loading entity metadata");
    let entities: Vec<EntityMetadata> = serde_json::from_str(&fs::read_to_string(&metadata_path)?)?;
    info!(entities = entities.len(), "metadata loaded");

    let discovery = SqlScriptDiscovery::new(&settings.scripts.script_root);
    let scripts = discovery.discover_all()?;
    let scripts = SqlScriptEnhancer::enhance_all(scripts).await;
    info!(scripts = scripts.len(), "phase scripts enhanced");

    let orchestrator = DeploymentOrchestrator::new(settings.clone());
    let plan = orchestrator.assemble_plan(&entities, &LiveSchema::empty(), scripts)?;

    // Offline risk pass: pattern classification without live row counts
    let mut blocked = 0usize;
    let mut warnings = 0usize;
    for statement in plan.all_statements() {
        for issue in ProductionValidator::classify(&statement) {
            match issue.severity {
                Severity::Error => {
                    blocked += 1;
                    warn!(category = %issue.category, statement = %issue.statement, "blocking pattern");
                }
                Severity::Warning => warnings += 1,
                Severity::Info => {}
            }
        }
    }
    let verdict = if blocked > 0 {
        OverallResult::Blocked
    } else if warnings > 0 {
        OverallResult::Warnings
    } else {
        OverallResult::Safe
    };
    info!(?verdict, blocked, warnings, "offline risk pass complete");

    let generator = CompiledDeploymentGenerator::new(settings.scripts.clone());
    let artifact = generator.generate(&plan, false)?;
    info!(
        artifact = %artifact.sql_path.display(),
        summary = %artifact.summary_path.display(),
        statements = plan.total_statements,
        scripts = plan.total_scripts,
        "review artifact written"
    );
    Ok(())
}
