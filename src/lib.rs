//! schemadeploy - Phase-Aware SQL Schema Deployment Planner
//!
//! Turns declarative entity metadata plus hand-written phase scripts into a
//! single compiled, transactional deployment artifact for SQL Server.
//!
//! PIPELINE: a deployment run walks a fixed sequence:
//! - Graph: entity dependency graph construction and topological ordering
//! - Analyze: live-schema introspection over the allowed schemas
//! - Generate: delta DDL for the generated phases (tables, keys, indexes)
//! - Scripts: discovery and idempotency enhancement of hand-written SQL
//! - Validate: production risk classification of every statement
//! - Compile: one transactional `_compiled_deployment_v<version>.sql` artifact
//! - Execute: sequential batch execution with backup/restore support
//! - Consume: post-deployment git cleanup of spent scripts
//!
//! The raw SQL transport and the git executable live behind the
//! [`client::SqlClient`] and [`client::GitClient`] seams; everything else in
//! the pipeline is transport-agnostic.

pub mod analyzer;
pub mod client;
pub mod compiled;
pub mod config;
pub mod error;
pub mod executor;
pub mod generator;
pub mod git;
pub mod graph;
pub mod metadata;
pub mod orchestrator;
pub mod phases;
pub mod scripts;
pub mod validator;

pub use analyzer::{DatabaseSchemaAnalyzer, LiveSchema};
pub use client::{GitClient, SqlClient};
pub use compiled::CompiledDeploymentGenerator;
pub use config::Settings;
pub use error::{DeployError, DeployResult};
pub use executor::SqlExecutor;
pub use git::GitIntegrationService;
pub use graph::DependencyGraphBuilder;
pub use metadata::EntityMetadata;
pub use orchestrator::{DeploymentOrchestrator, DeploymentPlan};
pub use validator::{OverallResult, ProductionValidator};
