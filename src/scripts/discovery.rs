//! SQL script discovery
//!
//! Walks the fixed 29-phase directory layout under the script root and loads
//! every hand-written `*.sql` fragment, tagging each with phase, order and a
//! content hash. New/modified detection is timestamp-based and approximate:
//! a checkout resets timestamps, so the flags are hints, not git truth.

use crate::error::DeployResult;
use crate::metadata::SqlScriptFile;
use crate::phases::{PhaseInfo, PHASES};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Prefix identifying previously compiled output; never re-discovered
pub const COMPILED_PREFIX: &str = "_compiled_deployment";

/// Offset applied to hash-derived fallback orders so explicitly numbered
/// scripts always sort first within a phase
const HASH_ORDER_OFFSET: u32 = 1_000_000;

/// Window within which a freshly created file counts as new
const NEW_FILE_WINDOW_DAYS: i64 = 7;

/// Discovers phase scripts on disk
pub struct SqlScriptDiscovery {
    root: PathBuf,
}

impl SqlScriptDiscovery {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Discover all scripts across all 29 phases, sorted by (phase, order,
    /// file name)
    pub fn discover_all(&self) -> DeployResult<Vec<SqlScriptFile>> {
        let mut scripts = Vec::new();
        for phase in PHASES.iter() {
            if let Some(dir) = self.phase_directory(phase) {
                scripts.extend(self.load_phase_scripts(phase, &dir)?);
            }
        }
        scripts.sort_by(|a, b| {
            (a.phase, a.order, a.file_name.as_str()).cmp(&(b.phase, b.order, b.file_name.as_str()))
        });
        debug!(count = scripts.len(), "script discovery complete");
        Ok(scripts)
    }

    /// Resolve the on-disk directory for a phase, probing the accepted
    /// naming conventions in order: `NN-slug`, `NN_slug`, `NN.slug`, `slug`
    pub fn phase_directory(&self, phase: &PhaseInfo) -> Option<PathBuf> {
        let nn = format!("{:02}", phase.number);
        let candidates = [
            format!("{nn}-{}", phase.slug),
            format!("{nn}_{}", phase.slug),
            format!("{nn}.{}", phase.slug),
            phase.slug.to_string(),
        ];
        candidates
            .iter()
            .map(|c| self.root.join(c))
            .find(|p| p.is_dir())
    }

    fn load_phase_scripts(
        &self,
        phase: &PhaseInfo,
        dir: &Path,
    ) -> DeployResult<Vec<SqlScriptFile>> {
        let mut files = Vec::new();
        Self::collect_sql_files(dir, &mut files)?;

        let mut scripts = Vec::new();
        for path in files {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if file_name.starts_with(COMPILED_PREFIX) {
                continue;
            }

            let content = match fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable script skipped");
                    continue;
                }
            };

            let meta = fs::metadata(&path)?;
            let modified: DateTime<Utc> = meta.modified().map(DateTime::from).unwrap_or_else(|_| Utc::now());
            let created: Option<DateTime<Utc>> = meta.created().ok().map(DateTime::from);

            let (is_new, is_modified) = Self::classify_timestamps(created, modified);

            scripts.push(SqlScriptFile {
                file_name: file_name.clone(),
                file_path: path.to_string_lossy().to_string(),
                phase: phase.number,
                order: Self::derive_order(&file_name),
                hash: Self::content_hash(&content),
                content,
                enhanced_content: None,
                last_modified: modified,
                is_new,
                is_modified,
                requires_warning: phase.requires_warning,
            });
        }
        Ok(scripts)
    }

    /// Recursive `*.sql` collection; consumption walks the same set
    pub(crate) fn collect_sql_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                Self::collect_sql_files(&path, out)?;
            } else if path
                .extension()
                .map(|e| e.eq_ignore_ascii_case("sql"))
                .unwrap_or(false)
            {
                out.push(path);
            }
        }
        Ok(())
    }

    /// Order from the leading digit run of the filename, or a stable
    /// hash-derived fallback guaranteeing stable-but-unordered placement
    pub fn derive_order(file_name: &str) -> u32 {
        let digits: String = file_name.chars().take_while(|c| c.is_ascii_digit()).collect();
        if !digits.is_empty() {
            if let Ok(n) = digits.parse::<u32>() {
                return n;
            }
        }
        let digest = Sha256::digest(file_name.as_bytes());
        let raw = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        HASH_ORDER_OFFSET + (raw % HASH_ORDER_OFFSET)
    }

    /// Truncated SHA-256 hex digest (provenance, not security)
    pub fn content_hash(content: &str) -> String {
        let digest = Sha256::digest(content.as_bytes());
        let hex = format!("{digest:x}");
        hex[..16].to_string()
    }

    fn classify_timestamps(
        created: Option<DateTime<Utc>>,
        modified: DateTime<Utc>,
    ) -> (bool, bool) {
        let now = Utc::now();
        match created {
            Some(created) => {
                let is_new = now - created < ChronoDuration::days(NEW_FILE_WINDOW_DAYS);
                // Slack absorbs copy jitter between the two timestamps
                let is_modified = modified > created + ChronoDuration::seconds(60);
                (is_new, is_modified)
            }
            // Creation time unavailable on this filesystem; fall back to
            // recency of the modification alone
            None => (
                now - modified < ChronoDuration::days(NEW_FILE_WINDOW_DAYS),
                false,
            ),
        }
    }
}
