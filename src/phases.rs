//! The fixed 29-phase deployment model
//!
//! Process-wide constant state: an immutable lookup table mapping phase
//! number to slug, description and warning flag, constructed once at startup.

use once_cell::sync::Lazy;
use serde::Serialize;

/// Total number of deployment phases
pub const PHASE_COUNT: u8 = 29;

/// Metadata for one deployment phase
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseInfo {
    pub number: u8,
    pub slug: &'static str,
    pub description: &'static str,
    /// Phases touching security, partitioning or database options require an
    /// operator warning banner in the compiled output
    pub requires_warning: bool,
}

macro_rules! phase {
    ($n:expr, $slug:expr, $desc:expr) => {
        PhaseInfo {
            number: $n,
            slug: $slug,
            description: $desc,
            requires_warning: false,
        }
    };
    ($n:expr, $slug:expr, $desc:expr, warn) => {
        PhaseInfo {
            number: $n,
            slug: $slug,
            description: $desc,
            requires_warning: true,
        }
    };
}

/// The immutable 29-phase table, in execution order
pub static PHASES: Lazy<Vec<PhaseInfo>> = Lazy::new(|| {
    vec![
        phase!(1, "create-tables", "Schemas and tables"),
        phase!(2, "primary-keys", "Primary key indexes"),
        phase!(3, "unique-indexes", "Unique indexes and constraints"),
        phase!(4, "reference-data", "Reference and seed data"),
        phase!(5, "foreign-keys", "Foreign key constraints"),
        phase!(6, "nonclustered-indexes", "Non-clustered indexes"),
        phase!(7, "composite-indexes", "Composite indexes"),
        phase!(8, "check-constraints", "Check constraints"),
        phase!(9, "default-constraints", "Default constraints"),
        phase!(10, "user-defined-types", "User-defined types"),
        phase!(11, "views", "Views"),
        phase!(12, "functions", "Scalar and table-valued functions"),
        phase!(13, "stored-procedures", "Stored procedures"),
        phase!(14, "synonyms", "Synonyms"),
        phase!(15, "sequences", "Sequences"),
        phase!(16, "triggers", "Triggers", warn),
        phase!(17, "roles", "Database roles", warn),
        phase!(18, "users", "Database users", warn),
        phase!(19, "schema-permissions", "Schema-level permissions", warn),
        phase!(20, "object-permissions", "Object-level permissions", warn),
        phase!(21, "statistics", "Statistics objects"),
        phase!(22, "full-text", "Full-text catalogs and indexes", warn),
        phase!(23, "partition-functions", "Partition functions", warn),
        phase!(24, "partition-schemes", "Partition schemes", warn),
        phase!(25, "database-options", "Database-level options", warn),
        phase!(26, "data-migration", "One-off data migration"),
        phase!(27, "data-validation", "Post-deployment data validation", warn),
        phase!(28, "cleanup", "Cleanup of superseded objects"),
        phase!(29, "maintenance", "Index and statistics maintenance", warn),
    ]
});

/// Look up phase info by number (1-based)
pub fn phase_info(number: u8) -> Option<&'static PhaseInfo> {
    if number == 0 || number > PHASE_COUNT {
        return None;
    }
    PHASES.get(number as usize - 1)
}

/// Phases for which entity-driven statement generation exists; all other
/// phases are script-only.
pub const GENERATED_PHASES: [u8; 6] = [1, 2, 3, 5, 6, 7];
