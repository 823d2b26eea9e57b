//! SQL script enhancement
//!
//! Rewrites discovered scripts into idempotent, transaction-safe form per
//! phase-specific object kind: DROP-IF-EXISTS before each CREATE for
//! programmability objects, or a transaction wrapper for generic scripts.
//! Enhancement is stateless per script, so the set fans out across tasks.

use crate::metadata::SqlScriptFile;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::task::JoinSet;
use tracing::debug;

/// Object kinds the enhancer understands, mapped from the phase number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Procedure,
    View,
    Function,
    Trigger,
    UserDefinedType,
    Role,
    User,
    Generic,
}

impl ObjectKind {
    /// Phase-specific object kind; phases without a recognized kind are
    /// treated as generic and transaction-wrapped
    pub fn for_phase(phase: u8) -> Self {
        match phase {
            10 => ObjectKind::UserDefinedType,
            11 => ObjectKind::View,
            12 => ObjectKind::Function,
            13 => ObjectKind::Procedure,
            16 => ObjectKind::Trigger,
            17 => ObjectKind::Role,
            18 => ObjectKind::User,
            _ => ObjectKind::Generic,
        }
    }

    fn keywords(&self) -> &'static [&'static str] {
        match self {
            ObjectKind::Procedure => &["PROCEDURE", "PROC"],
            ObjectKind::View => &["VIEW"],
            ObjectKind::Function => &["FUNCTION"],
            ObjectKind::Trigger => &["TRIGGER"],
            ObjectKind::UserDefinedType => &["TYPE"],
            ObjectKind::Role => &["ROLE"],
            ObjectKind::User => &["USER"],
            ObjectKind::Generic => &[],
        }
    }

    /// Existence-guarded drop for one named object
    fn drop_statement(&self, name: &str) -> Option<String> {
        let bare = bare_name(name);
        let qualified = bracket_name(name);
        match self {
            ObjectKind::Procedure => Some(format!(
                "IF EXISTS (SELECT 1 FROM sys.objects WHERE object_id = OBJECT_ID(N'{qualified}') AND type IN ('P', 'PC'))\n    DROP PROCEDURE {qualified};"
            )),
            ObjectKind::View => Some(format!(
                "IF EXISTS (SELECT 1 FROM sys.views WHERE object_id = OBJECT_ID(N'{qualified}'))\n    DROP VIEW {qualified};"
            )),
            ObjectKind::Function => Some(format!(
                "IF EXISTS (SELECT 1 FROM sys.objects WHERE object_id = OBJECT_ID(N'{qualified}') AND type IN ('FN', 'IF', 'TF'))\n    DROP FUNCTION {qualified};"
            )),
            ObjectKind::Trigger => Some(format!(
                "IF EXISTS (SELECT 1 FROM sys.triggers WHERE object_id = OBJECT_ID(N'{qualified}'))\n    DROP TRIGGER {qualified};"
            )),
            ObjectKind::UserDefinedType => Some(format!(
                "IF EXISTS (SELECT 1 FROM sys.types WHERE name = N'{bare}')\n    DROP TYPE {qualified};"
            )),
            ObjectKind::Role => Some(format!(
                "IF EXISTS (SELECT 1 FROM sys.database_principals WHERE name = N'{bare}' AND type = 'R')\n    DROP ROLE [{bare}];"
            )),
            ObjectKind::User => Some(format!(
                "IF EXISTS (SELECT 1 FROM sys.database_principals WHERE name = N'{bare}' AND type IN ('S', 'U', 'E'))\n    DROP USER [{bare}];"
            )),
            ObjectKind::Generic => None,
        }
    }
}

static GO_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*GO\s*;?\s*$").expect("valid regex"));

static CREATE_OBJECT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*CREATE\s+(PROCEDURE|PROC|VIEW|FUNCTION|TRIGGER|TYPE|ROLE|USER)\s+([\w\[\]\.]+)")
        .expect("valid regex")
});

static BLOCK_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(BEGIN|CASE|END)\b").expect("valid regex"));

static TRANSACTION_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bBEGIN\s+TRAN(SACTION)?\b").expect("valid regex"));

/// Rewrites scripts into idempotent, transaction-safe form
pub struct SqlScriptEnhancer;

impl SqlScriptEnhancer {
    /// Enhance one script in place (original content retained)
    pub fn enhance(script: &mut SqlScriptFile) {
        let kind = ObjectKind::for_phase(script.phase);
        let body = match kind {
            ObjectKind::Generic => Self::wrap_transaction(&script.content),
            _ => Self::rewrite_idempotent(&script.content, kind),
        };
        let header = Self::provenance_header(script);
        script.enhanced_content = Some(format!("{header}\n{body}"));
        debug!(file = %script.file_name, phase = script.phase, "script enhanced");
    }

    /// Fan-out enhancement across the script set; per-script work shares no
    /// state, and phase/order sorting happens after gathering
    pub async fn enhance_all(scripts: Vec<SqlScriptFile>) -> Vec<SqlScriptFile> {
        let mut set = JoinSet::new();
        for mut script in scripts {
            set.spawn_blocking(move || {
                Self::enhance(&mut script);
                script
            });
        }
        let mut enhanced = Vec::new();
        while let Some(result) = set.join_next().await {
            if let Ok(script) = result {
                enhanced.push(script);
            }
        }
        enhanced.sort_by(|a, b| {
            (a.phase, a.order, a.file_name.as_str()).cmp(&(b.phase, b.order, b.file_name.as_str()))
        });
        enhanced
    }

    /// Provenance header prepended to every enhanced script
    fn provenance_header(script: &SqlScriptFile) -> String {
        let mut flags = Vec::new();
        if script.is_new {
            flags.push("NEW");
        }
        if script.is_modified {
            flags.push("MODIFIED");
        }
        if script.requires_warning {
            flags.push("WARNING");
        }
        let flags = if flags.is_empty() {
            "-".to_string()
        } else {
            flags.join(",")
        };
        format!(
            "-- ============================================================\n\
             -- Script:  {}\n\
             -- Phase:   {} | Order: {} | Hash: {}\n\
             -- Flags:   {}\n\
             -- ============================================================",
            script.file_name, script.phase, script.order, script.hash, flags
        )
    }

    /// Rewrite each CREATE unit as DROP-IF-EXISTS + CREATE, GO-separated
    fn rewrite_idempotent(content: &str, kind: ObjectKind) -> String {
        let mut out = Vec::new();
        for batch in GO_SEPARATOR.split(content) {
            let batch = batch.trim();
            if batch.is_empty() {
                continue;
            }
            let units = Self::split_units(batch, kind);
            if units.is_empty() {
                out.push(batch.to_string());
                out.push("GO".to_string());
                continue;
            }
            for (name, unit) in units {
                if let Some(drop) = kind.drop_statement(&name) {
                    out.push(drop);
                    out.push("GO".to_string());
                }
                out.push(unit.trim().to_string());
                out.push("GO".to_string());
            }
        }
        out.join("\n")
    }

    /// Split one batch into `CREATE <KIND> <name>` units. A unit runs from
    /// its CREATE to the balanced terminating END (procedures, functions,
    /// triggers), or to the next CREATE of the same kind otherwise.
    fn split_units(batch: &str, kind: ObjectKind) -> Vec<(String, String)> {
        let keywords = kind.keywords();
        let matches: Vec<(usize, String)> = CREATE_OBJECT
            .captures_iter(batch)
            .filter(|c| {
                let kw = c.get(1).map(|m| m.as_str().to_uppercase()).unwrap_or_default();
                keywords.contains(&kw.as_str())
            })
            .map(|c| {
                let start = c.get(0).map(|m| m.start()).unwrap_or(0);
                let name = c.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();
                (start, name)
            })
            .collect();

        if matches.is_empty() {
            return Vec::new();
        }

        let uses_body_blocks = matches!(
            kind,
            ObjectKind::Procedure | ObjectKind::Function | ObjectKind::Trigger
        );

        let mut units = Vec::new();
        for (i, (start, name)) in matches.iter().enumerate() {
            let hard_end = matches
                .get(i + 1)
                .map(|(s, _)| *s)
                .unwrap_or(batch.len());
            let end = if uses_body_blocks {
                Self::balanced_end(&batch[*start..hard_end])
                    .map(|rel| start + rel)
                    .unwrap_or(hard_end)
            } else {
                hard_end
            };
            units.push((name.clone(), batch[*start..end].to_string()));
        }
        units
    }

    /// Byte offset just past the END that balances the first BEGIN, if any.
    /// CASE blocks also close with END, so both openers count.
    fn balanced_end(text: &str) -> Option<usize> {
        let mut depth: i32 = 0;
        let mut seen_open = false;
        for m in BLOCK_TOKEN.find_iter(text) {
            match m.as_str().to_uppercase().as_str() {
                "BEGIN" | "CASE" => {
                    depth += 1;
                    seen_open = true;
                }
                _ => {
                    depth -= 1;
                    if seen_open && depth == 0 {
                        return Some(m.end());
                    }
                }
            }
        }
        None
    }

    /// Wrap a generic script in TRY/CATCH transaction safety unless it
    /// already manages its own transaction
    fn wrap_transaction(content: &str) -> String {
        if TRANSACTION_MARKER.is_match(content) {
            return content.trim().to_string();
        }
        format!(
            "BEGIN TRANSACTION;\nBEGIN TRY\n\n{}\n\n    COMMIT TRANSACTION;\nEND TRY\nBEGIN CATCH\n    ROLLBACK TRANSACTION;\n    THROW;\nEND CATCH",
            content.trim()
        )
    }
}

fn bare_name(name: &str) -> String {
    name.replace(['[', ']'], "")
        .rsplit('.')
        .next()
        .unwrap_or(name)
        .to_string()
}

fn bracket_name(name: &str) -> String {
    name.replace(['[', ']'], "")
        .split('.')
        .map(|part| format!("[{part}]"))
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn script(phase: u8, content: &str) -> SqlScriptFile {
        SqlScriptFile {
            file_name: "001_test.sql".to_string(),
            file_path: "/tmp/001_test.sql".to_string(),
            phase,
            order: 1,
            content: content.to_string(),
            enhanced_content: None,
            hash: "abcd1234abcd1234".to_string(),
            last_modified: Utc::now(),
            is_new: false,
            is_modified: false,
            requires_warning: false,
        }
    }

    #[test]
    fn test_procedure_gets_drop_if_exists() {
        let mut s = script(
            13,
            "CREATE PROCEDURE [dbo].[usp_GetUsers]\nAS\nBEGIN\n    SELECT 1;\nEND",
        );
        SqlScriptEnhancer::enhance(&mut s);
        let enhanced = s.enhanced_content.as_ref().unwrap();
        assert!(enhanced.contains("DROP PROCEDURE [dbo].[usp_GetUsers];"));
        let drop_pos = enhanced.find("DROP PROCEDURE").unwrap();
        let create_pos = enhanced.find("CREATE PROCEDURE").unwrap();
        assert!(drop_pos < create_pos);
        assert!(enhanced.contains("GO"));
    }

    #[test]
    fn test_multiple_views_each_get_drop() {
        let mut s = script(
            11,
            "CREATE VIEW dbo.v_One AS SELECT 1 AS n\nGO\nCREATE VIEW dbo.v_Two AS SELECT 2 AS n",
        );
        SqlScriptEnhancer::enhance(&mut s);
        let enhanced = s.enhanced_content.as_ref().unwrap();
        assert!(enhanced.contains("DROP VIEW [dbo].[v_One];"));
        assert!(enhanced.contains("DROP VIEW [dbo].[v_Two];"));
    }

    #[test]
    fn test_two_procedures_without_go_split_on_balanced_end() {
        let mut s = script(
            13,
            "CREATE PROC dbo.usp_A AS\nBEGIN\n    SELECT 1;\nEND\nCREATE PROC dbo.usp_B AS\nBEGIN\n    SELECT 2;\nEND",
        );
        SqlScriptEnhancer::enhance(&mut s);
        let enhanced = s.enhanced_content.as_ref().unwrap();
        assert!(enhanced.contains("DROP PROCEDURE [dbo].[usp_A];"));
        assert!(enhanced.contains("DROP PROCEDURE [dbo].[usp_B];"));
    }

    #[test]
    fn test_role_drop_uses_principals_catalog() {
        let mut s = script(17, "CREATE ROLE [app_reader];");
        SqlScriptEnhancer::enhance(&mut s);
        let enhanced = s.enhanced_content.as_ref().unwrap();
        assert!(enhanced.contains("sys.database_principals"));
        assert!(enhanced.contains("DROP ROLE [app_reader];"));
    }

    #[test]
    fn test_generic_script_gets_transaction_wrapper() {
        let mut s = script(4, "INSERT INTO Core.Country (Code) VALUES ('SE');");
        SqlScriptEnhancer::enhance(&mut s);
        let enhanced = s.enhanced_content.as_ref().unwrap();
        assert!(enhanced.contains("BEGIN TRANSACTION;"));
        assert!(enhanced.contains("BEGIN TRY"));
        assert!(enhanced.contains("ROLLBACK TRANSACTION;"));
        assert!(enhanced.contains("THROW;"));
    }

    #[test]
    fn test_already_wrapped_script_left_alone() {
        let body = "BEGIN TRAN\nINSERT INTO t VALUES (1);\nCOMMIT";
        let mut s = script(4, body);
        SqlScriptEnhancer::enhance(&mut s);
        let enhanced = s.enhanced_content.as_ref().unwrap();
        assert_eq!(enhanced.matches("BEGIN TRAN").count(), 1);
    }

    #[test]
    fn test_provenance_header_names_phase() {
        let mut s = script(4, "SELECT 1;");
        s.is_new = true;
        SqlScriptEnhancer::enhance(&mut s);
        let enhanced = s.enhanced_content.as_ref().unwrap();
        assert!(enhanced.starts_with("-- ="));
        assert!(enhanced.contains("Phase:   4"));
        assert!(enhanced.contains("Hash: abcd1234abcd1234"));
        assert!(enhanced.contains("NEW"));
    }

    #[test]
    fn test_original_content_is_retained() {
        let mut s = script(13, "CREATE PROC dbo.usp_A AS BEGIN SELECT 1; END");
        let original = s.content.clone();
        SqlScriptEnhancer::enhance(&mut s);
        assert_eq!(s.content, original);
    }

    #[tokio::test]
    async fn test_enhance_all_gathers_and_sorts() {
        let mut a = script(13, "CREATE PROC dbo.usp_A AS BEGIN SELECT 1; END");
        a.order = 2;
        let mut b = script(4, "SELECT 1;");
        b.order = 1;
        let enhanced = SqlScriptEnhancer::enhance_all(vec![a, b]).await;
        assert_eq!(enhanced.len(), 2);
        assert_eq!(enhanced[0].phase, 4);
        assert_eq!(enhanced[1].phase, 13);
        assert!(enhanced.iter().all(|s| s.enhanced_content.is_some()));
    }
}
