//! Row codec: stored rows <-> policy lines <-> model rule tuples.
//!
//! # Purpose
//! The policy table has a fixed width: a rule type plus six nullable value
//! columns. Rule tuples are variable arity, so the codec decides which columns
//! are populated on write and which fields exist on read.
//!
//! # Key invariants
//! - A NULL column contributes no field on load; a stored empty string is an
//!   empty field.
//! - The section of a rule is the first character of its rule type.
//! - Rules are validated before encoding; anything that would not survive a
//!   save/load round trip is rejected with [`AdapterError::Validation`].
use crate::error::{AdapterError, AdapterResult};
use casbin::Model;
use sqlx::FromRow;

/// Token separating the rule type and fields in a policy line.
pub const LINE_SEPARATOR: &str = ", ";
/// Number of value columns (`v0..v5`).
pub const MAX_FIELDS: usize = 6;
pub const PTYPE_MAX_LEN: usize = 10;
pub const FIELD_MAX_LEN: usize = 256;

/// Row shape of the policy table.
#[derive(Debug, Clone, Default, PartialEq, Eq, FromRow)]
pub struct StoredRow {
    pub ptype: String,
    pub v0: Option<String>,
    pub v1: Option<String>,
    pub v2: Option<String>,
    pub v3: Option<String>,
    pub v4: Option<String>,
    pub v5: Option<String>,
}

impl StoredRow {
    /// Encode one rule for insertion: columns past the rule's arity stay NULL.
    pub fn from_rule(ptype: &str, rule: &[String]) -> AdapterResult<Self> {
        validate_rule(ptype, rule)?;
        let mut values: [Option<String>; MAX_FIELDS] = Default::default();
        for (slot, field) in values.iter_mut().zip(rule) {
            *slot = Some(field.clone());
        }
        let [v0, v1, v2, v3, v4, v5] = values;
        Ok(Self {
            ptype: ptype.to_string(),
            v0,
            v1,
            v2,
            v3,
            v4,
            v5,
        })
    }

    pub fn values(&self) -> [Option<&str>; MAX_FIELDS] {
        [
            self.v0.as_deref(),
            self.v1.as_deref(),
            self.v2.as_deref(),
            self.v3.as_deref(),
            self.v4.as_deref(),
            self.v5.as_deref(),
        ]
    }

    /// Render as `ptype, v0, v1, ...`, skipping NULL columns.
    pub fn to_line(&self) -> String {
        let mut line = self.ptype.clone();
        for value in self.values().into_iter().flatten() {
            line.push_str(LINE_SEPARATOR);
            line.push_str(value);
        }
        line
    }
}

/// Decode one policy line into `model`.
///
/// Returns true when a new tuple was added. Empty lines are ignored, and lines
/// whose rule type the model does not declare are skipped with a warning.
pub fn load_policy_line(line: &str, model: &mut dyn Model) -> bool {
    if line.is_empty() {
        return false;
    }
    let mut tokens = line.split(LINE_SEPARATOR);
    let Some(key) = tokens.next().filter(|key| !key.is_empty()) else {
        return false;
    };
    let section = section_of(key);
    let declared = model
        .get_model()
        .get(&section)
        .is_some_and(|assertions| assertions.contains_key(key));
    if !declared {
        tracing::warn!(
            section = %section,
            ptype = %key,
            "skipping stored rule for undeclared rule type"
        );
        return false;
    }
    let rule: Vec<String> = tokens.map(str::to_string).collect();
    model.add_policy(&section, key, rule)
}

/// Section a rule type belongs to (`p2` -> `p`).
pub fn section_of(ptype: &str) -> String {
    ptype.chars().take(1).collect()
}

/// Check a rule against the fixed-width schema and the line encoding.
pub fn validate_rule(ptype: &str, rule: &[String]) -> AdapterResult<()> {
    if ptype.is_empty() {
        return Err(AdapterError::Validation("rule type is empty".to_string()));
    }
    if ptype.chars().count() > PTYPE_MAX_LEN {
        return Err(AdapterError::Validation(format!(
            "rule type {ptype:?} exceeds {PTYPE_MAX_LEN} characters"
        )));
    }
    if ptype.contains(LINE_SEPARATOR) {
        return Err(AdapterError::Validation(format!(
            "rule type {ptype:?} contains the separator {LINE_SEPARATOR:?}"
        )));
    }
    validate_arity(ptype, rule)?;
    for (index, field) in rule.iter().enumerate() {
        if field.chars().count() > FIELD_MAX_LEN {
            return Err(AdapterError::Validation(format!(
                "{ptype} field v{index} exceeds {FIELD_MAX_LEN} characters"
            )));
        }
        if field.contains(LINE_SEPARATOR) {
            return Err(AdapterError::Validation(format!(
                "{ptype} field v{index} contains the separator {LINE_SEPARATOR:?}"
            )));
        }
    }
    Ok(())
}

pub fn validate_arity(ptype: &str, rule: &[String]) -> AdapterResult<()> {
    if rule.len() > MAX_FIELDS {
        return Err(AdapterError::Validation(format!(
            "{ptype} rule has {} fields, at most {MAX_FIELDS} can be stored",
            rule.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use casbin::DefaultModel;

    const TEST_MODEL: &str = r#"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act
p2 = a, b, c, d, e, f

[role_definition]
g = _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act
"#;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn from_rule_leaves_trailing_columns_null() {
        let row = StoredRow::from_rule("p", &strings(&["alice", "data1", "read"])).unwrap();
        assert_eq!(row.ptype, "p");
        assert_eq!(
            row.values(),
            [Some("alice"), Some("data1"), Some("read"), None, None, None]
        );
    }

    #[test]
    fn from_rule_accepts_six_fields_and_rejects_seven() {
        let six = strings(&["a", "b", "c", "d", "e", "f"]);
        let row = StoredRow::from_rule("p2", &six).unwrap();
        assert_eq!(row.v5.as_deref(), Some("f"));

        let seven = strings(&["a", "b", "c", "d", "e", "f", "g"]);
        let err = StoredRow::from_rule("p2", &seven).unwrap_err();
        assert!(matches!(err, AdapterError::Validation(_)));
        assert!(err.to_string().contains("7 fields"));
    }

    #[test]
    fn validate_rejects_separator_and_oversized_values() {
        assert!(validate_rule("p", &strings(&["alice, bob", "data"])).is_err());
        assert!(validate_rule("p, x", &strings(&["alice"])).is_err());
        assert!(validate_rule("", &strings(&["alice"])).is_err());
        assert!(validate_rule("ptype_too_long", &[]).is_err());
        assert!(validate_rule("p", &[String::from_utf8(vec![b'x'; 257]).unwrap()]).is_err());
        assert!(validate_rule("p", &[String::from_utf8(vec![b'x'; 256]).unwrap()]).is_ok());
        // A comma without the following space is an ordinary character.
        assert!(validate_rule("p", &strings(&["a,b", ""])).is_ok());
    }

    #[test]
    fn to_line_skips_null_columns() {
        let row = StoredRow {
            ptype: "p".to_string(),
            v0: Some("alice".to_string()),
            v1: None,
            v2: Some("read".to_string()),
            ..Default::default()
        };
        assert_eq!(row.to_line(), "p, alice, read");
        assert_eq!(StoredRow::default().to_line(), "");
    }

    #[test]
    fn to_line_keeps_empty_strings() {
        let row = StoredRow::from_rule("g", &strings(&["alice", ""])).unwrap();
        assert_eq!(row.to_line(), "g, alice, ");
    }

    #[test]
    fn section_is_first_character() {
        assert_eq!(section_of("p"), "p");
        assert_eq!(section_of("g2"), "g");
        assert_eq!(section_of(""), "");
    }

    #[tokio::test]
    async fn load_policy_line_files_rule_under_section_and_type() {
        let mut model = DefaultModel::from_str(TEST_MODEL).await.unwrap();
        assert!(load_policy_line("p, alice, data1, read", &mut model));
        assert!(load_policy_line("g, alice, admin", &mut model));
        assert!(load_policy_line("p2, a, b, c, d, e, f", &mut model));
        assert_eq!(
            model.get_policy("p", "p"),
            vec![strings(&["alice", "data1", "read"])]
        );
        assert_eq!(model.get_policy("g", "g"), vec![strings(&["alice", "admin"])]);
        assert_eq!(
            model.get_policy("p", "p2"),
            vec![strings(&["a", "b", "c", "d", "e", "f"])]
        );
    }

    #[tokio::test]
    async fn load_policy_line_ignores_empty_and_undeclared() {
        let mut model = DefaultModel::from_str(TEST_MODEL).await.unwrap();
        assert!(!load_policy_line("", &mut model));
        assert!(!load_policy_line("p9, alice", &mut model));
        assert!(!load_policy_line("x, alice", &mut model));
        assert!(model.get_policy("p", "p").is_empty());
        assert!(model.get_policy("g", "g").is_empty());
    }

    #[tokio::test]
    async fn row_to_line_to_model_preserves_empty_fields() {
        let mut model = DefaultModel::from_str(TEST_MODEL).await.unwrap();
        let row = StoredRow::from_rule("p", &strings(&["alice", "", "read"])).unwrap();
        assert!(load_policy_line(&row.to_line(), &mut model));
        assert_eq!(
            model.get_policy("p", "p"),
            vec![strings(&["alice", "", "read"])]
        );
    }
}
