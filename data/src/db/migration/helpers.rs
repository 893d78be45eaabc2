//! Row mapping helpers used while transforming source rows

use super::batch::PendingRow;
use super::config::MigrationConfig;
use crate::db::reader::TableRows;
use crate::db::schema::TableSchema;
use crate::db::value::{Clock, FieldMap, is_blank, render_value, value_to_json};
use rusqlite::types::Value;

/// How the columns of one source table land in its target table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    /// Target column for each source column, `None` when it has no counterpart
    pub targets: Vec<Option<String>>,
    /// Source columns without a target counterpart
    pub dropped: Vec<String>,
    /// Target fields the source never supplies
    pub missing: Vec<String>,
}

impl ColumnMapping {
    /// Integer primary keys absent from the source are left to the store to assign
    pub fn build(config: &MigrationConfig, schema: &TableSchema, source_columns: &[String]) -> Self {
        let mut targets = Vec::with_capacity(source_columns.len());
        let mut dropped = Vec::new();

        for column in source_columns {
            let target = config.target_column(&schema.name, column);
            if schema.has_column(target) {
                targets.push(Some(target.to_string()));
            } else {
                targets.push(None);
                dropped.push(column.clone());
            }
        }

        let missing = schema
            .columns
            .iter()
            .filter(|c| !c.is_rowid_alias())
            .filter(|c| !targets.iter().flatten().any(|t| t == &c.name))
            .map(|c| c.name.clone())
            .collect();

        Self {
            targets,
            dropped,
            missing,
        }
    }

    /// Field map of source row `index` under this mapping
    pub fn map_row(&self, rows: &TableRows, index: usize) -> FieldMap {
        let mut fields = FieldMap::new();
        for (target, value) in self.targets.iter().zip(&rows.rows[index]) {
            if let Some(target) = target {
                fields.insert(target.clone(), value.clone());
            }
        }
        fields
    }
}

/// Fill blank identifier fields configured with a placeholder template
///
/// Returns the fields that were synthesized.
pub fn apply_placeholders(
    config: &MigrationConfig,
    table: &str,
    key: &Value,
    fields: &mut FieldMap,
    clock: &Clock,
) -> Vec<String> {
    let mut synthesized = Vec::new();
    for rule in config.placeholders_for(table) {
        if is_blank(fields.get(&rule.field)) {
            let value = rule.render(&render_value(key), &clock.date_stamp());
            fields.insert(rule.field.clone(), Value::Text(value));
            synthesized.push(rule.field.clone());
        }
    }
    synthesized
}

/// JSON rendering of the first `limit` rows, for insertion failure reports
pub fn render_sample(rows: &[PendingRow], limit: usize) -> String {
    let sample: Vec<serde_json::Value> = rows
        .iter()
        .take(limit)
        .map(|row| {
            serde_json::Value::Object(
                row.fields
                    .iter()
                    .map(|(k, v)| (k.clone(), value_to_json(v)))
                    .collect(),
            )
        })
        .collect();
    serde_json::Value::Array(sample).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::{ColumnInfo, FieldKind};
    use chrono::{TimeZone, Utc};

    fn column(name: &str, kind: FieldKind, primary_key: bool) -> ColumnInfo {
        ColumnInfo {
            name: name.to_string(),
            declared_type: String::new(),
            kind,
            not_null: false,
            primary_key,
            default: None,
        }
    }

    fn users_schema() -> TableSchema {
        TableSchema {
            name: "accounts_user".into(),
            entity: "User".into(),
            columns: vec![
                column("id", FieldKind::Integer, true),
                column("username", FieldKind::Text, false),
                column("rfid_code", FieldKind::Text, false),
                column("is_staff", FieldKind::Boolean, false),
            ],
        }
    }

    #[test]
    fn test_mapping_with_rename_and_drop() {
        let mut config = MigrationConfig::default();
        config
            .renames
            .insert("accounts_user.card_no".into(), "rfid_code".into());

        let source = vec!["id".to_string(), "username".into(), "card_no".into(), "legacy_flag".into()];
        let mapping = ColumnMapping::build(&config, &users_schema(), &source);

        assert_eq!(
            mapping.targets,
            vec![Some("id".into()), Some("username".into()), Some("rfid_code".into()), None]
        );
        assert_eq!(mapping.dropped, vec!["legacy_flag"]);
        assert_eq!(mapping.missing, vec!["is_staff"]);
    }

    #[test]
    fn test_missing_rowid_is_not_defaulted() {
        let config = MigrationConfig::default();
        let source = vec!["username".to_string()];
        let mapping = ColumnMapping::build(&config, &users_schema(), &source);
        assert_eq!(mapping.missing, vec!["rfid_code", "is_staff"]);
    }

    #[test]
    fn test_map_row() {
        let config = MigrationConfig::default();
        let rows = TableRows {
            table: "accounts_user".into(),
            columns: vec!["id".into(), "legacy".into()],
            primary_key: Some(0),
            rows: vec![vec![Value::Integer(5), Value::Text("x".into())]],
        };
        let mapping = ColumnMapping::build(&config, &users_schema(), &rows.columns);
        let fields = mapping.map_row(&rows, 0);

        assert_eq!(fields.len(), 1);
        assert_eq!(fields["id"], Value::Integer(5));
    }

    #[test]
    fn test_placeholder_only_for_blank_values() {
        let config = MigrationConfig::default();
        let clock = Clock::Fixed(Utc.with_ymd_and_hms(2024, 3, 9, 0, 0, 0).unwrap());

        let mut blank = FieldMap::new();
        blank.insert("rfid_code".into(), Value::Text(String::new()));
        let synthesized = apply_placeholders(&config, "accounts_user", &Value::Integer(12), &mut blank, &clock);
        assert_eq!(synthesized, vec!["rfid_code"]);
        assert_eq!(blank["rfid_code"], Value::Text("TEMP-12-20240309".into()));

        let mut filled = FieldMap::new();
        filled.insert("rfid_code".into(), Value::Text("A1B2".into()));
        assert!(apply_placeholders(&config, "accounts_user", &Value::Integer(13), &mut filled, &clock).is_empty());
        assert_eq!(filled["rfid_code"], Value::Text("A1B2".into()));

        let mut other_table = FieldMap::new();
        assert!(apply_placeholders(&config, "members_member", &Value::Integer(1), &mut other_table, &clock).is_empty());
    }

    #[test]
    fn test_render_sample_limits_rows() {
        let rows: Vec<PendingRow> = (0..5)
            .map(|i| {
                let mut fields = FieldMap::new();
                fields.insert("id".into(), Value::Integer(i));
                PendingRow {
                    key: Value::Integer(i),
                    fields,
                }
            })
            .collect();
        assert_eq!(render_sample(&rows, 2), r#"[{"id":0},{"id":1}]"#);
    }
}
