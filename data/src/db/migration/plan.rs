//! Migration plan: the order in which target tables are migrated
//!
//! Parents must be migrated before their children so that foreign-key
//! validation, which reads the target store, can see them. Tables expected to
//! diverge (bookkeeping tables) always come last.

use super::config::MigrationConfig;
use super::foreign_keys::ForeignKeyRuleSet;
use crate::db::schema::SchemaRegistry;
use crate::db::{MigrationError, Result};
use rusqlite::Connection;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationPlan {
    tables: Vec<String>,
    divergent: BTreeSet<String>,
}

impl MigrationPlan {
    /// Explicit order, with the divergent tables moved (or appended) to the end
    pub fn explicit(tables: &[String], divergent: &[String]) -> Self {
        let divergent_set: BTreeSet<String> = divergent.iter().cloned().collect();
        let mut ordered: Vec<String> = Vec::with_capacity(tables.len() + divergent.len());
        for table in tables {
            if !divergent_set.contains(table) && !ordered.contains(table) {
                ordered.push(table.clone());
            }
        }
        ordered.extend(divergent.iter().cloned());

        Self {
            tables: ordered,
            divergent: divergent_set,
        }
    }

    /// Topological order of `tables` under `rules`, ties broken by name
    ///
    /// Tables caught in a reference cycle are appended in name order.
    pub fn from_rules(tables: &[String], rules: &ForeignKeyRuleSet, divergent: &[String]) -> Self {
        let divergent_set: BTreeSet<&str> = divergent.iter().map(String::as_str).collect();
        let candidates: BTreeSet<&str> = tables
            .iter()
            .map(String::as_str)
            .filter(|t| !divergent_set.contains(t))
            .collect();

        let mut indegree: BTreeMap<&str, usize> = candidates.iter().map(|t| (*t, 0)).collect();
        let mut children: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for table in &candidates {
            let parents: BTreeSet<&str> = rules
                .parents_of(table)
                .filter(|p| candidates.contains(p))
                .collect();
            for parent in parents {
                children.entry(parent).or_default().insert(table);
                *indegree.entry(table).or_default() += 1;
            }
        }

        let mut ready: BTreeSet<&str> = indegree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(t, _)| *t)
            .collect();
        let mut ordered = Vec::with_capacity(candidates.len());

        while let Some(table) = ready.pop_first() {
            ordered.push(table.to_string());
            for child in children.get(table).into_iter().flatten() {
                if let Some(degree) = indegree.get_mut(child) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(child);
                    }
                }
            }
        }

        if ordered.len() < candidates.len() {
            let cyclic: Vec<&str> = candidates
                .iter()
                .filter(|t| !ordered.iter().any(|o| o == *t))
                .copied()
                .collect();
            log::warn!("Foreign-key cycle between tables: {}", cyclic.join(", "));
            ordered.extend(cyclic.into_iter().map(str::to_string));
        }

        Self::explicit(&ordered, divergent)
    }

    /// Plan for a run: explicit when configured, derived from the rules otherwise
    pub fn resolve(config: &MigrationConfig, rules: &ForeignKeyRuleSet, known_tables: &[String]) -> Self {
        if config.plan.tables.is_empty() {
            Self::from_rules(known_tables, rules, &config.plan.divergent)
        } else {
            Self::explicit(&config.plan.tables, &config.plan.divergent)
        }
    }

    /// Plan and ordering warnings for `config` without touching any store
    ///
    /// The target schema is applied to an in-memory database to learn the
    /// table set.
    pub fn preview(config: &MigrationConfig) -> Result<(Self, Vec<String>)> {
        let schema_sql = config.schema_sql()?;
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(&schema_sql)
            .map_err(|e| MigrationError::SchemaInitialization(format!("Failed to apply schema: {}", e)))?;
        let registry = SchemaRegistry::load(&conn, &config.internal_prefixes, &config.entities)?;

        let rules = ForeignKeyRuleSet::from_config(&config.foreign_keys);
        let plan = Self::resolve(config, &rules, &registry.table_names());
        let warnings = plan.validate(&rules);
        Ok((plan, warnings))
    }

    /// Rules whose referenced table is migrated after (or never before) its owner
    pub fn validate(&self, rules: &ForeignKeyRuleSet) -> Vec<String> {
        let mut warnings = Vec::new();
        for (position, table) in self.tables.iter().enumerate() {
            for parent in rules.parents_of(table) {
                match self.position(parent) {
                    Some(p) if p < position => {}
                    Some(_) => warnings.push(format!(
                        "'{}' references '{}' which is migrated after it",
                        table, parent
                    )),
                    None => warnings.push(format!(
                        "'{}' references '{}' which is not in the plan",
                        table, parent
                    )),
                }
            }
        }
        warnings
    }

    pub fn position(&self, table: &str) -> Option<usize> {
        self.tables.iter().position(|t| t == table)
    }

    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(String::as_str)
    }

    pub fn is_divergent(&self, table: &str) -> bool {
        self.divergent.contains(table)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
