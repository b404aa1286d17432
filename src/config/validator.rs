//! Config validation: referential integrity and role coverage.

use crate::config::{ColumnRole, EntityRole, FullConfig};
use crate::error::ConfigError;
use std::collections::{HashMap, HashSet};

/// Column roles every table of the given role must carry.
pub fn required_column_roles(role: EntityRole) -> &'static [ColumnRole] {
    match role {
        EntityRole::Customer => &[ColumnRole::Id, ColumnRole::Name],
        EntityRole::Product => &[ColumnRole::Id, ColumnRole::Name, ColumnRole::Price],
        EntityRole::Order => &[ColumnRole::Id, ColumnRole::Subtotal, ColumnRole::CustomerRef],
        EntityRole::OrderProduct => &[ColumnRole::OrderRef, ColumnRole::ProductRef],
    }
}

pub fn validate(config: &FullConfig) -> Result<(), ConfigError> {
    let table_ids: HashSet<&str> = config.tables.iter().map(|t| t.id.as_str()).collect();
    let column_ids: HashSet<&str> = config.columns.iter().map(|c| c.id.as_str()).collect();

    let mut roles_seen = HashSet::new();
    for t in &config.tables {
        if !roles_seen.insert(t.role) {
            return Err(ConfigError::DuplicateRole {
                kind: "entity",
                role: format!("{:?}", t.role),
            });
        }
        let table_columns: HashSet<&str> = config
            .columns
            .iter()
            .filter(|c| c.table_id == t.id)
            .map(|c| c.name.as_str())
            .collect();
        for pk in t.primary_key.columns() {
            if !table_columns.contains(pk) {
                return Err(ConfigError::InvalidPrimaryKey {
                    table_id: t.id.clone(),
                    column: pk.to_string(),
                });
            }
        }
        for uniq in &t.unique {
            for col in uniq {
                if !table_columns.contains(col.as_str()) {
                    return Err(ConfigError::MissingReference {
                        kind: "unique column",
                        id: format!("{}.{}", t.id, col),
                    });
                }
            }
        }
    }
    for role in EntityRole::ALL {
        if !roles_seen.contains(&role) {
            return Err(ConfigError::MissingRole {
                kind: "entity",
                role: format!("{:?}", role),
            });
        }
    }

    let mut column_roles: HashMap<&str, HashSet<ColumnRole>> = HashMap::new();
    for c in &config.columns {
        if !table_ids.contains(c.table_id.as_str()) {
            return Err(ConfigError::MissingReference {
                kind: "table",
                id: c.table_id.clone(),
            });
        }
        if !column_roles.entry(c.table_id.as_str()).or_default().insert(c.role) {
            return Err(ConfigError::DuplicateRole {
                kind: "column",
                role: format!("{}.{:?}", c.table_id, c.role),
            });
        }
    }
    for t in &config.tables {
        let present = column_roles.get(t.id.as_str());
        for role in required_column_roles(t.role) {
            if !present.map(|s| s.contains(role)).unwrap_or(false) {
                return Err(ConfigError::MissingRole {
                    kind: "column",
                    role: format!("{}.{:?}", t.id, role),
                });
            }
        }
    }

    for r in &config.relationships {
        if !table_ids.contains(r.from_table_id.as_str())
            || !table_ids.contains(r.to_table_id.as_str())
            || !column_ids.contains(r.from_column_id.as_str())
            || !column_ids.contains(r.to_column_id.as_str())
        {
            return Err(ConfigError::MissingReference {
                kind: "relationship",
                id: r.id.clone(),
            });
        }
    }

    Ok(())
}
