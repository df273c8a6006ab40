//! SQL text resolution.
//!
//! All statement text is built exactly once, at persister construction,
//! from the configured table and column names; nothing re-resolves names
//! per call. Reads are positional — the column order of the configured
//! projections is part of the contract.

use crate::config::{Driver, SqlPersisterConfig};

fn placeholder(driver: &Driver, index: usize) -> String {
    match driver {
        Driver::Postgres => format!("${}", index),
        _ => "?".to_string(),
    }
}

fn placeholders(driver: &Driver, count: usize) -> String {
    (1..=count)
        .map(|i| placeholder(driver, i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Resolved statement text for one persister.
#[derive(Debug, Clone)]
pub(crate) struct Statements {
    /// INSERT with a pre-fetched identifier in the first position.
    pub insert_instance_with_id: String,
    /// INSERT without an id column; the backend assigns one.
    pub insert_instance: String,
    pub select_instance: String,
    pub update_instance: String,
    pub insert_history_with_id: String,
    pub insert_history: String,
    pub select_history: String,
}

impl Statements {
    pub(crate) fn resolve(config: &SqlPersisterConfig) -> Self {
        let driver = config.driver();
        let wt = &config.workflow_table;
        let ht = &config.history_table;
        let ic = &config.instance_columns;
        let hc = &config.history_columns;

        Statements {
            insert_instance_with_id: format!(
                "INSERT INTO {} ({}, {}, {}, {}) VALUES ({})",
                wt,
                ic.id,
                ic.workflow_type,
                ic.state,
                ic.last_update,
                placeholders(&driver, 4)
            ),
            insert_instance: format!(
                "INSERT INTO {} ({}, {}, {}) VALUES ({})",
                wt,
                ic.workflow_type,
                ic.state,
                ic.last_update,
                placeholders(&driver, 3)
            ),
            select_instance: format!(
                "SELECT {}, {} FROM {} WHERE {} = {}",
                ic.state,
                ic.last_update,
                wt,
                ic.id,
                placeholder(&driver, 1)
            ),
            update_instance: format!(
                "UPDATE {} SET {} = {}, {} = {} WHERE {} = {}",
                wt,
                ic.state,
                placeholder(&driver, 1),
                ic.last_update,
                placeholder(&driver, 2),
                ic.id,
                placeholder(&driver, 3)
            ),
            insert_history_with_id: format!(
                "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}) VALUES ({})",
                ht,
                hc.id,
                hc.workflow_id,
                hc.action,
                hc.description,
                hc.state,
                hc.user,
                hc.date,
                placeholders(&driver, 7)
            ),
            insert_history: format!(
                "INSERT INTO {} ({}, {}, {}, {}, {}, {}) VALUES ({})",
                ht,
                hc.workflow_id,
                hc.action,
                hc.description,
                hc.state,
                hc.user,
                hc.date,
                placeholders(&driver, 6)
            ),
            select_history: format!(
                "SELECT {}, {}, {}, {}, {}, {}, {} FROM {} WHERE {} = {} ORDER BY {} DESC",
                hc.id,
                hc.workflow_id,
                hc.action,
                hc.description,
                hc.state,
                hc.user,
                hc.date,
                ht,
                hc.workflow_id,
                placeholder(&driver, 1),
                hc.date
            ),
        }
    }

    /// Driver-flavored DDL for the configured tables, for bootstrap and
    /// tests. Id columns are auto-increment where the driver assigns ids,
    /// sequence-fed on postgres, and plain text for unknown drivers (which
    /// fall back to random text identifiers).
    pub(crate) fn schema(config: &SqlPersisterConfig) -> Vec<String> {
        let driver = config.driver();
        let wt = &config.workflow_table;
        let ht = &config.history_table;
        let ic = &config.instance_columns;
        let hc = &config.history_columns;

        let (instance_id, history_id, mut ddl) = match driver {
            Driver::Sqlite => (
                format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", ic.id),
                format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", hc.id),
                Vec::new(),
            ),
            Driver::MySql => (
                format!("{} BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY", ic.id),
                format!("{} BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY", hc.id),
                Vec::new(),
            ),
            Driver::Postgres => (
                format!("{} BIGINT PRIMARY KEY", ic.id),
                format!("{} BIGINT PRIMARY KEY", hc.id),
                vec![
                    format!("CREATE SEQUENCE IF NOT EXISTS {}", config.workflow_sequence),
                    format!("CREATE SEQUENCE IF NOT EXISTS {}", config.history_sequence),
                ],
            ),
            Driver::Other(_) => (
                format!("{} VARCHAR(64) PRIMARY KEY", ic.id),
                format!("{} VARCHAR(64) PRIMARY KEY", hc.id),
                Vec::new(),
            ),
        };

        ddl.push(format!(
            "CREATE TABLE IF NOT EXISTS {} ({}, {} VARCHAR(64) NOT NULL, {} VARCHAR(64) NOT NULL, {} VARCHAR(64) NOT NULL)",
            wt, instance_id, ic.workflow_type, ic.state, ic.last_update
        ));
        ddl.push(format!(
            "CREATE TABLE IF NOT EXISTS {} ({}, {} VARCHAR(64) NOT NULL, {} VARCHAR(64) NOT NULL, {} TEXT, {} VARCHAR(64) NOT NULL, {} VARCHAR(64) NOT NULL, {} VARCHAR(64) NOT NULL)",
            ht, history_id, hc.workflow_id, hc.action, hc.description, hc.state, hc.user, hc.date
        ));
        ddl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HistoryColumns, SqlPersisterConfig};

    #[test]
    fn sqlite_statements_use_question_mark_placeholders() {
        let statements = Statements::resolve(&SqlPersisterConfig::new("sqlite::memory:"));
        assert_eq!(
            statements.insert_instance,
            "INSERT INTO workflow (type, state, last_update) VALUES (?, ?, ?)"
        );
        assert_eq!(
            statements.select_instance,
            "SELECT state, last_update FROM workflow WHERE workflow_id = ?"
        );
        assert_eq!(
            statements.update_instance,
            "UPDATE workflow SET state = ?, last_update = ? WHERE workflow_id = ?"
        );
    }

    #[test]
    fn postgres_statements_use_numbered_placeholders() {
        let statements = Statements::resolve(&SqlPersisterConfig::new("postgres://db/wf"));
        assert_eq!(
            statements.insert_instance_with_id,
            "INSERT INTO workflow (workflow_id, type, state, last_update) VALUES ($1, $2, $3, $4)"
        );
        assert_eq!(
            statements.update_instance,
            "UPDATE workflow SET state = $1, last_update = $2 WHERE workflow_id = $3"
        );
    }

    #[test]
    fn history_select_orders_by_timestamp_descending() {
        let statements = Statements::resolve(&SqlPersisterConfig::new("sqlite::memory:"));
        assert_eq!(
            statements.select_history,
            "SELECT workflow_hist_id, workflow_id, action, description, state, workflow_user, \
             history_date FROM workflow_history WHERE workflow_id = ? ORDER BY history_date DESC"
        );
    }

    #[test]
    fn configured_names_flow_into_every_statement() {
        let config = SqlPersisterConfig::new("sqlite::memory:")
            .workflow_table("wf_case")
            .history_table("wf_case_log")
            .history_columns(HistoryColumns {
                id: "log_id".to_string(),
                workflow_id: "case_id".to_string(),
                action: "act".to_string(),
                description: "note".to_string(),
                state: "st".to_string(),
                user: "actor".to_string(),
                date: "logged_at".to_string(),
            });
        let statements = Statements::resolve(&config);
        assert_eq!(
            statements.insert_history,
            "INSERT INTO wf_case_log (case_id, act, note, st, actor, logged_at) \
             VALUES (?, ?, ?, ?, ?, ?)"
        );
        assert!(statements.select_history.ends_with("ORDER BY logged_at DESC"));
    }

    #[test]
    fn sqlite_schema_uses_autoincrement_ids() {
        let ddl = Statements::schema(&SqlPersisterConfig::new("sqlite::memory:"));
        assert_eq!(ddl.len(), 2);
        assert!(ddl[0].contains("workflow_id INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(ddl[1].contains("workflow_hist_id INTEGER PRIMARY KEY AUTOINCREMENT"));
    }

    #[test]
    fn postgres_schema_creates_sequences_first() {
        let ddl = Statements::schema(&SqlPersisterConfig::new("postgres://db/wf"));
        assert_eq!(ddl.len(), 4);
        assert_eq!(ddl[0], "CREATE SEQUENCE IF NOT EXISTS workflow_seq");
        assert_eq!(ddl[1], "CREATE SEQUENCE IF NOT EXISTS workflow_history_seq");
    }

    #[test]
    fn unknown_driver_schema_uses_text_ids() {
        let ddl = Statements::schema(&SqlPersisterConfig::new("sybase://db/wf"));
        assert!(ddl[0].contains("workflow_id VARCHAR(64) PRIMARY KEY"));
    }
}
