//! RLS configuration store: per-user roles, row filters, table permissions,
//! and an append-only audit trail.
//!
//! Sqlite-backed following `crate::cache::MetadataCache`'s versioned-schema
//! pattern. The audit table carries no update/delete method in this store's
//! API, and the schema itself rejects UPDATE/DELETE with triggers (belt and
//! suspenders for "append-only").

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::error::{RlsError, RlsResult};

const SCHEMA_VERSION: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RlsOperator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Like,
    NotLike,
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RlsFilter {
    pub table: String,
    pub column: String,
    pub operator: RlsOperator,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TablePermission {
    pub table: String,
    pub can_read: bool,
    /// Whitelist: if `Some`, the projection is restricted to this
    /// intersection.
    pub allowed_columns: Option<Vec<String>>,
    /// Denylist: pruned from the projection regardless of the whitelist.
    pub denied_columns: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UserContext {
    pub user_id: String,
    pub connection_id: String,
    pub roles: Vec<String>,
    pub rls_filters: Vec<RlsFilter>,
    pub table_permissions: Vec<TablePermission>,
    pub is_admin: bool,
}

impl UserContext {
    pub fn permission_for(&self, table: &str) -> Option<&TablePermission> {
        self.table_permissions.iter().find(|p| p.table == table)
    }

    pub fn filters_for<'a>(&'a self, table: &str) -> Vec<&'a RlsFilter> {
        self.rls_filters.iter().filter(|f| f.table == table).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Activate,
    Deactivate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRow {
    pub who: String,
    pub when: DateTime<Utc>,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: String,
    pub old: Option<serde_json::Value>,
    pub new: Option<serde_json::Value>,
    pub ip: Option<String>,
    pub agent: Option<String>,
}

/// Who/where a mutation came from, threaded through to the audit row.
#[derive(Debug, Clone, Default)]
pub struct ActorContext {
    pub who: String,
    pub ip: Option<String>,
    pub agent: Option<String>,
}

pub struct RlsStore {
    conn: Connection,
}

impl RlsStore {
    pub fn open_in_memory() -> RlsResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    pub fn open(path: &std::path::Path) -> RlsResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> RlsResult<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS user_connection_roles (
                user_id TEXT NOT NULL,
                connection_id TEXT NOT NULL,
                roles TEXT NOT NULL,
                is_admin INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (user_id, connection_id)
            );

            CREATE TABLE IF NOT EXISTS user_rls_filters (
                user_id TEXT NOT NULL,
                connection_id TEXT NOT NULL,
                table_name TEXT NOT NULL,
                column_name TEXT NOT NULL,
                payload TEXT NOT NULL,
                PRIMARY KEY (user_id, connection_id, table_name, column_name)
            );

            CREATE TABLE IF NOT EXISTS user_table_permissions (
                user_id TEXT NOT NULL,
                connection_id TEXT NOT NULL,
                table_name TEXT NOT NULL,
                payload TEXT NOT NULL,
                PRIMARY KEY (user_id, connection_id, table_name)
            );

            CREATE TABLE IF NOT EXISTS rls_configuration_audit (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                who TEXT NOT NULL,
                occurred_at TEXT NOT NULL,
                action TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                connection_id TEXT NOT NULL,
                old_value TEXT,
                new_value TEXT,
                ip TEXT,
                agent TEXT
            );

            CREATE TRIGGER IF NOT EXISTS rls_audit_no_update
            BEFORE UPDATE ON rls_configuration_audit
            BEGIN
                SELECT RAISE(ABORT, 'rls_configuration_audit is append-only');
            END;

            CREATE TRIGGER IF NOT EXISTS rls_audit_no_delete
            BEFORE DELETE ON rls_configuration_audit
            BEGIN
                SELECT RAISE(ABORT, 'rls_configuration_audit is append-only');
            END;
            ",
        )?;

        let stored: Option<i32> = self
            .conn
            .query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |row| {
                let s: String = row.get(0)?;
                Ok(s.parse().unwrap_or(0))
            })
            .optional()?;

        match stored {
            Some(v) if v == SCHEMA_VERSION => {}
            _ => {
                self.conn.execute_batch(
                    "DELETE FROM user_connection_roles; DELETE FROM user_rls_filters; DELETE FROM user_table_permissions;",
                )?;
                self.conn.execute(
                    "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?)",
                    params![SCHEMA_VERSION.to_string()],
                )?;
            }
        }
        Ok(())
    }

    fn append_audit(
        &self,
        actor: &ActorContext,
        action: AuditAction,
        entity_type: &str,
        entity_id: &str,
        connection_id: &str,
        old: Option<&serde_json::Value>,
        new: Option<&serde_json::Value>,
    ) -> RlsResult<()> {
        let action_str = serde_json::to_value(action)?.as_str().unwrap().to_string();
        self.conn.execute(
            "INSERT INTO rls_configuration_audit
             (who, occurred_at, action, entity_type, entity_id, connection_id, old_value, new_value, ip, agent)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                actor.who,
                Utc::now().to_rfc3339(),
                action_str,
                entity_type,
                entity_id,
                connection_id,
                old.map(|v| v.to_string()),
                new.map(|v| v.to_string()),
                actor.ip,
                actor.agent,
            ],
        )?;
        Ok(())
    }

    pub fn set_roles(
        &self,
        actor: &ActorContext,
        user_id: &str,
        connection_id: &str,
        roles: Vec<String>,
        is_admin: bool,
    ) -> RlsResult<()> {
        let existing = self.roles_row(user_id, connection_id)?;
        let roles_json = serde_json::to_string(&roles)?;

        self.conn.execute(
            "INSERT INTO user_connection_roles (user_id, connection_id, roles, is_admin)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(user_id, connection_id) DO UPDATE SET roles = excluded.roles, is_admin = excluded.is_admin",
            params![user_id, connection_id, roles_json, is_admin as i64],
        )?;

        let new_value = serde_json::json!({"roles": roles, "is_admin": is_admin});
        let action = if existing.is_some() { AuditAction::Update } else { AuditAction::Create };
        let old_value = existing.map(|(roles, is_admin)| serde_json::json!({"roles": roles, "is_admin": is_admin}));
        self.append_audit(
            actor,
            action,
            "user_connection_roles",
            &format!("{}:{}", user_id, connection_id),
            connection_id,
            old_value.as_ref(),
            Some(&new_value),
        )
    }

    fn roles_row(&self, user_id: &str, connection_id: &str) -> RlsResult<Option<(Vec<String>, bool)>> {
        let row: Option<(String, i64)> = self
            .conn
            .query_row(
                "SELECT roles, is_admin FROM user_connection_roles WHERE user_id = ? AND connection_id = ?",
                params![user_id, connection_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(match row {
            Some((roles_json, is_admin)) => Some((serde_json::from_str(&roles_json)?, is_admin != 0)),
            None => None,
        })
    }

    pub fn set_filter(&self, actor: &ActorContext, user_id: &str, connection_id: &str, filter: RlsFilter) -> RlsResult<()> {
        let existing = self.get_filter(user_id, connection_id, &filter.table, &filter.column)?;
        let payload = serde_json::to_string(&filter)?;

        self.conn.execute(
            "INSERT INTO user_rls_filters (user_id, connection_id, table_name, column_name, payload)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(user_id, connection_id, table_name, column_name) DO UPDATE SET payload = excluded.payload",
            params![user_id, connection_id, filter.table, filter.column, payload],
        )?;

        let action = if existing.is_some() { AuditAction::Update } else { AuditAction::Create };
        self.append_audit(
            actor,
            action,
            "user_rls_filters",
            &format!("{}:{}:{}:{}", user_id, connection_id, filter.table, filter.column),
            connection_id,
            existing.as_ref().map(|f| serde_json::to_value(f)).transpose()?.as_ref(),
            Some(&serde_json::to_value(&filter)?),
        )
    }

    fn get_filter(&self, user_id: &str, connection_id: &str, table: &str, column: &str) -> RlsResult<Option<RlsFilter>> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM user_rls_filters WHERE user_id = ? AND connection_id = ? AND table_name = ? AND column_name = ?",
                params![user_id, connection_id, table, column],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match payload {
            Some(p) => Some(serde_json::from_str(&p)?),
            None => None,
        })
    }

    pub fn remove_filter(&self, actor: &ActorContext, user_id: &str, connection_id: &str, table: &str, column: &str) -> RlsResult<()> {
        let existing = self.get_filter(user_id, connection_id, table, column)?;
        self.conn.execute(
            "DELETE FROM user_rls_filters WHERE user_id = ? AND connection_id = ? AND table_name = ? AND column_name = ?",
            params![user_id, connection_id, table, column],
        )?;
        self.append_audit(
            actor,
            AuditAction::Delete,
            "user_rls_filters",
            &format!("{}:{}:{}:{}", user_id, connection_id, table, column),
            connection_id,
            existing.as_ref().map(|f| serde_json::to_value(f)).transpose()?.as_ref(),
            None,
        )
    }

    pub fn set_table_permission(
        &self,
        actor: &ActorContext,
        user_id: &str,
        connection_id: &str,
        permission: TablePermission,
    ) -> RlsResult<()> {
        let existing = self.get_table_permission(user_id, connection_id, &permission.table)?;
        let payload = serde_json::to_string(&permission)?;

        self.conn.execute(
            "INSERT INTO user_table_permissions (user_id, connection_id, table_name, payload)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(user_id, connection_id, table_name) DO UPDATE SET payload = excluded.payload",
            params![user_id, connection_id, permission.table, payload],
        )?;

        let action = if existing.is_some() { AuditAction::Update } else { AuditAction::Create };
        self.append_audit(
            actor,
            action,
            "user_table_permissions",
            &format!("{}:{}:{}", user_id, connection_id, permission.table),
            connection_id,
            existing.as_ref().map(|p| serde_json::to_value(p)).transpose()?.as_ref(),
            Some(&serde_json::to_value(&permission)?),
        )
    }

    fn get_table_permission(&self, user_id: &str, connection_id: &str, table: &str) -> RlsResult<Option<TablePermission>> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM user_table_permissions WHERE user_id = ? AND connection_id = ? AND table_name = ?",
                params![user_id, connection_id, table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match payload {
            Some(p) => Some(serde_json::from_str(&p)?),
            None => None,
        })
    }

    /// Load the effective `UserContext` for a `(user_id, connection_id)`
    /// pair. A user with no roles row is treated as a non-admin with no
    /// filters or permissions (least-privilege default).
    pub fn load_user_context(&self, user_id: &str, connection_id: &str) -> RlsResult<UserContext> {
        let (roles, is_admin) = self.roles_row(user_id, connection_id)?.unwrap_or_default();

        let mut filter_stmt = self.conn.prepare(
            "SELECT payload FROM user_rls_filters WHERE user_id = ? AND connection_id = ?",
        )?;
        let rls_filters = filter_stmt
            .query_map(params![user_id, connection_id], |row| row.get::<_, String>(0))?
            .map(|r| r.map_err(RlsError::from).and_then(|s| Ok(serde_json::from_str(&s)?)))
            .collect::<RlsResult<Vec<RlsFilter>>>()?;

        let mut perm_stmt = self.conn.prepare(
            "SELECT payload FROM user_table_permissions WHERE user_id = ? AND connection_id = ?",
        )?;
        let table_permissions = perm_stmt
            .query_map(params![user_id, connection_id], |row| row.get::<_, String>(0))?
            .map(|r| r.map_err(RlsError::from).and_then(|s| Ok(serde_json::from_str(&s)?)))
            .collect::<RlsResult<Vec<TablePermission>>>()?;

        Ok(UserContext {
            user_id: user_id.to_string(),
            connection_id: connection_id.to_string(),
            roles,
            rls_filters,
            table_permissions,
            is_admin,
        })
    }

    /// Read the audit trail for a connection, optionally scoped by entity
    /// type and/or a `since` cutoff. Append-only is only meaningful if the
    /// trail is queryable, so this is the read side of that invariant.
    pub fn list_audit(
        &self,
        connection_id: &str,
        entity_type: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> RlsResult<Vec<AuditRow>> {
        let mut sql = String::from(
            "SELECT who, occurred_at, action, entity_type, entity_id, old_value, new_value, ip, agent
             FROM rls_configuration_audit WHERE connection_id = ?",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(connection_id.to_string())];
        if let Some(et) = entity_type {
            sql.push_str(" AND entity_type = ?");
            args.push(Box::new(et.to_string()));
        }
        if let Some(since) = since {
            sql.push_str(" AND occurred_at >= ?");
            args.push(Box::new(since.to_rfc3339()));
        }
        sql.push_str(" ORDER BY id ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let params_ref: Vec<&dyn rusqlite::ToSql> = args.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(params_ref.as_slice(), |row| {
            let who: String = row.get(0)?;
            let occurred_at: String = row.get(1)?;
            let action: String = row.get(2)?;
            let entity_type: String = row.get(3)?;
            let entity_id: String = row.get(4)?;
            let old_value: Option<String> = row.get(5)?;
            let new_value: Option<String> = row.get(6)?;
            let ip: Option<String> = row.get(7)?;
            let agent: Option<String> = row.get(8)?;
            Ok((who, occurred_at, action, entity_type, entity_id, old_value, new_value, ip, agent))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (who, occurred_at, action, entity_type, entity_id, old_value, new_value, ip, agent) = row?;
            out.push(AuditRow {
                who,
                when: DateTime::parse_from_rfc3339(&occurred_at)
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
                action: serde_json::from_value(serde_json::Value::String(action))?,
                entity_type,
                entity_id,
                old: old_value.map(|v| serde_json::from_str(&v)).transpose()?,
                new: new_value.map(|v| serde_json::from_str(&v)).transpose()?,
                ip,
                agent,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor() -> ActorContext {
        ActorContext { who: "admin1".into(), ip: Some("10.0.0.1".into()), agent: Some("cli".into()) }
    }

    #[test]
    fn test_load_user_context_defaults_least_privilege() {
        let store = RlsStore::open_in_memory().unwrap();
        let ctx = store.load_user_context("alice", "conn1").unwrap();
        assert!(!ctx.is_admin);
        assert!(ctx.rls_filters.is_empty());
        assert!(ctx.table_permissions.is_empty());
    }

    #[test]
    fn test_set_roles_and_load() {
        let store = RlsStore::open_in_memory().unwrap();
        store.set_roles(&actor(), "alice", "conn1", vec!["analyst".into()], false).unwrap();
        let ctx = store.load_user_context("alice", "conn1").unwrap();
        assert_eq!(ctx.roles, vec!["analyst".to_string()]);
        assert!(!ctx.is_admin);
    }

    #[test]
    fn test_set_filter_and_load() {
        let store = RlsStore::open_in_memory().unwrap();
        store
            .set_filter(
                &actor(),
                "alice",
                "conn1",
                RlsFilter { table: "orders".into(), column: "region".into(), operator: RlsOperator::Eq, value: serde_json::json!("west") },
            )
            .unwrap();
        let ctx = store.load_user_context("alice", "conn1").unwrap();
        assert_eq!(ctx.filters_for("orders").len(), 1);
    }

    #[test]
    fn test_remove_filter() {
        let store = RlsStore::open_in_memory().unwrap();
        store
            .set_filter(&actor(), "alice", "conn1", RlsFilter { table: "orders".into(), column: "region".into(), operator: RlsOperator::Eq, value: serde_json::json!("west") })
            .unwrap();
        store.remove_filter(&actor(), "alice", "conn1", "orders", "region").unwrap();
        let ctx = store.load_user_context("alice", "conn1").unwrap();
        assert!(ctx.filters_for("orders").is_empty());
    }

    #[test]
    fn test_mutations_append_audit_rows() {
        let store = RlsStore::open_in_memory().unwrap();
        store.set_roles(&actor(), "alice", "conn1", vec!["analyst".into()], false).unwrap();
        store
            .set_table_permission(&actor(), "alice", "conn1", TablePermission { table: "orders".into(), can_read: true, allowed_columns: None, denied_columns: vec![] })
            .unwrap();

        let audit = store.list_audit("conn1", None, None).unwrap();
        assert_eq!(audit.len(), 2);
        assert_eq!(audit[0].action, AuditAction::Create);
        assert_eq!(audit[0].who, "admin1");
    }

    #[test]
    fn test_list_audit_filters_by_entity_type() {
        let store = RlsStore::open_in_memory().unwrap();
        store.set_roles(&actor(), "alice", "conn1", vec!["analyst".into()], false).unwrap();
        store
            .set_table_permission(&actor(), "alice", "conn1", TablePermission { table: "orders".into(), can_read: true, allowed_columns: None, denied_columns: vec![] })
            .unwrap();

        let audit = store.list_audit("conn1", Some("user_table_permissions"), None).unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].entity_type, "user_table_permissions");
    }

    #[test]
    fn test_audit_table_rejects_update_and_delete() {
        let store = RlsStore::open_in_memory().unwrap();
        store.set_roles(&actor(), "alice", "conn1", vec!["analyst".into()], false).unwrap();

        let update_result = store.conn.execute("UPDATE rls_configuration_audit SET who = 'eve'", []);
        assert!(update_result.is_err());

        let delete_result = store.conn.execute("DELETE FROM rls_configuration_audit", []);
        assert!(delete_result.is_err());
    }
}
