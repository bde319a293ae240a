//! In-memory backend
//!
//! Single-node backend used by the embedded server and the test suite. It
//! keeps cluster metadata under a `parking_lot` lock, enforces per-series
//! field types, and dispatches a small set of administrative statements by
//! keyword. It is not a query engine.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

use tickdb_core::{
    DataNode, FieldType, NormalizedPoint, Results, Row, StatementResult, TickError, TickResult,
    User,
};

use crate::backend::Backend;

#[derive(Default)]
struct DatabaseMeta {
    retention_policies: BTreeSet<String>,
    default_retention_policy: Option<String>,
    /// (measurement, field name) -> scalar type first stored for the series
    field_types: BTreeMap<(String, String), FieldType>,
}

struct StoredUser {
    password: String,
    user: User,
}

#[derive(Default)]
struct MetaState {
    databases: BTreeMap<String, DatabaseMeta>,
    users: BTreeMap<String, StoredUser>,
    nodes: BTreeMap<u64, DataNode>,
    replicas: BTreeSet<u64>,
    next_node_id: u64,
}

/// A batch accepted by [`MemoryBackend::write_points`], kept for inspection.
#[derive(Debug, Clone)]
pub struct WrittenBatch {
    pub database: String,
    pub retention_policy: String,
    pub points: Vec<NormalizedPoint>,
}

/// Single-node in-memory backend.
pub struct MemoryBackend {
    require_authentication: bool,
    node_id: u64,
    index: AtomicU64,
    cq_runs: AtomicU64,
    state: RwLock<MetaState>,
    writes: RwLock<Vec<WrittenBatch>>,
}

impl MemoryBackend {
    pub fn new(require_authentication: bool) -> Self {
        Self {
            require_authentication,
            node_id: 1,
            index: AtomicU64::new(0),
            cq_runs: AtomicU64::new(0),
            state: RwLock::new(MetaState::default()),
            writes: RwLock::new(Vec::new()),
        }
    }

    pub fn create_database(&self, name: &str) -> TickResult<()> {
        let mut state = self.state.write();
        if state.databases.contains_key(name) {
            return Err(TickError::DatabaseExists);
        }
        state.databases.insert(name.to_string(), DatabaseMeta::default());
        Ok(())
    }

    pub fn drop_database(&self, name: &str) -> TickResult<()> {
        let mut state = self.state.write();
        state
            .databases
            .remove(name)
            .map(|_| ())
            .ok_or(TickError::DatabaseMissing)
    }

    pub fn create_retention_policy(&self, database: &str, name: &str) -> TickResult<()> {
        let mut state = self.state.write();
        let db = state
            .databases
            .get_mut(database)
            .ok_or(TickError::DatabaseMissing)?;
        if !db.retention_policies.insert(name.to_string()) {
            return Err(TickError::RetentionPolicyExists);
        }
        Ok(())
    }

    pub fn set_default_retention_policy(&self, database: &str, name: &str) -> TickResult<()> {
        let mut state = self.state.write();
        let db = state
            .databases
            .get_mut(database)
            .ok_or(TickError::DatabaseMissing)?;
        if !db.retention_policies.contains(name) {
            return Err(TickError::RetentionPolicyNotFound);
        }
        db.default_retention_policy = Some(name.to_string());
        Ok(())
    }

    pub fn create_user(&self, name: &str, password: &str, admin: bool) -> TickResult<()> {
        let mut state = self.state.write();
        if state.users.contains_key(name) {
            return Err(TickError::UserExists);
        }
        state.users.insert(
            name.to_string(),
            StoredUser {
                password: password.to_string(),
                user: User::new(name, admin),
            },
        );
        Ok(())
    }

    /// Advance the write index without a write, as replication apply does.
    pub fn advance_index(&self) -> u64 {
        self.index.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Batches accepted so far, oldest first.
    pub fn written(&self) -> Vec<WrittenBatch> {
        self.writes.read().clone()
    }

    /// How many times continuous-query processing has been triggered.
    pub fn continuous_query_runs(&self) -> u64 {
        self.cq_runs.load(Ordering::SeqCst)
    }

    fn authorize_statement(&self, statement: &Statement, user: Option<&User>) -> TickResult<()> {
        if !self.require_authentication {
            return Ok(());
        }
        match user {
            Some(user) => {
                if statement.requires_admin() && !user.admin {
                    Err(TickError::authorize(format!(
                        "{} not authorized to execute statement",
                        user.name
                    )))
                } else {
                    Ok(())
                }
            }
            None => {
                // Bootstrap: while no users exist, the only statement an
                // anonymous caller may run is the creation of the first
                // admin user.
                let bootstrap = matches!(
                    statement,
                    Statement::CreateUser { admin: true, .. }
                ) && self.state.read().users.is_empty();
                if bootstrap {
                    Ok(())
                } else {
                    Err(TickError::authorize(
                        "user is required to execute statement",
                    ))
                }
            }
        }
    }

    fn execute_statement(&self, statement: Statement) -> StatementResult {
        match statement {
            Statement::ShowDatabases => {
                let state = self.state.read();
                let values = state
                    .databases
                    .keys()
                    .map(|name| vec![serde_json::Value::String(name.clone())])
                    .collect::<Vec<_>>();
                StatementResult::ok(vec![Row {
                    columns: vec!["name".to_string()],
                    values,
                    ..Default::default()
                }])
            }
            Statement::CreateDatabase(name) => match self.create_database(&name) {
                Ok(()) => StatementResult::default(),
                Err(e) => StatementResult::error(e),
            },
            Statement::DropDatabase(name) => match self.drop_database(&name) {
                Ok(()) => StatementResult::default(),
                Err(e) => StatementResult::error(e),
            },
            Statement::ShowUsers => {
                let state = self.state.read();
                let values = state
                    .users
                    .values()
                    .map(|stored| {
                        vec![
                            serde_json::Value::String(stored.user.name.clone()),
                            serde_json::Value::Bool(stored.user.admin),
                        ]
                    })
                    .collect::<Vec<_>>();
                StatementResult::ok(vec![Row {
                    columns: vec!["user".to_string(), "admin".to_string()],
                    values,
                    ..Default::default()
                }])
            }
            Statement::CreateUser {
                name,
                password,
                admin,
            } => match self.create_user(&name, &password, admin) {
                Ok(()) => StatementResult::default(),
                Err(e) => StatementResult::error(e),
            },
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn node_id(&self) -> u64 {
        self.node_id
    }

    fn index(&self) -> u64 {
        self.index.load(Ordering::SeqCst)
    }

    fn user_count(&self) -> usize {
        self.state.read().users.len()
    }

    async fn authenticate(&self, username: &str, password: &str) -> TickResult<User> {
        let state = self.state.read();
        match state.users.get(username) {
            Some(stored) if stored.password == password => Ok(stored.user.clone()),
            _ => Err(TickError::InvalidCredentials),
        }
    }

    fn database_exists(&self, name: &str) -> bool {
        self.state.read().databases.contains_key(name)
    }

    fn default_retention_policy(&self, database: &str) -> Option<String> {
        self.state
            .read()
            .databases
            .get(database)
            .and_then(|db| db.default_retention_policy.clone())
    }

    async fn write_points(
        &self,
        database: &str,
        retention_policy: &str,
        points: Vec<NormalizedPoint>,
    ) -> TickResult<u64> {
        {
            let mut state = self.state.write();
            let db = state
                .databases
                .get_mut(database)
                .ok_or(TickError::DatabaseMissing)?;
            if !db.retention_policies.contains(retention_policy) {
                return Err(TickError::RetentionPolicyNotFound);
            }
            for point in &points {
                for (field, value) in &point.fields {
                    let key = (point.name.clone(), field.clone());
                    let got = value.field_type();
                    match db.field_types.get(&key) {
                        Some(stored) if *stored != got => {
                            return Err(TickError::FieldTypeConflict {
                                field: field.clone(),
                                got,
                                stored: *stored,
                            });
                        }
                        Some(_) => {}
                        None => {
                            db.field_types.insert(key, got);
                        }
                    }
                }
            }
        }

        self.writes.write().push(WrittenBatch {
            database: database.to_string(),
            retention_policy: retention_policy.to_string(),
            points,
        });
        Ok(self.advance_index())
    }

    async fn execute_query(
        &self,
        query: &str,
        _database: &str,
        user: Option<&User>,
    ) -> TickResult<Results> {
        let statements = parse_statements(query)?;

        let mut results = Vec::with_capacity(statements.len());
        for statement in statements {
            match self.authorize_statement(&statement, user) {
                Ok(()) => results.push(self.execute_statement(statement)),
                Err(e) => results.push(StatementResult::error(e)),
            }
        }
        Ok(Results::from_statements(results))
    }

    fn data_nodes(&self) -> Vec<DataNode> {
        self.state.read().nodes.values().cloned().collect()
    }

    async fn create_data_node(&self, url: &str) -> TickResult<DataNode> {
        if url.is_empty() {
            return Err(TickError::DataNodeUrlRequired);
        }
        let mut state = self.state.write();
        if state.nodes.values().any(|n| n.url == url) {
            return Err(TickError::DataNodeExists);
        }
        state.next_node_id += 1;
        let node = DataNode {
            id: state.next_node_id,
            url: url.to_string(),
        };
        state.nodes.insert(node.id, node.clone());
        Ok(node)
    }

    async fn create_replica(&self, id: u64, _url: &str) -> TickResult<()> {
        self.state.write().replicas.insert(id);
        Ok(())
    }

    async fn delete_data_node(&self, id: u64) -> TickResult<()> {
        let mut state = self.state.write();
        state
            .nodes
            .remove(&id)
            .map(|_| ())
            .ok_or(TickError::DataNodeNotFound)
    }

    async fn snapshot_metadata(&self) -> TickResult<Vec<u8>> {
        #[derive(Serialize)]
        struct Snapshot {
            node_id: u64,
            index: u64,
            databases: Vec<String>,
            users: Vec<String>,
        }

        let state = self.state.read();
        let snapshot = Snapshot {
            node_id: self.node_id,
            index: self.index(),
            databases: state.databases.keys().cloned().collect(),
            users: state.users.keys().cloned().collect(),
        };
        serde_json::to_vec(&snapshot).map_err(|e| TickError::internal(e.to_string()))
    }

    async fn run_continuous_queries(&self) -> TickResult<()> {
        self.cq_runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// One administrative statement understood by this backend.
#[derive(Debug, Clone, PartialEq)]
enum Statement {
    ShowDatabases,
    CreateDatabase(String),
    DropDatabase(String),
    ShowUsers,
    CreateUser {
        name: String,
        password: String,
        admin: bool,
    },
}

impl Statement {
    fn requires_admin(&self) -> bool {
        matches!(
            self,
            Statement::CreateDatabase(_) | Statement::DropDatabase(_) | Statement::CreateUser { .. }
        )
    }
}

/// Split a query into statements and parse each by keyword. The whole input
/// is parsed before anything executes, so a malformed statement fails the
/// request up front.
fn parse_statements(query: &str) -> TickResult<Vec<Statement>> {
    let statements: Vec<&str> = query
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if statements.is_empty() {
        return Err(TickError::parse("found EOF, expected statement"));
    }
    statements.iter().map(|s| parse_statement(s)).collect()
}

fn parse_statement(statement: &str) -> TickResult<Statement> {
    let tokens: Vec<&str> = statement.split_whitespace().collect();
    let keyword = |i: usize| tokens.get(i).map(|t| t.to_ascii_uppercase());

    match (keyword(0).as_deref(), keyword(1).as_deref()) {
        (Some("SHOW"), Some("DATABASES")) => Ok(Statement::ShowDatabases),
        (Some("SHOW"), Some("USERS")) => Ok(Statement::ShowUsers),
        (Some("CREATE"), Some("DATABASE")) => match tokens.get(2) {
            Some(name) => Ok(Statement::CreateDatabase(name.to_string())),
            None => Err(TickError::parse("found EOF, expected identifier")),
        },
        (Some("DROP"), Some("DATABASE")) => match tokens.get(2) {
            Some(name) => Ok(Statement::DropDatabase(name.to_string())),
            None => Err(TickError::parse("found EOF, expected identifier")),
        },
        (Some("CREATE"), Some("USER")) => parse_create_user(&tokens),
        _ => Err(TickError::parse(format!(
            "found {}, expected statement",
            tokens.first().copied().unwrap_or("EOF")
        ))),
    }
}

/// CREATE USER <name> WITH PASSWORD '<password>' [WITH ALL PRIVILEGES]
fn parse_create_user(tokens: &[&str]) -> TickResult<Statement> {
    let name = tokens
        .get(2)
        .ok_or_else(|| TickError::parse("found EOF, expected identifier"))?;
    let with = tokens.get(3).map(|t| t.to_ascii_uppercase());
    let password_kw = tokens.get(4).map(|t| t.to_ascii_uppercase());
    if with.as_deref() != Some("WITH") || password_kw.as_deref() != Some("PASSWORD") {
        return Err(TickError::parse("found EOF, expected WITH PASSWORD"));
    }
    let password = tokens
        .get(5)
        .ok_or_else(|| TickError::parse("found EOF, expected string"))?
        .trim_matches('\'');

    let admin = tokens[6..]
        .iter()
        .map(|t| t.to_ascii_uppercase())
        .collect::<Vec<_>>()
        == ["WITH", "ALL", "PRIVILEGES"];

    Ok(Statement::CreateUser {
        name: name.to_string(),
        password: password.to_string(),
        admin,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use tickdb_core::FieldValue;

    fn point(name: &str, field: &str, value: FieldValue) -> NormalizedPoint {
        let mut fields = BTreeMap::new();
        fields.insert(field.to_string(), value);
        NormalizedPoint {
            name: name.to_string(),
            tags: BTreeMap::new(),
            timestamp: Utc::now(),
            fields,
        }
    }

    #[test]
    fn test_parse_statements() {
        assert_eq!(
            parse_statements("SHOW DATABASES").unwrap(),
            vec![Statement::ShowDatabases]
        );
        assert_eq!(
            parse_statements("create database foo").unwrap(),
            vec![Statement::CreateDatabase("foo".into())]
        );
        assert_eq!(
            parse_statements("CREATE DATABASE foo; SHOW DATABASES").unwrap().len(),
            2
        );
        assert_eq!(
            parse_statements("CREATE USER lisa WITH PASSWORD 'pw' WITH ALL PRIVILEGES").unwrap(),
            vec![Statement::CreateUser {
                name: "lisa".into(),
                password: "pw".into(),
                admin: true,
            }]
        );
        assert!(parse_statements("").is_err());
        assert!(parse_statements("CREATE DATABASE").is_err());
        assert!(parse_statements("SELECT value FROM cpu").is_err());
    }

    #[tokio::test]
    async fn test_write_index_advances() {
        let backend = MemoryBackend::new(false);
        backend.create_database("foo").unwrap();
        backend.create_retention_policy("foo", "bar").unwrap();

        assert_eq!(backend.index(), 0);
        let index = backend
            .write_points("foo", "bar", vec![point("cpu", "value", FieldValue::Number(1.0))])
            .await
            .unwrap();
        assert_eq!(index, 1);
        assert_eq!(backend.index(), 1);
        assert_eq!(backend.written().len(), 1);
    }

    #[tokio::test]
    async fn test_field_type_conflict() {
        let backend = MemoryBackend::new(false);
        backend.create_database("foo").unwrap();
        backend.create_retention_policy("foo", "bar").unwrap();

        backend
            .write_points("foo", "bar", vec![point("cpu", "value", FieldValue::Number(100.0))])
            .await
            .unwrap();

        let err = backend
            .write_points(
                "foo",
                "bar",
                vec![point("cpu", "value", FieldValue::Text("foo".into()))],
            )
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"field "value" is type string, mapped as type number"#
        );
    }

    #[tokio::test]
    async fn test_write_unknown_retention_policy() {
        let backend = MemoryBackend::new(false);
        backend.create_database("foo").unwrap();
        let err = backend
            .write_points("foo", "nope", vec![point("cpu", "value", FieldValue::Number(1.0))])
            .await
            .unwrap_err();
        assert_eq!(err, TickError::RetentionPolicyNotFound);
    }

    #[tokio::test]
    async fn test_bootstrap_allows_only_first_admin() {
        let backend = MemoryBackend::new(true);

        // Non-admin creation is not the bootstrap statement.
        let results = backend
            .execute_query("CREATE USER maeve WITH PASSWORD 'pass'", "", None)
            .await
            .unwrap();
        assert!(results.error().unwrap().is_authorization());

        // First admin goes through anonymously.
        let results = backend
            .execute_query(
                "CREATE USER louise WITH PASSWORD 'pass' WITH ALL PRIVILEGES",
                "",
                None,
            )
            .await
            .unwrap();
        assert!(results.error().is_none());

        // Once a user exists the exception is gone.
        let results = backend
            .execute_query("CREATE DATABASE foo", "", None)
            .await
            .unwrap();
        assert!(results.error().unwrap().is_authorization());
    }

    #[tokio::test]
    async fn test_show_databases_sorted() {
        let backend = MemoryBackend::new(false);
        backend.create_database("foo").unwrap();
        backend.create_database("bar").unwrap();

        let results = backend.execute_query("SHOW DATABASES", "", None).await.unwrap();
        let row = &results.results[0].series[0];
        assert_eq!(row.columns, vec!["name"]);
        assert_eq!(
            row.values,
            vec![
                vec![serde_json::Value::String("bar".into())],
                vec![serde_json::Value::String("foo".into())]
            ]
        );
    }

    #[tokio::test]
    async fn test_data_node_lifecycle() {
        let backend = MemoryBackend::new(false);
        let node = backend.create_data_node("http://localhost:1000").await.unwrap();
        assert_eq!(node.id, 1);

        let err = backend
            .create_data_node("http://localhost:1000")
            .await
            .unwrap_err();
        assert_eq!(err, TickError::DataNodeExists);

        backend.create_data_node("http://localhost:2000").await.unwrap();
        let ids: Vec<u64> = backend.data_nodes().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![1, 2]);

        backend.delete_data_node(1).await.unwrap();
        assert_eq!(
            backend.delete_data_node(1).await.unwrap_err(),
            TickError::DataNodeNotFound
        );
    }

    #[tokio::test]
    async fn test_authenticate() {
        let backend = MemoryBackend::new(true);
        backend.create_user("lisa", "password", true).unwrap();

        let user = backend.authenticate("lisa", "password").await.unwrap();
        assert!(user.admin);

        assert!(backend.authenticate("lisa", "wrong").await.is_err());
        assert!(backend.authenticate("nobody", "password").await.is_err());
    }
}
