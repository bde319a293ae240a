//! The backend interface of the HTTP API
//!
//! The backend owns storage, query execution, user persistence and cluster
//! membership; the HTTP layer holds only request-scoped references and
//! reaches the backend exclusively through this trait. Calls are made on the
//! request's own task and may block on I/O; the backend is responsible for
//! any backpressure.

use async_trait::async_trait;

use tickdb_core::{DataNode, NormalizedPoint, Results, TickResult, User};

#[async_trait]
pub trait Backend: Send + Sync {
    /// Identifier of this node within the cluster.
    fn node_id(&self) -> u64;

    /// Monotonic index advanced on each committed write.
    fn index(&self) -> u64;

    /// Number of registered users. Zero enables the authentication
    /// bootstrap exception.
    fn user_count(&self) -> usize;

    /// Resolve a credential pair to a caller identity.
    async fn authenticate(&self, username: &str, password: &str) -> TickResult<User>;

    fn database_exists(&self, name: &str) -> bool;

    /// The database's default retention policy, if one is configured.
    fn default_retention_policy(&self, database: &str) -> Option<String>;

    /// Persist a normalized batch; returns the index assigned to the write.
    async fn write_points(
        &self,
        database: &str,
        retention_policy: &str,
        points: Vec<NormalizedPoint>,
    ) -> TickResult<u64>;

    /// Execute one or more statements. `Err` means the input could not be
    /// parsed; execution failures travel per-statement inside `Results`.
    async fn execute_query(
        &self,
        query: &str,
        database: &str,
        user: Option<&User>,
    ) -> TickResult<Results>;

    /// All data nodes, ascending by id.
    fn data_nodes(&self) -> Vec<DataNode>;

    async fn create_data_node(&self, url: &str) -> TickResult<DataNode>;

    /// Provision a replication target for a newly created data node.
    async fn create_replica(&self, id: u64, url: &str) -> TickResult<()>;

    async fn delete_data_node(&self, id: u64) -> TickResult<()>;

    /// Opaque snapshot of the node's metadata store.
    async fn snapshot_metadata(&self) -> TickResult<Vec<u8>>;

    /// Run any continuous queries that are due.
    async fn run_continuous_queries(&self) -> TickResult<()>;
}
