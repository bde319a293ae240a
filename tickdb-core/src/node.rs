//! Cluster data-node descriptor

use serde::{Deserialize, Serialize};

/// A data node in the cluster: numeric id plus connection URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataNode {
    pub id: u64,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let node = DataNode {
            id: 1,
            url: "http://localhost:1000".into(),
        };
        assert_eq!(
            serde_json::to_string(&node).unwrap(),
            r#"{"id":1,"url":"http://localhost:1000"}"#
        );
    }
}
