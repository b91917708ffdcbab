//! Machine naming rules for a cluster

use crate::{Error, NodeRole, Result};

const MAX_PREFIX_LEN: usize = 48;

/// Check that a cluster prefix produces valid docker-machine names
pub fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() || prefix.len() > MAX_PREFIX_LEN {
        return Err(Error::Validation(format!(
            "Cluster prefix must be 1-{} characters (got {})",
            MAX_PREFIX_LEN,
            prefix.len()
        )));
    }

    if !prefix.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Err(Error::Validation(format!(
            "Cluster prefix must start with a letter: {}",
            prefix
        )));
    }

    if !prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(Error::Validation(format!(
            "Cluster prefix may only contain letters, digits and '-': {}",
            prefix
        )));
    }

    Ok(())
}

/// Derives machine names from a cluster prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNames {
    prefix: String,
}

impl ClusterNames {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn master_name(&self) -> String {
        format!("{}-master", self.prefix)
    }

    pub fn worker_prefix(&self) -> String {
        format!("{}-worker-", self.prefix)
    }

    pub fn worker_name(&self, index: usize) -> String {
        format!("{}{}", self.worker_prefix(), index)
    }

    /// Classify a machine name; `None` for machines outside this cluster
    pub fn role_of(&self, name: &str) -> Option<NodeRole> {
        if name == self.master_name() {
            return Some(NodeRole::Master);
        }

        let index = name.strip_prefix(&self.worker_prefix())?;
        if !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()) {
            Some(NodeRole::Worker)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        let names = ClusterNames::new("spark");
        assert_eq!(names.master_name(), "spark-master");
        assert_eq!(names.worker_name(0), "spark-worker-0");
        assert_eq!(names.worker_name(12), "spark-worker-12");
    }

    #[test]
    fn test_role_classification() {
        let names = ClusterNames::new("spark");
        assert_eq!(names.role_of("spark-master"), Some(NodeRole::Master));
        assert_eq!(names.role_of("spark-worker-3"), Some(NodeRole::Worker));
        assert_eq!(names.role_of("spark-worker-"), None);
        assert_eq!(names.role_of("spark-worker-x"), None);
        assert_eq!(names.role_of("sparky-master"), None);
        // A longer prefix must not be claimed by a shorter one
        assert_eq!(names.role_of("spark-worker-1-worker-0"), None);
        assert_eq!(names.role_of("consul-box"), None);
    }

    #[test]
    fn test_prefix_validation() {
        assert!(validate_prefix("spark").is_ok());
        assert!(validate_prefix("spark-dev-2").is_ok());
        assert!(validate_prefix("").is_err());
        assert!(validate_prefix("2spark").is_err());
        assert!(validate_prefix("spark_cluster").is_err());
        assert!(validate_prefix(&"a".repeat(49)).is_err());
    }
}
