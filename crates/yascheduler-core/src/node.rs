use serde::{Deserialize, Serialize};

/// A registered worker host.
///
/// Cloud-pending nodes use a placeholder `ip` that contains no `.` — see
/// [`Node::is_placeholder`] — so the scheduler can exclude them from the
/// transport pool and from dispatch until provisioning completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Primary key. A real dotted-quad/hostname once online, or an opaque
    /// placeholder token (no `.`) while the cloud manager is provisioning it.
    pub ip: String,
    /// CPU count, used to fill the engine spawn template's `{ncpus}`
    /// placeholder. `None` means "let the host figure it out".
    pub ncpus: Option<i32>,
    /// Whether the node has passed its admission probe and may receive work.
    pub enabled: bool,
    /// Cloud provider tag (e.g. the provider name or instance id), or `None`
    /// for operator-added nodes.
    pub cloud: Option<String>,
}

impl Node {
    /// True iff `ip` is a cloud-manager placeholder rather than a real,
    /// reachable address.
    pub fn is_placeholder(ip: &str) -> bool {
        !ip.contains('.')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_ips_have_no_dot() {
        assert!(Node::is_placeholder("pending-ab12"));
        assert!(!Node::is_placeholder("10.0.0.1"));
        assert!(!Node::is_placeholder("worker-1.internal"));
    }
}
