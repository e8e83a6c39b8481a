//! Access point computation.
//!
//! The access point is derived once from the node port the orderer's service
//! was assigned and the first known host. Callers never recompute it once the
//! Orderer's status holds a value.

use k8s_openapi::api::core::v1::Service;

/// Port assignment observed on the orderer's service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodePortState {
    /// The service declares no ports
    NoPorts,
    /// Ports exist but the platform has not assigned a node port yet
    Unassigned,
    /// Node port of the service's first port
    Assigned(i32),
}

impl NodePortState {
    pub fn of(service: &Service) -> Self {
        let Some(first) = service
            .spec
            .as_ref()
            .and_then(|spec| spec.ports.as_ref())
            .and_then(|ports| ports.first())
        else {
            return Self::NoPorts;
        };
        match first.node_port {
            Some(port) if port > 0 => Self::Assigned(port),
            _ => Self::Unassigned,
        }
    }
}

/// `https://<host>:<port>` for the first of `declared_hosts` then
/// `platform_hosts`, or the bare port when there are no candidates.
pub fn compute_access_point(node_port: i32, declared_hosts: &[String], platform_hosts: &[String]) -> String {
    match declared_hosts.iter().chain(platform_hosts).next() {
        Some(host) => format!("https://{host}:{node_port}"),
        None => node_port.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};

    fn hosts(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_string()).collect()
    }

    fn service_with_ports(ports: Option<Vec<Option<i32>>>) -> Service {
        Service {
            spec: Some(ServiceSpec {
                ports: ports.map(|ports| {
                    ports
                        .into_iter()
                        .map(|node_port| ServicePort {
                            port: 7050,
                            node_port,
                            ..Default::default()
                        })
                        .collect()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_declared_host() {
        assert_eq!(
            compute_access_point(31000, &hosts(&["10.0.0.5"]), &[]),
            "https://10.0.0.5:31000"
        );
    }

    #[test]
    fn test_no_candidates_gives_bare_port() {
        assert_eq!(compute_access_point(31000, &[], &[]), "31000");
    }

    #[test]
    fn test_declared_hosts_take_priority() {
        assert_eq!(
            compute_access_point(
                30500,
                &hosts(&["orderer.example.com", "10.0.0.5"]),
                &hosts(&["203.0.113.7"])
            ),
            "https://orderer.example.com:30500"
        );
    }

    #[test]
    fn test_platform_hosts_used_without_declared() {
        assert_eq!(
            compute_access_point(30500, &[], &hosts(&["203.0.113.7", "203.0.113.8"])),
            "https://203.0.113.7:30500"
        );
    }

    #[test]
    fn test_node_port_state() {
        assert_eq!(NodePortState::of(&Service::default()), NodePortState::NoPorts);
        assert_eq!(NodePortState::of(&service_with_ports(None)), NodePortState::NoPorts);
        assert_eq!(NodePortState::of(&service_with_ports(Some(vec![]))), NodePortState::NoPorts);
        assert_eq!(
            NodePortState::of(&service_with_ports(Some(vec![None]))),
            NodePortState::Unassigned
        );
        assert_eq!(
            NodePortState::of(&service_with_ports(Some(vec![Some(0)]))),
            NodePortState::Unassigned
        );
        assert_eq!(
            NodePortState::of(&service_with_ports(Some(vec![Some(31000), Some(31001)]))),
            NodePortState::Assigned(31000)
        );
    }
}
