//! Etcd membership maintenance for control-plane nodegroups.

use crate::error::ControllerError;
use crds::NodeStatus;
use etcd_gateway::{EtcdClientTrait, EtcdMember};
use tracing::{info, warn};

/// Host part of an etcd peer URL such as `https://10.0.0.5:2380`.
pub fn peer_host(peer_url: &str) -> &str {
    let without_scheme = peer_url.split_once("://").map_or(peer_url, |(_, rest)| rest);
    let authority = without_scheme.split('/').next().unwrap_or(without_scheme);
    if let Some(v6) = authority.strip_prefix('[') {
        return v6.split(']').next().unwrap_or(v6);
    }
    authority.rsplit_once(':').map_or(authority, |(host, _)| host)
}

fn first_peer_host(member: &EtcdMember) -> Option<&str> {
    member.peer_urls.first().map(|url| peer_host(url))
}

/// Removes the member of a node by IP.
///
/// Members are matched by name first, then by the host of their first
/// peer URL, since a member that never started has no name. A node with no
/// member is not an error.
pub async fn remove_etcd_member(etcd: &dyn EtcdClientTrait, ip: &str) -> Result<(), ControllerError> {
    let members = etcd.list_members().await?;
    let member = members
        .iter()
        .find(|m| m.name == ip)
        .or_else(|| members.iter().find(|m| first_peer_host(m) == Some(ip)));

    let Some(member) = member else {
        info!("No etcd member found for {}", ip);
        return Ok(());
    };

    info!("Removing etcd member {} ({}) for {}", member.id, member.name, ip);
    match etcd.remove_member(member.id).await {
        Err(e) if e.is_not_found() => {
            warn!("Etcd member {} was already removed", member.id);
            Ok(())
        }
        other => other.map_err(Into::into),
    }
}

/// Removes the first member whose peer host matches none of the nodes.
///
/// Returns whether a member was removed. Members without peer URLs are
/// skipped, as are nodes that have no IP yet.
pub async fn remove_missing_etcd_member(
    etcd: &dyn EtcdClientTrait,
    nodes: &[NodeStatus],
) -> Result<bool, ControllerError> {
    let members = etcd.list_members().await?;
    let node_ips: Vec<&str> = nodes
        .iter()
        .map(|n| n.ip_address.as_str())
        .filter(|ip| !ip.is_empty())
        .collect();

    let orphan = members.iter().find(|m| {
        first_peer_host(m).is_some_and(|host| !node_ips.contains(&host))
    });
    let Some(orphan) = orphan else {
        return Ok(false);
    };

    warn!(
        "Removing etcd member {} ({:?}) without a matching controlplane node",
        orphan.id, orphan.peer_urls
    );
    etcd.remove_member(orphan.id).await?;
    Ok(true)
}
