/*!
 * Network Types
 * Plain views of kernel link objects
 */

use netlink_packet_route::link::{InfoKind, LinkAttribute, LinkInfo, LinkMessage};
use serde::{Deserialize, Serialize};

/// Default MTU for the bridge and veth endpoints
pub const DEFAULT_MTU: u32 = 1500;

/// Prefix of generated host-side veth names
pub const VETH_PREFIX: &str = "veth";

/// Snapshot of a kernel network link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub index: u32,
    pub name: String,
    /// `IFLA_INFO_KIND`, e.g. "bridge" or "veth"
    pub kind: Option<String>,
    pub mtu: Option<u32>,
    /// Index of the bridge this link is enslaved to
    pub master: Option<u32>,
    /// `IFLA_LINK`; for a veth, the peer's index in the peer's namespace
    pub peer_index: Option<u32>,
}

impl Link {
    pub fn from_message(msg: &LinkMessage) -> Self {
        let mut link = Link {
            index: msg.header.index,
            name: String::new(),
            kind: None,
            mtu: None,
            master: None,
            peer_index: None,
        };

        for attr in &msg.attributes {
            match attr {
                LinkAttribute::IfName(name) => link.name = name.clone(),
                LinkAttribute::Mtu(mtu) => link.mtu = Some(*mtu),
                LinkAttribute::Controller(index) => link.master = Some(*index),
                LinkAttribute::Link(index) => link.peer_index = Some(*index),
                LinkAttribute::LinkInfo(infos) => {
                    for info in infos {
                        if let LinkInfo::Kind(kind) = info {
                            link.kind = Some(kind_name(kind));
                        }
                    }
                }
                _ => {}
            }
        }
        link
    }

    pub fn is_bridge(&self) -> bool {
        self.kind.as_deref() == Some("bridge")
    }

    pub fn is_veth(&self) -> bool {
        self.kind.as_deref() == Some("veth")
    }
}

fn kind_name(kind: &InfoKind) -> String {
    match kind {
        InfoKind::Bridge => "bridge".to_string(),
        InfoKind::Veth => "veth".to_string(),
        InfoKind::Other(other) => other.clone(),
        other => format!("{:?}", other).to_lowercase(),
    }
}

/// Both ends of a veth pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VethPair {
    /// End that carries the container address
    pub container: Link,
    /// Peer that is enslaved to the bridge
    pub host: Link,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_from_message() {
        let mut msg = LinkMessage::default();
        msg.header.index = 7;
        msg.attributes.push(LinkAttribute::IfName("cni0".to_string()));
        msg.attributes.push(LinkAttribute::Mtu(1500));
        msg.attributes
            .push(LinkAttribute::LinkInfo(vec![LinkInfo::Kind(InfoKind::Bridge)]));

        let link = Link::from_message(&msg);
        assert_eq!(link.index, 7);
        assert_eq!(link.name, "cni0");
        assert_eq!(link.mtu, Some(1500));
        assert!(link.is_bridge());
        assert!(!link.is_veth());
        assert_eq!(link.master, None);
        assert_eq!(link.peer_index, None);
    }

    #[test]
    fn test_enslaved_veth() {
        let mut msg = LinkMessage::default();
        msg.header.index = 12;
        msg.attributes.push(LinkAttribute::IfName("veth1a2b3c4d".to_string()));
        msg.attributes.push(LinkAttribute::Controller(7));
        msg.attributes.push(LinkAttribute::Link(3));
        msg.attributes
            .push(LinkAttribute::LinkInfo(vec![LinkInfo::Kind(InfoKind::Veth)]));

        let link = Link::from_message(&msg);
        assert!(link.is_veth());
        assert_eq!(link.master, Some(7));
        assert_eq!(link.peer_index, Some(3));
    }
}
