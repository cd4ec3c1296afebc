use anyhow::anyhow;
use futures::TryStreamExt;
use macaddr::MacAddr6;
use netlink_packet_route::link::{InfoBridgePort, InfoPortData, LinkAttribute, LinkFlags, LinkInfo, LinkMessage};
use rtnetlink::Handle;

use crate::error::HandlerError;

/// Looks up a link by name.
pub async fn link_by_name(handle: &Handle, name: &str) -> Result<LinkMessage, HandlerError> {
    let mut links = handle.link().get().match_name(name.to_string()).execute();
    links
        .try_next()
        .await
        .map_err(|e| HandlerError::Netlink(anyhow!(e)))?
        .ok_or_else(|| HandlerError::LinkNotFound(name.to_string()))
}

/// Lists every link visible in the current network namespace.
pub async fn link_list(handle: &Handle) -> Result<Vec<LinkMessage>, HandlerError> {
    let mut links = handle.link().get().execute();
    let mut out = Vec::new();
    while let Some(link) = links
        .try_next()
        .await
        .map_err(|e| HandlerError::Netlink(anyhow!(e)))?
    {
        out.push(link);
    }
    Ok(out)
}

pub async fn link_add(handle: &Handle, msg: LinkMessage) -> Result<(), HandlerError> {
    handle
        .link()
        .add(msg)
        .execute()
        .await
        .map_err(|e| HandlerError::Netlink(anyhow!(e)))
}

async fn set_link(handle: &Handle, msg: LinkMessage) -> Result<(), HandlerError> {
    handle
        .link()
        .set(msg)
        .execute()
        .await
        .map_err(|e| HandlerError::Netlink(anyhow!(e)))
}

pub async fn link_set_up(handle: &Handle, link: &LinkMessage) -> Result<(), HandlerError> {
    let mut msg = LinkMessage::default();
    msg.header.index = link.header.index;
    msg.header.flags |= LinkFlags::Up;
    msg.header.change_mask |= LinkFlags::Up;
    set_link(handle, msg).await
}

pub async fn link_set_down(handle: &Handle, link: &LinkMessage) -> Result<(), HandlerError> {
    let mut msg = LinkMessage::default();
    msg.header.index = link.header.index;
    msg.header.flags &= !LinkFlags::Up;
    msg.header.change_mask |= LinkFlags::Up;
    set_link(handle, msg).await
}

pub async fn link_set_master(
    handle: &Handle,
    link: &LinkMessage,
    master: &LinkMessage,
) -> Result<(), HandlerError> {
    let mut msg = LinkMessage::default();
    msg.header.index = link.header.index;
    msg.attributes
        .push(LinkAttribute::Controller(master.header.index));
    set_link(handle, msg).await
}

/// Assigns a new hardware address to a link (used to randomize the pod
/// link's MAC once its original address has been stolen into the VIF).
pub async fn link_set_address(
    handle: &Handle,
    link: &LinkMessage,
    mac: MacAddr6,
) -> Result<(), HandlerError> {
    let mut msg = LinkMessage::default();
    msg.header.index = link.header.index;
    msg.attributes
        .push(LinkAttribute::Address(mac.into_array().to_vec()));
    set_link(handle, msg).await
}

/// Disables MAC learning on an enslaved bridge port (bridge strategy
/// step 7 in `spec.md` §4.2): prevents the bridge from believing the
/// stolen pod MAC still lives on this port after it has been moved to
/// the guest.
pub async fn link_set_learning_off(handle: &Handle, link: &LinkMessage) -> Result<(), HandlerError> {
    let mut msg = LinkMessage::default();
    msg.header.index = link.header.index;
    msg.attributes.push(LinkAttribute::LinkInfo(vec![LinkInfo::PortData(
        InfoPortData::BridgePort(vec![InfoBridgePort::Learning(false)]),
    )]));
    handle
        .link()
        .set_port(msg)
        .execute()
        .await
        .map_err(|e| HandlerError::Netlink(anyhow!(e)))
}

pub async fn del_link(handle: &Handle, msg: &LinkMessage) -> Result<(), HandlerError> {
    handle
        .link()
        .del(msg.header.index)
        .execute()
        .await
        .map_err(|e| HandlerError::Netlink(anyhow!(e)))
}

/// Extracts the MAC address from a link's attribute list.
pub fn get_mac_address(attributes: &[LinkAttribute]) -> Option<MacAddr6> {
    attributes.iter().find_map(|attr| match attr {
        LinkAttribute::Address(bytes) if bytes.len() == 6 => Some(MacAddr6::new(
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5],
        )),
        _ => None,
    })
}

/// Extracts the MTU from a link's attribute list, defaulting to 1500.
pub fn get_mtu(attributes: &[LinkAttribute]) -> u32 {
    attributes
        .iter()
        .find_map(|attr| match attr {
            LinkAttribute::Mtu(m) => Some(*m),
            _ => None,
        })
        .unwrap_or(1500)
}

/// Extracts the `IFLA_IFNAME` attribute.
pub fn get_ifname(attributes: &[LinkAttribute]) -> Option<String> {
    attributes.iter().find_map(|attr| match attr {
        LinkAttribute::IfName(name) => Some(name.clone()),
        _ => None,
    })
}

/// Returns the `IFLA_INFO_KIND` string for a link (e.g. `"bridge"`,
/// `"macvtap"`), used by the macvtap strategy to locate the tap device
/// and by bridge creation to verify an existing link is really a
/// bridge.
pub fn link_kind(attributes: &[LinkAttribute]) -> Option<String> {
    attributes.iter().find_map(|attr| match attr {
        LinkAttribute::LinkInfo(infos) => infos.iter().find_map(|info| match info {
            LinkInfo::Kind(kind) => Some(kind.to_string()),
            _ => None,
        }),
        _ => None,
    })
}

pub fn validate_mtu(mtu: u32) -> Result<u16, HandlerError> {
    u16::try_from(mtu).map_err(|_| HandlerError::InvalidMtu(mtu))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mtu_bounds() {
        assert_eq!(validate_mtu(0).unwrap(), 0);
        assert_eq!(validate_mtu(65535).unwrap(), 65535);
        assert!(validate_mtu(65536).is_err());
        assert!(validate_mtu(4_294_967_295).is_err());
    }

    #[test]
    fn mac_extraction_requires_six_bytes() {
        let attrs = vec![LinkAttribute::Address(vec![0x02, 0x00, 0x00, 0x00, 0x00, 0x01])];
        assert_eq!(
            get_mac_address(&attrs),
            Some(MacAddr6::new(0x02, 0x00, 0x00, 0x00, 0x00, 0x01))
        );
        let short = vec![LinkAttribute::Address(vec![0x02, 0x00])];
        assert_eq!(get_mac_address(&short), None);
    }

    #[test]
    fn mtu_defaults_to_1500_when_absent() {
        assert_eq!(get_mtu(&[]), 1500);
        assert_eq!(get_mtu(&[LinkAttribute::Mtu(9000)]), 9000);
    }
}
