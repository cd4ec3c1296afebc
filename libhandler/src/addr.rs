use std::net::{IpAddr, Ipv4Addr};

use anyhow::anyhow;
use futures::TryStreamExt;
use ipnetwork::IpNetwork;
use netlink_packet_route::{
    AddressFamily,
    address::{AddressAttribute, AddressMessage},
};
use rtnetlink::Handle;

use crate::error::HandlerError;

/// An IPv4 address observed on a link, trimmed to what the binding
/// strategies need (no scope/flags/cache-info bookkeeping, unlike the
/// teacher's fuller `libcni::ip::addr::Addr`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Addr {
    pub ipnet: IpNetwork,
    pub link_index: u32,
}

pub async fn addr_add(
    handle: &Handle,
    index: u32,
    address: IpAddr,
    prefix_len: u8,
) -> Result<(), HandlerError> {
    handle
        .address()
        .add(index, address, prefix_len)
        .execute()
        .await
        .map_err(|e| HandlerError::Netlink(anyhow!(e)))
}

pub async fn addr_del(handle: &Handle, index: u32, address: IpAddr) -> Result<(), HandlerError> {
    let address_handle = handle.address();
    let mut req = address_handle.get().set_address_filter(address);
    let msg = req.message_mut();
    msg.header.index = index;
    address_handle
        .del(msg.clone())
        .execute()
        .await
        .map_err(|e| HandlerError::Netlink(anyhow!(e)))
}

pub async fn addr_list(
    handle: &Handle,
    index: u32,
    family: AddressFamily,
) -> Result<Vec<Addr>, HandlerError> {
    let mut stream = handle.address().get().set_link_index_filter(index).execute();
    let mut addresses = Vec::new();
    while let Some(msg) = stream
        .try_next()
        .await
        .map_err(|e| HandlerError::Netlink(anyhow!(e)))?
    {
        if msg.header.family != family {
            continue;
        }
        addresses.push(Addr::try_from(&msg)?);
    }
    Ok(addresses)
}

impl TryFrom<&AddressMessage> for Addr {
    type Error = HandlerError;

    fn try_from(msg: &AddressMessage) -> Result<Self, Self::Error> {
        let mut local = None;
        let mut dst = None;
        for attr in &msg.attributes {
            match attr {
                AddressAttribute::Local(ip) => {
                    local = Some(*ip);
                }
                AddressAttribute::Address(ip) => {
                    dst = Some(*ip);
                }
                _ => {}
            }
        }
        let ip = local.or(dst).unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let ipnet = IpNetwork::new(ip, msg.header.prefix_len)
            .map_err(|e| HandlerError::InvalidAddress(e.to_string()))?;
        Ok(Addr {
            ipnet,
            link_index: msg.header.index,
        })
    }
}

/// Parses a string into an `IpNetwork` (`Handler.ParseAddr` in `spec.md` §6).
pub fn parse_addr(s: &str) -> Result<IpNetwork, HandlerError> {
    s.parse().map_err(|_| HandlerError::InvalidAddress(s.to_string()))
}
