use std::net::IpAddr;

use anyhow::anyhow;
use futures::TryStreamExt;
use ipnetwork::IpNetwork;
use netlink_packet_route::{
    AddressFamily,
    route::{RouteAddress, RouteAttribute, RouteMessage},
};
use rtnetlink::Handle;

use crate::error::HandlerError;

/// An IPv4 route, trimmed to the fields the bridge/macvtap strategies
/// consult: destination, gateway, and the outgoing interface index used
/// to tell a route "via this pod link" apart from one learned elsewhere.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub dst: Option<IpNetwork>,
    pub gateway: Option<IpAddr>,
    pub oif_index: Option<u32>,
}

impl Route {
    pub fn is_default(&self) -> bool {
        matches!(&self.dst, Some(net) if net.prefix() == 0)
    }
}

pub async fn route_list(handle: &Handle, family: AddressFamily) -> Result<Vec<Route>, HandlerError> {
    let mut filter_msg = RouteMessage::default();
    filter_msg.header.address_family = family;
    let mut stream = handle.route().get(filter_msg).execute();
    let mut result = Vec::new();
    while let Some(reply) = stream
        .try_next()
        .await
        .map_err(|e| HandlerError::Netlink(anyhow!(e)))?
    {
        let mut dst_ip = None;
        let mut oif_index = None;
        let mut gateway = None;
        for attr in &reply.attributes {
            match attr {
                RouteAttribute::Destination(RouteAddress::Inet(ip)) => dst_ip = Some(IpAddr::V4(*ip)),
                RouteAttribute::Destination(RouteAddress::Inet6(ip)) => dst_ip = Some(IpAddr::V6(*ip)),
                RouteAttribute::Oif(index) => oif_index = Some(*index),
                RouteAttribute::Gateway(RouteAddress::Inet(ip)) => gateway = Some(IpAddr::V4(*ip)),
                RouteAttribute::Gateway(RouteAddress::Inet6(ip)) => gateway = Some(IpAddr::V6(*ip)),
                _ => {}
            }
        }
        let dst = match dst_ip {
            Some(ip) => Some(
                IpNetwork::new(ip, reply.header.destination_prefix_length)
                    .map_err(|e| HandlerError::InvalidAddress(e.to_string()))?,
            ),
            None => {
                // No RTA_DST attribute means the route covers 0.0.0.0/0.
                Some(IpNetwork::new(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 0).unwrap())
            }
        };
        result.push(Route {
            dst,
            gateway,
            oif_index,
        });
    }
    Ok(result)
}
