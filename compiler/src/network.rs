use cairn_config::NetworkOptions;
use cairn_graph::{AttrRef, AttrValue, Resource, ResourceGraph, ResourceId, ResourceKind};

use crate::{ConfigurationError, Error, names};

pub const NETWORK_CIDR: &str = "10.0.0.0/16";
/// Public subnets take `10.0.0.0/24` upwards and private subnets
/// `10.0.128.0/24` upwards, so each tier has room for this many zones.
pub const MAX_ZONES: u32 = 128;
const PRIVATE_OFFSET: u32 = 128;
const ANY_DESTINATION: &str = "0.0.0.0/0";

/// Handles to the isolated network every other stage places resources in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkTopology {
    pub network: ResourceId,
    pub internet_gateway: ResourceId,
    pub public_subnets: Vec<ResourceId>,
    pub private_subnets: Vec<ResourceId>,
    pub nat_gateways: Vec<ResourceId>,
}

impl NetworkTopology {
    pub fn zones_public(&self) -> usize {
        self.public_subnets.len()
    }

    pub fn zones_private(&self) -> usize {
        self.private_subnets.len()
    }

    pub fn nat_count(&self) -> usize {
        self.nat_gateways.len()
    }

    pub(crate) fn subnet_refs(subnets: &[ResourceId]) -> AttrValue {
        AttrValue::List(
            subnets
                .iter()
                .map(|id| AttrRef::new(id, "id").into())
                .collect(),
        )
    }
}

pub fn public_cidr(zone: u32) -> String {
    format!("10.0.{zone}.0/24")
}

pub fn private_cidr(zone: u32) -> String {
    format!("10.0.{}.0/24", PRIVATE_OFFSET + zone)
}

/// Declare the network, its internet gateway, one public and one
/// private-egress subnet per zone and the NAT gateways.
///
/// NAT gateways sit in the first `nat_gateways` public subnets, at most one
/// per zone; private subnet `i` routes egress through NAT gateway
/// `i mod nat_gateways`.
pub fn build(
    graph: &mut ResourceGraph,
    options: &NetworkOptions,
) -> Result<NetworkTopology, Error> {
    let zones = options.zones;
    if zones < 1 {
        return Err(ConfigurationError::ZoneCount { zones }.into());
    }
    if zones > MAX_ZONES {
        return Err(ConfigurationError::TooManyZones {
            zones,
            max: MAX_ZONES,
        }
        .into());
    }
    let nat = options.nat_gateways.min(zones);
    if nat < options.nat_gateways {
        tracing::warn!(
            requested = options.nat_gateways,
            zones,
            "more NAT gateways than public subnets requested; placing one per zone"
        );
    }
    if nat == 0 {
        tracing::warn!(zones, "no NAT gateway requested; private subnets have no egress");
    }

    let network = graph.insert(
        Resource::new(names::id(names::NETWORK), ResourceKind::Network)
            .attr("cidr", NETWORK_CIDR)
            .attr("enableDnsHostnames", true)
            .attr("enableDnsSupport", true),
    )?;
    let internet_gateway = graph.insert(
        Resource::new(names::id(names::INTERNET_GATEWAY), ResourceKind::Gateway)
            .attr("gatewayType", "internet")
            .attr("network", AttrRef::new(&network, "id")),
    )?;

    let mut public_subnets = Vec::with_capacity(zones as usize);
    for zone in 0..zones {
        let id = graph.insert(
            Resource::new(names::indexed(names::PUBLIC_SUBNET, zone), ResourceKind::Subnet)
                .attr("network", AttrRef::new(&network, "id"))
                .attr("zoneIndex", zone)
                .attr("cidr", public_cidr(zone))
                .attr("tier", "public")
                .attr("mapPublicIpOnLaunch", true)
                .attr("inboundFromInternet", true)
                .attr("defaultRoute", route_via(&internet_gateway)),
        )?;
        public_subnets.push(id);
    }

    let mut nat_gateways = Vec::with_capacity(nat as usize);
    for (index, subnet) in (0..nat).zip(&public_subnets) {
        let id = graph.insert(
            Resource::new(names::indexed(names::NAT_GATEWAY, index), ResourceKind::Gateway)
                .attr("gatewayType", "nat")
                .attr("subnet", AttrRef::new(subnet, "id"))
                .depends_on(&internet_gateway),
        )?;
        nat_gateways.push(id);
    }

    let mut private_subnets = Vec::with_capacity(zones as usize);
    for zone in 0..zones {
        let mut subnet =
            Resource::new(names::indexed(names::PRIVATE_SUBNET, zone), ResourceKind::Subnet)
                .attr("network", AttrRef::new(&network, "id"))
                .attr("zoneIndex", zone)
                .attr("cidr", private_cidr(zone))
                .attr("tier", "private")
                .attr("mapPublicIpOnLaunch", false)
                .attr("inboundFromInternet", false);
        subnet = match nat_gateways.get((zone % nat.max(1)) as usize) {
            Some(gateway) => subnet
                .attr("egress", "nat")
                .attr("defaultRoute", route_via(gateway)),
            None => subnet.attr("egress", "none"),
        };
        private_subnets.push(graph.insert(subnet)?);
    }

    Ok(NetworkTopology {
        network,
        internet_gateway,
        public_subnets,
        private_subnets,
        nat_gateways,
    })
}

fn route_via(gateway: &ResourceId) -> AttrValue {
    AttrValue::Map(
        [
            ("destination".to_string(), AttrValue::from(ANY_DESTINATION)),
            ("target".to_string(), AttrRef::new(gateway, "id").into()),
        ]
        .into(),
    )
}
