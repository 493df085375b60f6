// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Guessing the URL other machines should use to reach this controller.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

const DEFAULT_PORT: u16 = 5240;

/// Returns the local address the kernel would use for the default route,
/// preferring IPv4.
///
/// Connecting a UDP socket sends nothing; it only selects a route.
pub fn default_route_address() -> Option<IpAddr> {
    let candidates: [(IpAddr, IpAddr); 2] = [
        (Ipv4Addr::UNSPECIFIED.into(), Ipv4Addr::new(192, 0, 2, 1).into()),
        (
            Ipv6Addr::UNSPECIFIED.into(),
            Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1).into(),
        ),
    ];
    candidates.into_iter().find_map(|(bind, target)| {
        let socket = UdpSocket::bind(SocketAddr::new(bind, 0)).ok()?;
        socket.connect(SocketAddr::new(target, 53)).ok()?;
        let local = socket.local_addr().ok()?.ip();
        (!local.is_unspecified() && !local.is_loopback()).then_some(local)
    })
}

pub fn maas_url_for(address: Option<IpAddr>) -> String {
    match address {
        Some(IpAddr::V4(ip)) => format!("http://{ip}:{DEFAULT_PORT}/MAAS"),
        Some(IpAddr::V6(ip)) => format!("http://[{ip}]:{DEFAULT_PORT}/MAAS"),
        None => format!("http://localhost:{DEFAULT_PORT}/MAAS"),
    }
}

/// The URL offered when prompting for `maas_url`.
pub fn default_maas_url() -> String {
    maas_url_for(default_route_address())
}
