/*
 *  Copyright (C) 2025 Michael Bachmann
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU Affero General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU Affero General Public License for more details.
 *
 *  You should have received a copy of the GNU Affero General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Multicast UDP socket setup, adapted from the teacher's
//! `create_rx_socket` (grounded on `aes67-rs::socket`), minus the SDP
//! negotiation this crate's channels don't use: group membership comes
//! straight from `ChannelConfig`.

use crate::error::ReceiverError;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::UdpSocket;
use tracing::instrument;

#[instrument]
pub fn create_multicast_socket(
    bind_address: IpAddr,
    multicast_group: SocketAddr,
) -> Result<UdpSocket, ReceiverError> {
    let domain = match multicast_group.ip() {
        IpAddr::V4(_) => Domain::IPV4,
        IpAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;

    let bind_addr = SocketAddr::new(
        match multicast_group.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        },
        multicast_group.port(),
    );
    socket.bind(&bind_addr.into())?;

    match (multicast_group.ip(), bind_address) {
        (IpAddr::V4(group), IpAddr::V4(iface)) => {
            socket.join_multicast_v4(&group, &iface)?;
        }
        (IpAddr::V6(group), _) => {
            socket.join_multicast_v6(&group, 0)?;
        }
        (group, iface) => {
            return Err(ReceiverError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("multicast group {group} and bind address {iface} address families differ"),
            )));
        }
    }

    Ok(UdpSocket::from_std(socket.into())?)
}
