//! Print what a child needs to join this parent.

use cue_core::DialTarget;
use cue_types::Role;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// Address children should dial to reach a parent on `port`.
///
/// Uses the address of the interface with the default route, falling back
/// to loopback.
pub fn pairing_target(port: u16) -> DialTarget {
    let ip = lan_address().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
    DialTarget::new(ip.to_string(), port)
}

fn lan_address() -> Option<IpAddr> {
    // Connecting a UDP socket sends nothing; it only picks a route.
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(192, 0, 2, 1), 9)).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}

/// Run the pair command.
pub fn run(port: u16) {
    let target = pairing_target(port);
    println!("Role:    {:?}", Role::Parent);
    println!("Address: {}", target);
    println!();
    println!("On each child run:");
    println!("  cuesync follow {}", target);
}
