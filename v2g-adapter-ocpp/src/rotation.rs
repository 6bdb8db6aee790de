//! CSMS endpoint rotation
//!
//! `AddressRotator` yields a deterministic, wrapping sequence of
//! (address, port) endpoints for outbound connection attempts. It serves
//! two setups: spreading simulated charge points across generated subnet
//! addresses, and round-robining over a small CSMS listener port range on
//! one host. Both sequences advance exactly one step per call.

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

use tracing::{debug, warn};

use crate::config::RotationConfig;

/// Deterministic endpoint generator for one charge point
pub struct AddressRotator {
    preferred: Vec<Ipv4Addr>,
    preferred_idx: usize,
    subnet: [u8; 3],
    octet: u8,
    octet_window: (u8, u8),
    port: u16,
    port_base: u16,
    port_ceiling: u16,
}

impl AddressRotator {
    /// Build a rotator; the subnet base comes from the config or, failing
    /// that, from the host's own routable address (loopback fallback).
    pub fn new(config: RotationConfig) -> Self {
        let (low, high) = config.octet_window;
        let octet_window = (low.min(high), low.max(high));

        let base = config
            .subnet
            .unwrap_or_else(|| host_address(config.fallback));
        let [a, b, c, _] = base.octets();

        Self {
            preferred: config.preferred,
            preferred_idx: 0,
            subnet: [a, b, c],
            octet: octet_window.0,
            octet_window,
            port: config.port_base.min(config.port_ceiling),
            port_base: config.port_base.min(config.port_ceiling),
            port_ceiling: config.port_ceiling.max(config.port_base),
        }
    }

    /// Next endpoint to attempt. One call, one step of each sequence.
    pub fn next_endpoint(&mut self) -> (Ipv4Addr, u16) {
        let addr = self.next_address();
        let port = self.next_port();
        debug!("next CSMS endpoint: {}:{}", addr, port);
        (addr, port)
    }

    fn next_address(&mut self) -> Ipv4Addr {
        if self.preferred_idx < self.preferred.len() {
            let addr = self.preferred[self.preferred_idx];
            self.preferred_idx += 1;
            return addr;
        }

        let [a, b, c] = self.subnet;
        let addr = Ipv4Addr::new(a, b, c, self.octet);

        if self.octet >= self.octet_window.1 {
            // Window exhausted: wrap and start over with the preferred list
            self.octet = self.octet_window.0;
            self.preferred_idx = 0;
        } else {
            self.octet += 1;
        }

        addr
    }

    fn next_port(&mut self) -> u16 {
        let port = self.port;
        if self.port >= self.port_ceiling {
            self.port = self.port_base;
        } else {
            self.port += 1;
        }
        port
    }
}

/// The host's externally-routable address, or the fallback.
///
/// A UDP connect toward a public resolver selects the interface the kernel
/// would route external traffic through; no packet is sent. Failure is a
/// configuration outcome, never an error.
pub fn host_address(fallback: Ipv4Addr) -> Ipv4Addr {
    match routable_address() {
        Some(addr) => addr,
        None => {
            warn!(
                "no routable host address found, falling back to {}",
                fallback
            );
            fallback
        }
    }
}

fn routable_address() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect(("8.8.8.8", 53)).ok()?;
    match socket.local_addr().ok()? {
        SocketAddr::V4(v4) => Some(*v4.ip()),
        SocketAddr::V6(_) => None,
    }
}

/// EVSE id for a charge point: the last octet of its host address, else
/// the trailing digits of its identity, else 1.
pub fn derive_evse_id(identity: &str, host: Option<Ipv4Addr>) -> i32 {
    if let Some(addr) = host {
        let octet = addr.octets()[3];
        if octet > 0 {
            return octet as i32;
        }
    }

    let digits: String = identity
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();

    digits.parse::<i32>().ok().filter(|id| *id > 0).unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> RotationConfig {
        RotationConfig {
            preferred: vec![Ipv4Addr::LOCALHOST, Ipv4Addr::UNSPECIFIED],
            subnet: Some(Ipv4Addr::new(192, 168, 1, 0)),
            octet_window: (20, 22),
            port_base: 2910,
            port_ceiling: 2912,
            fallback: Ipv4Addr::LOCALHOST,
        }
    }

    #[test]
    fn test_preferred_list_consumed_first() {
        let mut rotator = AddressRotator::new(test_config());

        let (a0, _) = rotator.next_endpoint();
        let (a1, _) = rotator.next_endpoint();
        let (a2, _) = rotator.next_endpoint();

        assert_eq!(a0, Ipv4Addr::LOCALHOST);
        assert_eq!(a1, Ipv4Addr::UNSPECIFIED);
        assert_eq!(a2, Ipv4Addr::new(192, 168, 1, 20));
    }

    #[test]
    fn test_window_wrap_resets_preferred() {
        let mut rotator = AddressRotator::new(test_config());

        // Preferred (2) + window 20..=22 (3) = one full cycle of 5
        let first_cycle: Vec<Ipv4Addr> =
            (0..5).map(|_| rotator.next_endpoint().0).collect();
        let second_cycle: Vec<Ipv4Addr> =
            (0..5).map(|_| rotator.next_endpoint().0).collect();

        assert_eq!(first_cycle, second_cycle);
        assert_eq!(first_cycle[4], Ipv4Addr::new(192, 168, 1, 22));
    }

    #[test]
    fn test_generated_octets_stay_in_window() {
        let mut rotator = AddressRotator::new(test_config());

        for _ in 0..100 {
            let (addr, _) = rotator.next_endpoint();
            let octet = addr.octets()[3];
            if addr.octets()[..3] == [192, 168, 1] {
                assert!((20..=22).contains(&octet), "octet {} out of window", octet);
            }
        }
    }

    #[test]
    fn test_ports_wrap_within_range() {
        let mut rotator = AddressRotator::new(test_config());

        let ports: Vec<u16> = (0..7).map(|_| rotator.next_endpoint().1).collect();
        assert_eq!(ports, vec![2910, 2911, 2912, 2910, 2911, 2912, 2910]);
        assert!(ports.iter().all(|p| (2910..=2912).contains(p)));
    }

    #[test]
    fn test_inverted_bounds_normalized() {
        let mut config = test_config();
        config.octet_window = (22, 20);
        config.port_base = 2912;
        config.port_ceiling = 2910;

        let mut rotator = AddressRotator::new(config);
        for _ in 0..10 {
            let (addr, port) = rotator.next_endpoint();
            assert!((2910..=2912).contains(&port));
            if addr.octets()[..3] == [192, 168, 1] {
                assert!((20..=22).contains(&addr.octets()[3]));
            }
        }
    }

    #[test]
    fn test_missing_subnet_falls_back() {
        // With no subnet configured the rotator must still construct; the
        // host probe may or may not succeed depending on the machine, and
        // either outcome is a valid address source.
        let mut config = test_config();
        config.subnet = None;
        let mut rotator = AddressRotator::new(config);
        let _ = rotator.next_endpoint();
    }

    #[test]
    fn test_derive_evse_id() {
        assert_eq!(
            derive_evse_id("CP001", Some(Ipv4Addr::new(10, 0, 0, 42))),
            42
        );
        assert_eq!(derive_evse_id("CP017", None), 17);
        assert_eq!(derive_evse_id("CP017", Some(Ipv4Addr::new(10, 0, 0, 0))), 17);
        assert_eq!(derive_evse_id("station", None), 1);
    }
}
