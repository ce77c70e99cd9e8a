// Resolved address helpers
//
// lwIP hands back IPv4 addresses as a u32 holding the four octets in network
// order *in memory*. Reading that word numerically gives a different value on
// little- and big-endian cores, so octets are taken from the native byte
// layout instead of by shifting.

use core::fmt::Write;
use std::net::Ipv4Addr;

/// "255.255.255.255"
pub const MAX_DOTTED_LEN: usize = 15;

pub type DottedAddress = heapless::String<MAX_DOTTED_LEN>;

/// Convert the stack's raw in-memory address word into an address.
pub fn from_stack_u32(raw: u32) -> Ipv4Addr {
    Ipv4Addr::from(raw.to_ne_bytes())
}

/// Render an address as dotted text for the transport parameters.
pub fn dotted(addr: Ipv4Addr) -> DottedAddress {
    let mut text = DottedAddress::new();
    let [a, b, c, d] = addr.octets();
    // Always fits: four octets of at most three digits plus three dots
    let _ = write!(text, "{a}.{b}.{c}.{d}");
    text
}
