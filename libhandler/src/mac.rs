use macaddr::MacAddr6;
use rand::random;

use crate::error::HandlerError;

/// Generates a random, locally-administered unicast MAC address
/// (`Handler.GenerateRandomMac` in `spec.md` §6), the same
/// `rand::random` style the teacher uses for `random_veth_name` in
/// `libcni::ip::veth`, applied to a 6-byte address instead of a name
/// suffix.
pub fn generate_random_mac() -> MacAddr6 {
    let mut bytes: [u8; 6] = random();
    // Bit 1 (locally administered) set, bit 0 (multicast) cleared.
    bytes[0] = (bytes[0] | 0x02) & 0xfe;
    MacAddr6::new(bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5])
}

/// Parses a user-supplied MAC string (`Handler.GetMacDetails` input
/// side — the counterpart of `link::get_mac_address` for MACs that
/// arrive as config strings rather than netlink attributes).
pub fn parse_mac(s: &str) -> Result<MacAddr6, HandlerError> {
    match s.parse::<macaddr::MacAddr>() {
        Ok(macaddr::MacAddr::V6(m)) => Ok(m),
        _ => Err(HandlerError::InvalidAddress(format!("invalid MAC address {s:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_mac_is_locally_administered_unicast() {
        for _ in 0..64 {
            let mac = generate_random_mac();
            let first = mac.into_array()[0];
            assert_eq!(first & 0x01, 0, "must be unicast");
            assert_eq!(first & 0x02, 0x02, "must be locally administered");
        }
    }

    #[test]
    fn parse_mac_round_trips() {
        let mac = parse_mac("02:00:00:00:00:01").unwrap();
        assert_eq!(mac, MacAddr6::new(0x02, 0x00, 0x00, 0x00, 0x00, 0x01));
    }

    #[test]
    fn parse_mac_rejects_garbage() {
        assert!(parse_mac("not-a-mac").is_err());
    }
}
