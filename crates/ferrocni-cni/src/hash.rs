//! Deterministic short names for host-side veth ends and temporary link
//! names, so repeated invocations for the same container always compute the
//! same name without needing a lookup.

const IFNAMSIZ: usize = 16;
const FNV_OFFSET_BASIS: u32 = 2166136261;
const FNV_PRIME: u32 = 16777619;

fn fnv1a(input: &str) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in input.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Returns `long_name` unchanged if it already fits an interface name;
/// otherwise a 6-hex-digit FNV-1a hash of it.
pub fn short_hash(long_name: &str) -> String {
    if long_name.len() <= IFNAMSIZ - 1 {
        return long_name.to_string();
    }
    format!("{:06x}", fnv1a(long_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names_pass_through() {
        assert_eq!(short_hash("abc"), "abc");
    }

    #[test]
    fn long_names_are_hashed_to_six_hex_digits() {
        let hashed = short_hash("a-very-long-container-id-00112233445566778899");
        assert_eq!(hashed.len(), 6);
        assert!(hashed.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_is_deterministic() {
        let long = "a-very-long-container-id-00112233445566778899";
        assert_eq!(short_hash(long), short_hash(long));
    }
}
