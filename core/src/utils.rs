//! Utility functions and helpers

use std::net::IpAddr;

/// Mask matching
pub mod pattern {
    use super::*;
    use ipnet::IpNet;

    /// Case-insensitive glob match supporting `*` and `?`
    pub fn matches(text: &str, pattern: &str) -> bool {
        if pattern == "*" {
            return true;
        }

        let text: Vec<char> = text.chars().flat_map(char::to_lowercase).collect();
        let pattern: Vec<char> = pattern.chars().flat_map(char::to_lowercase).collect();

        // Iterative matcher with single-star backtracking
        let (mut t, mut p) = (0, 0);
        let mut star: Option<(usize, usize)> = None;

        while t < text.len() {
            if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
                t += 1;
                p += 1;
            } else if p < pattern.len() && pattern[p] == '*' {
                star = Some((p, t));
                p += 1;
            } else if let Some((star_p, star_t)) = star {
                p = star_p + 1;
                t = star_t + 1;
                star = Some((star_p, star_t + 1));
            } else {
                return false;
            }
        }

        pattern[p..].iter().all(|&c| c == '*')
    }

    /// Match an address against a CIDR block or, failing that, a glob
    pub fn matches_address(ip: IpAddr, mask: &str) -> bool {
        if let Ok(net) = mask.parse::<IpNet>() {
            return net.contains(&ip);
        }
        matches(&ip.to_string(), mask)
    }

    /// Match `ident@host` masks against a user; the host part may match
    /// either the hostname or the address
    pub fn matches_user_mask(mask: &str, ident: &str, host: &str, ip: IpAddr) -> bool {
        let (ident_mask, host_mask) = mask.split_once('@').unwrap_or(("*", mask));
        matches(ident, ident_mask) && (matches(host, host_mask) || matches_address(ip, host_mask))
    }
}

/// Address handling
pub mod address {
    use super::*;

    /// Longest host accepted on the wire
    pub const MAX_HOST_LENGTH: usize = 64;

    /// Canonical form of a peer address: IPv4-mapped IPv6 collapses to IPv4
    pub fn canonical(ip: IpAddr) -> IpAddr {
        match ip {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
            IpAddr::V4(_) => ip,
        }
    }

    /// Address as written in a middle parameter. A leading ':' would be read
    /// as a trailing parameter on the wire, so such addresses get a '0'.
    pub fn ip_string(ip: IpAddr) -> String {
        let mut text = ip.to_string();
        if text.starts_with(':') {
            text.insert(0, '0');
        }
        text
    }

    /// Host shown for a client before DNS completes
    pub fn display_host(ip: IpAddr) -> String {
        let mut host = ip_string(ip);
        host.truncate(MAX_HOST_LENGTH);
        host
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_matching() {
        assert!(pattern::matches("203.0.113.5", "203.0.113.*"));
        assert!(pattern::matches("Host.Example.NET", "*.example.net"));
        assert!(pattern::matches("abc", "a?c"));
        assert!(pattern::matches("", "*"));
        assert!(!pattern::matches("203.0.113.5", "203.0.114.*"));
        assert!(!pattern::matches("abc", "a?"));
        assert!(pattern::matches("aaab", "*a*b"));
    }

    #[test]
    fn test_cidr_matching() {
        let ip: IpAddr = "203.0.113.77".parse().unwrap();
        assert!(pattern::matches_address(ip, "203.0.113.0/24"));
        assert!(!pattern::matches_address(ip, "198.51.100.0/24"));
        assert!(pattern::matches_address(ip, "203.0.*"));
    }

    #[test]
    fn test_user_mask() {
        let ip: IpAddr = "198.51.100.9".parse().unwrap();
        assert!(pattern::matches_user_mask("*@198.51.100.*", "", "198.51.100.9", ip));
        assert!(pattern::matches_user_mask("bob@*.example.net", "bob", "a.example.net", ip));
        assert!(!pattern::matches_user_mask("bob@*", "alice", "a.example.net", ip));
    }

    #[test]
    fn test_display_host() {
        let v6: IpAddr = "::1".parse().unwrap();
        assert_eq!(address::display_host(v6), "0::1");
        assert_eq!(address::ip_string(v6), "0::1");
        assert_eq!(address::ip_string("2001:db8::1".parse().unwrap()), "2001:db8::1");

        let mapped: IpAddr = "::ffff:203.0.113.5".parse().unwrap();
        let canonical = address::canonical(mapped);
        assert_eq!(address::display_host(canonical), "203.0.113.5");
    }
}
