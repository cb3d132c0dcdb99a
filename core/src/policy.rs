//! Connect classes
//!
//! The first class whose host pattern (and port, if set) matches a new
//! connection applies to it. A `deny` class refuses the connection.

use crate::admission::RejectReason;
use crate::clones::CloneRegistry;
use crate::config::{ClassKind, ConnectClass};
use crate::utils::pattern;
use std::fmt;
use std::net::IpAddr;

/// Which clone cap a class check failed on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassScope {
    Local,
    Global,
}

impl fmt::Display for ClassScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassScope::Local => write!(f, "local"),
            ClassScope::Global => write!(f, "global"),
        }
    }
}

/// First class matching the address and local port
pub fn select_class<'a>(
    classes: &'a [ConnectClass],
    ip: IpAddr,
    port: u16,
) -> Option<&'a ConnectClass> {
    classes.iter().find(|class| {
        class.port.map_or(true, |wanted| wanted == port)
            && pattern::matches_address(ip, &class.host)
    })
}

/// Check a session against its class. Deny classes always refuse; allow
/// classes cap the clones per address (0 means no cap).
pub fn check_class(
    class: &ConnectClass,
    ip: IpAddr,
    clones: &CloneRegistry,
) -> Result<(), RejectReason> {
    if class.kind == ClassKind::Deny {
        return Err(RejectReason::AccessDenied);
    }
    if class.max_local > 0 && clones.local_count(ip) > class.max_local {
        return Err(RejectReason::ClassLimit(ClassScope::Local));
    }
    if class.max_global > 0 && clones.global_count(ip) > class.max_global {
        return Err(RejectReason::ClassLimit(ClassScope::Global));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clones::CloneScope;

    #[test]
    fn test_first_match_wins() {
        let mut ports_only = ConnectClass::allow("ssl", "*");
        ports_only.port = Some(6697);
        let classes = vec![
            ConnectClass::deny("scanners", "203.0.113.0/24"),
            ports_only,
            ConnectClass::allow("default", "*"),
        ];

        let banned: IpAddr = "203.0.113.5".parse().unwrap();
        let normal: IpAddr = "198.51.100.1".parse().unwrap();
        assert_eq!(select_class(&classes, banned, 6667).unwrap().name, "scanners");
        assert_eq!(select_class(&classes, normal, 6697).unwrap().name, "ssl");
        assert_eq!(select_class(&classes, normal, 6667).unwrap().name, "default");
        assert!(select_class(&classes[..1], normal, 6667).is_none());
    }

    #[test]
    fn test_clone_caps() {
        let clones = CloneRegistry::new();
        let ip: IpAddr = "198.51.100.1".parse().unwrap();
        let mut class = ConnectClass::allow("default", "*");
        class.max_local = 1;
        class.max_global = 2;

        clones.add(ip, CloneScope::Local);
        assert!(check_class(&class, ip, &clones).is_ok());

        clones.add(ip, CloneScope::Local);
        assert_eq!(
            check_class(&class, ip, &clones),
            Err(RejectReason::ClassLimit(ClassScope::Local))
        );

        class.max_local = 0;
        clones.add(ip, CloneScope::Remote);
        assert_eq!(
            check_class(&class, ip, &clones),
            Err(RejectReason::ClassLimit(ClassScope::Global))
        );

        let deny = ConnectClass::deny("nope", "*");
        assert_eq!(check_class(&deny, ip, &clones), Err(RejectReason::AccessDenied));
    }
}
