use std::sync::Arc;

use tracing::debug;

use crate::network::router::SystemInfo;
use crate::parsers::{
    VendorProfile, cisco_asa::CiscoAsa, cisco_ios::CiscoIos, cradlepoint::Cradlepoint, generic::Generic,
    junos::Junos, mikrotik::Mikrotik,
};

/// Ordered set of vendor profiles. Resolution asks each profile in descending priority and
/// falls back to the generic profile when none claims the device.
#[derive(Clone)]
pub struct VendorRegistry {
    profiles: Vec<Arc<dyn VendorProfile>>,
    fallback: Arc<dyn VendorProfile>,
}

impl Default for VendorRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(CiscoAsa));
        registry.register(Arc::new(CiscoIos));
        registry.register(Arc::new(Junos));
        registry.register(Arc::new(Cradlepoint));
        registry.register(Arc::new(Mikrotik));
        registry
    }
}

impl VendorRegistry {
    /// A registry holding only the generic fallback.
    pub fn empty() -> Self {
        Self {
            profiles: Vec::new(),
            fallback: Arc::new(Generic),
        }
    }

    /// Add a profile, keeping the list sorted by descending priority. Profiles of equal priority
    /// keep registration order.
    pub fn register(&mut self, profile: Arc<dyn VendorProfile>) {
        let at = self
            .profiles
            .iter()
            .position(|p| p.priority() < profile.priority())
            .unwrap_or(self.profiles.len());
        self.profiles.insert(at, profile);
    }

    pub fn resolve(&self, system: &SystemInfo) -> Arc<dyn VendorProfile> {
        let profile = self
            .profiles
            .iter()
            .find(|p| p.identify(system))
            .cloned()
            .unwrap_or_else(|| self.fallback.clone());
        debug!("resolved vendor profile '{}'", profile.name());
        profile
    }

    pub fn generic(&self) -> Arc<dyn VendorProfile> {
        self.fallback.clone()
    }

    pub fn profile_names(&self) -> Vec<&'static str> {
        self.profiles
            .iter()
            .map(|p| p.name())
            .chain(std::iter::once(self.fallback.name()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system(descr: &str, oid: Option<&str>) -> SystemInfo {
        SystemInfo {
            hostname: None,
            description: Some(descr.to_string()),
            object_id: oid.map(str::to_string),
        }
    }

    #[test]
    fn resolves_by_priority() {
        let registry = VendorRegistry::default();
        assert_eq!(
            registry.profile_names(),
            vec!["cisco_asa", "cisco_ios", "junos", "cradlepoint", "mikrotik", "generic"]
        );

        // both Cisco profiles claim a Cisco firewall; the ASA one wins on priority
        let asa = system("Cisco Adaptive Security Appliance Version 9.8(4)", Some("1.3.6.1.4.1.9.1.2313"));
        assert_eq!(registry.resolve(&asa).name(), "cisco_asa");

        let ios = system("Cisco IOS Software, IOS-XE Software, Catalyst L3 Switch Software", None);
        assert_eq!(registry.resolve(&ios).name(), "cisco_ios");

        let junos = system("something", Some("1.3.6.1.4.1.2636.1.1.1.2.39"));
        assert_eq!(registry.resolve(&junos).name(), "junos");

        let mikrotik = system("RouterOS RB4011iGS+", None);
        assert_eq!(registry.resolve(&mikrotik).name(), "mikrotik");

        let cradlepoint = system("Cradlepoint IBR900", None);
        assert_eq!(registry.resolve(&cradlepoint).name(), "cradlepoint");
    }

    #[test]
    fn falls_back_to_generic() {
        let registry = VendorRegistry::default();
        assert_eq!(registry.resolve(&system("Linux gw 5.15.0", None)).name(), "generic");
        assert_eq!(registry.resolve(&SystemInfo::default()).name(), "generic");
    }

    #[test]
    fn register_sorts_by_priority() {
        let mut registry = VendorRegistry::empty();
        registry.register(Arc::new(Mikrotik));
        registry.register(Arc::new(CiscoAsa));
        registry.register(Arc::new(Cradlepoint));
        assert_eq!(registry.profile_names(), vec!["cisco_asa", "cradlepoint", "mikrotik", "generic"]);
    }
}
