/*!
Device Probe Adapter.

Collects system info, forwarding flag, interface subnets and routes for one address. SNMP is asked
first; when it yields no routes the CLI is tried with each credential in turn, using the vendor
profile picked from what the device said about itself. Every failure below the probe is soft: it is
logged and the probe carries on with what it has. The probe only fails when SNMP system info could
not be read and no CLI command could be run either.
*/

use std::{net::IpAddr, sync::Arc};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    data_aquisition::{
        core::{CliCredential, CliTransport, SnmpProbe},
        snmp::SnmpClientError,
    },
    network::{
        route::{InterfaceAddress, RouteEntry, dedup_routes},
        router::{Forwarding, SystemInfo},
    },
    parsers::{VendorProfile, VendorRegistry, common},
    topology::run::SnmpSettings,
};

/// Longest description kept from a CLI version command.
const MAX_CLI_DESCRIPTION: usize = 1024;

/// Neither SNMP nor CLI produced anything for the device.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("snmp: {snmp}; cli: {cli}")]
pub struct ProbeError {
    pub snmp: String,
    pub cli: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeResult {
    pub system: SystemInfo,
    pub forwarding: Forwarding,
    pub interfaces: Vec<InterfaceAddress>,
    pub routes: Vec<RouteEntry>,
    /// Name of the matched vendor profile, `None` when only the generic profile applied.
    pub vendor: Option<String>,
    pub model: Option<String>,
    /// The routes came from the CLI.
    pub via_cli: bool,
}

/// What walking the credential list produced.
#[derive(Default)]
struct CliAttempt {
    /// At least one command ran to completion.
    reached: bool,
    success: Option<(CliCredential, Vec<RouteEntry>)>,
    last_error: Option<String>,
}

#[derive(Clone)]
pub struct ProbeAdapter {
    snmp: Arc<dyn SnmpProbe>,
    cli: Arc<dyn CliTransport>,
    registry: VendorRegistry,
}

impl ProbeAdapter {
    pub fn new(snmp: Arc<dyn SnmpProbe>, cli: Arc<dyn CliTransport>, registry: VendorRegistry) -> Self {
        Self { snmp, cli, registry }
    }

    pub async fn probe(
        &self,
        address: IpAddr,
        settings: &SnmpSettings,
        credentials: &[CliCredential],
    ) -> Result<ProbeResult, ProbeError> {
        let target = settings.target(address);
        let mut result = ProbeResult::default();

        let snmp_error = match self.snmp.system_info(&target).await {
            Ok(system) if !system.is_empty() => {
                result.system = system;
                None
            }
            Ok(_) => Some("no system information".to_string()),
            Err(e) => Some(e.to_string()),
        };
        if let Some(e) = &snmp_error {
            warn!("{address}: SNMP system info failed: {e}");
        }
        let forwarding = self.snmp.ip_forwarding(&target).await;
        // nothing answers at all: the walks would only wait out the same timeout
        let agent_silent = snmp_error.is_some()
            && matches!(forwarding, Err(SnmpClientError::Timeout(_)) | Err(SnmpClientError::IoError(_)));
        result.forwarding = match forwarding {
            Ok(true) => Forwarding::Enabled,
            Ok(false) => Forwarding::Disabled,
            Err(e) => {
                debug!("{address}: ipForwarding unavailable: {e}");
                Forwarding::Unknown
            }
        };
        if !agent_silent {
            result.interfaces = self.snmp.interface_addresses(&target).await.unwrap_or_else(|e| {
                warn!("{address}: SNMP interface walk failed: {e}");
                Vec::new()
            });
            result.routes = self.snmp.routing_table(&target).await.unwrap_or_else(|e| {
                warn!("{address}: SNMP route walk failed: {e}");
                Vec::new()
            });
        }

        let mut profile = self.registry.resolve(&result.system);
        let mut cli_error = if credentials.is_empty() {
            "no credentials".to_string()
        } else {
            "not needed".to_string()
        };
        let mut cli_reached = false;

        if result.routes.is_empty() && !credentials.is_empty() {
            let attempt = self.cli_routes(address, profile.as_ref(), credentials).await;
            cli_reached = attempt.reached;
            cli_error = attempt.last_error.unwrap_or_else(|| "no routes".to_string());
            if let Some((credential, routes)) = attempt.success {
                info!("{address}: {} routes over CLI as {}", routes.len(), credential.username);
                result.routes = routes;
                result.via_cli = true;
                profile = self.enrich(address, profile, &credential, &mut result).await;
            }
        }

        if snmp_error.is_some() && !cli_reached {
            return Err(ProbeError {
                snmp: snmp_error.unwrap_or_default(),
                cli: cli_error,
            });
        }

        result.routes = dedup_routes(result.routes);
        self.label(profile.as_ref(), &mut result);
        Ok(result)
    }

    /// CLI-only probe of a device already known from a previous probe. `known` is what the run
    /// recorded about it and selects the vendor profile.
    pub async fn probe_cli(
        &self,
        address: IpAddr,
        known: SystemInfo,
        credentials: &[CliCredential],
    ) -> Result<ProbeResult, ProbeError> {
        let mut result = ProbeResult {
            system: known,
            ..Default::default()
        };
        let profile = self.registry.resolve(&result.system);
        let attempt = self.cli_routes(address, profile.as_ref(), credentials).await;
        let Some((credential, routes)) = attempt.success else {
            return Err(ProbeError {
                snmp: "not attempted".to_string(),
                cli: attempt
                    .last_error
                    .unwrap_or_else(|| (if credentials.is_empty() { "no credentials" } else { "no routes" }).to_string()),
            });
        };
        result.routes = dedup_routes(routes);
        result.via_cli = true;
        let profile = self.enrich(address, profile, &credential, &mut result).await;
        self.label(profile.as_ref(), &mut result);
        Ok(result)
    }

    /// Try every credential against the profile's route commands, one fresh session per command,
    /// stopping at the first pair whose output parses to a non-empty route list.
    async fn cli_routes(&self, address: IpAddr, profile: &dyn VendorProfile, credentials: &[CliCredential]) -> CliAttempt {
        let mut attempt = CliAttempt::default();
        'credentials: for credential in credentials {
            for command in profile.cli_commands() {
                let output = match self.cli.run_command(address, credential, command).await {
                    Ok(output) => output,
                    Err(e) if e.is_unreachable() => {
                        warn!("{address}: CLI unreachable: {e}");
                        attempt.last_error = Some(e.to_string());
                        break 'credentials;
                    }
                    Err(e) if e.is_auth() => {
                        warn!("{address}: credential {} rejected: {e}", credential.username);
                        attempt.last_error = Some(e.to_string());
                        continue 'credentials;
                    }
                    Err(e) => {
                        warn!("{address}: '{command}' failed: {e}");
                        attempt.last_error = Some(e.to_string());
                        continue;
                    }
                };
                // only output that parses counts as having reached the device
                match profile.parse_routes(&output.stdout, command) {
                    Ok(routes) if !routes.is_empty() => {
                        attempt.reached = true;
                        debug!("{address}: '{command}' gave {} routes ({})", routes.len(), profile.name());
                        attempt.success = Some((credential.clone(), routes));
                        return attempt;
                    }
                    Ok(_) => {
                        attempt.reached = true;
                        debug!("{address}: '{command}' gave no routes");
                        attempt.last_error = Some(format!("'{command}' returned no routes"));
                    }
                    Err(e) => {
                        warn!("{address}: could not parse '{command}' output: {e}");
                        attempt.last_error = Some(e.to_string());
                    }
                }
            }
        }
        attempt
    }

    /// Fill in what SNMP didn't provide, using the credential that worked: a description from the
    /// version command (which may select a more specific profile) and interface subnets.
    async fn enrich(
        &self,
        address: IpAddr,
        mut profile: Arc<dyn VendorProfile>,
        credential: &CliCredential,
        result: &mut ProbeResult,
    ) -> Arc<dyn VendorProfile> {
        if result.system.description.is_none() {
            if let Some(command) = profile.version_command() {
                match self.cli.run_command(address, credential, command).await {
                    Ok(output) if common::precheck(&output.stdout).is_ok() => {
                        let description: String = output.stdout.trim().chars().take(MAX_CLI_DESCRIPTION).collect();
                        result.system.description = Some(description);
                        profile = self.registry.resolve(&result.system);
                    }
                    Ok(_) => debug!("{address}: '{command}' gave nothing usable"),
                    Err(e) => debug!("{address}: '{command}' failed: {e}"),
                }
            }
        }

        if result.interfaces.is_empty() {
            for command in profile.interface_commands() {
                let output = match self.cli.run_command(address, credential, command).await {
                    Ok(output) => output,
                    Err(e) => {
                        debug!("{address}: '{command}' failed: {e}");
                        continue;
                    }
                };
                match profile.parse_interfaces(&output.stdout) {
                    Ok(interfaces) if !interfaces.is_empty() => {
                        result.interfaces = interfaces;
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => debug!("{address}: could not parse '{command}' output: {e}"),
                }
            }
        }
        profile
    }

    fn label(&self, profile: &dyn VendorProfile, result: &mut ProbeResult) {
        if profile.name() == self.registry.generic().name() {
            return;
        }
        result.vendor = Some(profile.name().to_string());
        result.model = result.system.description.as_deref().and_then(|d| profile.extract_model(d));
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::HashMap,
        sync::Mutex,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::data_aquisition::{
        core::{CliOutput, SnmpTarget},
        ssh::SshError,
    };

    /// What a fake device answers over SNMP.
    #[derive(Clone, Default)]
    pub struct FakeSnmpDevice {
        pub system: SystemInfo,
        pub forwarding: Option<bool>,
        pub interfaces: Vec<InterfaceAddress>,
        pub routes: Vec<RouteEntry>,
    }

    /// SNMP agents keyed by address; unknown addresses time out.
    #[derive(Default)]
    pub struct FakeSnmp {
        pub devices: HashMap<IpAddr, FakeSnmpDevice>,
        pub calls: Mutex<Vec<IpAddr>>,
    }

    impl FakeSnmp {
        fn device(&self, target: &SnmpTarget) -> Result<FakeSnmpDevice, SnmpClientError> {
            self.devices
                .get(&target.address)
                .cloned()
                .ok_or(SnmpClientError::Timeout(std::time::Duration::from_millis(1)))
        }
    }

    #[async_trait]
    impl SnmpProbe for FakeSnmp {
        async fn system_info(&self, target: &SnmpTarget) -> Result<SystemInfo, SnmpClientError> {
            self.calls.lock().unwrap().push(target.address);
            Ok(self.device(target)?.system)
        }

        async fn ip_forwarding(&self, target: &SnmpTarget) -> Result<bool, SnmpClientError> {
            self.device(target)?
                .forwarding
                .ok_or_else(|| SnmpClientError::NoValue("ipForwarding".into()))
        }

        async fn interface_addresses(&self, target: &SnmpTarget) -> Result<Vec<InterfaceAddress>, SnmpClientError> {
            Ok(self.device(target)?.interfaces)
        }

        async fn routing_table(&self, target: &SnmpTarget) -> Result<Vec<RouteEntry>, SnmpClientError> {
            Ok(self.device(target)?.routes)
        }
    }

    /// CLI answers keyed by (address, command). `password` gates every command of an address.
    #[derive(Default)]
    pub struct FakeCli {
        pub outputs: HashMap<(IpAddr, String), String>,
        pub passwords: HashMap<IpAddr, String>,
        pub commands: Mutex<Vec<(IpAddr, String, String)>>,
    }

    #[async_trait]
    impl CliTransport for FakeCli {
        async fn run_command(&self, host: IpAddr, credential: &CliCredential, command: &str) -> Result<CliOutput, SshError> {
            self.commands
                .lock()
                .unwrap()
                .push((host, credential.username.clone(), command.to_string()));
            let Some(password) = self.passwords.get(&host) else {
                return Err(SshError::TcpError("connection refused".into()));
            };
            if *password != credential.password {
                return Err(SshError::SshAuthError("authentication failed".into()));
            }
            Ok(CliOutput {
                stdout: self
                    .outputs
                    .get(&(host, command.to_string()))
                    .cloned()
                    .unwrap_or_else(|| "% Invalid input detected at '^' marker.".to_string()),
                ..Default::default()
            })
        }
    }

    pub fn ip(text: &str) -> IpAddr {
        text.parse().unwrap()
    }

    pub fn iface(addr: &str, prefix: u8) -> InterfaceAddress {
        InterfaceAddress::from_prefix(ip(addr), prefix).unwrap()
    }

    fn adapter(snmp: FakeSnmp, cli: FakeCli) -> (ProbeAdapter, Arc<FakeCli>) {
        let cli = Arc::new(cli);
        (ProbeAdapter::new(Arc::new(snmp), cli.clone(), VendorRegistry::default()), cli)
    }

    const IOS_ROUTES: &str = "Codes: L - local, C - connected, S - static\n\n\
C        10.0.0.0/24 is directly connected, GigabitEthernet0/0\n\
S        10.9.0.0/16 [1/0] via 10.0.0.9\n";

    #[tokio::test]
    async fn snmp_only_probe() {
        let mut snmp = FakeSnmp::default();
        snmp.devices.insert(
            ip("10.0.0.1"),
            FakeSnmpDevice {
                system: SystemInfo {
                    hostname: Some("r1".into()),
                    description: Some("Cisco IOS Software, C2900 Software (C2900-UNIVERSALK9-M)".into()),
                    object_id: None,
                },
                forwarding: Some(true),
                interfaces: vec![iface("10.0.0.1", 24)],
                routes: vec![RouteEntry::new(
                    "10.9.0.0/16".parse().unwrap(),
                    Some(ip("10.0.0.9")),
                    crate::network::route::RouteProtocol::Static,
                )],
            },
        );
        let (adapter, cli) = adapter(snmp, FakeCli::default());
        let result = adapter
            .probe(ip("10.0.0.1"), &SnmpSettings::default(), &[CliCredential::new("a", "b")])
            .await
            .unwrap();
        assert_eq!(result.forwarding, Forwarding::Enabled);
        assert_eq!(result.routes.len(), 1);
        assert!(!result.via_cli);
        assert_eq!(result.vendor.as_deref(), Some("cisco_ios"));
        assert_eq!(result.model.as_deref(), Some("C2900"));
        // routes came over SNMP, the CLI was never touched
        assert!(cli.commands.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn falls_back_to_cli_and_rotates_credentials() {
        let mut snmp = FakeSnmp::default();
        snmp.devices.insert(
            ip("10.0.0.1"),
            FakeSnmpDevice {
                system: SystemInfo {
                    description: Some("Cisco IOS Software".into()),
                    ..Default::default()
                },
                forwarding: None,
                ..Default::default()
            },
        );
        let mut cli = FakeCli::default();
        cli.passwords.insert(ip("10.0.0.1"), "right".into());
        cli.outputs.insert((ip("10.0.0.1"), "show ip route".into()), IOS_ROUTES.into());
        cli.outputs.insert(
            (ip("10.0.0.1"), "show ip interface".into()),
            "Gi0/0 is up\n  Internet address is 10.0.0.1/24\n".into(),
        );
        let (adapter, cli) = adapter(snmp, cli);
        let credentials = [CliCredential::new("first", "wrong"), CliCredential::new("second", "right")];
        let result = adapter
            .probe(ip("10.0.0.1"), &SnmpSettings::default(), &credentials)
            .await
            .unwrap();
        assert!(result.via_cli);
        assert_eq!(result.routes.len(), 2);
        assert_eq!(result.interfaces, vec![iface("10.0.0.1", 24)]);
        assert_eq!(result.forwarding, Forwarding::Unknown);

        let commands = cli.commands.lock().unwrap();
        // the rejected credential is abandoned after its first command
        assert_eq!(commands[0], (ip("10.0.0.1"), "first".to_string(), "show ip route".to_string()));
        assert_eq!(commands[1].1, "second");
        assert!(commands.iter().all(|(_, user, cmd)| user == "second" || cmd == "show ip route"));
    }

    #[tokio::test]
    async fn rejected_command_moves_to_next_one() {
        let mut cli = FakeCli::default();
        cli.passwords.insert(ip("10.0.0.5"), "pw".into());
        // generic profile: "show ip route" is rejected, "show route" is not
        cli.outputs.insert(
            (ip("10.0.0.5"), "show route".into()),
            "10.0.0.0/24 dev eth0 proto kernel scope link\ndefault via 10.0.0.254 dev eth0\n".into(),
        );
        cli.outputs.insert((ip("10.0.0.5"), "show version".into()), "Linux gw 5.15".into());
        let (adapter, _) = adapter(FakeSnmp::default(), cli);
        let result = adapter
            .probe(ip("10.0.0.5"), &SnmpSettings::default(), &[CliCredential::new("u", "pw")])
            .await
            .unwrap();
        assert_eq!(result.routes.len(), 2);
        assert_eq!(result.system.description.as_deref(), Some("Linux gw 5.15"));
        assert_eq!(result.vendor, None);
    }

    #[tokio::test]
    async fn unreachable_without_credentials_is_probe_error() {
        let (adapter, _) = adapter(FakeSnmp::default(), FakeCli::default());
        let err = adapter
            .probe(ip("10.0.0.77"), &SnmpSettings::default(), &[])
            .await
            .unwrap_err();
        assert_eq!(err.cli, "no credentials");
        assert!(err.to_string().starts_with("snmp: no response"));
    }

    #[tokio::test]
    async fn cli_refused_is_probe_error() {
        let (adapter, cli) = adapter(FakeSnmp::default(), FakeCli::default());
        let credentials = [CliCredential::new("a", "1"), CliCredential::new("b", "2")];
        let err = adapter
            .probe(ip("10.0.0.78"), &SnmpSettings::default(), &credentials)
            .await
            .unwrap_err();
        assert!(err.cli.contains("TCP error"));
        // a refused connection is not retried with the next credential
        assert_eq!(cli.commands.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cli_rejecting_every_command_is_probe_error() {
        let mut cli = FakeCli::default();
        cli.passwords.insert(ip("10.0.0.6"), "pw".into());
        let (adapter, cli) = adapter(FakeSnmp::default(), cli);
        let err = adapter
            .probe(ip("10.0.0.6"), &SnmpSettings::default(), &[CliCredential::new("u", "pw")])
            .await
            .unwrap_err();
        assert!(err.cli.contains("Invalid input"), "{err}");
        // every route command of the generic profile was tried before giving up
        let commands = cli.commands.lock().unwrap();
        assert_eq!(commands.len(), 5);
        assert_eq!(commands[4].2, "netstat -rn");
    }

    #[tokio::test]
    async fn cli_only_probe_enriches_vendor() {
        let mut cli = FakeCli::default();
        cli.passwords.insert(ip("10.0.0.9"), "pw".into());
        cli.outputs.insert((ip("10.0.0.9"), "show ip route".into()), IOS_ROUTES.into());
        cli.outputs.insert(
            (ip("10.0.0.9"), "show version".into()),
            "Cisco IOS Software, C2900 Software (C2900-UNIVERSALK9-M), Version 15.2(4)M3\ncisco CISCO2911/K9 (revision 1.0) with 487424K/36864K bytes of memory.\n".into(),
        );
        let (adapter, _) = adapter(FakeSnmp::default(), cli);
        let result = adapter
            .probe_cli(ip("10.0.0.9"), SystemInfo::default(), &[CliCredential::new("u", "pw")])
            .await
            .unwrap();
        assert_eq!(result.routes.len(), 2);
        assert_eq!(result.vendor.as_deref(), Some("cisco_ios"));
        assert_eq!(result.model.as_deref(), Some("C2900"));
    }
}
