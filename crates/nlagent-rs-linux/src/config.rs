// crates/nlagent-rs-linux/src/config.rs
//! YAML configuration loading. A module mentioned in the file is
//! enabled; unmentioned modules stay disabled. Unknown names and
//! unusable values are logged and ignored; an empty result is fatal.

use log::{error, info, warn};
use nlagent_rs::{AgentConfig, AgentError, ModuleId, PolicyKind};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = "nlagent.yaml";

/// Written when no configuration exists at the configured path.
const DEFAULT_CONFIG: &str = "\
nlagent-modules :
    - module         : NLA_KNLM

    - module         : NLA_PRPD_CLIENT
      server-address : 127.0.0.1
      server-port    : 40051
      notify-me :
          - notify-events-from : NLA_FPM_CLIENT

    - module         : NLA_FPM_CLIENT
      server-address : 127.0.0.1
      server-port    : 2620
      policy :
          - filter-protocol : 22
          - set-protocol    : 0
          - strip-rtattr    : 7
          - strip-rtattr    : 12
          - strip-rtattr    : 15
          - strip-rtattr    : 20
      notify-me :
          - notify-events-from : NLA_KNLM
";

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(rename = "nlagent-modules")]
    modules: Vec<RawModule>,
}

#[derive(Debug, Deserialize)]
struct RawModule {
    module: String,
    #[serde(rename = "server-address")]
    server_address: Option<String>,
    #[serde(rename = "server-port")]
    server_port: Option<u16>,
    #[serde(default)]
    policy: Vec<BTreeMap<String, serde_yaml::Value>>,
    #[serde(rename = "notify-me", default)]
    notify_me: Vec<BTreeMap<String, serde_yaml::Value>>,
}

/// Reads the configuration, writing the default file first if none
/// exists at `path`.
pub fn load(path: &Path) -> Result<AgentConfig, AgentError> {
    write_default_if_missing(path)?;
    let text = fs::read_to_string(path)?;
    let config = parse(&text)?;
    dump(&config);
    Ok(config)
}

fn write_default_if_missing(path: &Path) -> Result<(), AgentError> {
    if path.exists() {
        return Ok(());
    }
    info!("creating default config at {}", path.display());
    fs::write(path, DEFAULT_CONFIG)?;
    Ok(())
}

/// Resolves the raw YAML into the module table.
pub fn parse(text: &str) -> Result<AgentConfig, AgentError> {
    let raw: RawConfig =
        serde_yaml::from_str(text).map_err(|e| AgentError::Config(e.to_string()))?;

    let mut config = AgentConfig::default();
    for entry in raw.modules {
        let module = match ModuleId::try_from(entry.module.as_str()) {
            Ok(module) => module,
            Err(error) => {
                error!("{}; ignoring module entry", error);
                continue;
            }
        };

        let module_config = config.module_mut(module);
        module_config.enabled = true;
        module_config.addr = entry.server_address;
        module_config.port = entry.server_port;

        for map in &entry.policy {
            for (key, value) in map {
                apply_policy(&mut config, module, key, value);
            }
        }

        for map in &entry.notify_me {
            for (key, value) in map {
                apply_notify(&mut config, module, key, value);
            }
        }
    }

    if config.enabled_count() == 0 {
        return Err(AgentError::NoModulesEnabled);
    }
    Ok(config)
}

fn apply_policy(config: &mut AgentConfig, module: ModuleId, key: &str, value: &serde_yaml::Value) {
    let kind = match PolicyKind::try_from(key) {
        Ok(kind) => kind,
        Err(error) => {
            warn!("{} : {}; ignoring directive", module, error);
            return;
        }
    };
    let Some(number) = value.as_i64().and_then(|v| i32::try_from(v).ok()) else {
        warn!("{} : {} value {:?} is not a number; ignoring directive", module, key, value);
        return;
    };
    if !config.module_mut(module).policy.add(kind, number) {
        warn!("{} : too many {} values, ignoring {}", module, key, number);
    }
}

fn apply_notify(config: &mut AgentConfig, module: ModuleId, key: &str, value: &serde_yaml::Value) {
    if key != "notify-events-from" {
        warn!("{} : unknown notify-me key {}; ignoring directive", module, key);
        return;
    }
    let source = match value.as_str().map(ModuleId::try_from) {
        Some(Ok(source)) => source,
        _ => {
            warn!("{} : bad notify-events-from value {:?}; ignoring directive", module, value);
            return;
        }
    };
    config.module_mut(module).subscribe(source);
}

/// Echoes the resolved configuration, one module per block.
fn dump(config: &AgentConfig) {
    info!("---- MODULE CONFIGURATION");
    for module in ModuleId::ALL {
        let module_config = config.module(module);
        if !module_config.enabled {
            continue;
        }

        info!("---> module         : {}", module);
        if let Some(addr) = &module_config.addr {
            info!("     server-address : {}", addr);
        }
        if let Some(port) = module_config.port {
            info!("     server-port    : {}", port);
        }
        for kind in PolicyKind::ALL {
            for value in module_config.policy.get(kind).values() {
                info!("     {:<18} : {}", kind.config_key(), value);
            }
        }
        for source in ModuleId::ALL {
            if module_config.subscribes_to(source) {
                info!("     notify-events-from : {}", source);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nlagent_rs::config::POLICY_ENTRIES_MAX;

    #[test]
    fn test_default_config_parses() {
        let config = parse(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.enabled_count(), 3);

        let knlm = config.module(ModuleId::Knlm);
        assert!(knlm.enabled);
        assert!(knlm.addr.is_none());

        let prpd = config.module(ModuleId::PrpdClient);
        assert_eq!(prpd.addr.as_deref(), Some("127.0.0.1"));
        assert_eq!(prpd.port, Some(40051));
        assert!(prpd.subscribes_to(ModuleId::FpmClient));

        let fpm = config.module(ModuleId::FpmClient);
        assert_eq!(fpm.port, Some(2620));
        assert!(fpm.subscribes_to(ModuleId::Knlm));
        assert_eq!(fpm.policy.get(PolicyKind::FilterProtocol).values(), &[22]);
        assert_eq!(fpm.policy.get(PolicyKind::SetProtocol).values(), &[0]);
        assert_eq!(fpm.policy.get(PolicyKind::StripRtattr).values(), &[7, 12, 15, 20]);
        assert!(fpm.policy.get(PolicyKind::FilterFamily).is_empty());
    }

    #[test]
    fn test_unknown_module_entries_are_skipped() {
        let text = "\
nlagent-modules:
    - module: NLA_TYPO
    - module: NLA_NLM_SERVER
      server-address: 0.0.0.0
      server-port: 2621
";
        let config = parse(text).unwrap();
        assert_eq!(config.enabled_count(), 1);
        assert!(config.module(ModuleId::NlmServer).enabled);
    }

    #[test]
    fn test_unknown_policy_and_notify_keys_are_skipped() {
        let text = "\
nlagent-modules:
    - module: NLA_FPM_CLIENT
      server-address: 127.0.0.1
      server-port: 2620
      policy:
          - filter-color: 7
          - filter-table: not-a-number
          - filter-table: 254
      notify-me:
          - notify-events-from: NLA_NOPE
          - notify-events-from: NLA_KNLM
";
        let config = parse(text).unwrap();
        let fpm = config.module(ModuleId::FpmClient);
        assert_eq!(fpm.policy.get(PolicyKind::FilterTable).values(), &[254]);
        assert!(fpm.subscribes_to(ModuleId::Knlm));
        assert!(!fpm.subscribes_to(ModuleId::NlmClient));
    }

    #[test]
    fn test_policy_lists_are_capped() {
        let mut text = String::from(
            "nlagent-modules:\n    - module: NLA_FPM_CLIENT\n      policy:\n",
        );
        for i in 0..40 {
            text.push_str(&format!("          - strip-rtattr: {}\n", i));
        }
        let config = parse(&text).unwrap();
        let list = config.module(ModuleId::FpmClient).policy.get(PolicyKind::StripRtattr);
        assert_eq!(list.values().len(), POLICY_ENTRIES_MAX);
    }

    #[test]
    fn test_no_enabled_modules_is_fatal() {
        let text = "nlagent-modules:\n    - module: NLA_TYPO\n";
        assert_eq!(parse(text).unwrap_err(), AgentError::NoModulesEnabled);
    }

    #[test]
    fn test_default_file_is_written_once() {
        let dir = std::env::temp_dir().join(format!("nlagent-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("nlagent.yaml");
        let _ = fs::remove_file(&path);

        let config = load(&path).unwrap();
        assert_eq!(config.enabled_count(), 3);
        assert_eq!(fs::read_to_string(&path).unwrap(), DEFAULT_CONFIG);

        // A second load must not rewrite the file.
        fs::write(&path, "nlagent-modules:\n    - module: NLA_KNLM\n").unwrap();
        let config = load(&path).unwrap();
        assert_eq!(config.enabled_count(), 1);

        let _ = fs::remove_file(&path);
        let _ = fs::remove_dir(&dir);
    }
}
