//! Kubelet node labels derived from instance type and machine image metadata.

use node_provider::{InstanceType, MachineImage};
use std::collections::BTreeMap;
use tracing::warn;

pub const NODE_LABEL_PREFIX: &str = "cloud.intel.com";

const FIRMWARE_KIT: &str = "Firmware kit";
const SOFTWARE_KIT: &str = "Software kit";

const MAX_LABEL_VALUE_LEN: usize = 63;
const MAX_LABEL_PREFIX_LEN: usize = 253;

fn is_label_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'
}

/// Kubernetes label value rules: at most 63 characters of `[-_.A-Za-z0-9]`,
/// starting and ending with an alphanumeric.
pub fn is_valid_label_value(value: &str) -> bool {
    if value.is_empty() {
        return true;
    }
    value.len() <= MAX_LABEL_VALUE_LEN
        && value.chars().all(is_label_char)
        && value.starts_with(|c: char| c.is_ascii_alphanumeric())
        && value.ends_with(|c: char| c.is_ascii_alphanumeric())
}

/// Kubernetes qualified name: optional DNS-subdomain prefix and a non-empty name.
pub fn is_valid_label_key(key: &str) -> bool {
    let (prefix, name) = match key.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };
    let prefix_ok = prefix.is_none_or(|p| {
        !p.is_empty()
            && p.len() <= MAX_LABEL_PREFIX_LEN
            && p.split('.').all(|part| {
                !part.is_empty()
                    && part.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
                    && !part.starts_with('-')
                    && !part.ends_with('-')
            })
    });
    prefix_ok && !name.is_empty() && is_valid_label_value(name)
}

/// Drops every character a label value cannot hold.
pub fn strip_invalid_chars(value: &str) -> String {
    value.chars().filter(|c| c.is_alphanumeric() || matches!(c, '-' | '.' | '_')).collect()
}

fn normalize_kit_name(name: &str) -> String {
    strip_invalid_chars(&name.to_lowercase().replace(' ', "-"))
}

fn insert_label(labels: &mut BTreeMap<String, String>, key: &str, value: String) {
    if value.is_empty() {
        return;
    }
    if !is_valid_label_value(&value) {
        warn!("Skipping node label {}: invalid value {:?}", key, value);
        return;
    }
    labels.insert(format!("{NODE_LABEL_PREFIX}/{key}"), value);
}

/// Hardware labels of an instance type. Zero and empty facts are omitted.
pub fn instance_type_labels(instance_type: &InstanceType) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    insert_label(&mut labels, "instance-type", instance_type.name.clone());
    insert_label(&mut labels, "hbm-mode", instance_type.hbm_mode.clone());

    let non_zero = |n: u32| if n == 0 { String::new() } else { n.to_string() };
    if let Some(cpu) = &instance_type.cpu {
        insert_label(&mut labels, "host-cpu-cores", non_zero(cpu.cores));
        insert_label(&mut labels, "host-cpu-id", cpu.id.clone());
        insert_label(&mut labels, "host-cpu-model-name", strip_invalid_chars(&cpu.model_name));
        insert_label(&mut labels, "host-cpu-sockets", non_zero(cpu.sockets));
        insert_label(&mut labels, "host-cpu-threads", non_zero(cpu.threads));
    }
    if let Some(gpu) = &instance_type.gpu {
        insert_label(&mut labels, "host-gpu-count", non_zero(gpu.count));
        insert_label(&mut labels, "host-gpu-model", strip_invalid_chars(&gpu.model_name));
    }
    if let Some(memory) = &instance_type.memory {
        insert_label(&mut labels, "host-memory-size", memory.size.clone());
    }
    labels
}

/// `<prefix>/<kit>-fk-<version>=true` and `<prefix>/<kit>-sk-<version>=true`
/// for firmware and software kits baked into the image.
pub fn machine_image_labels(image: &MachineImage) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    for component in &image.components {
        let kind = match component.component_type.as_str() {
            FIRMWARE_KIT => "fk",
            SOFTWARE_KIT => "sk",
            _ => continue,
        };
        if component.name.is_empty() || component.version.is_empty() {
            continue;
        }
        let key = format!(
            "{NODE_LABEL_PREFIX}/{}-{kind}-{}",
            normalize_kit_name(&component.name),
            component.version.to_lowercase()
        );
        if is_valid_label_key(&key) {
            labels.insert(key, "true".to_string());
        } else {
            warn!("Skipping node label {}: invalid key", key);
        }
    }
    labels
}

/// Comma separated `key=value` list for `--kubelet-node-labels`, sorted by key.
pub fn worker_node_labels(instance_type: Option<&InstanceType>, image: Option<&MachineImage>) -> String {
    let mut labels = instance_type.map(instance_type_labels).unwrap_or_default();
    if let Some(image) = image {
        labels.extend(machine_image_labels(image));
    }
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use node_provider::{CpuInfo, GpuInfo, MachineImageComponent, MemoryInfo};

    fn gaudi() -> InstanceType {
        InstanceType {
            name: "bm-icp-gaudi2".to_string(),
            hbm_mode: String::new(),
            cpu: Some(CpuInfo {
                cores: 56,
                id: "0x806F8".to_string(),
                model_name: "Intel(R) Xeon(R) Platinum 8480+".to_string(),
                sockets: 2,
                threads: 0,
            }),
            gpu: Some(GpuInfo {
                count: 8,
                model_name: "HL-225".to_string(),
            }),
            memory: Some(MemoryInfo {
                size: "1Ti".to_string(),
            }),
        }
    }

    #[test]
    fn test_label_value_validation() {
        assert!(is_valid_label_value("IntelRXeonRPlatinum8480"));
        assert!(is_valid_label_value("1.2_3-a"));
        assert!(!is_valid_label_value("-leading"));
        assert!(!is_valid_label_value("trailing."));
        assert!(!is_valid_label_value("has space"));
        assert!(!is_valid_label_value(&"a".repeat(64)));
    }

    #[test]
    fn test_instance_type_labels() {
        let labels = instance_type_labels(&gaudi());
        assert_eq!(labels["cloud.intel.com/instance-type"], "bm-icp-gaudi2");
        assert_eq!(labels["cloud.intel.com/host-cpu-cores"], "56");
        assert_eq!(labels["cloud.intel.com/host-cpu-model-name"], "IntelRXeonRPlatinum8480");
        assert_eq!(labels["cloud.intel.com/host-gpu-count"], "8");
        assert_eq!(labels["cloud.intel.com/host-memory-size"], "1Ti");
        assert!(!labels.contains_key("cloud.intel.com/host-cpu-threads"));
        assert!(!labels.contains_key("cloud.intel.com/hbm-mode"));
    }

    #[test]
    fn test_machine_image_labels() {
        let image = MachineImage {
            name: "ubuntu-2204-gaudi".to_string(),
            components: vec![
                MachineImageComponent {
                    name: "Gaudi Firmware".to_string(),
                    component_type: FIRMWARE_KIT.to_string(),
                    version: "1.16.0".to_string(),
                },
                MachineImageComponent {
                    name: "Habana SW".to_string(),
                    component_type: SOFTWARE_KIT.to_string(),
                    version: "V1.16".to_string(),
                },
                MachineImageComponent {
                    name: "kernel".to_string(),
                    component_type: "OS".to_string(),
                    version: "5.15".to_string(),
                },
                MachineImageComponent {
                    name: "Broken".to_string(),
                    component_type: FIRMWARE_KIT.to_string(),
                    version: "1.0 beta".to_string(),
                },
            ],
        };
        let labels = machine_image_labels(&image);
        assert_eq!(labels.len(), 2);
        assert_eq!(labels["cloud.intel.com/gaudi-firmware-fk-1.16.0"], "true");
        assert_eq!(labels["cloud.intel.com/habana-sw-sk-v1.16"], "true");
    }

    #[test]
    fn test_worker_node_labels_joined_and_sorted() {
        let joined = worker_node_labels(Some(&gaudi()), None);
        let keys: Vec<&str> = joined.split(',').map(|kv| kv.split('=').next().unwrap()).collect();
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        assert_eq!(keys, sorted);
        assert!(joined.contains("cloud.intel.com/host-gpu-model=HL-225"));

        assert_eq!(worker_node_labels(None, None), "");
    }
}
