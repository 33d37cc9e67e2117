//! TrueNAS chart values export
//!
//! Only the first service of a compose document is exported, which covers
//! the single-container apps TrueNAS catalogs are built around.

use serde::Serialize;
use serde_yaml::{Mapping, Value};
use tracing::warn;

const DEFAULT_PORT: u16 = 10000;
const DEFAULT_TARGET_PORT: u16 = 80;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageValues {
    repository: String,
    tag: String,
    pull_policy: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PortValues {
    port: u16,
    target_port: u16,
    protocol: &'static str,
}

#[derive(Debug, Serialize)]
struct Main<T> {
    main: T,
}

#[derive(Debug, Serialize)]
struct Ports {
    ports: Main<PortValues>,
}

#[derive(Debug, Serialize)]
struct Containers {
    containers: Main<ContainerValues>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PodSpec {
    pod_spec: Containers,
}

#[derive(Debug, Serialize)]
struct ContainerValues {
    env: Mapping,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum Persistence {
    #[serde(rename = "hostPath", rename_all = "camelCase")]
    HostPath {
        enabled: bool,
        host_path: String,
        mount_path: String,
    },
    #[serde(rename = "ixVolume", rename_all = "camelCase")]
    IxVolume {
        enabled: bool,
        dataset_name: String,
        mount_path: String,
    },
}

#[derive(Debug, Serialize)]
struct TrueNasValues {
    image: ImageValues,
    service: Main<Ports>,
    workload: Main<PodSpec>,
    persistence: Mapping,
}

/// Split `repo[:tag]`, leaving registry ports in the repository part
fn split_image(image: &str) -> (String, String) {
    match image.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') && !repo.is_empty() => {
            (repo.to_string(), tag.to_string())
        }
        _ if image.is_empty() => ("image".to_string(), "latest".to_string()),
        _ => (image.to_string(), "latest".to_string()),
    }
}

/// `host:container` from a compose port entry
fn first_port(service: &Value) -> Option<(u16, u16)> {
    let mapping = service.get("ports")?.as_sequence()?.first()?.as_str()?;
    let mut parts = mapping.split(':');
    let host = parts.next()?.parse().ok()?;
    let container = parts.next()?.split('/').next()?.parse().ok()?;
    Some((host, container))
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

fn environment(service: &Value) -> Mapping {
    let mut env = Mapping::new();
    match service.get("environment") {
        Some(Value::Sequence(entries)) => {
            for entry in entries.iter().filter_map(Value::as_str) {
                let (key, value) = entry.split_once('=').unwrap_or((entry, ""));
                env.insert(key.into(), value.into());
            }
        }
        Some(Value::Mapping(map)) => {
            for (key, value) in map {
                env.insert(key.clone(), scalar_text(value).into());
            }
        }
        _ => {}
    }
    env
}

fn persistence(service: &Value) -> Mapping {
    let mut volumes = Mapping::new();
    let Some(entries) = service.get("volumes").and_then(Value::as_sequence) else {
        return volumes;
    };

    for (index, entry) in entries.iter().enumerate() {
        let Some((host, container)) = entry.as_str().and_then(|v| {
            let mut parts = v.split(':');
            Some((parts.next()?, parts.next()?))
        }) else {
            continue;
        };
        if host.is_empty() || container.is_empty() {
            continue;
        }

        let volume = if host.starts_with(['/', '.', '~']) {
            Persistence::HostPath {
                enabled: true,
                host_path: host.to_string(),
                mount_path: container.to_string(),
            }
        } else {
            Persistence::IxVolume {
                enabled: true,
                dataset_name: host.to_string(),
                mount_path: container.to_string(),
            }
        };

        match serde_yaml::to_value(volume) {
            Ok(value) => {
                volumes.insert(format!("vol{}", index).into(), value);
            }
            Err(e) => warn!("Skipping volume {}: {}", index, e),
        }
    }

    volumes
}

/// Render TrueNAS chart values for a compose document
///
/// Unusable input yields a YAML comment rather than an error, so the
/// output can always be shown to the operator.
pub fn generate_truenas_values(compose: &str) -> String {
    let doc: Value = match serde_yaml::from_str(compose) {
        Ok(doc) => doc,
        Err(e) => {
            warn!("TrueNAS export got invalid compose: {}", e);
            return "# Error generating TrueNAS template\n".to_string();
        }
    };

    let Some(service) = doc
        .get("services")
        .and_then(Value::as_mapping)
        .and_then(|services| services.values().next())
    else {
        return "# No services found\n".to_string();
    };

    let (repository, tag) = split_image(service.get("image").and_then(Value::as_str).unwrap_or(""));
    let (port, target_port) = first_port(service).unwrap_or((DEFAULT_PORT, DEFAULT_TARGET_PORT));

    let values = TrueNasValues {
        image: ImageValues {
            repository,
            tag,
            pull_policy: "IfNotPresent",
        },
        service: Main {
            main: Ports {
                ports: Main {
                    main: PortValues {
                        port,
                        target_port,
                        protocol: "TCP",
                    },
                },
            },
        },
        workload: Main {
            main: PodSpec {
                pod_spec: Containers {
                    containers: Main {
                        main: ContainerValues {
                            env: environment(service),
                        },
                    },
                },
            },
        },
        persistence: persistence(service),
    };

    match serde_yaml::to_string(&values) {
        Ok(text) => text,
        Err(e) => {
            warn!("TrueNAS export failed: {}", e);
            "# Error generating TrueNAS template\n".to_string()
        }
    }
}
