//! Routing tables and the router's YAML configuration.

use crate::compose::ComposeProject;
use crate::markers::GENERATED_MARKER;
use crate::project::validate_project_name;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Where the router sees the shared cache volume.
pub const CACHE_MOUNT: &str = "/mnt/ddev-global-cache";
pub const CONFIG_SUBDIR: &str = "traefik/config";
pub const CERTS_SUBDIR: &str = "traefik/certs";

/// One `external:internal` pair from `HTTP_EXPOSE` / `HTTPS_EXPOSE`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Route {
    pub service: String,
    pub external_port: u16,
    pub internal_port: u16,
    pub https: bool,
}

/// Parse a comma-separated `ext[:int]` list. Malformed pairs are skipped.
pub fn parse_expose(service: &str, spec: &str, https: bool) -> Vec<Route> {
    spec.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .filter_map(|pair| {
            let (ext, int) = pair.split_once(':').unwrap_or((pair, pair));
            match (ext.parse::<u16>(), int.parse::<u16>()) {
                (Ok(e), Ok(i)) => Some(Route {
                    service: service.to_string(),
                    external_port: e,
                    internal_port: i,
                    https,
                }),
                _ => {
                    tracing::warn!(service, pair, "skipping bad port pair in *_EXPOSE");
                    None
                }
            }
        })
        .collect()
}

/// Every route the document's services ask for, sorted.
pub fn routing_table(doc: &ComposeProject) -> Vec<Route> {
    let mut routes = Vec::new();
    for (name, svc) in &doc.services {
        if let Some(spec) = svc.env("HTTP_EXPOSE") {
            routes.extend(parse_expose(name, spec, false));
        }
        if let Some(spec) = svc.env("HTTPS_EXPOSE") {
            routes.extend(parse_expose(name, spec, true));
        }
    }
    routes.sort();
    routes.dedup();
    routes
}

/// External ports a routing table needs the router to listen on.
pub fn external_ports(routes: &[Route]) -> BTreeSet<u16> {
    routes.iter().map(|r| r.external_port).collect()
}

#[derive(Debug, Serialize)]
struct DynamicConfig {
    http: HttpSection,
    #[serde(skip_serializing_if = "Option::is_none")]
    tls: Option<TlsSection>,
}

#[derive(Debug, Serialize)]
struct HttpSection {
    routers: BTreeMap<String, RouterDef>,
    services: BTreeMap<String, ServiceLb>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RouterDef {
    entrypoints: Vec<String>,
    rule: String,
    rule_syntax: &'static str,
    service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tls: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Serialize)]
struct ServiceLb {
    #[serde(rename = "loadbalancer")]
    load_balancer: LoadBalancer,
}

#[derive(Debug, Serialize)]
struct LoadBalancer {
    servers: Vec<BTreeMap<String, String>>,
}

#[derive(Debug, Serialize)]
struct TlsSection {
    certificates: Vec<CertRef>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CertRef {
    cert_file: String,
    key_file: String,
}

pub fn entry_file_name(project: &str) -> String {
    format!("{}-http.yaml", project)
}

pub fn cert_file_names(project: &str) -> [String; 2] {
    [format!("{}.crt", project), format!("{}.key", project)]
}

/// `Host(...)` for plain names, `HostRegexp(...)` for `*.` wildcards.
fn host_rule(hostnames: &[String]) -> String {
    hostnames
        .iter()
        .map(|h| match h.strip_prefix("*.") {
            Some(rest) => format!("HostRegexp(`^[^.]+\\.{}$`)", rest.replace('.', "\\.")),
            None => format!("Host(`{}`)", h),
        })
        .collect::<Vec<_>>()
        .join(" || ")
}

/// The project's `<project>-http.yaml`, marker first.
///
/// One router per (service, external port, scheme) and one load balancer per
/// (service, internal port), reaching the container by name on the shared
/// network.
pub fn render_entry(
    project: &str,
    container_prefix: &str,
    hostnames: &[String],
    routes: &[Route],
    with_cert: bool,
) -> Result<String, serde_yaml::Error> {
    let rule = host_rule(hostnames);
    let mut routers = BTreeMap::new();
    let mut services = BTreeMap::new();

    for route in routes {
        let lb_name = format!("{}-{}-{}", project, route.service, route.internal_port);
        let scheme = if route.https { "https" } else { "http" };
        routers.insert(
            format!("{}-{}-{}-{}", project, route.service, route.external_port, scheme),
            RouterDef {
                entrypoints: vec![format!("http-{}", route.external_port)],
                rule: rule.clone(),
                rule_syntax: "v3",
                service: lb_name.clone(),
                tls: route.https.then(BTreeMap::new),
            },
        );
        services.entry(lb_name).or_insert_with(|| ServiceLb {
            load_balancer: LoadBalancer {
                servers: vec![BTreeMap::from([(
                    "url".to_string(),
                    format!(
                        "http://{}-{}:{}",
                        container_prefix, route.service, route.internal_port
                    ),
                )])],
            },
        });
    }

    let tls = with_cert.then(|| {
        let [crt, key] = cert_file_names(project);
        TlsSection {
            certificates: vec![CertRef {
                cert_file: format!("{}/{}/{}", CACHE_MOUNT, CERTS_SUBDIR, crt),
                key_file: format!("{}/{}/{}", CACHE_MOUNT, CERTS_SUBDIR, key),
            }],
        }
    });

    let body = serde_yaml::to_string(&DynamicConfig {
        http: HttpSection { routers, services },
        tls,
    })?;
    Ok(format!("{}\n{}", GENERATED_MARKER, body))
}

/// `static_config.yaml`: one entrypoint per port, file provider on the
/// config dir.
pub fn render_static(ports: &BTreeSet<u16>) -> String {
    let mut out = format!("{}\n", GENERATED_MARKER);
    out.push_str("entryPoints:\n");
    for port in ports {
        out.push_str(&format!("  http-{port}:\n    address: \":{port}\"\n"));
    }
    out.push_str(&format!(
        "providers:\n  file:\n    directory: {}/{}\n    watch: true\nping:\n  entryPoint: traefik\napi:\n  dashboard: false\nlog:\n  level: ERROR\n",
        CACHE_MOUNT, CONFIG_SUBDIR
    ));
    out
}

/// The project a router file belongs to, if it follows ddev's naming.
pub fn file_owner(file: &str) -> Option<&str> {
    let owner = file
        .strip_suffix("-http.yaml")
        .or_else(|| file.strip_suffix(".crt"))
        .or_else(|| file.strip_suffix(".key"))?;
    validate_project_name(owner).ok().map(|_| owner)
}

/// Files in the volume that should go.
///
/// A recognised file is obsolete when it belongs to `project` but is not in
/// `desired`, or when its owner is not a known project. Anything not
/// following the naming scheme is left alone.
pub fn obsolete_files(
    present: &[String],
    desired: &BTreeSet<String>,
    project: &str,
    known: &BTreeSet<String>,
) -> Vec<String> {
    present
        .iter()
        .filter(|f| !desired.contains(*f))
        .filter(|f| match file_owner(f) {
            Some(owner) if owner == project => true,
            Some(owner) => !known.contains(owner),
            None => false,
        })
        .cloned()
        .collect()
}
