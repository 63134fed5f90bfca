use crate::error::Error;
use std::collections::HashSet;
use std::process::Command;
use std::time::Duration;

const DIAL_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct PortConflict {
    pub port: u16,
    pub processes: Vec<ProcessInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub command: Option<String>,
}

impl PortConflict {
    /// Dial `ip:port`; something answering means the port is taken.
    ///
    /// Dialing rather than binding catches ports published by the container
    /// engine on a VM or remote host.
    pub async fn check(ip: &str, port: u16) -> Option<Self> {
        if !Self::is_listening(ip, port).await {
            return None;
        }
        let processes = tokio::task::spawn_blocking(move || find_processes_on_port(port))
            .await
            .unwrap_or_default();
        Some(PortConflict { port, processes })
    }

    pub async fn is_listening(ip: &str, port: u16) -> bool {
        matches!(
            tokio::time::timeout(DIAL_TIMEOUT, tokio::net::TcpStream::connect((ip, port))).await,
            Ok(Ok(_))
        )
    }

    /// Turn the conflict into the user-facing error, naming the first holder.
    pub fn into_error(self) -> Error {
        let first = self.processes.into_iter().next();
        Error::PortConflict {
            port: self.port,
            pid: first.as_ref().map(|p| p.pid),
            process_name: first.as_ref().map(|p| p.name.clone()),
            command: first.and_then(|p| p.command),
            owner: None,
        }
    }
}

/// A port nothing is bound to right now, chosen by the OS.
pub fn get_free_port() -> std::io::Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

fn find_processes_on_port(port: u16) -> Vec<ProcessInfo> {
    #[cfg(target_os = "linux")]
    {
        let mut processes = find_processes_ss(port);
        let seen: HashSet<u32> = processes.iter().map(|p| p.pid).collect();
        processes.extend(
            find_processes_lsof(port)
                .into_iter()
                .filter(|p| !seen.contains(&p.pid)),
        );
        processes
    }

    #[cfg(not(target_os = "linux"))]
    {
        find_processes_lsof(port)
    }
}

#[cfg(target_os = "linux")]
fn find_processes_ss(port: u16) -> Vec<ProcessInfo> {
    let output = match Command::new("ss")
        .args(["-tlnp", &format!("sport = :{}", port)])
        .output()
    {
        Ok(o) if o.status.success() => o,
        _ => return Vec::new(),
    };
    parse_ss(&String::from_utf8_lossy(&output.stdout))
        .into_iter()
        .map(|pid| {
            let name = std::fs::read_to_string(format!("/proc/{}/comm", pid))
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|_| "unknown".to_string());
            let command = std::fs::read_to_string(format!("/proc/{}/cmdline", pid))
                .ok()
                .map(|s| s.replace('\0', " ").trim().to_string())
                .filter(|s| !s.is_empty());
            ProcessInfo { pid, name, command }
        })
        .collect()
}

fn find_processes_lsof(port: u16) -> Vec<ProcessInfo> {
    let output = match Command::new("lsof")
        .args(["-i", &format!(":{}", port), "-sTCP:LISTEN", "-P", "-n", "-F", "pc"])
        .output()
    {
        Ok(o) if o.status.success() => o,
        _ => return Vec::new(),
    };
    parse_lsof(&String::from_utf8_lossy(&output.stdout))
}

/// PIDs from `ss -tlnp` output (`users:(("nginx",pid=812,fd=6),...)`).
fn parse_ss(stdout: &str) -> Vec<u32> {
    let mut seen = HashSet::new();
    let mut pids = Vec::new();
    for line in stdout.lines().skip(1) {
        let Some(users) = line.split_whitespace().last() else {
            continue;
        };
        for part in users.split(',') {
            if let Some(pid) = part.strip_prefix("pid=").and_then(|p| p.parse::<u32>().ok()) {
                if seen.insert(pid) {
                    pids.push(pid);
                }
            }
        }
    }
    pids
}

/// `lsof -F pc` output: a `p<pid>` line starts each process, `c<command>` names it.
fn parse_lsof(stdout: &str) -> Vec<ProcessInfo> {
    let mut processes: Vec<ProcessInfo> = Vec::new();
    let mut current: Option<u32> = None;
    for line in stdout.lines() {
        if let Some(pid) = line.strip_prefix('p').and_then(|p| p.parse::<u32>().ok()) {
            current = Some(pid);
            if processes.iter().all(|p| p.pid != pid) {
                processes.push(ProcessInfo {
                    pid,
                    name: "unknown".to_string(),
                    command: None,
                });
            }
        } else if let Some(cmd) = line.strip_prefix('c') {
            if let Some(process) = processes.iter_mut().find(|p| Some(p.pid) == current) {
                process.name = cmd.to_string();
                process.command = Some(cmd.to_string());
            }
        }
    }
    processes
}
