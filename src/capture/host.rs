//! Snapshot of the connected host taken when the link comes up

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use typeshare::typeshare;

use crate::utils::run_command;

/// Each tool gets this long before its part of the snapshot is dropped
const TOOL_TIMEOUT: Duration = Duration::from_secs(5);

/// Socket lines kept per snapshot
const MAX_CONNECTIONS: usize = 256;

/// Neighbour table entry on the gadget interface
#[typeshare]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborEntry {
    pub ip: String,
    pub mac: Option<String>,
    pub state: Option<String>,
}

#[typeshare]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostSnapshot {
    pub taken_at: DateTime<Utc>,
    /// Host MAC and address as seen by ARP/NDP
    pub neighbors: Vec<NeighborEntry>,
    /// `ss -tupn` lines without the header
    pub connections: Vec<String>,
    /// Tools that failed, one message each
    pub errors: Vec<String>,
}

#[async_trait]
pub trait HostProbe: Send + Sync {
    async fn snapshot(&self, interface: &str) -> HostSnapshot;
}

/// `ip neigh show dev <if>` and `ss -tupn`
#[derive(Default)]
pub struct CommandHostProbe;

async fn bounded(program: &str, args: &[&str]) -> Result<String, String> {
    match tokio::time::timeout(TOOL_TIMEOUT, run_command(program, args)).await {
        Ok(result) => result,
        Err(_) => Err(format!("{} timed out after {:?}", program, TOOL_TIMEOUT)),
    }
}

#[async_trait]
impl HostProbe for CommandHostProbe {
    async fn snapshot(&self, interface: &str) -> HostSnapshot {
        let mut snapshot = HostSnapshot {
            taken_at: Utc::now(),
            ..Default::default()
        };

        match bounded("ip", &["neigh", "show", "dev", interface]).await {
            Ok(out) => snapshot.neighbors = parse_neighbors(&out),
            Err(e) => snapshot.errors.push(e),
        }
        match bounded("ss", &["-tupn"]).await {
            Ok(out) => snapshot.connections = parse_sockets(&out),
            Err(e) => snapshot.errors.push(e),
        }
        snapshot
    }
}

/// `192.168.7.1 lladdr 02:00:00:00:00:02 REACHABLE`
pub fn parse_neighbors(output: &str) -> Vec<NeighborEntry> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let ip = fields.next()?.to_string();
            let mut entry = NeighborEntry {
                ip,
                mac: None,
                state: None,
            };
            while let Some(field) = fields.next() {
                match field {
                    "lladdr" => entry.mac = fields.next().map(str::to_string),
                    "router" | "proxy" => {}
                    other => entry.state = Some(other.to_string()),
                }
            }
            Some(entry)
        })
        .collect()
}

fn parse_sockets(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|line| line.starts_with("Netid"))
        .filter(|line| !line.trim().is_empty())
        .take(MAX_CONNECTIONS)
        .map(str::to_string)
        .collect()
}
