//! The machines an experiment runs on.

use std::collections::BTreeMap;

use serde::Deserialize;

/// One remote machine.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Server {
    /// Logical name (e.g. `node01`).
    pub name: String,
    /// Network address used for SSH (e.g. `c01.lab`).
    pub address: String,
    /// SSH port.
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// The user to log in as.
    #[serde(default)]
    pub username: String,
    /// Fabric interface address for each NUMA region, keyed by region number.
    #[serde(default)]
    pub interfaces: BTreeMap<String, String>,
    /// The directory commands run in. Filled in from the server list if not given.
    #[serde(default)]
    pub working_directory: String,
}

fn default_ssh_port() -> u16 {
    22
}

impl Server {
    pub fn new(name: &str, address: &str, working_directory: &str) -> Self {
        Server {
            name: name.into(),
            address: address.into(),
            port: default_ssh_port(),
            username: String::new(),
            interfaces: BTreeMap::new(),
            working_directory: working_directory.into(),
        }
    }

    pub fn with_interface(mut self, region: usize, address: &str) -> Self {
        self.interfaces.insert(region.to_string(), address.into());
        self
    }

    /// The fabric address of this server in the given NUMA region.
    pub fn interface(&self, region: usize) -> Option<&str> {
        self.interfaces.get(&region.to_string()).map(String::as_str)
    }

    /// `host:port`, as accepted by the SSH library.
    pub fn ssh_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// The fixed, ordered set of servers of one experiment file.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerList {
    servers: Vec<Server>,
}

#[derive(Deserialize)]
struct RawServerList {
    servers: Vec<Server>,
    #[serde(default)]
    working_directory: String,
    #[serde(default)]
    username: String,
}

impl ServerList {
    pub fn new(servers: Vec<Server>) -> Self {
        ServerList { servers }
    }

    /// Parse the `servers`, `working_directory`, and `username` keys of an experiment file.
    /// Per-server values win over the list-wide defaults.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, failure::Error> {
        let RawServerList {
            servers,
            working_directory,
            username,
        } = serde_json::from_value(value.clone())?;

        let servers = servers
            .into_iter()
            .map(|mut s| {
                if s.working_directory.is_empty() {
                    s.working_directory = working_directory.clone();
                }
                if s.username.is_empty() {
                    s.username = username.clone();
                }
                s
            })
            .collect::<Vec<_>>();

        if servers.is_empty() {
            failure::bail!("The experiment file lists no servers");
        }

        Ok(ServerList { servers })
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Server> {
        self.servers.iter()
    }

    /// Assign node ids for this server list: servers in order, and within each server its
    /// regions in order. Node ids start at 0 for every invocation.
    pub fn placements<'s>(&'s self, regions: &[usize]) -> Vec<Placement<'s>> {
        self.servers
            .iter()
            .flat_map(|server| regions.iter().map(move |&region| (server, region)))
            .enumerate()
            .map(|(node_id, (server, region))| Placement {
                node_id,
                server,
                region,
            })
            .collect()
    }
}

impl std::ops::Index<usize> for ServerList {
    type Output = Server;

    fn index(&self, i: usize) -> &Server {
        &self.servers[i]
    }
}

impl<'a> IntoIterator for &'a ServerList {
    type Item = &'a Server;
    type IntoIter = std::slice::Iter<'a, Server>;

    fn into_iter(self) -> Self::IntoIter {
        self.servers.iter()
    }
}

/// Where one benchmark process runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement<'s> {
    pub node_id: usize,
    pub server: &'s Server,
    pub region: usize,
}
