//! Candidate machines the coordinator may start servers on.
//!
//! Pool files list one machine per line as `name host port`. Blank lines and
//! `#` comments are ignored.

use std::fs;
use std::path::Path;

use crate::error::{CoordinatorError, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Machine {
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl Machine {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `name:host:port`.
    pub fn label(&self) -> String {
        format!("{}:{}:{}", self.name, self.host, self.port)
    }
}

/// Machines in file order; servers are allocated in this order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MachinePool {
    machines: Vec<Machine>,
}

impl MachinePool {
    pub fn new(machines: Vec<Machine>) -> Self {
        Self { machines }
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::parse(&fs::read_to_string(path)?)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut machines: Vec<Machine> = Vec::new();
        for (index, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let bad = |reason: String| CoordinatorError::Pool {
                line: index + 1,
                reason,
            };
            let fields: Vec<&str> = line.split_whitespace().collect();
            let [name, host, port] = fields.as_slice() else {
                return Err(bad(format!("expected `name host port`, got {line:?}")));
            };
            let port: u16 = port
                .parse()
                .map_err(|_| bad(format!("invalid port {port:?}")))?;
            if machines.iter().any(|m| m.name == *name) {
                return Err(bad(format!("duplicate machine name {name}")));
            }
            machines.push(Machine::new(*name, *host, port));
        }
        Ok(Self { machines })
    }

    /// `count` machines named `server1..` on consecutive local ports.
    pub fn localhost(count: usize, first_port: u16) -> Self {
        Self {
            machines: (0..count)
                .map(|i| Machine::new(format!("server{}", i + 1), "127.0.0.1", first_port + i as u16))
                .collect(),
        }
    }

    pub fn machines(&self) -> &[Machine] {
        &self.machines
    }

    pub fn get(&self, name: &str) -> Option<&Machine> {
        self.machines.iter().find(|m| m.name == name)
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }
}
