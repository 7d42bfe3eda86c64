//! Listening-port discovery through the kernel's `/proc/net/tcp*` tables
//!
//! Each table line after the header looks like:
//!
//! ```text
//!    sl  local_address rem_address   st tx_queue rx_queue ...
//!    0: 0100007F:1F90 00000000:0000 0A 00000000:00000000 ...
//! ```
//!
//! The port is the hex number after the last `:` of `local_address` and state
//! `0A` means LISTEN. IPv6 lines use a 32-digit address but the same layout.

use crate::port_watcher::PortSource;
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// TCP state code for a listening socket
pub const LISTEN_STATE: &str = "0A";

pub const PROC_NET_TCP: &str = "/proc/net/tcp";
pub const PROC_NET_TCP6: &str = "/proc/net/tcp6";

#[derive(Error, Debug)]
pub enum PortScanError {
    #[error("Failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("No listening-socket table available (tried {0})")]
    NoTables(String),
}

/// Scans one or more `/proc/net/tcp`-format tables
#[derive(Debug, Clone)]
pub struct ProcNetTcp {
    tables: Vec<PathBuf>,
}

impl Default for ProcNetTcp {
    fn default() -> Self {
        Self::new(vec![PathBuf::from(PROC_NET_TCP), PathBuf::from(PROC_NET_TCP6)])
    }
}

impl ProcNetTcp {
    pub fn new(tables: Vec<PathBuf>) -> Self {
        Self { tables }
    }

    /// Union of listening ports over every table that exists
    ///
    /// A missing table is skipped (no IPv6 on this host, say), but one that
    /// exists and cannot be read fails the whole scan.
    pub fn scan(&self) -> Result<BTreeSet<u16>, PortScanError> {
        let mut ports = BTreeSet::new();
        let mut tables_read = 0;

        for table in &self.tables {
            match read_table(table)? {
                Some(content) => {
                    ports.extend(parse_listening_ports(&content));
                    tables_read += 1;
                }
                None => tracing::trace!("Skipping missing table {}", table.display()),
            }
        }

        if tables_read == 0 {
            let tried = self
                .tables
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(PortScanError::NoTables(tried));
        }

        Ok(ports)
    }
}

impl PortSource for ProcNetTcp {
    fn listening_ports(&mut self) -> Result<BTreeSet<u16>, PortScanError> {
        self.scan()
    }
}

fn read_table(path: &Path) -> Result<Option<String>, PortScanError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PortScanError::Read {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Ports of every LISTEN entry in a table, ignoring lines that don't parse
pub fn parse_listening_ports(content: &str) -> BTreeSet<u16> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 || fields[3] != LISTEN_STATE {
                return None;
            }
            parse_local_port(fields[1])
        })
        .collect()
}

fn parse_local_port(local_address: &str) -> Option<u16> {
    let (_, port_hex) = local_address.rsplit_once(':')?;
    u16::from_str_radix(port_hex, 16).ok()
}
