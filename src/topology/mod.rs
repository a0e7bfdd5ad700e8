//! Topology data model and the file it is rendered to.
//!
//! File format: one `"<address> <rack_id>"` line per host, newline
//! terminated, in the order the hosts were listed.


use std::fmt;
use std::path::Path;
use std::path::PathBuf;

use tracing::info;

use crate::file_io::write_atomically;
use crate::Result;

/// A single child under the watched base path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZNode {
    pub name: String,
    pub value: Vec<u8>,
}

impl ZNode {
    pub fn new(
        name: impl Into<String>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Value as text; invalid UTF-8 sequences are replaced, not rejected.
    pub fn rack_id(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RackAssignment {
    pub address: String,
    pub rack_id: String,
}

impl RackAssignment {
    pub fn new(
        address: impl Into<String>,
        rack_id: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            rack_id: rack_id.into(),
        }
    }
}

impl fmt::Display for RackAssignment {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{} {}", self.address, self.rack_id)
    }
}

/// Fully resolved view of the subtree at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologySnapshot {
    assignments: Vec<RackAssignment>,
}

impl TopologySnapshot {
    pub fn new(assignments: Vec<RackAssignment>) -> Self {
        Self { assignments }
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RackAssignment> {
        self.assignments.iter()
    }

    pub fn render(&self) -> String {
        self.assignments.iter().map(|a| format!("{a}\n")).collect()
    }
}

impl FromIterator<RackAssignment> for TopologySnapshot {
    fn from_iter<I: IntoIterator<Item = RackAssignment>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Sole writer of the topology file
#[derive(Debug, Clone)]
pub struct TopologyWriter {
    path: PathBuf,
}

impl TopologyWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically replaces the topology file with `snapshot`
    pub fn write(
        &self,
        snapshot: &TopologySnapshot,
    ) -> Result<()> {
        write_atomically(&self.path, snapshot.render().as_bytes())?;
        info!(path = ?self.path, entries = snapshot.len(), "topology file written");
        Ok(())
    }
}
