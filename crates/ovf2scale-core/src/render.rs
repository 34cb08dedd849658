//! Scale VM descriptor rendering.
//!
//! The output descriptor is produced by plain placeholder substitution: one
//! disk snippet per converted disk, one interface snippet per OVF network,
//! and the VM-level values, all poured into a template read from disk.
//!
//! Placeholders are written `$name` or `${name}`, where a name starts with a
//! letter or underscore followed by letters, digits or underscores. `$$`
//! produces a literal `$`.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use rand::Rng;
use uuid::Uuid;

use crate::convert::ConvertedDisk;
use crate::error::{Error, Result};
use crate::ovf::NetworkEntry;

/// Storage backend namespace prefixed to every disk name.
pub const SCRIBE_NAMESPACE: &str = "scribe";

/// Description written into every rendered descriptor.
pub const VM_DESCRIPTION: &str = "Testing conversion";

/// Memory assigned to the VM, in MB. Not taken from the OVF.
pub const VM_RAM_MB: u32 = 2048;

/// vCPUs assigned to the VM. Not taken from the OVF.
pub const VM_VCPUS: u32 = 1;

/// Scale Computing OUI used as the first three MAC octets.
pub const SCALE_OUI: [u8; 3] = [0x7c, 0x4c, 0x58];

/// Snippet emitted for each converted disk.
pub const DISK_TEMPLATE: &str = r#"
    <disk type="network" device="disk">
      <boot order="1"/>
      <driver name="qemu" type="scribe" cache="writethrough" io="native"/>
      <source protocol="scribe" name="${diskname}"/>
      <target dev="${disk_dev}"/>
      <geometry cyls="16383" heads="16" secs="63" trans="lba"/>
    </disk>"#;

/// Snippet emitted for each network interface.
pub const INTERFACE_TEMPLATE: &str = r#"
    <interface type="bridge">
      <mac address="$randmac"/>
      <model type="e1000"/>
      <link state="up"/>
      <source bridge="lan"/>
    </interface>"#;

/// A `$`-placeholder text template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    text: String,
}

impl Template {
    /// Wrap template text.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Read a template from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::io(e, path))?;
        Ok(Self::new(text))
    }

    /// Replace every placeholder with its value from `values`.
    ///
    /// # Errors
    ///
    /// Fails if a placeholder has no value, or if a `$` does not start a
    /// valid placeholder or `$$` escape.
    pub fn substitute(&self, values: &HashMap<&str, String>) -> Result<String> {
        let text = self.text.as_str();
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];
            let offset = text.len() - after.len() - 1;

            if let Some(tail) = after.strip_prefix('$') {
                out.push('$');
                rest = tail;
                continue;
            }

            let (name, tail) = if let Some(braced) = after.strip_prefix('{') {
                let len = identifier_len(braced);
                match braced[len..].strip_prefix('}') {
                    Some(tail) if len > 0 => (&braced[..len], tail),
                    _ => return Err(invalid_placeholder(text, offset)),
                }
            } else {
                let len = identifier_len(after);
                if len == 0 {
                    return Err(invalid_placeholder(text, offset));
                }
                (&after[..len], &after[len..])
            };

            let value = values.get(name).ok_or_else(|| {
                Error::template(format!("no value for placeholder '{}'", name))
            })?;
            out.push_str(value);
            rest = tail;
        }

        out.push_str(rest);
        Ok(out)
    }
}

fn identifier_len(s: &str) -> usize {
    let mut len = 0;
    for (i, c) in s.char_indices() {
        let valid = c == '_' || c.is_ascii_alphabetic() || (i > 0 && c.is_ascii_digit());
        if !valid {
            break;
        }
        len = i + c.len_utf8();
    }
    len
}

fn invalid_placeholder(text: &str, offset: usize) -> Error {
    let line = text[..offset].matches('\n').count() + 1;
    Error::template(format!("invalid placeholder on line {}", line))
}

/// A MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Generate a random address under the Scale Computing OUI.
    pub fn random() -> Self {
        Self::random_with(&mut rand::rng())
    }

    /// Generate an address under the Scale Computing OUI from `rng`.
    ///
    /// The fourth octet stays below 0x80.
    pub fn random_with<R: Rng>(rng: &mut R) -> Self {
        Self([
            SCALE_OUI[0],
            SCALE_OUI[1],
            SCALE_OUI[2],
            rng.random_range(0x00..=0x7f),
            rng.random_range(0x00..=0xff),
            rng.random_range(0x00..=0xff),
        ])
    }

    /// The six octets.
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", a, b, c, d, e, g)
    }
}

/// VM-level values written into the descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmRecord {
    /// VM name, from the OVF virtual system id.
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// Freshly generated identifier.
    pub uuid: Uuid,
    /// Memory in MB.
    pub ram_mb: u32,
    /// Number of virtual CPUs.
    pub vcpus: u32,
}

impl VmRecord {
    /// Build the record for `name` with a new random UUID.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: VM_DESCRIPTION.to_string(),
            uuid: Uuid::new_v4(),
            ram_mb: VM_RAM_MB,
            vcpus: VM_VCPUS,
        }
    }
}

/// Storage name of a converted disk, e.g. `scribe/disk1`.
pub fn scribe_disk_name(disk: &ConvertedDisk) -> String {
    format!("{}/{}", SCRIBE_NAMESPACE, disk.scribe_name)
}

/// Render one disk snippet per converted disk, joined by newlines.
pub fn render_disks(disks: &[ConvertedDisk]) -> Result<String> {
    let template = Template::new(DISK_TEMPLATE);
    let snippets = disks
        .iter()
        .map(|disk| {
            let values = HashMap::from([
                ("diskname", scribe_disk_name(disk)),
                ("disk_dev", disk.device.clone()),
            ]);
            template.substitute(&values)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(snippets.join("\n"))
}

/// Render one interface snippet per MAC address, joined by newlines.
pub fn render_interfaces(macs: &[MacAddress]) -> Result<String> {
    let template = Template::new(INTERFACE_TEMPLATE);
    let snippets = macs
        .iter()
        .map(|mac| template.substitute(&HashMap::from([("randmac", mac.to_string())])))
        .collect::<Result<Vec<_>>>()?;
    Ok(snippets.join("\n"))
}

/// A rendered descriptor and the random values that went into it.
#[derive(Debug, Clone)]
pub struct RenderedDescriptor {
    /// The descriptor XML.
    pub xml: String,
    /// MAC address of each interface, in network order.
    pub macs: Vec<MacAddress>,
}

/// Render the Scale VM descriptor.
///
/// One MAC address is generated per entry in `networks`.
pub fn render_descriptor(
    template: &Template,
    vm: &VmRecord,
    disks: &[ConvertedDisk],
    networks: &[NetworkEntry],
) -> Result<RenderedDescriptor> {
    let macs: Vec<MacAddress> = networks.iter().map(|_| MacAddress::random()).collect();

    let values = HashMap::from([
        ("vm_name", vm.name.clone()),
        ("vm_descr", vm.description.clone()),
        ("vm_uuid", vm.uuid.to_string()),
        ("vm_ram", vm.ram_mb.to_string()),
        ("vm_vcpu", vm.vcpus.to_string()),
        ("qcow_disks", render_disks(disks)?),
        ("interfaces", render_interfaces(&macs)?),
    ]);

    let xml = template.substitute(&values)?;
    Ok(RenderedDescriptor { xml, macs })
}
