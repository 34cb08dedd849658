//! Conversion orchestrator for OVF to Scale VM conversion.
//!
//! This module runs the full pipeline:
//! 1. Load the OVF descriptor and extract the VM name, files and networks
//! 2. Load the output template
//! 3. Convert each referenced disk image to qcow2 in `<output_root>/<vm_name>`
//! 4. Render `<vm_name>.xml` into the same directory
//!
//! # Example
//!
//! ```no_run
//! use ovf2scale_core::convert::QemuImg;
//! use ovf2scale_core::pipeline::{convert_vm, ConvertOptions};
//! use std::path::Path;
//!
//! let ovf_path = Path::new("/path/to/appliance.ovf");
//! let report = convert_vm(ovf_path, &ConvertOptions::default(), &QemuImg::default(), None).unwrap();
//! println!("wrote {}", report.descriptor_path.display());
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use uuid::Uuid;

use crate::convert::{convert_disks, ConvertedDisk, ImageConverter};
use crate::error::{Error, Result};
use crate::ovf::{DiskEntry, FileReference, NetworkEntry, OvfDescriptor};
use crate::render::{render_descriptor, MacAddress, Template, VmRecord};

/// Template file looked up in the working directory by default.
pub const DEFAULT_TEMPLATE: &str = "scalevm-template.xml";

/// Options for a conversion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertOptions {
    /// Directory in which the per-VM output directory is created.
    pub output_root: PathBuf,
    /// Path of the Scale VM descriptor template.
    pub template_path: PathBuf,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("."),
            template_path: PathBuf::from(DEFAULT_TEMPLATE),
        }
    }
}

impl ConvertOptions {
    /// Create options with the given output root and template.
    pub fn new(output_root: impl Into<PathBuf>, template_path: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            template_path: template_path.into(),
        }
    }

    /// Replace the output root.
    pub fn with_output_root(mut self, output_root: impl Into<PathBuf>) -> Self {
        self.output_root = output_root.into();
        self
    }

    /// Replace the template path.
    pub fn with_template(mut self, template_path: impl Into<PathBuf>) -> Self {
        self.template_path = template_path.into();
        self
    }
}

/// Phase of the conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertPhase {
    /// Loading the descriptor and template.
    Parsing,
    /// Converting disk images.
    Converting,
    /// Rendering and writing the output descriptor.
    Rendering,
    /// Conversion complete.
    Complete,
}

impl std::fmt::Display for ConvertPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConvertPhase::Parsing => write!(f, "Parsing"),
            ConvertPhase::Converting => write!(f, "Converting"),
            ConvertPhase::Rendering => write!(f, "Rendering"),
            ConvertPhase::Complete => write!(f, "Complete"),
        }
    }
}

/// Progress information for a conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertProgress {
    /// Current phase.
    pub phase: ConvertPhase,
    /// Disk being converted (1-indexed, 0 before the first disk).
    pub current_disk: usize,
    /// Total number of disks.
    pub total_disks: usize,
}

impl ConvertProgress {
    /// Create progress information for `phase`.
    pub fn new(phase: ConvertPhase, total_disks: usize) -> Self {
        Self {
            phase,
            current_disk: 0,
            total_disks,
        }
    }
}

/// Type alias for the progress callback function.
pub type ProgressCallback = Box<dyn Fn(ConvertProgress) + Send>;

/// Result of a successful conversion.
#[derive(Debug, Clone)]
pub struct ConversionReport {
    /// VM name taken from the descriptor.
    pub vm_name: String,
    /// Directory holding the converted images and descriptor.
    pub vm_dir: PathBuf,
    /// The written Scale VM descriptor.
    pub descriptor_path: PathBuf,
    /// Converted disks in processing order.
    pub disks: Vec<ConvertedDisk>,
    /// UUID written into the descriptor.
    pub uuid: Uuid,
    /// MAC address of each interface written into the descriptor.
    pub macs: Vec<MacAddress>,
}

/// Summary of an OVF descriptor.
#[derive(Debug, Clone)]
pub struct OvfInfo {
    /// VM name.
    pub name: String,
    /// Referenced files.
    pub files: Vec<FileReference>,
    /// Declared disks.
    pub disks: Vec<DiskEntry>,
    /// Declared networks.
    pub networks: Vec<NetworkEntry>,
}

/// Read an OVF descriptor without converting anything.
pub fn get_ovf_info(ovf_path: &Path) -> Result<OvfInfo> {
    let descriptor = OvfDescriptor::load(ovf_path)?;

    Ok(OvfInfo {
        name: descriptor.vm_name()?.to_string(),
        files: descriptor.file_references()?,
        disks: descriptor.disks()?,
        networks: descriptor.networks()?,
    })
}

/// Convert an OVF appliance into a Scale VM directory.
///
/// The template is loaded before anything is written, so a missing or
/// unreadable template leaves the filesystem untouched. A converter failure
/// aborts the run and leaves already converted images in place.
///
/// # Arguments
///
/// * `ovf_path` - Path to the OVF descriptor.
/// * `options` - Output root and template location.
/// * `converter` - Disk image converter, normally [`QemuImg`](crate::convert::QemuImg).
/// * `progress_callback` - Optional callback for progress updates.
pub fn convert_vm(
    ovf_path: &Path,
    options: &ConvertOptions,
    converter: &dyn ImageConverter,
    progress_callback: Option<ProgressCallback>,
) -> Result<ConversionReport> {
    let report_progress = |progress: ConvertProgress| {
        if let Some(ref callback) = progress_callback {
            callback(progress);
        }
    };

    // Phase 1: Parsing
    let descriptor = OvfDescriptor::load(ovf_path)?;
    let vm_name = descriptor.vm_name()?.to_string();
    let files = descriptor.file_references()?;
    let disks = descriptor.disks()?;
    let networks = descriptor.networks()?;
    debug!(
        vm = %vm_name,
        files = files.len(),
        disks = disks.len(),
        networks = networks.len(),
        "extracted OVF fields"
    );

    let mut progress = ConvertProgress::new(ConvertPhase::Parsing, files.len());
    report_progress(progress.clone());

    let template = Template::load(&options.template_path)?;

    // Phase 2: Converting
    let vm_dir = options.output_root.join(&vm_name);
    if !vm_dir.is_dir() {
        fs::create_dir_all(&vm_dir).map_err(|e| Error::io(e, &vm_dir))?;
        debug!(dir = %vm_dir.display(), "created VM directory");
    }

    let descriptor_dir = ovf_path.parent().unwrap_or_else(|| Path::new(""));
    progress.phase = ConvertPhase::Converting;
    let converted = convert_disks(&files, descriptor_dir, &vm_dir, converter, |index| {
        progress.current_disk = index + 1;
        report_progress(progress.clone());
    })?;

    // Phase 3: Rendering
    progress.phase = ConvertPhase::Rendering;
    report_progress(progress.clone());

    let vm = VmRecord::new(&vm_name);
    let rendered = render_descriptor(&template, &vm, &converted, &networks)?;

    let descriptor_path = vm_dir.join(format!("{}.xml", vm_name));
    fs::write(&descriptor_path, &rendered.xml).map_err(|e| Error::io(e, &descriptor_path))?;
    info!(path = %descriptor_path.display(), "wrote Scale VM descriptor");

    // Phase 4: Complete
    progress.phase = ConvertPhase::Complete;
    report_progress(progress);

    Ok(ConversionReport {
        vm_name,
        vm_dir,
        descriptor_path,
        disks: converted,
        uuid: vm.uuid,
        macs: rendered.macs,
    })
}
