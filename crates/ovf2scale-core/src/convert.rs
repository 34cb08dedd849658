//! Disk image conversion.
//!
//! Each disk image referenced by the OVF descriptor is transcoded to qcow2
//! by an external converter, one at a time and in document order. Outputs
//! that already exist are left alone, which makes re-running a conversion
//! cheap.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::ovf::FileReference;

/// Converter program used when none is configured.
pub const DEFAULT_CONVERTER: &str = "qemu-img";

/// Output image format passed to the converter.
pub const TARGET_FORMAT: &str = "qcow2";

/// qcow2 compatibility level passed to the converter.
pub const QCOW2_COMPAT: &str = "0.10";

/// Device letters available after the `hd` prefix.
const DEVICE_LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// Something that can transcode a disk image into qcow2.
pub trait ImageConverter {
    /// Convert `source` into a new image at `destination`.
    ///
    /// Must either leave a complete image at `destination` or fail.
    fn convert(&self, source: &Path, destination: &Path) -> Result<()>;
}

/// Runs `qemu-img convert` as a subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QemuImg {
    program: PathBuf,
}

impl Default for QemuImg {
    fn default() -> Self {
        Self::new(DEFAULT_CONVERTER)
    }
}

impl QemuImg {
    /// Use `program` instead of the `qemu-img` found on `PATH`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// The program that will be executed.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments for converting `source` into `destination`.
    pub fn args(&self, source: &Path, destination: &Path) -> Vec<OsString> {
        vec![
            "convert".into(),
            "-O".into(),
            TARGET_FORMAT.into(),
            "-o".into(),
            format!("compat={}", QCOW2_COMPAT).into(),
            source.into(),
            destination.into(),
        ]
    }
}

impl ImageConverter for QemuImg {
    fn convert(&self, source: &Path, destination: &Path) -> Result<()> {
        debug!(
            program = %self.program.display(),
            source = %source.display(),
            destination = %destination.display(),
            "running image converter"
        );

        let output = Command::new(&self.program)
            .args(self.args(source, destination))
            .output()
            .map_err(|e| {
                Error::converter(format!(
                    "failed to run '{}': {}",
                    self.program.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            return Err(Error::converter(format!(
                "'{}' failed converting '{}' ({}): {}",
                self.program.display(),
                source.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(())
    }
}

/// A disk image after conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedDisk {
    /// The `ovf:id` of the file reference this disk came from.
    pub file_id: String,
    /// Source image, resolved against the descriptor's directory.
    pub source: PathBuf,
    /// The qcow2 image in the VM output directory.
    pub output: PathBuf,
    /// Base name of the output without extension.
    pub scribe_name: String,
    /// Target device label, e.g. `hdb`.
    pub device: String,
    /// True if the output already existed and conversion was skipped.
    pub skipped: bool,
}

/// Device label for the disk at `index` in processing order.
///
/// Labels start at `hdb`; `hda` is never assigned.
pub fn device_label(index: usize) -> Result<String> {
    let letter = DEVICE_LETTERS
        .get(index + 1)
        .ok_or_else(|| Error::disk_layout(format!("no device label left for disk {}", index + 1)))?;
    Ok(format!("hd{}", *letter as char))
}

/// Path of the qcow2 image for `source` inside `dest_dir`.
pub fn qcow2_path(source: &Path, dest_dir: &Path) -> Result<PathBuf> {
    let stem = source.file_stem().ok_or_else(|| {
        Error::disk_layout(format!("'{}' has no file name", source.display()))
    })?;
    let mut file_name = stem.to_os_string();
    file_name.push(".");
    file_name.push(TARGET_FORMAT);
    Ok(dest_dir.join(file_name))
}

/// Convert every referenced disk image into `vm_dir`, in order.
///
/// `on_disk` is called with the zero-based index of each file before it is
/// processed. The first converter failure aborts the remaining disks; images
/// written so far stay on disk.
pub fn convert_disks(
    files: &[FileReference],
    descriptor_dir: &Path,
    vm_dir: &Path,
    converter: &dyn ImageConverter,
    mut on_disk: impl FnMut(usize),
) -> Result<Vec<ConvertedDisk>> {
    let mut converted = Vec::with_capacity(files.len());

    for (index, file) in files.iter().enumerate() {
        on_disk(index);

        let source = descriptor_dir.join(&file.href);
        let output = qcow2_path(&source, vm_dir)?;
        let device = device_label(index)?;
        debug!(source = %source.display(), output = %output.display(), %device, "disk mapping");

        let skipped = output.exists();
        if skipped {
            info!(output = %output.display(), "qcow2 image already exists, skipping conversion");
        } else {
            converter.convert(&source, &output)?;
        }

        let scribe_name = output
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();

        converted.push(ConvertedDisk {
            file_id: file.id.clone(),
            source,
            output,
            scribe_name,
            device,
            skipped,
        });
    }

    Ok(converted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_labels_skip_hda() {
        assert_eq!(device_label(0).unwrap(), "hdb");
        assert_eq!(device_label(1).unwrap(), "hdc");
        assert_eq!(device_label(2).unwrap(), "hdd");
        assert_eq!(device_label(24).unwrap(), "hdz");
    }

    #[test]
    fn test_device_label_out_of_letters() {
        assert!(matches!(device_label(25), Err(Error::DiskLayout { .. })));
    }

    #[test]
    fn test_qcow2_path_replaces_extension() {
        let path = qcow2_path(Path::new("/src/disk1.vmdk"), Path::new("out/vm1")).unwrap();
        assert_eq!(path, PathBuf::from("out/vm1/disk1.qcow2"));
    }

    #[test]
    fn test_qcow2_path_keeps_inner_dots() {
        let path = qcow2_path(Path::new("appliance.disk1.vmdk"), Path::new("vm")).unwrap();
        assert_eq!(path, PathBuf::from("vm/appliance.disk1.qcow2"));
    }

    #[test]
    fn test_qcow2_path_without_extension() {
        let path = qcow2_path(Path::new("raw-disk"), Path::new("vm")).unwrap();
        assert_eq!(path, PathBuf::from("vm/raw-disk.qcow2"));
    }

    #[test]
    fn test_qcow2_path_no_file_name() {
        assert!(matches!(
            qcow2_path(Path::new("/"), Path::new("vm")),
            Err(Error::DiskLayout { .. })
        ));
    }

    #[test]
    fn test_qemu_img_args() {
        let qemu = QemuImg::default();
        assert_eq!(qemu.program(), Path::new("qemu-img"));

        let args = qemu.args(Path::new("in.vmdk"), Path::new("out.qcow2"));
        let args: Vec<_> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec!["convert", "-O", "qcow2", "-o", "compat=0.10", "in.vmdk", "out.qcow2"]
        );
    }
}
