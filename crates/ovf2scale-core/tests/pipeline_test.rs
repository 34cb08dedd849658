//! Integration tests for the full OVF to Scale conversion.

use ovf2scale_core::{
    convert_vm, get_ovf_info, ConvertOptions, ConvertPhase, ConvertProgress, Error,
    ImageConverter, Result,
};
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use uuid::Uuid;

/// Records every conversion and writes a placeholder image.
#[derive(Default)]
struct RecordingConverter {
    calls: RefCell<Vec<PathBuf>>,
}

impl ImageConverter for RecordingConverter {
    fn convert(&self, source: &Path, destination: &Path) -> Result<()> {
        self.calls.borrow_mut().push(source.to_path_buf());
        fs::write(destination, b"QFI\xfb").map_err(|e| Error::io(e, destination))
    }
}

struct BrokenConverter;

impl ImageConverter for BrokenConverter {
    fn convert(&self, _source: &Path, _destination: &Path) -> Result<()> {
        Err(Error::converter("qemu-img exited with status 1"))
    }
}

const STREAM_OPTIMIZED: &str =
    "http://www.vmware.com/interfaces/specifications/vmdk.html#streamOptimized";

/// The template shipped at the repository root.
fn shipped_template() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../scalevm-template.xml")
}

fn write_ovf(dir: &Path, files: &[(&str, &str)], networks: usize) -> PathBuf {
    let refs: String = files
        .iter()
        .map(|(id, href)| format!(r#"<File ovf:id="{}" ovf:href="{}"/>"#, id, href))
        .collect();
    let disks: String = files
        .iter()
        .enumerate()
        .map(|(i, (id, _))| {
            format!(
                r#"<Disk ovf:diskId="vmdisk{}" ovf:fileRef="{}" ovf:format="{}"/>"#,
                i + 1,
                id,
                STREAM_OPTIMIZED
            )
        })
        .collect();
    let nets: String = (0..networks)
        .map(|i| format!(r#"<Network ovf:name="net{}"/>"#, i))
        .collect();

    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Envelope xmlns="http://schemas.dmtf.org/ovf/envelope/1" xmlns:ovf="http://schemas.dmtf.org/ovf/envelope/1">
  <References>{}</References>
  <DiskSection><Info>Disks</Info>{}</DiskSection>
  <NetworkSection><Info>Networks</Info>{}</NetworkSection>
  <VirtualSystem ovf:id="vm1"><Info>A virtual machine</Info></VirtualSystem>
</Envelope>"#,
        refs, disks, nets
    );

    let path = dir.join("vm1.ovf");
    fs::write(&path, xml).unwrap();
    path
}

fn options(temp: &TempDir) -> ConvertOptions {
    ConvertOptions::new(temp.path().join("out"), shipped_template())
}

fn extract_uuid(xml: &str) -> Uuid {
    let start = xml.find("<uuid>").expect("uuid element") + "<uuid>".len();
    let end = xml[start..].find("</uuid>").unwrap() + start;
    Uuid::parse_str(&xml[start..end]).expect("valid UUID")
}

#[test]
fn test_convert_single_disk_vm() {
    let temp = TempDir::new().unwrap();
    let ovf = write_ovf(temp.path(), &[("f1", "disk1.vmdk")], 1);
    let converter = RecordingConverter::default();

    let report = convert_vm(&ovf, &options(&temp), &converter, None).expect("conversion");

    let vm_dir = temp.path().join("out").join("vm1");
    assert_eq!(report.vm_name, "vm1");
    assert_eq!(report.vm_dir, vm_dir);
    assert_eq!(report.descriptor_path, vm_dir.join("vm1.xml"));
    assert!(vm_dir.join("disk1.qcow2").exists());
    assert_eq!(*converter.calls.borrow(), vec![temp.path().join("disk1.vmdk")]);

    let xml = fs::read_to_string(vm_dir.join("vm1.xml")).unwrap();
    assert!(xml.contains("<name>vm1</name>"));
    assert_eq!(xml.matches("<disk ").count(), 1);
    assert!(xml.contains(r#"<source protocol="scribe" name="scribe/disk1"/>"#));
    assert!(xml.contains(r#"<target dev="hdb"/>"#));
    assert_eq!(xml.matches("<interface ").count(), 1);
    assert!(xml.contains(&format!(r#"<mac address="{}"/>"#, report.macs[0])));
    assert!(xml.contains("Testing conversion"));
    assert!(xml.contains(r#"<memory unit="MiB">2048</memory>"#));
    assert!(xml.contains(r#"<vcpu placement="static">1</vcpu>"#));
    assert!(!xml.contains('$'));

    let uuid = extract_uuid(&xml);
    assert_eq!(uuid, report.uuid);
    assert_eq!(uuid.get_version_num(), 4);
}

#[test]
fn test_snippet_counts_follow_document() {
    let temp = TempDir::new().unwrap();
    let ovf = write_ovf(
        temp.path(),
        &[("f1", "a.vmdk"), ("f2", "b.vmdk"), ("f3", "c.vmdk")],
        2,
    );

    let report =
        convert_vm(&ovf, &options(&temp), &RecordingConverter::default(), None).unwrap();
    let xml = fs::read_to_string(&report.descriptor_path).unwrap();

    assert_eq!(xml.matches("<disk ").count(), 3);
    assert_eq!(xml.matches("<interface ").count(), 2);

    let a = xml.find("scribe/a").unwrap();
    let b = xml.find("scribe/b").unwrap();
    let c = xml.find("scribe/c").unwrap();
    assert!(a < b && b < c);

    let devices: Vec<_> = report.disks.iter().map(|d| d.device.as_str()).collect();
    assert_eq!(devices, vec!["hdb", "hdc", "hdd"]);

    for mac in &report.macs {
        assert!(mac.to_string().starts_with("7c:4c:58:"));
    }
}

#[test]
fn test_no_disks_no_networks() {
    let temp = TempDir::new().unwrap();
    let ovf = write_ovf(temp.path(), &[], 0);

    let report =
        convert_vm(&ovf, &options(&temp), &RecordingConverter::default(), None).unwrap();
    let xml = fs::read_to_string(&report.descriptor_path).unwrap();

    assert!(report.disks.is_empty());
    assert!(report.macs.is_empty());
    assert!(!xml.contains("<disk "));
    assert!(!xml.contains("<interface "));
}

#[test]
fn test_rerun_skips_conversion_and_changes_uuid() {
    let temp = TempDir::new().unwrap();
    let ovf = write_ovf(temp.path(), &[("f1", "disk1.vmdk")], 1);

    let first = RecordingConverter::default();
    let report1 = convert_vm(&ovf, &options(&temp), &first, None).unwrap();
    let xml1 = fs::read_to_string(&report1.descriptor_path).unwrap();

    let second = RecordingConverter::default();
    let report2 = convert_vm(&ovf, &options(&temp), &second, None).unwrap();
    let xml2 = fs::read_to_string(&report2.descriptor_path).unwrap();

    assert_eq!(first.calls.borrow().len(), 1);
    assert!(second.calls.borrow().is_empty());
    assert!(report2.disks[0].skipped);

    assert_ne!(extract_uuid(&xml1), extract_uuid(&xml2));
    assert_ne!(report1.macs, report2.macs);
    assert_ne!(xml1, xml2);
}

#[test]
fn test_missing_template_writes_nothing() {
    let temp = TempDir::new().unwrap();
    let ovf = write_ovf(temp.path(), &[("f1", "disk1.vmdk")], 1);
    let options = ConvertOptions::new(temp.path().join("out"), temp.path().join("missing.xml"));
    let converter = RecordingConverter::default();

    let err = convert_vm(&ovf, &options, &converter, None).unwrap_err();

    assert!(matches!(err, Error::Io { path: Some(_), .. }));
    assert!(converter.calls.borrow().is_empty());
    assert!(!temp.path().join("out").exists());
}

#[test]
fn test_converter_failure_aborts_before_descriptor() {
    let temp = TempDir::new().unwrap();
    let ovf = write_ovf(temp.path(), &[("f1", "disk1.vmdk")], 1);

    let err = convert_vm(&ovf, &options(&temp), &BrokenConverter, None).unwrap_err();

    assert!(matches!(err, Error::Converter { .. }));
    assert!(!temp.path().join("out/vm1/vm1.xml").exists());
}

#[test]
fn test_invalid_template_writes_no_descriptor() {
    let temp = TempDir::new().unwrap();
    let ovf = write_ovf(temp.path(), &[], 1);
    let template = temp.path().join("bad-template.xml");
    fs::write(&template, "<domain>$vm_name $unknown</domain>").unwrap();
    let options = ConvertOptions::new(temp.path().join("out"), &template);

    let err = convert_vm(&ovf, &options, &RecordingConverter::default(), None).unwrap_err();

    assert!(matches!(err, Error::Template { .. }));
    assert!(!temp.path().join("out/vm1/vm1.xml").exists());
}

#[test]
fn test_existing_descriptor_is_overwritten() {
    let temp = TempDir::new().unwrap();
    let ovf = write_ovf(temp.path(), &[], 0);
    let vm_dir = temp.path().join("out/vm1");
    fs::create_dir_all(&vm_dir).unwrap();
    fs::write(vm_dir.join("vm1.xml"), "stale").unwrap();

    convert_vm(&ovf, &options(&temp), &RecordingConverter::default(), None).unwrap();

    let xml = fs::read_to_string(vm_dir.join("vm1.xml")).unwrap();
    assert!(xml.contains("<name>vm1</name>"));
}

#[test]
fn test_progress_phases() {
    let temp = TempDir::new().unwrap();
    let ovf = write_ovf(temp.path(), &[("f1", "a.vmdk"), ("f2", "b.vmdk")], 1);
    let seen: Arc<Mutex<Vec<ConvertProgress>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    convert_vm(
        &ovf,
        &options(&temp),
        &RecordingConverter::default(),
        Some(Box::new(move |p: ConvertProgress| {
            sink.lock().unwrap().push(p)
        })),
    )
    .unwrap();

    let seen = seen.lock().unwrap();
    let phases: Vec<_> = seen.iter().map(|p| (p.phase, p.current_disk)).collect();
    assert_eq!(
        phases,
        vec![
            (ConvertPhase::Parsing, 0),
            (ConvertPhase::Converting, 1),
            (ConvertPhase::Converting, 2),
            (ConvertPhase::Rendering, 2),
            (ConvertPhase::Complete, 2),
        ]
    );
    assert!(seen.iter().all(|p| p.total_disks == 2));
}

#[test]
fn test_get_ovf_info() {
    let temp = TempDir::new().unwrap();
    let ovf = write_ovf(temp.path(), &[("f1", "a.vmdk"), ("f2", "b.vmdk")], 3);

    let info = get_ovf_info(&ovf).unwrap();

    assert_eq!(info.name, "vm1");
    assert_eq!(info.files.len(), 2);
    assert_eq!(info.disks[1].file_ref.as_deref(), Some("f2"));
    assert_eq!(info.disks[1].format.as_deref(), Some(STREAM_OPTIMIZED));
    assert_eq!(info.networks.len(), 3);
    assert_eq!(info.networks[0].name.as_deref(), Some("net0"));
    assert!(!temp.path().join("vm1").exists());
}
