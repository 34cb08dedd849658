//! ovf2scale Core Library
//!
//! This crate converts OVF virtual appliances into VM directories a Scale
//! Computing cluster can import.
//!
//! # Overview
//!
//! A conversion reads the OVF descriptor, transcodes every referenced disk
//! image to qcow2 with `qemu-img`, and renders a Scale VM descriptor from a
//! template. The main entry point is [`convert_vm`].
//!
//! # Modules
//!
//! - [`error`] - Error types and Result alias
//! - [`ovf`] - OVF descriptor loading and field extraction
//! - [`convert`] - Disk image conversion
//! - [`render`] - Scale VM descriptor rendering
//! - [`pipeline`] - Orchestrator running the full conversion
//!
//! # Quick Start
//!
//! ```no_run
//! use ovf2scale_core::{convert_vm, ConvertOptions, QemuImg};
//! use std::path::Path;
//!
//! let ovf_path = Path::new("/path/to/appliance.ovf");
//!
//! convert_vm(ovf_path, &ConvertOptions::default(), &QemuImg::default(), None).unwrap();
//! ```

pub mod convert;
pub mod error;
pub mod ovf;
pub mod pipeline;
pub mod render;

pub use error::{Error, Result};

// Re-export main conversion functionality for convenience
pub use convert::{ConvertedDisk, ImageConverter, QemuImg};
pub use ovf::{DiskEntry, FileReference, NetworkEntry, OvfDescriptor};
pub use pipeline::{
    convert_vm, get_ovf_info, ConversionReport, ConvertOptions, ConvertPhase, ConvertProgress,
    OvfInfo, ProgressCallback,
};
pub use render::{MacAddress, Template, VmRecord};
