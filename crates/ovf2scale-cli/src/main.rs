//! ovf2scale CLI - Convert OVF appliances to Scale Computing format.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use ovf2scale_core::convert::DEFAULT_CONVERTER;
use ovf2scale_core::pipeline::DEFAULT_TEMPLATE;
use ovf2scale_core::{
    convert_vm, get_ovf_info, ConvertOptions, ConvertPhase, ConvertProgress, ProgressCallback,
    QemuImg,
};
use tracing_subscriber::EnvFilter;

/// Convert an OVF file to Scale Computing format.
#[derive(Parser)]
#[command(name = "ovf2scale")]
#[command(version, about, long_about = None)]
struct Cli {
    /// OVF file to convert.
    ovffile: PathBuf,

    /// Optional filename for output.
    #[arg(short, long)]
    outfile: Option<PathBuf>,

    /// Directory in which the VM directory is created.
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Scale VM descriptor template.
    #[arg(long, default_value = DEFAULT_TEMPLATE)]
    template: PathBuf,

    /// Disk image converter program.
    #[arg(long, env = "OVF2SCALE_CONVERTER", default_value = DEFAULT_CONVERTER)]
    converter: PathBuf,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print what the OVF file describes and exit.
    #[arg(long)]
    info: bool,

    /// Suppress progress output.
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    if cli.info {
        return show_info(&cli.ovffile);
    }

    if let Some(outfile) = &cli.outfile {
        tracing::warn!(outfile = %outfile.display(), "--outfile is not used yet and will be ignored");
    }

    run_convert(&cli)
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run_convert(cli: &Cli) -> Result<()> {
    let options = ConvertOptions::new(&cli.output_dir, &cli.template);
    let converter = QemuImg::new(&cli.converter);

    let progress_bar = if cli.quiet {
        None
    } else {
        let pb = ProgressBar::new(0);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-");
        pb.set_style(style);
        Some(pb)
    };

    let callback: Option<ProgressCallback> = progress_bar.clone().map(|pb| {
        Box::new(move |progress: ConvertProgress| {
            pb.set_length(progress.total_disks as u64);

            let phase_msg = match progress.phase {
                ConvertPhase::Parsing => "Parsing...".to_string(),
                ConvertPhase::Converting => {
                    pb.set_position(progress.current_disk.saturating_sub(1) as u64);
                    format!("Converting disk {}", progress.current_disk)
                }
                ConvertPhase::Rendering => {
                    pb.set_position(progress.total_disks as u64);
                    "Rendering...".to_string()
                }
                ConvertPhase::Complete => "Complete!".to_string(),
            };
            pb.set_message(phase_msg);
        }) as ProgressCallback
    });

    let report = convert_vm(&cli.ovffile, &options, &converter, callback)?;

    if let Some(pb) = progress_bar {
        pb.finish_with_message("Complete!");
    }

    if !cli.quiet {
        println!();
        println!("VM:          {}", report.vm_name);
        println!("UUID:        {}", report.uuid);
        println!("Directory:   {}", report.vm_dir.display());
        for disk in &report.disks {
            let note = if disk.skipped { " (existing)" } else { "" };
            println!(
                "Disk {}:    {} -> {}{}",
                disk.device,
                disk.source.display(),
                disk.output.display(),
                note
            );
        }
        for mac in &report.macs {
            println!("Interface:   {}", mac);
        }
        println!();
        println!(
            "Conversion completed successfully: {}",
            report.descriptor_path.display()
        );
    }

    Ok(())
}

fn show_info(ovffile: &Path) -> Result<()> {
    let info = get_ovf_info(ovffile)?;

    println!("OVF Information");
    println!("===============");
    println!();
    println!("Name:      {}", info.name);
    println!();

    if info.files.is_empty() {
        println!("Files:     None");
    } else {
        println!("Files:");
        for (i, file) in info.files.iter().enumerate() {
            println!("  {}. {} ({})", i + 1, file.href, file.id);
        }
    }

    if !info.disks.is_empty() {
        println!("Disks:");
        for disk in &info.disks {
            println!(
                "  {} -> {} [{}, {}]",
                disk.disk_id,
                disk.file_ref.as_deref().unwrap_or("-"),
                disk.capacity.as_deref().unwrap_or("unknown capacity"),
                disk.format.as_deref().unwrap_or("unknown format")
            );
        }
    }

    println!("Networks:  {}", info.networks.len());
    for network in &info.networks {
        println!("  {}", network.name.as_deref().unwrap_or("(unnamed)"));
    }

    Ok(())
}
