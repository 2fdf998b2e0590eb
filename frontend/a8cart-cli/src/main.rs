mod programmer;
mod save;

use crate::programmer::Programmer;
use crate::save::FsSaveWriter;
use a8cart_config::{CartridgeConfig, CartridgeType};
use a8cart_core::cartridge::Cartridge;
use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use env_logger::Env;
use std::fs;
use std::io::{self, Write};
use std::num::ParseIntError;
use std::ops::Range;
use std::path::{Path, PathBuf};

const DUMP_ROW_LEN: usize = 16;

#[derive(Debug, Parser)]
struct Args {
    /// TOML cartridge config file; when set, --cartridge-type and --image are ignored
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Cartridge type, e.g. Mega512 / Sic256 / SicPlus1024 / JaCart128 / TheCart32M
    #[arg(short = 't', long)]
    cartridge_type: Option<CartridgeType>,

    /// Cartridge image file path
    #[arg(short = 'i', long)]
    image: Option<PathBuf>,

    /// Path stem for EEPROM save files, defaults to the image path
    #[arg(long)]
    nvram: Option<PathBuf>,

    /// Start from a fully erased image if the image file does not exist
    #[arg(long, default_value_t)]
    create: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the cartridge type and its flash chips
    Info,
    /// Read manufacturer and device IDs from every flash chip
    Identify,
    /// Erase every flash chip, or only the sectors at the given offset or bank
    Erase {
        /// Image offset within the sector to erase (decimal, or hex with 0x / $ prefix)
        #[arg(long, value_parser = parse_offset, conflicts_with = "bank")]
        sector: Option<usize>,

        /// Erase every sector overlapping this bank
        #[arg(long, value_parser = parse_offset)]
        bank: Option<usize>,
    },
    /// Program a file into flash
    Program {
        /// File to program
        file: PathBuf,

        /// Image offset to start programming at
        #[arg(long, default_value = "0", value_parser = parse_offset)]
        offset: usize,

        /// Erase every sector the file overlaps before programming
        #[arg(long, default_value_t)]
        erase: bool,
    },
    /// Dump cartridge contents as read through the CPU bus
    Dump {
        #[arg(long, default_value = "0", value_parser = parse_offset)]
        offset: usize,

        /// Dump a single bank; overrides --offset and --length
        #[arg(long, value_parser = parse_offset)]
        bank: Option<usize>,

        /// Number of bytes, defaults to the rest of the image
        #[arg(long, value_parser = parse_offset)]
        length: Option<usize>,

        /// Raw output file; prints a hex dump to stdout if not set
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },
}

fn parse_offset(s: &str) -> Result<usize, ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).or_else(|| s.strip_prefix('$')) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

fn load_config(args: &Args) -> anyhow::Result<CartridgeConfig> {
    let mut config: CartridgeConfig = match &args.config {
        Some(path) => {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Unable to read config file '{}'", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Unable to parse config file '{}'", path.display()))?
        }
        None => {
            let Some(cartridge_type) = args.cartridge_type else {
                bail!("--cartridge-type is required when --config is not set");
            };
            let Some(image_path) = args.image.clone() else {
                bail!("--image is required when --config is not set");
            };

            CartridgeConfig { cartridge_type, image_path, nvram_path: None }
        }
    };

    if let Some(nvram_path) = &args.nvram {
        config.nvram_path = Some(nvram_path.clone());
    }

    Ok(config)
}

fn load_cartridge(config: &CartridgeConfig, create: bool) -> anyhow::Result<Cartridge> {
    if create && !config.image_path.exists() {
        log::info!(
            "Image '{}' does not exist; starting from an erased image",
            config.image_path.display()
        );
        return Ok(Cartridge::blank(config.cartridge_type));
    }

    let image = fs::read(&config.image_path)
        .with_context(|| format!("Unable to read image '{}'", config.image_path.display()))?;
    let cartridge = Cartridge::create(config.cartridge_type, image)?;

    Ok(cartridge)
}

fn print_info(cartridge: &Cartridge) {
    let cartridge_type = cartridge.cartridge_type();
    println!("{} ({cartridge_type})", cartridge_type.description());
    println!("  family: {}", cartridge_type.family());
    println!("  size:   {} KB", cartridge_type.size_kb());

    if cartridge.chips().is_empty() {
        println!("  mask ROM, no flash");
        return;
    }

    for (i, chip) in cartridge.chips().iter().enumerate() {
        let flash_type = chip.flash_type();
        let (manufacturer, device) = flash_type.ids();
        println!(
            "  chip {i}: {flash_type}, {} KB, ID {manufacturer:02X}/{device:02X}{}",
            flash_type.size() / 1024,
            if flash_type.supports_multi_sector_erase() { ", multi-sector erase" } else { "" }
        );
    }
}

fn write_hex_dump(offset: usize, bytes: &[u8], out: &mut impl Write) -> io::Result<()> {
    for (row, chunk) in bytes.chunks(DUMP_ROW_LEN).enumerate() {
        write!(out, "{:08X}:", offset + row * DUMP_ROW_LEN)?;
        for byte in chunk {
            write!(out, " {byte:02X}")?;
        }
        writeln!(out)?;
    }

    Ok(())
}

fn erase_range(programmer: &mut Programmer, range: Range<usize>) -> anyhow::Result<()> {
    for sector in programmer.erase_range(range)? {
        log::info!("Erased sector {:#X}..{:#X}", sector.start, sector.end);
    }

    Ok(())
}

fn run_command(command: &Command, programmer: &mut Programmer) -> anyhow::Result<()> {
    match command {
        Command::Info => print_info(programmer.cartridge()),
        Command::Identify => {
            for (i, id) in programmer.identify()?.into_iter().enumerate() {
                let status = if id.matches_expected() { "OK" } else { "MISMATCH" };
                println!(
                    "chip {i}: {} manufacturer {:02X} device {:02X} [{status}]",
                    id.flash_type, id.manufacturer, id.device
                );
            }
        }
        Command::Erase { sector: Some(offset), .. } => {
            let sector = programmer.erase_sector(*offset)?;
            log::info!("Erased sector {:#X}..{:#X}", sector.start, sector.end);
        }
        Command::Erase { sector: None, bank: Some(bank) } => {
            let bank_len = programmer.bank_len();
            erase_range(programmer, bank * bank_len..(bank + 1) * bank_len)?;
        }
        Command::Erase { sector: None, bank: None } => {
            programmer.erase_chips()?;
            log::info!("Erased all flash chips");
        }
        Command::Program { file, offset, erase } => {
            let data = fs::read(file)
                .with_context(|| format!("Unable to read file '{}'", file.display()))?;

            if *erase {
                erase_range(programmer, *offset..offset + data.len())?;
            }

            let programmed = programmer.program(*offset, &data)?;
            log::info!(
                "Programmed {programmed} bytes at {offset:#X} from '{}', verified {} bytes",
                file.display(),
                data.len()
            );
        }
        Command::Dump { offset, bank, length, output } => {
            let (offset, length) = match bank {
                Some(bank) => (bank * programmer.bank_len(), programmer.bank_len()),
                None => {
                    let image_len = programmer.cartridge().image().len();
                    (*offset, length.unwrap_or_else(|| image_len.saturating_sub(*offset)))
                }
            };
            let bytes = programmer.dump(offset, length)?;

            match output {
                Some(path) => {
                    fs::write(path, &bytes)
                        .with_context(|| format!("Unable to write '{}'", path.display()))?;
                    log::info!("Wrote {} bytes to '{}'", bytes.len(), path.display());
                }
                None => write_hex_dump(offset, &bytes, &mut io::stdout().lock())?,
            }
        }
    }

    Ok(())
}

fn save_image(path: &Path, cartridge: &Cartridge) -> anyhow::Result<()> {
    fs::write(path, cartridge.image())
        .with_context(|| format!("Unable to write image '{}'", path.display()))?;
    log::info!("Saved modified image to '{}'", path.display());

    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = load_config(&args)?;
    log::debug!("Cartridge config: {config:?}");

    let mut cartridge = load_cartridge(&config, args.create)?;
    let mut save_writer = FsSaveWriter::new(config.nvram_path().clone());
    cartridge.load_nvram(&mut save_writer);

    let mut programmer = Programmer::new(cartridge);
    run_command(&args.command, &mut programmer)?;

    let mut cartridge = programmer.into_cartridge();
    cartridge.persist_nvram(&mut save_writer)?;
    if cartridge.is_dirty() {
        save_image(&config.image_path, &cartridge)?;
    }

    Ok(())
}
