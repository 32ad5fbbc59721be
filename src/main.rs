use std::convert::TryFrom;
use std::env;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{bail, Context};
use log::{debug, error, info, warn};
use structopt::StructOpt;

use szg::board::BoardDescription;
use szg::image::{ihex, Image, Layout};
use szg::programmer::Programmer;
use szg::serial::{self, SerialSource};
use szg::szg::{Attribute, Dna, SequencerTable, SEQ_DATA_LENGTH};
use szg::{HexDump, Provisioning};

mod cli;

/// A file that is removed when it goes out of scope
struct TempFile(PathBuf);

impl TempFile {
    fn new(name: &str) -> TempFile {
        TempFile(env::temp_dir().join(format!("szg-{}-{}", process::id(), name)))
    }

    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.0) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!("Could not remove {}: {}", self.0.display(), err);
            }
        }
    }
}

fn open_board(path: &Path) -> Result<BoardDescription, anyhow::Error> {
    BoardDescription::open(path)
        .with_context(|| format!("Failed to read board description '{}'", path.display()))
}

fn write_binary(path: &Path, bytes: &[u8]) -> Result<(), anyhow::Error> {
    fs::write(path, bytes).with_context(|| format!("Failed to write '{}'", path.display()))?;

    debug!("Wrote {} bytes to {}", bytes.len(), path.display());

    Ok(())
}

fn load_firmware(path: &Path, layout: &Layout) -> Result<Image, anyhow::Error> {
    if path.extension().map_or(true, |ext| ext != "hex") {
        bail!("Firmware must be an Intel HEX file with a .hex extension");
    }

    let firmware = ihex::load(path, layout.erased)
        .with_context(|| format!("Failed to read firmware '{}'", path.display()))?;

    info!(
        "Read {} bytes of firmware from {}",
        firmware.len(),
        path.display()
    );

    Ok(firmware)
}

fn print_sequencer_table(table: &SequencerTable) {
    println!("Power Sequence Data:");
    print!("{}", HexDump(table.as_bytes()));

    for (i, channel) in table.channels().enumerate() {
        println!("  Channel {}: {}", i, channel);
    }
}

fn print_dna(dna: &Dna) {
    println!("DNA version: {}", dna.version);
    println!("Required version: {}", dna.required_version);
    println!("Manufacturer: {}", dna.manufacturer_name);
    println!("Product: {}", dna.product_name);
    println!("Model: {}", dna.product_model);
    println!("Version: {}", dna.product_version);
    println!("Serial: {}", dna.serial);
    println!(
        "Max load: 5V {} mA, 3V3 {} mA, VIO {} mA",
        dna.max_5v_load, dna.max_3v3_load, dna.max_vio_load
    );
    println!(
        "LVDS: {}, doublewide: {}, TXR4: {}",
        dna.attributes.contains(Attribute::Lvds),
        dna.attributes.contains(Attribute::Doublewide),
        dna.attributes.contains(Attribute::Txr4)
    );

    for (i, range) in dna.vio.iter().enumerate() {
        println!("  VIO range {}: {} - {}", i, range.min, range.max);
    }
}

fn encode_dna(opts: &cli::DnaOpts) -> Result<(), anyhow::Error> {
    let board = open_board(&opts.board)?;

    let serial = match SerialSource::resolve(
        opts.serial.as_deref(),
        board.serial.as_deref(),
        false,
        serial::today(),
    ) {
        SerialSource::Fixed(serial) => serial,
        SerialSource::Prefix(prefix) => {
            warn!("No serial given, using the date prefix {} as serial", prefix);
            prefix
        }
    };

    let dna = Dna::from_board(&board, &serial)?.to_bytes()?;

    println!("DNA Serial: {}", serial);
    println!("SYZYGY DNA Data:");
    print!("{}", HexDump(&dna));

    if let Some(out) = &opts.out {
        write_binary(out, &dna)?;
    }

    Ok(())
}

fn encode_sequencer(opts: &cli::SequencerOpts) -> Result<(), anyhow::Error> {
    let board = open_board(&opts.board)?;

    match SequencerTable::from_board(&board)? {
        Some(table) => {
            print_sequencer_table(&table);

            if let Some(out) = &opts.out {
                write_binary(out, table.as_bytes())?;
            }
        }
        None => println!("No Power Sequence Data Found"),
    }

    Ok(())
}

fn inspect(command: &cli::InspectCommand) -> Result<(), anyhow::Error> {
    use cli::InspectCommand;

    match command {
        InspectCommand::Dna { filename } => {
            let bytes = fs::read(filename)
                .with_context(|| format!("Failed to read '{}'", filename.display()))?;
            let dna = Dna::from_bytes(&bytes)
                .with_context(|| format!("Invalid DNA in '{}'", filename.display()))?;

            print_dna(&dna);
        }
        InspectCommand::Sequencer { filename } => {
            let bytes = fs::read(filename)
                .with_context(|| format!("Failed to read '{}'", filename.display()))?;
            let bytes = <[u8; SEQ_DATA_LENGTH]>::try_from(&bytes[..]).map_err(|_| {
                anyhow::anyhow!(
                    "'{}' is {} bytes long, a power sequence is {} bytes",
                    filename.display(),
                    bytes.len(),
                    SEQ_DATA_LENGTH
                )
            })?;

            print_sequencer_table(&SequencerTable::from_bytes(bytes));
        }
    }

    Ok(())
}

/// Asks the operator for the rest of the serial, returns `None` when they want to stop
fn prompt_serial<R: BufRead>(
    input: &mut R,
    board_path: &Path,
    prefix: &str,
) -> Result<Option<String>, anyhow::Error> {
    println!("DNA: {}", board_path.display());
    println!("Serial Prefix: {}", prefix);
    println!("Scan serial label barcode or type serial to complete the full serial value (value is case insensitive. q to exit)");
    print!("SERIAL: {}", prefix);
    io::stdout().flush()?;

    let mut line = String::new();

    if input.read_line(&mut line)? == 0 || line.trim() == "q" {
        return Ok(None);
    }

    Ok(Some(serial::complete(prefix, &line)))
}

/// Encodes, writes and programs the payloads of a single board
fn program_board(
    opts: &cli::ProgramOpts,
    board: &BoardDescription,
    layout: &Layout,
    firmware: Option<&Image>,
    programmer: &Programmer,
    serial: &str,
) -> Result<(), anyhow::Error> {
    println!("DNA Serial: {}", serial);

    let provisioning = Provisioning::encode(board, serial)?;

    // Build every image before anything is written out
    let images = match firmware {
        Some(firmware) => Some((
            provisioning.firmware_image(firmware, layout)?,
            provisioning.eeprom_image(layout)?,
        )),
        None => None,
    };

    println!("SYZYGY DNA Data:");
    print!("{}", HexDump(&provisioning.dna));

    if let Some(out) = &opts.dna_binary_out {
        write_binary(out, &provisioning.dna)?;
    }

    match &provisioning.sequencer {
        Some(table) => {
            print_sequencer_table(table);

            if let Some(out) = &opts.sequence_binary_out {
                write_binary(out, table.as_bytes())?;
            }
        }
        None => println!("No Power Sequence Data Found"),
    }

    let (firmware, eeprom) = match images {
        Some(images) => images,
        None => return Ok(()),
    };

    if let Some(out) = &opts.firmware_out {
        ihex::save(&firmware, out)
            .with_context(|| format!("Failed to write firmware '{}'", out.display()))?;

        info!("Wrote combined firmware to {}", out.display());

        return Ok(());
    }

    let firmware_hex = TempFile::new("fw_temp.hex");
    ihex::save(&firmware, firmware_hex.path())?;

    let eeprom_hex = match &eeprom {
        Some(eeprom) => {
            let file = TempFile::new("eeprom_temp.eep");
            ihex::save(eeprom, file.path())?;

            Some(file)
        }
        None => None,
    };

    programmer.program(firmware_hex.path(), eeprom_hex.as_ref().map(TempFile::path))?;

    Ok(())
}

fn program(opts: &cli::ProgramOpts) -> Result<(), anyhow::Error> {
    let board = open_board(&opts.board)?;
    let layout = opts.layout.layout();

    if opts.barcode_scan_mode && opts.firmware.is_none() {
        bail!("Barcode scan mode requires a firmware file (--firmware)");
    }

    let firmware = match &opts.firmware {
        Some(path) => Some(load_firmware(path, &layout)?),
        None => None,
    };

    let programmer = Programmer::new(&opts.programmer.executable, opts.programmer.settings());
    let source = SerialSource::resolve(
        opts.serial.as_deref(),
        board.serial.as_deref(),
        opts.barcode_scan_mode,
        serial::today(),
    );

    let stdin = io::stdin();
    let mut input = stdin.lock();

    loop {
        if opts.barcode_scan_mode {
            println!("\nBarcode Serial Scan Program Mode");
        }

        let serial = match &source {
            SerialSource::Fixed(serial) => serial.clone(),
            SerialSource::Prefix(prefix) => match prompt_serial(&mut input, &opts.board, prefix)? {
                Some(serial) => serial,
                None => break,
            },
        };

        let result = program_board(
            opts,
            &board,
            &layout,
            firmware.as_ref(),
            &programmer,
            &serial,
        );

        if !opts.barcode_scan_mode {
            return result;
        }

        match result {
            Ok(()) => println!("Finished Programming with serial: {}", serial),
            Err(err) => error!("Board with serial {} was not programmed: {:#}", serial, err),
        }
    }

    println!("DONE");

    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    use cli::Command;

    // Log verbosity is set through RUST_LOG
    pretty_env_logger::init_timed();

    let opts = cli::Opts::from_args();

    match &opts.command {
        Command::Dna(dna_opts) => encode_dna(dna_opts)?,
        Command::Sequencer(sequencer_opts) => encode_sequencer(sequencer_opts)?,
        Command::Program(program_opts) => program(program_opts)?,
        Command::Inspect(command) => inspect(command)?,
    }

    Ok(())
}
