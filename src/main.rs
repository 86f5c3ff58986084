use clap::{Arg, ArgAction, Command, value_parser};
use clap_num::maybe_hex;
use exhume_body::{Body, BodySlice};
use exhume_mft::{AttributeForm, FileRecord, MasterFileTable, NtfsVolume, Volume};
use log::{debug, error, info};
use prettytable::{Table, row};
use serde_json::json;
use std::fs::File;
use std::io::{BufWriter, Write};

fn main() {
    let matches = Command::new("exhume_mft")
        .version("0.1.0")
        .author("ForensicXlab")
        .about("Exhume the file records of an NTFS partition straight from its sectors.")
        .arg(
            Arg::new("body")
                .short('b')
                .long("body")
                .value_parser(value_parser!(String))
                .required(true)
                .help("The path to the body to exhume."),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .value_parser(value_parser!(String))
                .required(false)
                .help("The format of the file, either 'raw' or 'ewf'."),
        )
        .arg(
            Arg::new("offset")
                .short('o')
                .long("offset")
                .value_parser(maybe_hex::<u64>)
                .required(true)
                .help("The NTFS partition starts at address (decimal or hex)."),
        )
        .arg(
            Arg::new("size")
                .short('s')
                .long("size")
                .value_parser(maybe_hex::<u64>)
                .required(true)
                .help("The size of the NTFS partition in sectors (decimal or hex)."),
        )
        .arg(
            Arg::new("pbs")
                .long("pbs")
                .action(ArgAction::SetTrue)
                .help("Display the partition boot sector information."),
        )
        .arg(
            Arg::new("mft")
                .long("mft")
                .action(ArgAction::SetTrue)
                .help("Display the bootstrap records of the master file table."),
        )
        .arg(
            Arg::new("file_id")
                .long("file")
                .value_parser(maybe_hex::<u64>)
                .help("Display the file record with this number."),
        )
        .arg(
            Arg::new("attributes")
                .long("attributes")
                .action(ArgAction::SetTrue)
                .requires("file_id")
                .help("List the attributes and data runs of the record (requires --file)."),
        )
        .arg(
            Arg::new("dump")
                .long("dump")
                .action(ArgAction::SetTrue)
                .requires("file_id")
                .help("Dump the unnamed $DATA stream to file_<ID>.bin (requires --file)."),
        )
        .arg(
            Arg::new("json")
                .short('j')
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Output certain structures (pbs, mft, file) in JSON format."),
        )
        .arg(
            Arg::new("log_level")
                .short('l')
                .long("log-level")
                .value_parser(["error", "warn", "info", "debug", "trace"])
                .default_value("info")
                .help("Set the log verbosity level"),
        )
        .get_matches();

    // Initialize logger.
    let log_level_str = matches.get_one::<String>("log_level").unwrap();
    let level_filter = match log_level_str.as_str() {
        "error" => log::LevelFilter::Error,
        "warn" => log::LevelFilter::Warn,
        "info" => log::LevelFilter::Info,
        "debug" => log::LevelFilter::Debug,
        "trace" => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    };
    env_logger::Builder::new().filter_level(level_filter).init();

    let file_path = matches.get_one::<String>("body").unwrap();
    let auto = String::from("auto");
    let format = matches.get_one::<String>("format").unwrap_or(&auto);
    let offset = matches.get_one::<u64>("offset").unwrap();
    let size = matches.get_one::<u64>("size").unwrap();
    let show_pbs = matches.get_flag("pbs");
    let show_mft = matches.get_flag("mft");
    let show_attributes = matches.get_flag("attributes");
    let dump_file = matches.get_flag("dump");
    let json_output = matches.get_flag("json");
    let file_id = matches.get_one::<u64>("file_id").copied();

    let mut body = Body::new(file_path.to_owned(), format);
    debug!("Created Body from '{}'", file_path);

    let partition_size = *size * body.get_sector_size() as u64;
    let mut slice = match BodySlice::new(&mut body, *offset, partition_size) {
        Ok(sl) => sl,
        Err(e) => {
            error!("Could not create BodySlice: {}", e);
            return;
        }
    };

    let mut volume = match NtfsVolume::new(&mut slice) {
        Ok(v) => v,
        Err(e) => {
            error!("Couldn't open NTFS: {}", e);
            return;
        }
    };

    if show_pbs {
        if json_output {
            match serde_json::to_string_pretty(&volume.pbs.to_json()) {
                Ok(s) => println!("{}", s),
                Err(e) => error!("Error serializing PBS to JSON: {}", e),
            }
        } else {
            println!("{}", volume.pbs.to_string());
        }
    }

    if !show_mft && file_id.is_none() {
        return;
    }

    let mft = match MasterFileTable::bootstrap(&mut volume) {
        Ok(mft) => mft,
        Err(e) => {
            error!("Couldn't bootstrap the master file table: {}", e);
            return;
        }
    };

    if show_mft {
        if json_output {
            match serde_json::to_string_pretty(&mft.to_json()) {
                Ok(s) => println!("{}", s),
                Err(e) => error!("Error serializing MFT to JSON: {}", e),
            }
        } else {
            print_mft(&mft);
        }
    }

    let Some(file_id) = file_id else {
        return;
    };

    let record = match mft.read_record(&mut volume, file_id) {
        Ok(r) => r,
        Err(e) => {
            error!("Cannot read file record {}: {}", file_id, e);
            return;
        }
    };

    if dump_file {
        dump_stream(&mut volume, &record, file_id);
    } else if show_attributes {
        if json_output {
            match serde_json::to_string_pretty(&json!({ "attributes": record.attributes() })) {
                Ok(s) => println!("{}", s),
                Err(e) => error!("Error serializing attributes to JSON: {}", e),
            }
        } else {
            print_attributes(&record);
        }
    } else if json_output {
        println!("{}", record.to_json());
    } else {
        println!("{}", record.to_string());
    }
}

fn print_mft(mft: &MasterFileTable) {
    let mut t = Table::new();
    t.add_row(row!["Record", "In use", "Directory", "Name"]);
    for record in mft.records() {
        t.add_row(row![
            record.record_number(),
            record.is_in_use(),
            record.is_directory(),
            record.filename()
        ]);
    }
    println!("Volume name: {}", mft.volume_name().unwrap_or("‑"));
    match mft.record_count() {
        Ok(n) => println!("Record slots: {}", n),
        Err(e) => error!("Cannot size the master file table: {}", e),
    }
    println!("{}", t);
}

fn print_attributes(record: &FileRecord) {
    for attr in record.attributes() {
        println!(
            "{} #{} name={} size={}",
            attr.attr_type().label(),
            attr.id(),
            attr.name().unwrap_or("N/A"),
            attr.value_size()
        );
        match &attr.form {
            AttributeForm::Resident(r) => println!("  resident, {} byte(s) at 0x{:X}", r.value_length, r.value_offset),
            AttributeForm::NonResident(nr) if nr.run_list_corrupt => println!("  non-resident, corrupt run list"),
            AttributeForm::NonResident(nr) => {
                for (block, lcn) in nr.data_blocks.iter().zip(nr.block_lcns()) {
                    match lcn {
                        Some(lcn) => println!("  VCN {}..={} -> LCN {}", block.start_vcn, block.last_vcn, lcn),
                        None => println!("  VCN {}..={} sparse", block.start_vcn, block.last_vcn),
                    }
                }
            }
        }
    }
}

fn dump_stream<V: Volume + ?Sized>(volume: &mut V, record: &FileRecord, file_id: u64) {
    let Some(stream) = record.file_stream() else {
        error!("Record {} has no unnamed $DATA stream.", file_id);
        return;
    };

    let out_name = format!("file_{:X}.bin", file_id);
    let file = match File::create(&out_name) {
        Ok(f) => f,
        Err(e) => {
            error!("Cannot create dump: {}", e);
            return;
        }
    };
    let mut sink = BufWriter::new(file);
    match stream
        .copy_to(volume, &mut sink)
        .and_then(|n| sink.flush().map(|_| n).map_err(Into::into))
    {
        Ok(written) => {
            info!("Dumped {} bytes to {}", written, out_name);
            println!("Dumped {} bytes to {}", written, out_name);
        }
        Err(e) => error!("Dump failed: {}", e),
    }
}
