#![forbid(unsafe_code)]
//! Command-line front end: argument parsing, terminal checks, the
//! default pass collaborator, and fatal-error reporting with
//! remediation hints. This is the only place that calls
//! `process::exit`.

use rfsck_check::{
    CheckConfig, CheckPasses, DefectLedger, Orchestrator, PassVerdict, RunMode, RunOutcome,
};
use rfsck_core::FsImage;
use rfsck_error::{EXIT_ERROR, EXIT_USAGE, FsckError, OpenError, Result};
use std::io::IsTerminal;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
struct CliOptions {
    config: CheckConfig,
    verbose: bool,
    json_stats: bool,
}

fn usage(program: &str) -> String {
    format!(
        "usage: {program} [options] device\n\
         \n\
         options:\n\
         \x20 -p, -a        preen: repair safely without questions\n\
         \x20 -n            answer no to all questions (opens read-only)\n\
         \x20 -y            answer yes to all questions\n\
         \x20 -f            force checking even if the filesystem is clean\n\
         \x20 -c            scan for bad blocks before checking\n\
         \x20 -v            verbose diagnostics\n\
         \x20 -b block      use an alternate superblock at this block\n\
         \x20 -B size       block size in bytes (with -b)\n\
         \x20 -l file       add the blocks listed in file to the bad block list\n\
         \x20 -L file       set the bad block list from file\n\
         \x20 --active-root the device is the active root, mounted read-write\n\
         \x20 --json        print end-of-run statistics as JSON"
    )
}

fn next_u32<'a>(iter: &mut impl Iterator<Item = &'a String>, flag: &str) -> Result<u32> {
    iter.next()
        .ok_or_else(|| FsckError::Usage(format!("{flag} requires an argument")))?
        .parse()
        .map_err(|_| FsckError::Usage(format!("{flag} requires a block number")))
}

fn parse_args(args: &[String]) -> Result<CliOptions> {
    let mut config = CheckConfig::new("");
    let mut verbose = false;
    let mut json_stats = false;
    let mut device = None;

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-p" | "-a" => {
                config.mode = RunMode::Preen;
                config.writable = true;
            }
            "-n" => {
                config.mode = RunMode::AssumeNo;
                config.writable = false;
            }
            "-y" => {
                config.mode = RunMode::AssumeYes;
                config.writable = true;
            }
            "-f" => config.force = true,
            "-c" => config.surface_test = true,
            "-v" => verbose = true,
            "-b" => config.superblock = Some(next_u32(&mut iter, "-b")?),
            "-B" => config.block_size = Some(next_u32(&mut iter, "-B")?),
            "-l" | "-L" => {
                let file = iter
                    .next()
                    .ok_or_else(|| FsckError::Usage(format!("{arg} requires a file name")))?;
                config.bad_blocks_file = Some(file.into());
                config.replace_bad_blocks = arg == "-L";
            }
            "--active-root" => config.active_root_rw = true,
            "--json" => json_stats = true,
            other if other.starts_with('-') => {
                return Err(FsckError::Usage(format!("unknown option {other}")));
            }
            _ => {
                if device.replace(arg.clone()).is_some() {
                    return Err(FsckError::Usage("more than one device given".into()));
                }
            }
        }
    }

    let Some(device) = device else {
        return Err(FsckError::Usage("no device given".into()));
    };
    config.device_path = device.into();
    Ok(CliOptions {
        config,
        verbose,
        json_stats,
    })
}

/// Pass collaborator shipped with the CLI. The structural passes are
/// provided by a separate engine; this stub keeps the control flow
/// honest and reports end-of-run statistics.
struct DefaultPasses {
    json_stats: bool,
}

impl CheckPasses for DefaultPasses {
    fn pass1(&mut self, _img: &mut FsImage, _ledger: &mut DefectLedger) -> Result<PassVerdict> {
        debug!("pass 1: inodes, blocks, sizes");
        Ok(PassVerdict::Continue)
    }

    fn pass2(&mut self, _img: &mut FsImage) -> Result<()> {
        debug!("pass 2: directory structure");
        Ok(())
    }

    fn pass3(&mut self, _img: &mut FsImage) -> Result<()> {
        debug!("pass 3: directory connectivity");
        Ok(())
    }

    fn pass4(&mut self, _img: &mut FsImage) -> Result<()> {
        debug!("pass 4: reference counts");
        Ok(())
    }

    fn pass5(&mut self, _img: &mut FsImage) -> Result<()> {
        debug!("pass 5: group summary information");
        Ok(())
    }

    fn report_stats(&mut self, img: &FsImage, outcome: &RunOutcome) {
        let sb = img.superblock();
        let files_used = sb.inodes_count.saturating_sub(sb.free_inodes_count);
        let blocks_used = sb.blocks_count.saturating_sub(sb.free_blocks_count);
        if self.json_stats {
            let stats = serde_json::json!({
                "device": img.device_name(),
                "files_used": files_used,
                "files_total": sb.inodes_count,
                "blocks_used": blocks_used,
                "blocks_total": sb.blocks_count,
                "modified": outcome.modified,
                "valid": outcome.valid,
            });
            println!("{stats}");
        } else {
            println!(
                "{}: {}/{} files, {}/{} blocks",
                img.device_name(),
                files_used,
                sb.inodes_count,
                blocks_used,
                sb.blocks_count
            );
        }
    }
}

fn report_fatal(err: &FsckError) {
    eprintln!("rfsck: {err}");
    if let FsckError::Open { source, .. } = err {
        match source {
            OpenError::RevisionTooHigh => {
                eprintln!("Get a newer version of this checker!");
            }
            OpenError::ShortRead => {
                eprintln!("Could this be a zero-length partition?");
            }
            OpenError::Permission => {
                eprintln!("You must have read access to the filesystem to check it.");
            }
            OpenError::NoDevice => {
                eprintln!("Possibly non-existent or swap device?");
            }
            OpenError::Unclassified(_) => {}
        }
    }
    if err.wants_superblock_hint() {
        eprintln!("The superblock could not be read or does not describe a correct filesystem.");
        eprintln!("If the device is valid and really contains an ext2 filesystem");
        eprintln!("(and not swap or something else), then the superblock is corrupt.");
        eprintln!("You may want to retry with an alternate superblock:");
        eprintln!("    rfsck -b 8193 <device>");
    }
}

fn run(args: &[String]) -> i32 {
    let opts = match parse_args(args) {
        Ok(opts) => opts,
        Err(err) => {
            eprintln!("rfsck: {err}");
            eprintln!("{}", usage(args.first().map_or("rfsck", String::as_str)));
            return EXIT_USAGE;
        }
    };

    let filter = if opts.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if opts.config.mode.interactive() && !std::io::stdin().is_terminal() {
        report_fatal(&FsckError::NeedTerminal);
        return EXIT_ERROR;
    }

    let mut passes = DefaultPasses {
        json_stats: opts.json_stats,
    };
    match Orchestrator::new(opts.config).run(&mut passes) {
        Ok(code) => code,
        Err(err) => {
            report_fatal(&err);
            err.exit_status()
        }
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    std::process::exit(run(&args));
}
