//! bankboot - Dual-bank boot image selection
//!
//! Runs the bankboot decision engine against a flash image file, and
//! provides the operator tooling around it: creating flash images, building
//! signed images, inspecting slots and managing the stored slot preference.
//!
//! # Architecture
//!
//! The boot decision lives in the `no_std` `bankboot-core` crate and talks
//! to the board only through its collaborator traits. On the host those are
//! provided by `bankboot-sim`:
//! - **Flash map**: the flash image file, laid out by a board layout (TOML)
//! - **Preference store**: a log-structured store in the storage area
//! - **Validator**: SHA-256 over header, body and protected TLVs
//!
//! The recovery button can be read from a real GPIO line with the
//! `linux-gpio` feature.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands, FlashCommands, PrefsCommands};
use commands::boot::BootOptions;
use commands::image::MkimageOptions;

use bankboot_core::image::ImageFlags;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let layout_path = cli.layout;
    let board = || commands::load_board(layout_path.as_deref());

    match cli.command {
        Commands::Flash(subcmd) => match subcmd {
            FlashCommands::Init { file } => commands::flash::cmd_init(board()?, &file),
            FlashCommands::Write { file, area, input } => {
                commands::flash::cmd_write(board()?, &file, &area, &input)
            }
            FlashCommands::Erase { file, area } => {
                commands::flash::cmd_erase(board()?, &file, &area)
            }
        },
        Commands::Mkimage {
            input,
            output,
            version,
            header_size,
            load_addr,
            pic,
            ram_load,
            non_bootable,
            protected,
            encrypt_key,
            kek,
        } => {
            let mut flags = ImageFlags::empty();
            flags.set(ImageFlags::PIC, pic);
            flags.set(ImageFlags::RAM_LOAD, ram_load);
            flags.set(ImageFlags::NON_BOOTABLE, non_bootable);
            let opts = MkimageOptions {
                version,
                header_size,
                load_addr,
                flags,
                protected,
                encrypt_key,
                kek,
            };
            commands::image::cmd_mkimage(&input, &output, opts)
        }
        Commands::Inspect { file } => commands::inspect::cmd_inspect(board()?, &file),
        Commands::Prefs(subcmd) => match subcmd {
            PrefsCommands::Show { file } => commands::prefs::cmd_show(board()?, &file),
            PrefsCommands::Set { file, bank } => commands::prefs::cmd_set(board()?, &file, bank),
            PrefsCommands::Reset { file } => commands::prefs::cmd_reset(board()?, &file),
        },
        Commands::Boot {
            file,
            recovery,
            gpio,
            kek,
        } => {
            let opts = BootOptions {
                recovery,
                gpio,
                kek,
            };
            commands::boot::cmd_boot(board()?, &file, opts)
        }
        Commands::Layout { toml } => commands::layout::cmd_show(&board()?, toml),
    }
}
