//! RNES Desktop - windowed NES emulator on minifb
//!
//! Keyboard drives the joypad on port 1, the mouse aims the zapper on
//! port 2. Settings and battery saves live under `--data-dir`.

mod storage;

use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use minifb::{Key, KeyRepeat, MouseButton, MouseMode, Window, WindowOptions};
use rnes_core::palette;
use rnes_core::ppu::{SCREEN_HEIGHT, SCREEN_WIDTH};
use rnes_core::{
    Buttons, DeviceInput, DeviceKind, Nes, NesError, RamKind, Storage, StorageError,
};
use thiserror::Error;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::storage::FileStorage;

/// NES Emulator Desktop App
#[derive(Parser, Debug)]
#[command(name = "rnes-desktop")]
#[command(about = "A NES emulator desktop app", long_about = None)]
struct Args {
    /// Path to the iNES ROM file
    #[arg(short, long)]
    rom: PathBuf,

    /// Screen scale factor (1-4)
    #[arg(short, long, default_value = "2")]
    scale: usize,

    /// Directory for settings and battery saves
    #[arg(short, long, default_value = ".rnes")]
    data_dir: PathBuf,

    /// Forget stored settings and start from defaults
    #[arg(long)]
    reset_settings: bool,

    /// Delete every battery save before starting
    #[arg(long)]
    delete_saves: bool,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Error)]
enum DesktopError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("window: {0}")]
    Window(#[from] minifb::Error),
    #[error(transparent)]
    Emulator(#[from] NesError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

const KEYMAP: [(Key, Buttons); 8] = [
    (Key::X, Buttons::A),
    (Key::Z, Buttons::B),
    (Key::RightShift, Buttons::SELECT),
    (Key::Enter, Buttons::START),
    (Key::Up, Buttons::UP),
    (Key::Down, Buttons::DOWN),
    (Key::Left, Buttons::LEFT),
    (Key::Right, Buttons::RIGHT),
];

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("logging unavailable: {error}");
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), DesktopError> {
    let rom_data = fs::read(&args.rom).map_err(|source| DesktopError::Read {
        path: args.rom.clone(),
        source,
    })?;

    let mut storage = FileStorage::new(&args.data_dir);
    if args.reset_settings {
        storage.delete_configuration()?;
    }
    if args.delete_saves {
        storage.delete_all_ram(RamKind::Battery)?;
        info!(dir = %args.data_dir.display(), "battery saves deleted");
    }
    let config = storage.read_configuration()?.unwrap_or_default();

    let mut nes = Nes::new(config);
    nes.load_cartridge(&rom_data)?;
    nes.load_battery_ram(&storage)?;

    let scale = args.scale.clamp(1, 4);
    let mut window = Window::new(
        "RNES",
        SCREEN_WIDTH * scale,
        SCREEN_HEIGHT * scale,
        WindowOptions {
            resize: false,
            ..WindowOptions::default()
        },
    )?;
    window.set_target_fps(nes.region().frame_rate().round() as usize);

    if nes.device(1)? != Some(DeviceKind::Joypad) {
        warn!("no joypad on port 1, keyboard ignored");
    }
    info!("F5 reset, F1 power cycle, ESC quit");
    let mut pixels = Vec::with_capacity(SCREEN_WIDTH * SCREEN_HEIGHT);

    while window.is_open() && !window.is_key_down(Key::Escape) {
        if window.is_key_pressed(Key::F5, KeyRepeat::No) {
            nes.reset();
        }
        if window.is_key_pressed(Key::F1, KeyRepeat::No) {
            nes.save_battery_ram(&mut storage)?;
            nes.power_on();
            nes.load_battery_ram(&storage)?;
        }
        poll_input(&window, &mut nes, scale)?;

        nes.run_frame()?;
        // no audio device: drop the samples
        nes.take_audio_samples();

        palette::to_rgb_frame(nes.frame_buffer(), &mut pixels);
        window.update_with_buffer(&pixels, SCREEN_WIDTH, SCREEN_HEIGHT)?;
    }

    nes.save_battery_ram(&mut storage)?;
    storage.write_configuration(nes.config())?;
    info!("emulator closed");
    Ok(())
}

fn poll_input(window: &Window, nes: &mut Nes, scale: usize) -> Result<(), NesError> {
    for port in [1, 2] {
        match nes.device(port)? {
            Some(DeviceKind::Joypad) => {
                let buttons = KEYMAP
                    .iter()
                    .filter(|(key, _)| window.is_key_down(*key))
                    .fold(Buttons::empty(), |held, (_, button)| held | *button);
                // only player one has keys
                if port == 1 {
                    nes.update_input(port, DeviceInput::Buttons(buttons))?;
                }
            }
            Some(DeviceKind::Zapper) => {
                let position = window
                    .get_mouse_pos(MouseMode::Discard)
                    .map(|(x, y)| ((x as usize / scale) as u16, (y as usize / scale) as u16));
                nes.update_input(port, DeviceInput::Pointer(position))?;
                let pulled = window.get_mouse_down(MouseButton::Left);
                nes.update_input(port, DeviceInput::Trigger(pulled))?;
            }
            None => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["rnes-desktop", "--rom", "game.nes", "--delete-saves", "-s", "9"]);
        assert!(args.delete_saves);
        assert!(!args.reset_settings);
        assert_eq!(args.scale, 9);
        assert_eq!(args.data_dir, PathBuf::from(".rnes"));
    }
}
