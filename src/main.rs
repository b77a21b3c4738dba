// src/main.rs - Headless console shell for the emulator
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use teensy_emu::hardware::lcd::render_rows;
use teensy_emu::{ConfigError, EmulatorConfig, EmulatorHost, load_config, remote};
use tracing_subscriber::fmt::MakeWriter;

#[derive(Parser, Debug)]
#[command(name = "teensy-emu", version, about = "Run Teensy firmware modules on the host")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<String>,
    /// Firmware module to load at startup (overrides the config)
    #[arg(short, long)]
    module: Option<String>,
    /// Directory backing the emulated SD card (overrides the config)
    #[arg(short, long)]
    sd_root: Option<String>,
}

/// One line typed on stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Load(String),
    SdRoot(String),
    Ir(u32),
    Key(usize),
    Button,
    Interrupt(i32),
    Quit,
}

impl Command {
    fn parse(line: &str) -> Result<Command, String> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().ok_or_else(|| "empty command".to_string())?;
        let arg = parts.next();
        let need = |what: &str| arg.ok_or_else(|| format!("`{}` needs {}", verb, what));
        match verb {
            "load" => Ok(Command::Load(need("a module path")?.to_string())),
            "sd" => Ok(Command::SdRoot(need("a directory")?.to_string())),
            "ir" => {
                let raw = need("a hex code")?;
                let digits = raw.trim_start_matches("0x").trim_start_matches("0X");
                u32::from_str_radix(digits, 16)
                    .map(Command::Ir)
                    .map_err(|e| format!("bad IR code '{}': {}", raw, e))
            }
            "key" => need("a key index")?
                .parse()
                .map(Command::Key)
                .map_err(|e| format!("bad key index: {}", e)),
            "button" => Ok(Command::Button),
            "int" => need("a pin")?
                .parse()
                .map(Command::Interrupt)
                .map_err(|e| format!("bad pin: {}", e)),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(format!("unknown command '{}'", other)),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let args = Args::parse();

    // The configured level is not known yet; config errors still need a
    // subscriber to be reported through.
    let config = tracing::subscriber::with_default(startup_subscriber(io::stderr), || prepare_config(&args))?;

    tracing_subscriber::fmt()
        .with_max_level(config.logging.max_level()?)
        .with_writer(io::stderr)
        .init();

    tracing::info!("Starting teensy-emu {}", env!("CARGO_PKG_VERSION"));
    let host = EmulatorHost::new(&config);
    wire_console(&host, &config);

    if let Some(module) = &config.emulator.module {
        host.load(module);
    }

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match Command::parse(&line) {
            Ok(Command::Quit) => break,
            Ok(command) => run(&host, &config, command),
            Err(e) => tracing::warn!("{}", e),
        }
    }

    tracing::info!("Shutting down");
    host.shutdown();
    Ok(())
}

fn startup_subscriber<W>(writer: W) -> impl tracing::Subscriber + Send + Sync
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(writer)
        .finish()
}

/// Config file, then command-line overrides, then validation.
fn prepare_config(args: &Args) -> Result<EmulatorConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => EmulatorConfig::default(),
    };
    if args.module.is_some() {
        config.emulator.module = args.module.clone();
    }
    if args.sd_root.is_some() {
        config.emulator.sd_root = args.sd_root.clone();
    }
    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {}", e);
        return Err(e);
    }
    Ok(config)
}

fn wire_console(host: &EmulatorHost, config: &EmulatorConfig) {
    host.set_serial_sink(Arc::new(|bytes: &[u8]| {
        let mut out = io::stdout().lock();
        if let Err(e) = out.write_all(bytes).and_then(|()| out.flush()) {
            tracing::trace!("Serial console write failed: {}", e);
        }
    }));
    host.set_lcd_sink(Arc::new(|frame: &[u8]| {
        let [top, bottom] = render_rows(frame);
        tracing::info!("LCD |{}|{}|", top, bottom);
    }));
    let backlight = config.pins.backlight;
    host.observe_pin(
        backlight,
        Arc::new(move |value| {
            tracing::info!("Backlight (pin {}) {}", backlight, if value != 0 { "on" } else { "off" });
        }),
    );
}

fn run(host: &EmulatorHost, config: &EmulatorConfig, command: Command) {
    match command {
        Command::Load(path) => {
            if host.load(&path) {
                tracing::info!("Loaded {}", path);
            }
        }
        Command::SdRoot(path) => host.set_sd_root(&path),
        Command::Ir(code) => host.inject_ir_code(code),
        Command::Key(index) => match remote::code_for(index) {
            Some(code) => host.inject_ir_code(code),
            None => tracing::warn!("No remote key {}", index),
        },
        Command::Button => {
            if !host.trigger_interrupt(config.pins.button, 0) {
                tracing::info!("Nothing attached to button pin {}", config.pins.button);
            }
        }
        Command::Interrupt(pin) => {
            if !host.trigger_interrupt(pin, 0) {
                tracing::info!("Nothing attached to pin {}", pin);
            }
        }
        Command::Quit => {}
    }
}
