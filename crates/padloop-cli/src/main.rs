//! padloop - record and loop pad sequences from a Launchkey Mini

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use padloop_cli::{
    config::{Config, NoteBackend},
    host::Host,
    midi::{self, HostClock, MidiInputPort},
};

#[derive(Parser)]
#[command(name = "padloop")]
#[command(author, version, about = "Record and loop pad sequences from a Launchkey Mini", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path (default: ~/.config/padloop/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Controller input port (substring match)
    #[arg(short, long)]
    input: Option<String>,

    /// Port for pad LED commands (substring match)
    #[arg(long)]
    device_output: Option<String>,

    /// Note output port
    #[arg(long)]
    note_output: Option<String>,

    /// Note output backend
    #[arg(long, value_enum)]
    backend: Option<NoteBackend>,

    /// Idle poll interval in milliseconds
    #[arg(long)]
    idle_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a default configuration file
    Init,
    /// Show the configuration file path
    ConfigPath,
    /// List available MIDI ports
    ListPorts,
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Init) => {
            let path = Config::create_default_config_file()?;
            println!("Created default config at: {}", path.display());
            return Ok(());
        }
        Some(Commands::ConfigPath) => {
            let path = Config::config_path()?;
            println!("{}", path.display());
            return Ok(());
        }
        Some(Commands::ListPorts) => {
            list_ports()?;
            return Ok(());
        }
        None => {}
    }

    // Load config
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load_or_default(),
    };

    // Apply CLI overrides
    if let Some(input) = cli.input {
        config.midi.input_port = input;
    }
    if let Some(port) = cli.device_output {
        config.midi.device_output_port = port;
    }
    if let Some(port) = cli.note_output {
        config.midi.note_output_port = port;
    }
    if let Some(backend) = cli.backend {
        config.midi.note_backend = backend;
    }
    if let Some(idle_ms) = cli.idle_ms {
        config.engine.idle_interval_ms = idle_ms;
    }

    run(config)
}

fn run(config: Config) -> Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&shutdown))?;

    let clock = HostClock::new();
    let (_input, inbound) = MidiInputPort::open("padloop", &config.midi.input_port, clock)?;
    let device = midi::open_device_output(&config.midi);
    let notes = midi::open_note_output(&config.midi);
    log::info!("LEDs -> {}, notes -> {}", device.port_name(), notes.port_name());

    let mut host = Host::new(&config, device, notes);
    host.run(&inbound, &clock, config.engine.idle_interval(), &shutdown)?;
    Ok(())
}

fn list_ports() -> Result<()> {
    let ports = midi::list_ports()?;
    println!("MIDI inputs:");
    for name in &ports.inputs {
        println!("  {}", name);
    }
    println!("MIDI outputs:");
    for name in &ports.outputs {
        println!("  {}", name);
    }

    if midi::is_jack_running() {
        let jack_ports = midi::list_jack_midi_ports();
        if jack_ports.is_empty() {
            println!("No JACK MIDI input ports found");
        } else {
            println!("JACK MIDI input ports:");
            for port in jack_ports {
                println!("  {}", port);
            }
        }
    } else {
        println!("JACK is not running");
    }
    Ok(())
}
