use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::error::Error;
use std::time::Duration;
use tokio::time::interval;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use u3_lib::commands::TimerClockBase;
use u3_lib::ops::{AnalogInput, TimerCounterConfig, TimerCounterRead};
use u3_lib::probe::PROBE_INPUT_LINE;
use u3_lib::{DeviceSelector, U3, UsbConfig, UsbConnector, UsbTransport};

/// Command-line access to a LabJack U3 over USB.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Local ID or serial number of the device to open (default: first found)
    #[arg(short, long, global = true)]
    id: Option<u32>,
    /// USB transfer timeout in milliseconds
    #[arg(long, default_value_t = 1000, global = true)]
    timeout_ms: u64,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show device identity and configuration
    Info,
    /// Show the calibration constants read from the device
    Calibration,
    /// Set up the temperature probe and take readings
    Measure {
        /// Number of readings
        #[arg(short, long, default_value_t = 1)]
        count: u32,
        /// Milliseconds between readings
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
        /// Disable the probe's timers and counter afterwards
        #[arg(long)]
        restore: bool,
    },
    /// Read an analog input
    Ain {
        positive: u8,
        /// 31 for single-ended, 30 for Vref, 32 for the special range
        #[arg(default_value_t = 31)]
        negative: u8,
        #[arg(long)]
        long_settling: bool,
        #[arg(long)]
        quick_sample: bool,
        /// Leave the line configuration alone
        #[arg(long)]
        no_configure: bool,
    },
    /// Set a DAC output voltage
    Dac {
        dac: u8,
        volts: f64,
        #[arg(long)]
        no_configure: bool,
    },
    /// Read a digital line
    Din {
        channel: u8,
        #[arg(long)]
        no_configure: bool,
    },
    /// Drive a digital line
    Dout {
        channel: u8,
        #[arg(value_enum)]
        level: Level,
        #[arg(long)]
        no_configure: bool,
    },
    /// Pulse a digital line high, low, high
    TtlPulse {
        #[arg(default_value_t = PROBE_INPUT_LINE)]
        channel: u8,
    },
    /// Configure timers and counters
    Timers {
        /// Number of timers to enable (0-2)
        #[arg(long, default_value_t = 0)]
        timers: u8,
        /// Enable Counter0
        #[arg(long)]
        counter0: bool,
        /// Enable Counter1
        #[arg(long)]
        counter1: bool,
        /// First FIO/EIO line used (0-8)
        #[arg(long, default_value_t = 4)]
        pin_offset: u8,
        /// Timer clock base (10-16 or 20-26)
        #[arg(long, default_value_t = 22)]
        clock_base: u8,
        #[arg(long, default_value_t = 1)]
        divisor: u8,
        /// Timer modes, one per enabled timer
        #[arg(long, value_delimiter = ',')]
        modes: Vec<u8>,
    },
    /// Read (and optionally reset) the counters
    Counters {
        #[arg(long)]
        reset: bool,
        /// Also read both timers
        #[arg(long)]
        timers: bool,
    },
    /// Read the calibration of an LJTDAC accessory
    Tdac {
        /// Line the accessory's DIOA is on
        #[arg(default_value_t = 4)]
        pin: u8,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Level {
    Low,
    High,
}

fn setup_logging(verbosity: &Verbosity<InfoLevel>) {
    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).without_time())
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    setup_logging(&cli.verbose);

    let connector = UsbConnector::new(UsbConfig {
        timeout: Duration::from_millis(cli.timeout_ms),
        ..UsbConfig::default()
    });
    let selector = cli.id.map_or(DeviceSelector::First, DeviceSelector::Id);
    let mut u3 = U3::open(&connector, selector).await?;

    run(&mut u3, cli.command).await?;
    u3.close();
    Ok(())
}

async fn run(u3: &mut U3<UsbTransport>, command: Command) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Info => {
            if let Some(info) = u3.info() {
                println!("Serial number:    {}", info.serial_number);
                println!("Local ID:         {}", info.local_id);
                println!("Hardware version: {}", info.hardware_version);
                println!("Firmware version: {:.2}", info.firmware_version);
                println!("Bootloader:       {:.2}", info.bootloader_version);
                println!("U3-HV:            {}", info.high_voltage);
                println!("FIO analog:       {:#010b}", info.fio_analog);
                println!("EIO analog:       {:#010b}", info.eio_analog);
                println!("DAC1 enabled:     {}", info.dac1_enable != 0);
                println!("Timer clock:      {:#04x} / {}", info.timer_clock_config, info.timer_clock_divisor);
            }
        }
        Command::Calibration => {
            let calibration = u3.calibration();
            println!(
                "Hardware {} ({:?}), valid: {}",
                calibration.hardware_version(),
                calibration.model(),
                calibration.is_valid()
            );
            for (i, value) in calibration.constants().iter().enumerate() {
                println!("  [{i:2}] {value:.9}");
            }
        }
        Command::Measure {
            count,
            interval_ms,
            restore,
        } => {
            let dac1_enabled = u3.configure_probe_io(true).await?;
            info!(dac1_enabled, "Probe IO enabled");
            u3.configure_probe_outputs().await?;

            let mut timer = interval(Duration::from_millis(interval_ms.max(1)));
            for _ in 0..count {
                timer.tick().await;
                let reading = u3.measure().await?;
                println!(
                    "Internal: {:.2} K ({:.1} °F)  External: {:.4} V ({:.1} °F)  FIO3: {}  Counter1: {}",
                    reading.internal_kelvin,
                    reading.internal_fahrenheit,
                    reading.external_volts,
                    reading.external_fahrenheit,
                    u8::from(reading.fio3_state),
                    reading.counter1
                );
            }

            if restore {
                u3.configure_probe_io(false).await?;
            }
        }
        Command::Ain {
            positive,
            negative,
            long_settling,
            quick_sample,
            no_configure,
        } => {
            let input = AnalogInput {
                long_settling,
                quick_sample,
                configure_io: !no_configure,
                ..AnalogInput::differential(positive, negative)
            };
            let reading = u3.analog_read(&input).await?;
            let unit = if positive == 30 { "K" } else { "V" };
            println!("AIN{positive}/{negative}: {:.6} {unit} (raw {})", reading.value, reading.raw);
        }
        Command::Dac {
            dac,
            volts,
            no_configure,
        } => {
            u3.analog_write(dac, volts, !no_configure).await?;
            println!("DAC{dac} set to {volts:.3} V");
        }
        Command::Din { channel, no_configure } => {
            let state = u3.digital_read(channel, !no_configure).await?;
            println!("Line {channel}: {}", u8::from(state));
        }
        Command::Dout {
            channel,
            level,
            no_configure,
        } => {
            let state = matches!(level, Level::High);
            u3.digital_write(channel, state, !no_configure).await?;
            println!("Line {channel} driven {}", if state { "high" } else { "low" });
        }
        Command::TtlPulse { channel } => {
            u3.send_ttl_pulse(channel).await?;
            println!("Pulsed line {channel}");
        }
        Command::Timers {
            timers,
            counter0,
            counter1,
            pin_offset,
            clock_base,
            divisor,
            modes,
        } => {
            let clock_base = TimerClockBase::try_from(clock_base)
                .map_err(|_| format!("unknown timer clock base {clock_base}"))?;
            if timers > 2 {
                return Err(format!("cannot enable {timers} timers").into());
            }
            if modes.len() < usize::from(timers) {
                warn!("No mode given for every timer, using mode 0");
            }
            let mode = |i: usize| modes.get(i).copied().unwrap_or_default();

            let config = TimerCounterConfig {
                enable_timers: [timers >= 1, timers >= 2],
                enable_counters: [counter0, counter1],
                pin_offset,
                clock_base,
                clock_divisor: divisor,
                timer_modes: [mode(0), mode(1)],
                timer_values: [0, 0],
            };
            u3.timer_counter_configure(&config).await?;
            println!("Timers and counters configured ({clock_base})");
        }
        Command::Counters { reset, timers } => {
            let request = TimerCounterRead {
                read_timers: [timers, timers],
                read_counters: [true, true],
                reset_counters: [reset, reset],
                ..TimerCounterRead::default()
            };
            let values = u3.timer_counter_read(&request).await?;
            if timers {
                println!("Timer0: {}  Timer1: {}", values.timers[0], values.timers[1]);
            }
            println!("Counter0: {}  Counter1: {}", values.counters[0], values.counters[1]);
        }
        Command::Tdac { pin } => {
            let tdac = u3.read_tdac_calibration(pin).await?;
            println!("DACA slope {:.4} offset {:.4}", tdac.constants[0], tdac.constants[1]);
            println!("DACB slope {:.4} offset {:.4}", tdac.constants[2], tdac.constants[3]);
        }
    }
    Ok(())
}
