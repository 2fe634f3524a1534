use std::collections::HashSet;
use std::env;
use std::process;
use std::sync::Arc;

use asio_host::sim::SimDriver;
use asio_host::{AsioDriver, AsioDriverListener, AsioError, Channel, Direction};

/// Writes one sine period per block to every active output and mirrors the
/// inputs' peak level.
struct SineListener {
    amplitude: f32,
}

impl AsioDriverListener for SineListener {
    fn buffer_switch(
        &self,
        _sample_time_ns: i64,
        _sample_position: i64,
        active: &HashSet<Arc<Channel>>,
    ) {
        for channel in active {
            match channel.direction() {
                Direction::Output => {
                    let frames = channel
                        .with_raw_buffer(|raw| raw.len() / channel.sample_type().byte_width())
                        .unwrap_or(0);
                    for frame in 0..frames {
                        let phase = frame as f32 / frames.max(1) as f32;
                        let value =
                            self.amplitude * (2.0 * std::f32::consts::PI * phase).sin();
                        if channel.write(&[value]).is_err() {
                            break;
                        }
                    }
                }
                Direction::Input => {}
            }
        }
    }
}

fn self_test() -> Result<(), AsioError> {
    let sim = SimDriver::new();
    let driver = AsioDriver::attach(sim.clone());
    let callbacks = driver.callbacks();

    let info = driver.initialize()?;
    println!("{info}");
    println!();

    println!("Sample Rate : {} Hz", driver.sample_rate()?);
    let bounds = driver.buffer_size_bounds()?;
    println!(
        "Buffer Size : {} frames preferred (min {}, max {}, granularity {})",
        bounds.preferred, bounds.min, bounds.max, bounds.granularity
    );

    println!("Channels:");
    for index in 0..driver.input_channel_count()? {
        println!("  {}", driver.input_channel(index)?);
    }
    for index in 0..driver.output_channel_count()? {
        println!("  {}", driver.output_channel(index)?);
    }

    driver.add_listener(Arc::new(SineListener { amplitude: 0.5 }))?;

    let mut channels = HashSet::new();
    for index in 0..driver.output_channel_count()? {
        channels.insert(driver.output_channel(index)?);
    }
    driver.create_buffers(&channels)?;
    let latencies = driver.latencies()?;
    println!(
        "Latency     : {} in / {} out samples",
        latencies.input, latencies.output
    );

    driver.start()?;
    let blocks = 8;
    for _ in 0..blocks {
        sim.pump_block(&driver, &callbacks)?;
    }
    driver.stop()?;

    let captured = sim.captured_output(0);
    let expected = blocks * driver.block_frames()? as usize;
    let peak = captured.iter().fold(0.0f32, |max, s| max.max(s.abs()));
    println!();
    println!(
        "Self-test   : {} blocks pumped, {} samples captured, peak {:.3}",
        blocks,
        captured.len(),
        peak
    );
    if captured.len() != expected {
        return Err(AsioError::Driver(format!(
            "expected {expected} captured samples, got {}",
            captured.len()
        )));
    }
    if peak < 0.4 || peak > 0.6 {
        return Err(AsioError::Driver(format!(
            "sine peak {peak:.3} outside expected range"
        )));
    }

    driver.dispose_buffers()?;
    driver.shutdown()?;
    println!("Self-test   : passed");
    Ok(())
}

fn main() {
    asio_host::init_tracing();

    let mut args = env::args().skip(1);
    if let Some(arg) = args.next() {
        match arg.as_str() {
            "--self-test" | "-t" => {}
            "--help" | "-h" => {
                println!(
                    "Usage: asioctl [--self-test]\n\nRuns the simulated driver through the full lifecycle and verifies\nthe callback path end to end."
                );
                return;
            }
            other => {
                eprintln!("asioctl: unknown argument '{other}'");
                process::exit(1);
            }
        }
    }

    if let Err(err) = self_test() {
        eprintln!("asioctl: self-test failed: {err}");
        process::exit(1);
    }
}
