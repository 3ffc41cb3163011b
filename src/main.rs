use std::sync::Arc;

use clap::{Parser, Subcommand};
use geonet_voice::audio::{AudioOutput, Microphone, VirtualMicrophone, VirtualOutput};
use geonet_voice::config::Config;
use geonet_voice::controller::{CallController, CallHandle, CallStatus};
use geonet_voice::net_link::LiveConnector;
use geonet_voice::profile;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;

#[derive(Parser, Debug)]
#[command(name = "geonet-voice", version, about = "GeoNet voice support call")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the built-in network profiles
    Profiles {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Place a support call from the given profile
    Call {
        /// Profile id or IP address
        #[arg(long, default_value = "1")]
        profile: String,
        /// Use the generated tone and a wall-clock output instead of the sound card
        #[arg(long)]
        virtual_audio: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env 中的凭据优先加载，再初始化日志
    dotenvy::dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Command::Profiles { json } => list_profiles(json),
        Command::Call {
            profile,
            virtual_audio,
        } => run_call(&profile, virtual_audio).await,
    }
}

fn list_profiles(json: bool) -> anyhow::Result<()> {
    let profiles = profile::catalog();
    if json {
        println!("{}", serde_json::to_string_pretty(&profiles)?);
        return Ok(());
    }
    for p in &profiles {
        println!(
            "{:>3}  {:<16} {:<22} {:<24} {:<10} {:>4} ms",
            p.id,
            p.ip,
            p.provider,
            p.location,
            p.link_type.as_str(),
            p.latency_ms
        );
    }
    Ok(())
}

#[cfg(feature = "alsa-backend")]
fn devices(config: &Config, virtual_audio: bool) -> (Arc<dyn Microphone>, Arc<dyn AudioOutput>) {
    use geonet_voice::audio::{AlsaMicrophone, AlsaOutput};

    if virtual_audio {
        return virtual_devices();
    }
    (
        Arc::new(AlsaMicrophone::new(config.capture_device)),
        Arc::new(AlsaOutput::new(
            config.playback_device,
            config.playback_period_size,
        )),
    )
}

#[cfg(not(feature = "alsa-backend"))]
fn devices(config: &Config, virtual_audio: bool) -> (Arc<dyn Microphone>, Arc<dyn AudioOutput>) {
    if !virtual_audio {
        log::warn!(
            "Built without alsa-backend, using virtual audio instead of {}",
            config.capture_device
        );
    }
    virtual_devices()
}

fn virtual_devices() -> (Arc<dyn Microphone>, Arc<dyn AudioOutput>) {
    (
        Arc::new(VirtualMicrophone::realtime(0.05)),
        Arc::new(VirtualOutput::realtime()),
    )
}

async fn run_call(profile_key: &str, virtual_audio: bool) -> anyhow::Result<()> {
    let config = Config::new().map_err(anyhow::Error::msg)?;
    let Some(selected) = profile::find(profile_key) else {
        anyhow::bail!("Unknown profile: {}", profile_key);
    };

    println!(
        "{} {} - calling support for {} ({}, {})",
        config.app_name, config.app_version, selected.provider, selected.location, selected.ip
    );

    let (microphone, output) = devices(&config, virtual_audio);
    let connector = Arc::new(LiveConnector::new(config.ws_url));
    let mut controller = CallController::new(config, microphone, output, connector);
    controller.select_profile(Some(selected));

    let (handle, task) = controller.spawn();
    let mut status_rx = handle.subscribe();
    handle.start().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut last = CallStatus::default();

    println!("Commands: start | stop | profile <id> | status | quit");

    loop {
        tokio::select! {
            // 监听 Ctrl+C 信号
            _ = signal::ctrl_c() => {
                println!("Received Ctrl+C, hanging up...");
                break;
            }

            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = status_rx.borrow_and_update().clone();
                // 音量变化太频繁，只在状态、说话或错误变化时打印
                if status.state != last.state || status.talking != last.talking || status.error != last.error {
                    println!("{}", serde_json::to_string(&status)?);
                }
                last = status;
            }

            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if !dispatch(&handle, line.trim()).await? {
                    break;
                }
            }
        }
    }

    handle.shutdown().await.ok();
    task.await?;
    Ok(())
}

/// Returns false when the user asked to quit.
async fn dispatch(handle: &CallHandle, line: &str) -> anyhow::Result<bool> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("start"), _) => handle.start().await?,
        (Some("stop") | Some("hangup"), _) => handle.stop().await?,
        (Some("profile"), Some(key)) => match profile::find(key) {
            Some(p) => handle.select_profile(Some(p)).await?,
            None => println!("Unknown profile: {}", key),
        },
        (Some("profile"), None) => handle.select_profile(None).await?,
        (Some("status"), _) => println!("{}", serde_json::to_string(&handle.status())?),
        (Some("quit") | Some("exit"), _) => return Ok(false),
        (Some(other), _) => println!("Unknown command: {}", other),
        (None, _) => {}
    }
    Ok(true)
}
