use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    application: Application,
    live: Live,
    audio: Audio,
    session: Session,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Live {
    ws_url: String,
    model: String,
    voice: String,
}

#[derive(Deserialize)]
struct Audio {
    capture_device: String,
    playback_device: String,
    input_sample_rate: u32,
    output_sample_rate: u32,
    capture_block_size: usize,
    playback_period_size: usize,
}

#[derive(Deserialize)]
struct Session {
    connect_timeout_ms: u64,
    volume_scale: f32,
    volume_decay: f32,
    pre_open_policy: String,
    pre_open_queue_limit: usize,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    // 应用信息
    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    // 远端语音服务
    println!("cargo:rustc-env=LIVE_WS_URL={}", config.live.ws_url);
    println!("cargo:rustc-env=LIVE_MODEL={}", config.live.model);
    println!("cargo:rustc-env=LIVE_VOICE={}", config.live.voice);

    // 音频配置
    println!("cargo:rustc-env=AUDIO_CAPTURE_DEVICE={}", config.audio.capture_device);
    println!("cargo:rustc-env=AUDIO_PLAYBACK_DEVICE={}", config.audio.playback_device);
    println!("cargo:rustc-env=AUDIO_INPUT_SAMPLE_RATE={}", config.audio.input_sample_rate);
    println!("cargo:rustc-env=AUDIO_OUTPUT_SAMPLE_RATE={}", config.audio.output_sample_rate);
    println!("cargo:rustc-env=AUDIO_CAPTURE_BLOCK_SIZE={}", config.audio.capture_block_size);
    println!("cargo:rustc-env=AUDIO_PLAYBACK_PERIOD_SIZE={}", config.audio.playback_period_size);

    // 会话参数
    println!("cargo:rustc-env=SESSION_CONNECT_TIMEOUT_MS={}", config.session.connect_timeout_ms);
    println!("cargo:rustc-env=SESSION_VOLUME_SCALE={}", config.session.volume_scale);
    println!("cargo:rustc-env=SESSION_VOLUME_DECAY={}", config.session.volume_decay);
    println!("cargo:rustc-env=SESSION_PRE_OPEN_POLICY={}", config.session.pre_open_policy);
    println!("cargo:rustc-env=SESSION_PRE_OPEN_QUEUE_LIMIT={}", config.session.pre_open_queue_limit);
}
