/// 连接建立前采集到的音频帧如何处理
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreOpenPolicy {
    /// Frames captured before the link opens are discarded.
    Drop,
    /// Frames are held (bounded, oldest evicted) and flushed on open.
    Queue,
}

impl PreOpenPolicy {
    pub fn parse(value: &str) -> Result<Self, &'static str> {
        match value.trim().to_ascii_lowercase().as_str() {
            "drop" => Ok(PreOpenPolicy::Drop),
            "queue" => Ok(PreOpenPolicy::Queue),
            _ => Err("Failed to parse SESSION_PRE_OPEN_POLICY"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // 应用信息
    pub app_name: &'static str,
    pub app_version: &'static str,

    // 远端语音服务（静态部分）
    pub ws_url: &'static str,
    pub model: &'static str,
    pub voice: &'static str,

    // 凭据（运行时从环境变量读取）
    pub api_key: Option<String>,

    // 音频配置
    pub capture_device: &'static str,
    pub playback_device: &'static str,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub capture_block_size: usize,
    pub playback_period_size: usize,

    // 会话参数
    pub connect_timeout_ms: u64,
    pub volume_scale: f32,
    pub volume_decay: f32,
    pub pre_open_policy: PreOpenPolicy,
    pub pre_open_queue_limit: usize,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 静态参数都在编译时从 config.toml 中读取，凭据在运行时读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            app_name: env!("APP_NAME"),
            app_version: env!("APP_VERSION"),

            ws_url: env!("LIVE_WS_URL"),
            model: env!("LIVE_MODEL"),
            voice: env!("LIVE_VOICE"),

            api_key: read_credential(),

            capture_device: env!("AUDIO_CAPTURE_DEVICE"),
            playback_device: env!("AUDIO_PLAYBACK_DEVICE"),
            input_sample_rate: env!("AUDIO_INPUT_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse AUDIO_INPUT_SAMPLE_RATE")?,
            output_sample_rate: env!("AUDIO_OUTPUT_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse AUDIO_OUTPUT_SAMPLE_RATE")?,
            capture_block_size: env!("AUDIO_CAPTURE_BLOCK_SIZE").parse()
                .map_err(|_| "Failed to parse AUDIO_CAPTURE_BLOCK_SIZE")?,
            playback_period_size: env!("AUDIO_PLAYBACK_PERIOD_SIZE").parse()
                .map_err(|_| "Failed to parse AUDIO_PLAYBACK_PERIOD_SIZE")?,

            connect_timeout_ms: env!("SESSION_CONNECT_TIMEOUT_MS").parse()
                .map_err(|_| "Failed to parse SESSION_CONNECT_TIMEOUT_MS")?,
            volume_scale: env!("SESSION_VOLUME_SCALE").parse()
                .map_err(|_| "Failed to parse SESSION_VOLUME_SCALE")?,
            volume_decay: env!("SESSION_VOLUME_DECAY").parse()
                .map_err(|_| "Failed to parse SESSION_VOLUME_DECAY")?,
            pre_open_policy: PreOpenPolicy::parse(env!("SESSION_PRE_OPEN_POLICY"))?,
            pre_open_queue_limit: env!("SESSION_PRE_OPEN_QUEUE_LIMIT").parse()
                .map_err(|_| "Failed to parse SESSION_PRE_OPEN_QUEUE_LIMIT")?,
        })
    }

    /// MIME type announced for outbound PCM frames.
    pub fn input_mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.input_sample_rate)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new().expect("Failed to create default Config from build-time environment variables")
    }
}

/// Looks up the streaming credential, `GEMINI_API_KEY` first, then `API_KEY`.
/// Empty values count as missing.
fn read_credential() -> Option<String> {
    ["GEMINI_API_KEY", "API_KEY"]
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}
