use std::env;

use crate::core::audio;
use crate::core::stt::STTConfig;
use crate::core::tts::TTSConfig;

/// Process configuration, loaded from the environment (`.env` honored).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Public base URL the carrier calls back on (e.g. an ngrok HTTPS URL).
    /// The media-stream WebSocket URL is derived from it. When unset, the
    /// server runs in development mode and unsigned webhooks are accepted.
    pub webhook_base_url: Option<String>,

    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    pub twilio_phone_number: String,

    pub stt_provider: String,
    pub stt_language: String,
    pub stt_model: Option<String>,

    pub tts_provider: String,
    pub tts_voice: Option<String>,
    pub tts_model: Option<String>,

    pub deepgram_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub groq_api_key: Option<String>,
    pub elevenlabs_api_key: Option<String>,

    /// Agent gateway base URL; transcripts are POSTed there
    pub agent_gateway_url: Option<String>,

    /// Country calling code assumed for bare national numbers
    pub default_country_code: String,
    /// Carrier-side `<Say>` voice for TwiML fallbacks
    pub say_voice: String,
    /// Cut off bridge playback when the caller starts talking
    pub barge_in: bool,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3001".to_string())
            .parse::<u16>()
            .map_err(|e| format!("Invalid port number: {e}"))?;

        let twilio_account_sid = env::var("TWILIO_ACCOUNT_SID")
            .map_err(|_| "TWILIO_ACCOUNT_SID is required".to_string())?;
        let twilio_auth_token = env::var("TWILIO_AUTH_TOKEN")
            .map_err(|_| "TWILIO_AUTH_TOKEN is required".to_string())?;
        let twilio_phone_number = env::var("TWILIO_PHONE_NUMBER")
            .map_err(|_| "TWILIO_PHONE_NUMBER is required".to_string())?;

        let config = ServerConfig {
            host,
            port,
            webhook_base_url: env::var("WEBHOOK_BASE_URL")
                .ok()
                .map(|url| url.trim_end_matches('/').to_string()),
            twilio_account_sid,
            twilio_auth_token,
            twilio_phone_number,
            stt_provider: env::var("STT_PROVIDER").unwrap_or_else(|_| "deepgram".to_string()),
            stt_language: env::var("STT_LANGUAGE").unwrap_or_else(|_| "en-US".to_string()),
            stt_model: env::var("STT_MODEL").ok(),
            tts_provider: env::var("TTS_PROVIDER").unwrap_or_else(|_| "openai".to_string()),
            tts_voice: env::var("TTS_VOICE").ok(),
            tts_model: env::var("TTS_MODEL").ok(),
            deepgram_api_key: env::var("DEEPGRAM_API_KEY").ok(),
            openai_api_key: env::var("OPENAI_API_KEY").ok(),
            groq_api_key: env::var("GROQ_API_KEY").ok(),
            elevenlabs_api_key: env::var("ELEVENLABS_API_KEY").ok(),
            agent_gateway_url: env::var("AGENT_GATEWAY_URL").ok(),
            default_country_code: env::var("DEFAULT_COUNTRY_CODE")
                .unwrap_or_else(|_| "1".to_string()),
            say_voice: env::var("SAY_VOICE").unwrap_or_else(|_| "alice".to_string()),
            barge_in: env::var("BARGE_IN")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
        };

        // Fail at bootstrap, not on the first call
        config.get_stt_api_key()?;
        config.get_tts_api_key()?;

        Ok(config)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// API key for the configured STT provider
    pub fn get_stt_api_key(&self) -> Result<String, String> {
        let (key, name) = match self.stt_provider.to_lowercase().as_str() {
            "deepgram" => (&self.deepgram_api_key, "DEEPGRAM_API_KEY"),
            "openai" => (&self.openai_api_key, "OPENAI_API_KEY"),
            "groq" => (&self.groq_api_key, "GROQ_API_KEY"),
            "elevenlabs" => (&self.elevenlabs_api_key, "ELEVENLABS_API_KEY"),
            other => return Err(format!("Unsupported STT provider: {other}")),
        };
        key.clone()
            .ok_or_else(|| format!("{name} is required for STT provider {}", self.stt_provider))
    }

    /// API key for the configured TTS provider
    pub fn get_tts_api_key(&self) -> Result<String, String> {
        let (key, name) = match self.tts_provider.to_lowercase().as_str() {
            "openai" => (&self.openai_api_key, "OPENAI_API_KEY"),
            "deepgram" => (&self.deepgram_api_key, "DEEPGRAM_API_KEY"),
            "elevenlabs" => (&self.elevenlabs_api_key, "ELEVENLABS_API_KEY"),
            other => return Err(format!("Unsupported TTS provider: {other}")),
        };
        key.clone()
            .ok_or_else(|| format!("{name} is required for TTS provider {}", self.tts_provider))
    }

    pub fn stt_config(&self) -> Result<STTConfig, String> {
        Ok(STTConfig {
            provider: self.stt_provider.clone(),
            api_key: self.get_stt_api_key()?,
            language: self.stt_language.clone(),
            model: self.stt_model.clone(),
            vad_events: self.barge_in,
            ..STTConfig::default()
        })
    }

    pub fn tts_config(&self) -> Result<TTSConfig, String> {
        Ok(TTSConfig {
            provider: self.tts_provider.clone(),
            api_key: self.get_tts_api_key()?,
            voice: self.tts_voice.clone(),
            model: self.tts_model.clone(),
            sample_rate: audio::TTS_SAMPLE_RATE,
            ..TTSConfig::default()
        })
    }
}
