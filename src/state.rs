use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::core::call::{CallEvent, CallManager, CallManagerOptions, FALLBACK_APOLOGY};
use crate::core::stream::DEFAULT_FLUSH_FRAMES;
use crate::core::tts::create_tts_provider;
use crate::twilio::TwilioClient;
use crate::utils::AgentClient;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub manager: Arc<CallManager>,
    pub agent: Option<Arc<AgentClient>>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> anyhow::Result<Arc<Self>> {
        let twilio = TwilioClient::new(
            config.twilio_account_sid.clone(),
            config.twilio_auth_token.clone(),
            config.twilio_phone_number.clone(),
        );

        let tts = create_tts_provider(&config.tts_config().map_err(anyhow::Error::msg)?)?;

        let manager = CallManager::new(
            CallManagerOptions {
                stt_config: config.stt_config().map_err(anyhow::Error::msg)?,
                webhook_base_url: config.webhook_base_url.clone(),
                default_country: config.default_country_code.clone(),
                say_voice: config.say_voice.clone(),
                language: config.stt_language.clone(),
                barge_in: config.barge_in,
                flush_frames: DEFAULT_FLUSH_FRAMES,
                stt_factory: None,
            },
            twilio,
            tts,
        );

        let agent = config
            .agent_gateway_url
            .clone()
            .map(|url| Arc::new(AgentClient::new(url)));

        if let Some(agent) = &agent {
            spawn_transcription_forwarder(manager.clone(), agent.clone());
        } else {
            warn!("AGENT_GATEWAY_URL not set; transcriptions will not reach an agent");
        }

        Ok(Arc::new(Self {
            config,
            manager,
            agent,
        }))
    }
}

/// Forward accepted transcriptions to the agent gateway and speak its
/// replies. Agent failures produce a spoken apology; the call stays open.
pub fn spawn_transcription_forwarder(
    manager: Arc<CallManager>,
    agent: Arc<AgentClient>,
) -> tokio::task::JoinHandle<()> {
    let mut events = manager.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(CallEvent::Transcription {
                    call_sid,
                    from,
                    text,
                    ..
                }) => match agent.forward(&call_sid, &from, &text).await {
                    Ok(Some(reply)) => {
                        if let Err(e) = manager.speak(&call_sid, &reply).await {
                            error!(call_sid = %call_sid, error = %e, "failed to speak agent reply");
                        }
                    }
                    Ok(None) => {
                        info!(call_sid = %call_sid, "agent had no reply");
                        manager.resume_listening(&call_sid).await;
                    }
                    Err(e) => {
                        error!(call_sid = %call_sid, error = %e, "agent request failed");
                        if let Err(e) = manager.speak(&call_sid, FALLBACK_APOLOGY).await {
                            error!(call_sid = %call_sid, error = %e, "failed to speak apology");
                        }
                    }
                },
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "transcription forwarder lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
