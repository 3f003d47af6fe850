use std::time::Duration;

use base64::Engine as _;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::TTS_MODEL_CANDIDATES;
use crate::errors::AgentError;
use crate::persona::VoiceConfig;

static RATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"rate=(\d+)").expect("valid regex"));

const DEFAULT_SAMPLE_RATE: u32 = 24_000;

/// Synthesised speech ready for the wire.
#[derive(Debug, Clone)]
pub struct SpeechAudio {
    pub mime: String,
    pub audio_base64: String,
}

pub struct TtsClient {
    client: Client,
    api_key: String,
    api_base: String,
}

impl TtsClient {
    pub fn new(api_key: String, api_base: String) -> Result<Self, AgentError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| AgentError::Speech(format!("http client: {err}")))?;
        Ok(Self {
            client,
            api_key,
            api_base,
        })
    }

    /// Synthesise the thought with the persona voice. Candidate models are
    /// tried in order; the first response carrying audio wins.
    pub async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceConfig,
    ) -> Result<SpeechAudio, AgentError> {
        let mut body = json!({
            "contents": [{ "parts": [{ "text": text }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "languageCode": voice.language_code,
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": voice.voice_name }
                    }
                }
            }
        });
        if let Some(instruction) = &voice.system_instruction {
            body["systemInstruction"] = json!({ "parts": [{ "text": instruction }] });
        }

        let mut last_error = String::from("no TTS model candidates configured");
        for model in TTS_MODEL_CANDIDATES {
            let url = format!(
                "{}/models/{}:generateContent?key={}",
                self.api_base.trim_end_matches('/'),
                model,
                self.api_key
            );
            match self.client.post(&url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {
                    let payload: Value = match resp.json().await {
                        Ok(payload) => payload,
                        Err(err) => {
                            last_error = format!("decode: {err}");
                            continue;
                        }
                    };
                    if let Some(audio) = extract_audio(&payload) {
                        debug!(model, mime = %audio.mime, "speech synthesised");
                        return Ok(audio);
                    }
                    last_error = format!("{model} returned no audio part");
                }
                Ok(resp) => {
                    last_error = format!("{model} returned {}", resp.status());
                    warn!(model, status = %resp.status(), "TTS candidate rejected");
                }
                Err(err) => {
                    last_error = err.to_string();
                    warn!(model, error = %last_error, "TTS request failed");
                }
            }
        }
        Err(AgentError::Speech(last_error))
    }
}

fn extract_audio(payload: &Value) -> Option<SpeechAudio> {
    let parts = payload
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    for part in parts {
        let Some(inline) = part.get("inlineData").or_else(|| part.get("inline_data")) else {
            continue;
        };
        let Some(mime) = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            continue;
        };
        let Some(data) = inline.get("data").and_then(Value::as_str) else {
            continue;
        };
        if mime.contains("wav") {
            return Some(SpeechAudio {
                mime,
                audio_base64: data.to_string(),
            });
        }
        // Raw PCM16 needs a minimal WAV header before browsers will play it.
        let pcm = base64::engine::general_purpose::STANDARD.decode(data).ok()?;
        let rate = sample_rate_from_mime(&mime);
        let wav = wrap_pcm16_in_wav(&pcm, rate);
        return Some(SpeechAudio {
            mime: "audio/wav".to_string(),
            audio_base64: base64::engine::general_purpose::STANDARD.encode(wav),
        });
    }
    None
}

fn sample_rate_from_mime(mime: &str) -> u32 {
    RATE_RE
        .captures(mime)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(DEFAULT_SAMPLE_RATE)
}

/// Minimal RIFF/WAVE header for mono 16-bit PCM.
fn wrap_pcm16_in_wav(pcm: &[u8], sample_rate: u32) -> Vec<u8> {
    let byte_rate = sample_rate * 2;
    let data_len = pcm.len() as u32;
    let mut wav = Vec::with_capacity(44 + pcm.len());
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&1u16.to_le_bytes()); // mono
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&2u16.to_le_bytes()); // block align
    wav.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.extend_from_slice(pcm);
    wav
}
