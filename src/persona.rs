//! Personas: named bundles of base prompt, browsing-context options and an
//! optional TTS voice. Immutable for the duration of a run.

use serde::{Deserialize, Serialize};

/// Browsing-context options derived from a persona.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextOptions {
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub device_scale_factor: f64,
    pub locale: String,
    pub timezone: String,
    pub reduced_motion: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            viewport_width: 1280,
            viewport_height: 720,
            device_scale_factor: 1.0,
            locale: "en-US".to_string(),
            timezone: "Europe/Berlin".to_string(),
            reduced_motion: false,
        }
    }
}

/// Voice configuration handed to the TTS endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    pub voice_name: String,
    pub language_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    pub base_prompt: String,
    pub context: ContextOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceConfig>,
}

impl Persona {
    /// Filesystem-safe slug: lowercase, non-alphanumeric runs collapsed to a
    /// single hyphen, trimmed at both ends.
    pub fn slug(&self) -> String {
        slugify(&self.name)
    }
}

pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_hyphen = true;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_hyphen = false;
        } else if !last_hyphen {
            slug.push('-');
            last_hyphen = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Built-in persona set. The full persona library is an external collaborator;
/// the core only needs enough to resolve a `personaName` from the control
/// surface.
pub fn builtin_personas() -> Vec<Persona> {
    vec![
        Persona {
            name: "default".to_string(),
            base_prompt: "You are an attentive first-time visitor exploring a website. \
                          You read what is on screen, follow the mission step by step, \
                          and explain your reasoning out loud in short first-person \
                          sentences before each action."
                .to_string(),
            context: ContextOptions::default(),
            voice: Some(VoiceConfig {
                voice_name: "Kore".to_string(),
                language_code: "en-US".to_string(),
                system_instruction: None,
            }),
        },
        Persona {
            name: "Casual Shopper".to_string(),
            base_prompt: "You are a casual shopper browsing in your free time. You are \
                          curious but impatient: you prefer big obvious buttons, you skim \
                          rather than read, and you abandon flows that ask for too much. \
                          Think aloud in a relaxed, colloquial voice."
                .to_string(),
            context: ContextOptions {
                viewport_width: 1366,
                viewport_height: 768,
                ..ContextOptions::default()
            },
            voice: Some(VoiceConfig {
                voice_name: "Puck".to_string(),
                language_code: "en-US".to_string(),
                system_instruction: Some("Speak casually, as if window shopping.".to_string()),
            }),
        },
        Persona {
            name: "Power User".to_string(),
            base_prompt: "You are an experienced power user. You know common web UI \
                          patterns, you use search and filters early, and you head for \
                          the shortest path to the mission goal. Keep thoughts terse and \
                          factual."
                .to_string(),
            context: ContextOptions {
                viewport_width: 1920,
                viewport_height: 1080,
                reduced_motion: true,
                ..ContextOptions::default()
            },
            voice: None,
        },
    ]
}

/// Resolve a persona by name (case-insensitive, slug-tolerant). Unknown names
/// fall back to the default persona.
pub fn resolve(name: &str) -> Persona {
    let wanted = slugify(name);
    let mut personas = builtin_personas();
    match personas.iter().position(|p| p.slug() == wanted) {
        Some(pos) => personas.swap_remove(pos),
        None => personas.swap_remove(0),
    }
}
