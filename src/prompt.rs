//! Prompt compilation.
//!
//! [`compile`] is a pure, total function from the parameter surface to a
//! [`CompiledPrompt`]: the text sent to the remote generation service plus a
//! cache key that is order-independent and weight-quantized, so two logically
//! identical parameter states always collide in the cache no matter which
//! edit sequence produced them.

use serde::{Deserialize, Serialize};

use crate::channel::{Channel, ChannelType, GlobalSettings};

/// Emphasis applied above this weight.
const VERY_THRESHOLD: f32 = 0.7;
/// Emphasis applied at or below this weight (and above the activity floor).
const SUBTLE_THRESHOLD: f32 = 0.4;
/// Group members blended into the text, strongest first.
const BLEND_LIMIT: usize = 3;

/// The derived prompt text and its cache key. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledPrompt {
    pub text: String,
    pub cache_key: String,
}

/// Compile the active channels + settings into prompt text and cache key.
pub fn compile(channels: &[Channel], settings: &GlobalSettings) -> CompiledPrompt {
    let mut parts: Vec<String> = Vec::new();
    // Tuples of contributing channels, serialized for the cache key.
    let mut key_tuples: Vec<String> = Vec::new();

    for kind in ChannelType::ALL {
        let mut group: Vec<&Channel> = channels
            .iter()
            .filter(|c| c.kind == kind && c.is_active())
            .collect();
        if group.is_empty() {
            continue;
        }
        // Strongest first; ties keep registry order.
        group.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal));
        group.truncate(BLEND_LIMIT);

        if group.len() == 1 {
            let only = group[0];
            parts.push(format!("{}{}", emphasis(only.weight), normalize(&only.value)));
        } else {
            let blend: Vec<String> = group.iter().map(|c| normalize(&c.value)).collect();
            parts.push(blend.join(" and "));
        }

        for c in &group {
            key_tuples.push(format!("{}:{}:{:.2}", c.kind, normalize(&c.value), c.weight));
        }
    }

    parts.push(format!("{} BPM", settings.bpm));
    parts.push(format!("{} {}", settings.key, settings.scale));

    if settings.density < 0.3 {
        parts.push("sparse, minimal".to_string());
    } else if settings.density > 0.7 {
        parts.push("dense, layered".to_string());
    }
    if settings.brightness < 0.3 {
        parts.push("warm, mellow".to_string());
    } else if settings.brightness > 0.7 {
        parts.push("bright, crisp".to_string());
    }

    let text = parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(", ");

    key_tuples.sort();
    let cache_key = format!(
        "{}|bpm={}|key={}|scale={}|density={:.2}|brightness={:.2}|dur={:.1}",
        key_tuples.join("|"),
        settings.bpm,
        settings.key,
        settings.scale,
        settings.density,
        settings.brightness,
        settings.duration_s,
    );

    CompiledPrompt { text, cache_key }
}

fn emphasis(weight: f32) -> &'static str {
    if weight > VERY_THRESHOLD {
        "very "
    } else if weight > SUBTLE_THRESHOLD {
        ""
    } else {
        "subtle "
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}
