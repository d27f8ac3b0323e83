use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::document::Rotation;

/// Writing system families the recognizer knows how to configure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Script {
    Latin,
    Cyrillic,
    Greek,
    /// Undetermined script. Recognised with the Latin defaults.
    Unknown,
}

impl Script {
    pub const KNOWN: [Script; 3] = [Script::Latin, Script::Cyrillic, Script::Greek];

    pub fn as_str(&self) -> &'static str {
        match self {
            Script::Latin => "latin",
            Script::Cyrillic => "cyrillic",
            Script::Greek => "greek",
            Script::Unknown => "unknown",
        }
    }

    /// Tesseract language packs for this script, most common first.
    pub fn languages(&self) -> &'static [&'static str] {
        match self {
            Script::Latin | Script::Unknown => &["eng", "fra", "deu", "spa", "ita", "por"],
            Script::Cyrillic => &["rus", "ukr", "bel", "bul", "srp"],
            Script::Greek => &["ell"],
        }
    }

    /// Script owning a Tesseract language code, if it is one we know.
    pub fn from_language(tag: &str) -> Option<Script> {
        Script::KNOWN
            .into_iter()
            .find(|script| script.languages().contains(&tag))
    }

    pub fn of_char(c: char) -> Option<Script> {
        match c {
            'A'..='Z' | 'a'..='z' | '\u{00C0}'..='\u{024F}' => Some(Script::Latin),
            '\u{0400}'..='\u{04FF}' | '\u{0500}'..='\u{052F}' => Some(Script::Cyrillic),
            '\u{0370}'..='\u{03FF}' => Some(Script::Greek),
            _ => None,
        }
    }

    /// Script shares of the letters in `text`, unordered. Empty when no letter is recognised.
    pub fn score_text(text: &str) -> Vec<ScriptScore> {
        let mut counts = [0usize; 3];
        for c in text.chars() {
            match Script::of_char(c) {
                Some(Script::Latin) => counts[0] += 1,
                Some(Script::Cyrillic) => counts[1] += 1,
                Some(Script::Greek) => counts[2] += 1,
                _ => {}
            }
        }

        let total: usize = counts.iter().sum();
        if total == 0 {
            return Vec::new();
        }

        Script::KNOWN
            .into_iter()
            .zip(counts)
            .filter(|(_, count)| *count > 0)
            .map(|(script, count)| ScriptScore {
                script,
                confidence: count as f32 / total as f32,
            })
            .collect()
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Script {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "latin" | "latn" => Ok(Script::Latin),
            "cyrillic" | "cyrl" => Ok(Script::Cyrillic),
            "greek" | "grek" => Ok(Script::Greek),
            "unknown" => Ok(Script::Unknown),
            other => Err(format!("unknown script '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScriptScore {
    pub script: Script,
    pub confidence: f32,
}

/// Ranked script candidates plus the page rotation guess for one image.
///
/// Candidates are never empty and always sorted by descending confidence. Deserialization
/// goes through [`ScriptHypothesis::new`], so stored hypotheses keep those guarantees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "HypothesisFields")]
pub struct ScriptHypothesis {
    candidates: Vec<ScriptScore>,
    pub rotation: Rotation,
    pub rotation_confidence: f32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HypothesisFields {
    #[serde(default)]
    candidates: Vec<ScriptScore>,
    #[serde(default)]
    rotation: Rotation,
    #[serde(default)]
    rotation_confidence: f32,
}

impl From<HypothesisFields> for ScriptHypothesis {
    fn from(fields: HypothesisFields) -> Self {
        Self::new(fields.candidates, fields.rotation, fields.rotation_confidence)
    }
}

impl ScriptHypothesis {
    /// Build a hypothesis, merging duplicate scripts and normalising confidences to sum to 1.
    pub fn new(scores: Vec<ScriptScore>, rotation: Rotation, rotation_confidence: f32) -> Self {
        let mut merged: Vec<ScriptScore> = Vec::with_capacity(scores.len());
        for score in scores {
            let confidence = if score.confidence.is_finite() {
                score.confidence.max(0.0)
            } else {
                0.0
            };
            match merged.iter_mut().find(|s| s.script == score.script) {
                Some(existing) => existing.confidence += confidence,
                None => merged.push(ScriptScore {
                    script: score.script,
                    confidence,
                }),
            }
        }

        if merged.is_empty() {
            return Self::fallback();
        }

        let total: f32 = merged.iter().map(|s| s.confidence).sum();
        if total > 0.0 {
            for score in &mut merged {
                score.confidence /= total;
            }
        }
        // Stable sort keeps input order among equal confidences.
        merged.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        Self {
            candidates: merged,
            rotation,
            rotation_confidence: rotation_confidence.clamp(0.0, 1.0),
        }
    }

    /// The guaranteed "unknown, read as Latin" hypothesis.
    pub fn fallback() -> Self {
        Self {
            candidates: vec![ScriptScore {
                script: Script::Unknown,
                confidence: 0.0,
            }],
            rotation: Rotation::None,
            rotation_confidence: 0.0,
        }
    }

    pub fn primary(&self) -> ScriptScore {
        self.candidates[0]
    }

    pub fn secondary(&self) -> &[ScriptScore] {
        &self.candidates[1..]
    }

    pub fn candidates(&self) -> &[ScriptScore] {
        &self.candidates
    }

    pub fn is_fallback(&self) -> bool {
        self.candidates.len() == 1 && self.candidates[0].script == Script::Unknown
    }
}

/// Language packs the engine reports as installed, filtered by the configured script allowlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageCatalog {
    installed: BTreeSet<String>,
    allowed: Vec<Script>,
}

impl LanguageCatalog {
    pub fn new<I, S>(installed: I, allowed: &[Script]) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut scripts: Vec<Script> = Vec::new();
        for script in allowed {
            if *script != Script::Unknown && !scripts.contains(script) {
                scripts.push(*script);
            }
        }
        Self {
            installed: installed.into_iter().map(Into::into).collect(),
            allowed: scripts,
        }
    }

    pub fn installed_languages(&self) -> impl Iterator<Item = &str> {
        self.installed.iter().map(String::as_str)
    }

    /// Allowed script with at least one installed language pack.
    pub fn is_installed(&self, script: Script) -> bool {
        let script = if script == Script::Unknown {
            Script::Latin
        } else {
            script
        };
        self.allowed.contains(&script)
            && script
                .languages()
                .iter()
                .any(|lang| self.installed.contains(*lang))
    }

    pub fn installed_scripts(&self) -> Vec<Script> {
        self.allowed
            .iter()
            .copied()
            .filter(|s| self.is_installed(*s))
            .collect()
    }

    /// Closest installed script: the script itself, else Latin, else the first installed one.
    pub fn nearest_installed(&self, script: Script) -> Option<Script> {
        if script != Script::Unknown && self.is_installed(script) {
            return Some(script);
        }
        if self.is_installed(Script::Latin) {
            return Some(Script::Latin);
        }
        self.installed_scripts().into_iter().next()
    }

    /// Language tags to request for `script`.
    ///
    /// Installed packs come first in the script's preference order. With nothing installed
    /// the script's primary pack is still returned, so the engine can report it missing.
    pub fn languages_for(&self, script: Script) -> Vec<String> {
        let installed: Vec<String> = script
            .languages()
            .iter()
            .filter(|lang| self.installed.contains(**lang))
            .map(|lang| lang.to_string())
            .collect();

        if installed.is_empty() {
            script
                .languages()
                .first()
                .map(|lang| vec![lang.to_string()])
                .unwrap_or_default()
        } else {
            installed
        }
    }

    /// Every installed language of every allowed script, for the last-resort attempt.
    pub fn combined_languages(&self) -> Vec<String> {
        let mut languages = Vec::new();
        for script in &self.allowed {
            for lang in self.languages_for(*script) {
                if !languages.contains(&lang) {
                    languages.push(lang);
                }
            }
        }
        languages
    }
}
