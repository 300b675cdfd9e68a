//! Deterministic misinformation signals.
//!
//! Used as the last-resort source when no network provider produced a usable
//! result. Rules cover Portuguese and English phrasing and fall in three
//! groups:
//!
//! | Group | Effect on truth score |
//! |-------|-----------------------|
//! | **Sensational** | urgency, share pressure, suppression and miracle claims lower it |
//! | **Credibility** | cited studies, official bodies, figures and links raise it |
//! | **Style** | shouting in capitals and exclamation runs lower it |
//!
//! A claim that matches nothing yields no score, so the fallback adds nothing
//! to a verdict rather than pretending to know.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const NEUTRAL_SCORE: f64 = 0.5;
const CREDIBILITY_STEP: f64 = 0.12;
const SENSATIONAL_STEP: f64 = 0.15;
const STYLE_STEP: f64 = 0.10;
const MAX_COUNTED_PER_GROUP: usize = 3;

const BASE_CONFIDENCE: f64 = 0.3;
const CONFIDENCE_PER_SIGNAL: f64 = 0.1;
const MAX_CONFIDENCE: f64 = 0.6;

/// Letters required before the capitals ratio is considered.
const MIN_LETTERS_FOR_CAPS: usize = 12;
const CAPS_RATIO: f64 = 0.6;

lazy_static! {
    // =========================================================================
    // SENSATIONAL PATTERNS
    // =========================================================================

    static ref SENSATIONAL_PATTERNS: Vec<(&'static str, Regex)> = vec![
        ("urgency", Regex::new(r"(?i)\b(urgente|urgent|breaking|alerta|aten[çc][ãa]o)\b").unwrap()),
        ("share pressure", Regex::new(r"(?i)\b(compartilhe|repasse|espalhe|share this|forward this|pass it on)\b").unwrap()),
        ("suppression claim", Regex::new(r"(?i)(antes que (apaguem|removam|deletem)|before (they|it gets) (delete|remove|censor)|a m[íi]dia n[ãa]o (mostra|divulga)|the media (won'?t|will not|doesn'?t) (show|tell)|n[ãa]o querem que voc[êe] saiba|they don'?t want you to know)").unwrap()),
        ("miracle claim", Regex::new(r"(?i)(cura (milagrosa|definitiva)|miracle cure|100% (garantido|comprovado|guaranteed|proven)|m[ée]dicos odeiam|doctors hate)").unwrap()),
        ("conspiracy framing", Regex::new(r"(?i)\b(farsa|hoax|cover-?up|plandemia|plandemic)\b").unwrap()),
    ];

    // =========================================================================
    // CREDIBILITY PATTERNS
    // =========================================================================

    static ref CREDIBILITY_PATTERNS: Vec<(&'static str, Regex)> = vec![
        ("cites research", Regex::new(r"(?i)(\b(segundo|de acordo com|conforme)\s+(a\s+|o\s+|uma\s+|um\s+)?(pesquisa|estudo|levantamento|universidade|relat[óo]rio|dados)|\baccording to (a |the )?(study|survey|report|research|university|data))").unwrap()),
        ("official source", Regex::new(r"\b(IBGE|OMS|WHO|CDC|IPEA|INPE|Fiocruz|Anvisa|Datafolha|Minist[ée]rio|Ministry)\b").unwrap()),
        ("quantified", Regex::new(r"\d+([.,]\d+)?\s?%").unwrap()),
        ("cites link", Regex::new(r"(?i)(https?://|\bfonte:|\bsource:)").unwrap()),
    ];

    // =========================================================================
    // STYLE PATTERNS
    // =========================================================================

    static ref EXCLAMATION_RUN: Regex = Regex::new(r"[!?]*![!?]*!+").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Sensational,
    Credibility,
    Style,
}

/// One rule match, with byte offsets into the assessed text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSignal {
    pub name: String,
    pub kind: SignalKind,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternAssessment {
    pub signals: Vec<PatternSignal>,
    /// Truth score in [0, 1]; `None` when nothing matched
    pub score: Option<f64>,
    pub confidence: Option<f64>,
}

impl PatternAssessment {
    pub fn has_signal(&self) -> bool {
        !self.signals.is_empty()
    }

    /// Distinct rule names that fired, in sorted order.
    pub fn signal_names(&self) -> Vec<&str> {
        let names: BTreeSet<&str> = self.signals.iter().map(|s| s.name.as_str()).collect();
        names.into_iter().collect()
    }
}

fn collect(patterns: &[(&'static str, Regex)], kind: SignalKind, text: &str) -> Vec<PatternSignal> {
    let mut signals = Vec::new();
    for (name, regex) in patterns.iter() {
        for m in regex.find_iter(text) {
            signals.push(PatternSignal {
                name: name.to_string(),
                kind,
                start: m.start(),
                end: m.end(),
            });
        }
    }
    signals
}

fn style_signals(text: &str) -> Vec<PatternSignal> {
    let mut signals = Vec::new();

    let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() >= MIN_LETTERS_FOR_CAPS {
        let upper = letters.iter().filter(|c| c.is_uppercase()).count();
        if upper as f64 / letters.len() as f64 > CAPS_RATIO {
            signals.push(PatternSignal {
                name: "all caps".to_string(),
                kind: SignalKind::Style,
                start: 0,
                end: text.len(),
            });
        }
    }

    for m in EXCLAMATION_RUN.find_iter(text) {
        signals.push(PatternSignal {
            name: "exclamation run".to_string(),
            kind: SignalKind::Style,
            start: m.start(),
            end: m.end(),
        });
    }

    signals
}

/// Run every rule over `text` and score the result.
pub fn assess(text: &str) -> PatternAssessment {
    let mut signals = collect(&SENSATIONAL_PATTERNS, SignalKind::Sensational, text);
    signals.extend(collect(&CREDIBILITY_PATTERNS, SignalKind::Credibility, text));
    signals.extend(style_signals(text));
    signals.sort_by(|a, b| a.start.cmp(&b.start).then(a.name.cmp(&b.name)));

    if signals.is_empty() {
        return PatternAssessment {
            signals,
            score: None,
            confidence: None,
        };
    }

    let distinct = |kind: SignalKind| {
        signals
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| s.name.as_str())
            .collect::<BTreeSet<_>>()
            .len()
            .min(MAX_COUNTED_PER_GROUP)
    };
    let sensational = distinct(SignalKind::Sensational);
    let credibility = distinct(SignalKind::Credibility);
    let style = distinct(SignalKind::Style);

    let score = (NEUTRAL_SCORE + CREDIBILITY_STEP * credibility as f64
        - SENSATIONAL_STEP * sensational as f64
        - STYLE_STEP * style as f64)
        .clamp(0.05, 0.95);
    let confidence = (BASE_CONFIDENCE
        + CONFIDENCE_PER_SIGNAL * (sensational + credibility + style) as f64)
        .min(MAX_CONFIDENCE);

    PatternAssessment {
        signals,
        score: Some(score),
        confidence: Some(confidence),
    }
}
