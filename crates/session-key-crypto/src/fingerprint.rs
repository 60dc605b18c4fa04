//! Device fingerprinting.
//!
//! A [`FingerprintCollector`] reads a list of [`SignalSource`]s and reduces
//! them to a [`FingerprintHash`]: keys sorted, rendered as `key:value`,
//! joined with `|`, SHA-256, lowercase hex. The hash is the KDF salt that
//! binds an encrypted session key to the device that created it.
//!
//! Collection never fails. A source that cannot be read contributes
//! [`SENTINEL`]; if every source is degraded the collector falls back to a
//! minimal fingerprint over platform and screen geometry and logs it.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use data_encoding::HEXLOWER_PERMISSIVE;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

/// Value recorded for a signal that could not be read.
pub const SENTINEL: &str = "unavailable";

/// Separator between canonical `key:value` pairs.
const PAIR_SEPARATOR: &str = "|";

/// Length of a fingerprint digest in bytes.
pub const FINGERPRINT_LEN: usize = 32;

/// Signal keys every fingerprint is built from.
pub const REQUIRED_SIGNALS: [&str; 8] = [
    "renderer",
    "graphics",
    "audio",
    "screen",
    "timezone",
    "languages",
    "platform",
    "cores",
];

// ---------------------------------------------------------------------------
// FingerprintHash
// ---------------------------------------------------------------------------

/// SHA-256 digest identifying a device. Serialized as 64 lowercase hex chars.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FingerprintHash([u8; FINGERPRINT_LEN]);

impl FingerprintHash {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes; used directly as the KDF salt.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        data_encoding::HEXLOWER.encode(&self.0)
    }

    fn digest(canonical: &str) -> Self {
        Self(Sha256::digest(canonical.as_bytes()).into())
    }
}

impl fmt::Display for FingerprintHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for FingerprintHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FingerprintHash({})", self.to_hex())
    }
}

impl FromStr for FingerprintHash {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = HEXLOWER_PERMISSIVE
            .decode(s.trim().as_bytes())
            .map_err(|e| CryptoError::Validation(format!("invalid fingerprint hex: {e}")))?;
        let array = <[u8; FINGERPRINT_LEN]>::try_from(bytes.as_slice()).map_err(|_| {
            CryptoError::Validation(format!(
                "invalid fingerprint length: {} bytes (expected {FINGERPRINT_LEN})",
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }
}

impl Serialize for FingerprintHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for FingerprintHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// DeviceFingerprint
// ---------------------------------------------------------------------------

/// A freshly collected fingerprint. Immutable once built.
#[derive(Clone, Debug)]
pub struct DeviceFingerprint {
    fingerprint: FingerprintHash,
    generated_at: DateTime<Utc>,
    components: BTreeMap<String, String>,
    fallback: bool,
}

impl DeviceFingerprint {
    #[must_use]
    pub const fn hash(&self) -> &FingerprintHash {
        &self.fingerprint
    }

    #[must_use]
    pub const fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    /// The signal values that went into the digest, keyed by signal name.
    #[must_use]
    pub const fn components(&self) -> &BTreeMap<String, String> {
        &self.components
    }

    /// `true` when every signal was degraded and the minimal fallback was used.
    #[must_use]
    pub const fn is_fallback(&self) -> bool {
        self.fallback
    }
}

// ---------------------------------------------------------------------------
// Signal sources
// ---------------------------------------------------------------------------

/// One device signal. `read` returns `None` when the signal is unavailable.
pub trait SignalSource: Send + Sync {
    fn key(&self) -> &str;

    fn read(&self) -> Option<String>;
}

/// A signal whose value is supplied by the host (mobile shells, tests).
#[derive(Clone, Debug)]
pub struct StaticSignal {
    key: String,
    value: Option<String>,
}

impl StaticSignal {
    pub fn new(key: impl Into<String>, value: Option<String>) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

impl SignalSource for StaticSignal {
    fn key(&self) -> &str {
        &self.key
    }

    fn read(&self) -> Option<String> {
        self.value.clone()
    }
}

/// A signal computed by a plain function.
pub struct FnSignal {
    key: &'static str,
    read: fn() -> Option<String>,
}

impl FnSignal {
    #[must_use]
    pub const fn new(key: &'static str, read: fn() -> Option<String>) -> Self {
        Self { key, read }
    }
}

impl SignalSource for FnSignal {
    fn key(&self) -> &str {
        self.key
    }

    fn read(&self) -> Option<String> {
        (self.read)()
    }
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

/// Gathers signals and produces a [`DeviceFingerprint`].
pub struct FingerprintCollector {
    sources: Vec<Box<dyn SignalSource>>,
}

impl FingerprintCollector {
    #[must_use]
    pub fn new(sources: Vec<Box<dyn SignalSource>>) -> Self {
        Self { sources }
    }

    /// Collector over OS and environment signals of the current process.
    ///
    /// Timezone and languages come from system configuration before the
    /// process environment. `renderer` still reads `XDG_SESSION_TYPE` and
    /// `DISPLAY`, so a headless launch (cron, a system service) hashes
    /// differently from a desktop session on the same machine. Such hosts
    /// should build their collector with [`from_signals`](Self::from_signals).
    #[must_use]
    pub fn desktop() -> Self {
        Self::new(vec![
            Box::new(FnSignal::new("renderer", desktop::renderer)),
            Box::new(FnSignal::new("graphics", desktop::graphics)),
            Box::new(FnSignal::new("audio", desktop::audio)),
            Box::new(FnSignal::new("screen", desktop::screen)),
            Box::new(FnSignal::new("timezone", desktop::timezone)),
            Box::new(FnSignal::new("languages", desktop::languages)),
            Box::new(FnSignal::new("platform", desktop::platform)),
            Box::new(FnSignal::new("cores", desktop::cores)),
        ])
    }

    /// Collector over host-supplied values. Missing required keys degrade.
    #[must_use]
    pub fn from_signals<I, K, V>(signals: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let sources = signals
            .into_iter()
            .map(|(k, v)| Box::new(StaticSignal::new(k, Some(v.into()))) as Box<dyn SignalSource>)
            .collect();
        Self::new(sources)
    }

    /// Read every source and digest the result.
    #[must_use]
    pub fn collect(&self) -> DeviceFingerprint {
        let mut components: BTreeMap<String, String> = REQUIRED_SIGNALS
            .iter()
            .map(|k| ((*k).to_owned(), SENTINEL.to_owned()))
            .collect();

        for source in &self.sources {
            let value = match source.read().map(|v| normalize(&v)) {
                Some(v) if !v.is_empty() => v,
                _ => {
                    tracing::debug!(signal = source.key(), "fingerprint signal unavailable");
                    SENTINEL.to_owned()
                }
            };
            components.insert(source.key().to_owned(), value);
        }

        let degraded = components.values().all(|v| v == SENTINEL);
        if degraded {
            tracing::warn!(
                "all fingerprint signals unavailable; using platform fallback, device binding is weak"
            );
            let mut minimal = BTreeMap::new();
            minimal.insert("platform".to_owned(), desktop::target_platform());
            minimal.insert(
                "screen".to_owned(),
                components
                    .get("screen")
                    .cloned()
                    .unwrap_or_else(|| SENTINEL.to_owned()),
            );
            components = minimal;
        }

        DeviceFingerprint {
            fingerprint: FingerprintHash::digest(&canonicalize(&components)),
            generated_at: Utc::now(),
            components,
            fallback: degraded,
        }
    }
}

impl Default for FingerprintCollector {
    fn default() -> Self {
        Self::desktop()
    }
}

/// Sorted `key:value` pairs joined by [`PAIR_SEPARATOR`].
#[must_use]
pub fn canonicalize(components: &BTreeMap<String, String>) -> String {
    components
        .iter()
        .map(|(k, v)| format!("{k}:{v}"))
        .collect::<Vec<_>>()
        .join(PAIR_SEPARATOR)
}

/// Collapse whitespace and strip the pair separator so values cannot forge pairs.
fn normalize(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace(PAIR_SEPARATOR, "/")
}

// ---------------------------------------------------------------------------
// Desktop signal readers
// ---------------------------------------------------------------------------

mod desktop {
    use std::env;
    use std::fs;

    fn first_env(vars: &[&str]) -> Option<String> {
        vars.iter()
            .filter_map(|v| env::var(v).ok())
            .find(|v| !v.trim().is_empty())
    }

    fn first_line(path: &str) -> Option<String> {
        fs::read_to_string(path)
            .ok()
            .and_then(|s| s.lines().next().map(str::trim).map(str::to_owned))
            .filter(|s| !s.is_empty())
    }

    pub(super) fn target_platform() -> String {
        format!("{}-{}", env::consts::OS, env::consts::ARCH)
    }

    pub(super) fn platform() -> Option<String> {
        Some(target_platform())
    }

    pub(super) fn cores() -> Option<String> {
        std::thread::available_parallelism()
            .ok()
            .map(|n| n.get().to_string())
    }

    /// System zone first: `TZ` differs between a login shell and a service
    /// launch on the same machine.
    pub(super) fn timezone() -> Option<String> {
        fs::read_link("/etc/localtime")
            .ok()
            .and_then(|target| zone_from_link(&target.to_string_lossy()))
            .or_else(|| first_line("/etc/timezone"))
            .or_else(|| first_env(&["TZ"]))
    }

    pub(super) fn zone_from_link(target: &str) -> Option<String> {
        target
            .split_once("zoneinfo/")
            .map(|(_, zone)| zone.trim().to_owned())
            .filter(|zone| !zone.is_empty())
    }

    /// System locale first, process locale only when none is configured.
    pub(super) fn languages() -> Option<String> {
        ["/etc/locale.conf", "/etc/default/locale"]
            .iter()
            .find_map(|path| {
                let text = fs::read_to_string(path).ok()?;
                let langs = locale_file_languages(&text);
                (!langs.is_empty()).then(|| langs.join(","))
            })
            .or_else(|| {
                let values: Vec<String> = ["LANGUAGE", "LC_ALL", "LANG"]
                    .iter()
                    .filter_map(|var| env::var(var).ok())
                    .collect();
                let langs = split_languages(values.iter().map(String::as_str));
                (!langs.is_empty()).then(|| langs.join(","))
            })
    }

    /// `LANGUAGE` then `LANG` from a `KEY=value` locale file.
    pub(super) fn locale_file_languages(text: &str) -> Vec<String> {
        let value_of = |key: &str| {
            text.lines().find_map(|line| {
                let (k, v) = line.trim().split_once('=')?;
                (k.trim() == key).then(|| v.trim().trim_matches('"').to_owned())
            })
        };
        let values: Vec<String> = ["LANGUAGE", "LANG"].iter().filter_map(|k| value_of(k)).collect();
        split_languages(values.iter().map(String::as_str))
    }

    fn split_languages<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
        let mut langs: Vec<String> = Vec::new();
        for value in values {
            for lang in value.split(':').map(str::trim).filter(|l| !l.is_empty()) {
                if !langs.iter().any(|l| l == lang) {
                    langs.push(lang.to_owned());
                }
            }
        }
        langs
    }

    pub(super) fn renderer() -> Option<String> {
        if let Some(session) = first_env(&["XDG_SESSION_TYPE"]) {
            return Some(session);
        }
        if env::var_os("WAYLAND_DISPLAY").is_some() {
            return Some("wayland".into());
        }
        if env::var_os("DISPLAY").is_some() {
            return Some("x11".into());
        }
        if cfg!(target_os = "macos") {
            return Some("quartz".into());
        }
        if cfg!(target_os = "windows") {
            return Some("dwm".into());
        }
        None
    }

    pub(super) fn graphics() -> Option<String> {
        let vendor = first_line("/sys/class/drm/card0/device/vendor")?;
        let device = first_line("/sys/class/drm/card0/device/device")
            .unwrap_or_else(|| super::SENTINEL.to_owned());
        Some(format!("{vendor}:{device}"))
    }

    pub(super) fn audio() -> Option<String> {
        first_line("/proc/asound/cards")
    }

    pub(super) fn screen() -> Option<String> {
        let entries = fs::read_dir("/sys/class/drm").ok()?;
        let mut modes: Vec<String> = entries
            .filter_map(Result::ok)
            .filter_map(|e| first_line(&format!("{}/modes", e.path().display())))
            .collect();
        modes.sort();
        modes.dedup();
        (!modes.is_empty()).then(|| modes.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_signals() -> Vec<(&'static str, &'static str)> {
        vec![
            ("renderer", "ANGLE (Apple, M2)"),
            ("graphics", "0x106b:0x0f"),
            ("audio", "44100:2"),
            ("screen", "2560x1600x30"),
            ("timezone", "Europe/Paris"),
            ("languages", "fr-FR,en-US"),
            ("platform", "MacIntel"),
            ("cores", "8"),
        ]
    }

    #[test]
    fn collect_is_deterministic() {
        let collector = FingerprintCollector::from_signals(full_signals());
        let a = collector.collect();
        let b = collector.collect();
        assert_eq!(a.hash(), b.hash());
        assert!(!a.is_fallback());
    }

    #[test]
    fn source_order_does_not_change_hash() {
        let mut reversed = full_signals();
        reversed.reverse();
        let a = FingerprintCollector::from_signals(full_signals()).collect();
        let b = FingerprintCollector::from_signals(reversed).collect();
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn hash_matches_sha256_of_canonical_form() {
        let fp = FingerprintCollector::from_signals(full_signals()).collect();
        let canonical = canonicalize(fp.components());
        assert!(canonical.starts_with("audio:44100:2|cores:8|"));
        let expected = data_encoding::HEXLOWER.encode(&Sha256::digest(canonical.as_bytes()));
        assert_eq!(fp.hash().to_hex(), expected);
        assert_eq!(fp.hash().to_hex().len(), 64);
    }

    #[test]
    fn changed_signal_changes_hash() {
        let a = FingerprintCollector::from_signals(full_signals()).collect();
        let mut other = full_signals();
        other[7] = ("cores", "16");
        let b = FingerprintCollector::from_signals(other).collect();
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn missing_signals_degrade_to_sentinel() {
        let fp = FingerprintCollector::from_signals([("platform", "Linux x86_64")]).collect();
        assert_eq!(fp.components().len(), REQUIRED_SIGNALS.len());
        assert_eq!(fp.components()["audio"], SENTINEL);
        assert_eq!(fp.components()["platform"], "Linux x86_64");
        assert!(!fp.is_fallback());
    }

    #[test]
    fn unreadable_source_degrades_instead_of_failing() {
        let collector = FingerprintCollector::new(vec![
            Box::new(StaticSignal::new("audio", None)),
            Box::new(StaticSignal::new("cores", Some("   ".into()))),
            Box::new(StaticSignal::new("platform", Some("Win32".into()))),
        ]);
        let fp = collector.collect();
        assert_eq!(fp.components()["audio"], SENTINEL);
        assert_eq!(fp.components()["cores"], SENTINEL);
    }

    #[test]
    fn all_degraded_uses_minimal_fallback() {
        let fp = FingerprintCollector::new(Vec::new()).collect();
        assert!(fp.is_fallback());
        assert_eq!(fp.components().len(), 2);
        assert!(fp.components().contains_key("platform"));
        assert_eq!(fp.components()["screen"], SENTINEL);
        let again = FingerprintCollector::new(Vec::new()).collect();
        assert_eq!(fp.hash(), again.hash());
    }

    #[test]
    fn values_cannot_inject_pairs() {
        let fp = FingerprintCollector::from_signals([("platform", "a|cores:99")]).collect();
        assert_eq!(fp.components()["platform"], "a/cores:99");
    }

    #[test]
    fn desktop_collector_never_fails() {
        let fp = FingerprintCollector::desktop().collect();
        assert_eq!(fp.hash().as_bytes().len(), FINGERPRINT_LEN);
        assert!(fp.components().contains_key("platform"));
    }

    #[test]
    fn fingerprint_hash_hex_roundtrip() {
        let fp = FingerprintCollector::from_signals(full_signals()).collect();
        let parsed: FingerprintHash = fp.hash().to_hex().parse().expect("parse should succeed");
        assert_eq!(&parsed, fp.hash());
        let upper: FingerprintHash = fp
            .hash()
            .to_hex()
            .to_uppercase()
            .parse()
            .expect("uppercase hex should parse");
        assert_eq!(&upper, fp.hash());
    }

    #[test]
    fn fingerprint_hash_rejects_bad_input() {
        assert!(matches!(
            "abcd".parse::<FingerprintHash>(),
            Err(CryptoError::Validation(_))
        ));
        assert!(matches!(
            "zz".repeat(32).parse::<FingerprintHash>(),
            Err(CryptoError::Validation(_))
        ));
    }

    #[test]
    fn fingerprint_hash_serializes_as_hex_string() {
        let hash = FingerprintHash::from_bytes([0xAB; 32]);
        let json = serde_json::to_string(&hash).expect("serialize should succeed");
        assert_eq!(json, format!("\"{}\"", "ab".repeat(32)));
        let back: FingerprintHash = serde_json::from_str(&json).expect("deserialize should succeed");
        assert_eq!(back, hash);
    }

    #[test]
    fn locale_file_prefers_language_list_then_lang() {
        let text = "# system locale\nLANG=\"en_US.UTF-8\"\nLANGUAGE=fr_FR:en_US.UTF-8\n";
        assert_eq!(
            desktop::locale_file_languages(text),
            vec!["fr_FR".to_owned(), "en_US.UTF-8".to_owned()]
        );
        assert!(desktop::locale_file_languages("LC_TIME=C\n").is_empty());
    }

    #[test]
    fn zone_is_taken_from_localtime_link() {
        assert_eq!(
            desktop::zone_from_link("/usr/share/zoneinfo/Europe/Paris").as_deref(),
            Some("Europe/Paris")
        );
        assert_eq!(
            desktop::zone_from_link("../usr/share/zoneinfo/UTC").as_deref(),
            Some("UTC")
        );
        assert!(desktop::zone_from_link("/etc/custom-zone").is_none());
    }
}
