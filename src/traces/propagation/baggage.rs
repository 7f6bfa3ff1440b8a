use std::collections::BTreeMap;

use tracing::debug;

pub const BAGGAGE_HEADER: &str = "baggage";
pub const SENTRY_PREFIX: &str = "sentry-";

/// W3C baggage split into the `sentry-` members (the dynamic sampling
/// context) and whatever other vendors put in the header.
///
/// Once frozen the sentry members can no longer change. An incoming header
/// with at least one `sentry-` member arrives frozen, which is how a
/// downstream service avoids rewriting the head service's sampling context.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Baggage {
    items: BTreeMap<String, String>,
    third_party: String,
    frozen: bool,
}

impl Baggage {
    #[must_use]
    pub fn new() -> Self {
        Baggage::default()
    }

    /// Baggage that will never be populated, used when a trace arrives
    /// without a baggage header.
    #[must_use]
    pub fn frozen_empty() -> Self {
        Baggage {
            frozen: true,
            ..Baggage::default()
        }
    }

    #[must_use]
    pub fn from_items(items: BTreeMap<String, String>) -> Self {
        Baggage {
            items,
            third_party: String::new(),
            frozen: true,
        }
    }

    /// Parses a `baggage` header. Malformed members are skipped.
    #[must_use]
    pub fn from_incoming_header(header: &str) -> Self {
        let mut items = BTreeMap::new();
        let mut third_party = Vec::new();
        let mut found_sentry = false;

        for member in header.split(',') {
            let member = member.trim();
            let Some((key, value)) = member.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }

            if let Some(sentry_key) = key.strip_prefix(SENTRY_PREFIX) {
                found_sentry = true;
                items.insert(decode(sentry_key), decode(value.trim()));
            } else {
                third_party.push(member);
            }
        }

        Baggage {
            items,
            third_party: third_party.join(","),
            frozen: found_sentry,
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.items.get(key).map(String::as_str)
    }

    /// Sets a sentry member. Ignored once the baggage is frozen.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> bool {
        if self.frozen {
            debug!("TRACES | Ignoring update of frozen baggage member {key}");
            return false;
        }
        self.items.insert(key.to_string(), value.into());
        true
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    #[must_use]
    pub fn is_mutable(&self) -> bool {
        !self.frozen
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.third_party.is_empty()
    }

    #[must_use]
    pub fn third_party(&self) -> &str {
        &self.third_party
    }

    #[must_use]
    pub fn dynamic_sampling_context(&self) -> BTreeMap<String, String> {
        self.items.clone()
    }

    /// Header value: the sentry members first, then the untouched
    /// third-party remainder.
    #[must_use]
    pub fn serialize(&self, include_third_party: bool) -> String {
        let mut members: Vec<String> = self
            .items
            .iter()
            .map(|(key, value)| {
                format!(
                    "{SENTRY_PREFIX}{}={}",
                    urlencoding::encode(key),
                    urlencoding::encode(value)
                )
            })
            .collect();
        if include_third_party && !self.third_party.is_empty() {
            members.push(self.third_party.clone());
        }
        members.join(",")
    }
}

fn decode(raw: &str) -> String {
    let raw = raw.replace('+', "%20");
    match urlencoding::decode(&raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw,
    }
}
