// Copyright (c) 2026 Duskboard
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! The canonical record: a line-oriented, content-addressed unit of a
//! thread. `stamp<>id<>k=v<>k=v...`, where `id` is the MD5 of every
//! field but `stamp` and `id` itself, joined in the order given.

use base64::Engine;
use md5::{Digest, Md5};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::core::security::keystore::{FileEd25519Backend, Keystore, Signature};

/// Characters escaped in a field value before it is written to the wire
/// or to disk. `<`/`>` would otherwise be read back as the `<>` field
/// separator, `=` as the key/value separator, `%` is the escape
/// character itself.
const VALUE_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b'<')
    .add(b'>')
    .add(b'%')
    .add(b'=')
    .add(b'&')
    .add(b'+')
    .add(b'\n')
    .add(b'\r');

const FIELD_SEP: &str = "<>";
const KV_SEP: char = '=';

/// Record parsing, hashing, and signing failures.
#[derive(Debug, Error)]
pub enum RecordError {
    /// Line did not split into at least `stamp<>id`.
    #[error("malformed record line")]
    Malformed,
    /// `stamp` field was not a valid integer.
    #[error("malformed stamp")]
    BadStamp,
    /// A `k=v` field was missing the `=`.
    #[error("malformed field: {0}")]
    BadField(String),
    /// Recomputed MD5 did not match the textual `id` field.
    #[error("id does not match md5 of canonical body")]
    HashMismatch,
    /// Requested field is not present.
    #[error("missing field: {0}")]
    MissingField(&'static str),
    /// A value was not valid base64 where base64 was expected (e.g. `attach`).
    #[error("invalid base64 payload")]
    BadBase64,
    /// Signing backend failed.
    #[error("signing failed")]
    Sign,
}

/// A single append-only record belonging to one thread (`datfile`).
///
/// Fields are kept in the order they were parsed or built in, since
/// that order is part of the canonical body used for hashing — not
/// sorted, not deduplicated by the `Record` itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    /// Unix second timestamp.
    pub stamp: i64,
    /// Lowercase-hex MD5 of the canonical body.
    pub id: String,
    fields: Vec<(String, String)>,
}

impl Record {
    /// Canonical body string: every field but `stamp`/`id`, percent-escaped
    /// values, joined by `<>` in field order.
    fn canonical_body(fields: &[(String, String)]) -> String {
        fields
            .iter()
            .map(|(k, v)| format!("{k}{KV_SEP}{v}"))
            .collect::<Vec<_>>()
            .join(FIELD_SEP)
    }

    fn compute_id(fields: &[(String, String)]) -> String {
        let body = Self::canonical_body(fields);
        let mut hasher = Md5::new();
        hasher.update(body.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Parse a wire/disk line of the form `stamp<>id<>k=v<>...`.
    ///
    /// Never panics: malformed input is always a [`RecordError`], matching
    /// the "exception-for-control-flow in parsing" design rule — a record
    /// that fails here is logged and skipped by the caller, not crashed on.
    pub fn parse(line: &str) -> Result<Self, RecordError> {
        let line = line.trim_end_matches(['\n', '\r']);
        let mut parts = line.split(FIELD_SEP);

        let stamp_str = parts.next().ok_or(RecordError::Malformed)?;
        let id_str = parts.next().ok_or(RecordError::Malformed)?;
        let stamp: i64 = stamp_str.parse().map_err(|_| RecordError::BadStamp)?;

        let mut fields = Vec::new();
        for part in parts {
            let (k, v) = part
                .split_once(KV_SEP)
                .ok_or_else(|| RecordError::BadField(part.to_string()))?;
            fields.push((k.to_string(), v.to_string()));
        }

        let expected_id = Self::compute_id(&fields);
        if !expected_id.eq_ignore_ascii_case(id_str) {
            return Err(RecordError::HashMismatch);
        }

        Ok(Self { stamp, id: expected_id, fields })
    }

    /// Build a new record from raw (unescaped) `key=value` pairs, computing
    /// its `id` over the percent-escaped canonical body. When `signer` is
    /// given, `pubkey`/`sign`/`target` fields are appended: `sign` is a
    /// detached Ed25519 signature over the canonical body computed from
    /// every other field.
    pub fn build(
        stamp: i64,
        body: &[(&str, &str)],
        signer: Option<&Keystore<FileEd25519Backend>>,
    ) -> Result<Self, RecordError> {
        let mut fields: Vec<(String, String)> = body
            .iter()
            .map(|(k, v)| {
                (
                    k.to_string(),
                    utf8_percent_encode(v, VALUE_ENCODE_SET).to_string(),
                )
            })
            .collect();

        if let Some(ks) = signer {
            let unsigned_body = Self::canonical_body(&fields);
            let sig = ks.sign(unsigned_body.as_bytes()).map_err(|_| RecordError::Sign)?;
            fields.push(("pubkey".to_string(), hex::encode(ks.public_key())));
            fields.push(("sign".to_string(), hex::encode(sig.0)));
            fields.push(("target".to_string(), "body".to_string()));
        }

        let id = Self::compute_id(&fields);
        Ok(Self { stamp, id, fields })
    }

    /// `"<stamp>_<id>"`, the on-disk filename stem.
    pub fn idstr(&self) -> String {
        format!("{}_{}", self.stamp, self.id)
    }

    /// Serialise back to the wire/disk line form (without trailing `\n`).
    pub fn to_line(&self) -> String {
        format!("{}{FIELD_SEP}{}{FIELD_SEP}{}", self.stamp, self.id, Self::canonical_body(&self.fields))
    }

    /// Serialised length in bytes, used against `record_limit * 1024`.
    pub fn size(&self) -> usize {
        self.to_line().len()
    }

    /// Recompute the MD5 over the canonical body and compare to `id`.
    pub fn md5check(&self) -> bool {
        Self::compute_id(&self.fields) == self.id
    }

    /// Raw (still percent-escaped) value of a field, if present.
    pub fn get_raw(&self, key: &str) -> Option<&str> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Percent-decoded value of a field, if present.
    pub fn get_decoded(&self, key: &str) -> Option<String> {
        self.get_raw(key)
            .map(|v| percent_decode_str(v).decode_utf8_lossy().into_owned())
    }

    /// Insert or overwrite a field in place (preserving its original
    /// position if it already existed, appending otherwise). The caller
    /// is responsible for re-deriving `id` if this happens before hashing;
    /// intended for constructing a record, not for mutating a parsed one.
    pub fn set_raw(&mut self, key: &str, value: String) {
        if let Some(entry) = self.fields.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value;
        } else {
            self.fields.push((key.to_string(), value));
        }
    }

    /// The post body, percent-decoded.
    pub fn body(&self) -> String {
        self.get_decoded("body").unwrap_or_default()
    }

    /// `true` if this record carries `remove_stamp`/`remove_id`, i.e. it is
    /// a tombstone request rather than ordinary content.
    pub fn remove_target(&self) -> Option<(i64, String)> {
        let stamp: i64 = self.get_decoded("remove_stamp")?.parse().ok()?;
        let id = self.get_decoded("remove_id")?;
        Some((stamp, id))
    }

    /// Decoded attachment bytes (percent-decode, then base64-decode), if an
    /// `attach` field is present.
    pub fn attach_bytes(&self) -> Result<Option<Vec<u8>>, RecordError> {
        let Some(raw) = self.get_decoded("attach") else { return Ok(None) };
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(raw.as_bytes())
            .map_err(|_| RecordError::BadBase64)?;
        Ok(Some(bytes))
    }

    /// Attachment suffix, sanitised to `[0-9A-Za-z]` (directory traversal
    /// and path separators are never valid here).
    pub fn attach_suffix(&self) -> Option<String> {
        self.get_decoded("suffix").map(|s| {
            s.chars().filter(|c| c.is_ascii_alphanumeric()).collect::<String>()
        })
    }

    /// Whether this record's pubkey/sign/target fields verify against its
    /// own canonical body. Records without a signature are neither valid
    /// nor invalid here — signing is optional, callers decide whether to
    /// require it.
    pub fn verify_signature(&self) -> Option<bool> {
        let pubkey_hex = self.get_raw("pubkey")?;
        let sign_hex = self.get_raw("sign")?;
        let pubkey = hex::decode(pubkey_hex).ok()?;
        let sig_bytes = hex::decode(sign_hex).ok()?;
        if pubkey.len() != 32 {
            return Some(false);
        }
        let mut pk = [0u8; 32];
        pk.copy_from_slice(&pubkey);

        let unsigned: Vec<(String, String)> = self
            .fields
            .iter()
            .filter(|(k, _)| k != "pubkey" && k != "sign" && k != "target")
            .cloned()
            .collect();
        let msg = Self::canonical_body(&unsigned);
        let sig = Signature(sig_bytes);
        Some(crate::core::security::keystore::verify_pubkey_bytes(&pk, msg.as_bytes(), &sig).is_ok())
    }
}

/// A predicate deciding whether an incoming record is spam. Spam records
/// are tombstoned on arrival rather than kept live (§4.1).
pub trait SpamCheck: Send + Sync {
    /// Return `true` if `record` should be treated as spam.
    fn is_spam(&self, record: &Record) -> bool;
}

/// Conservative default: empty body with no attachment, or a body
/// identical to one seen very recently, counts as spam.
pub struct DefaultSpamFilter {
    window: Duration,
    recent: Mutex<VecDeque<(String, Instant)>>,
    capacity: usize,
}

impl DefaultSpamFilter {
    /// Build a filter that remembers bodies seen within `window`, capped
    /// at `capacity` entries (oldest evicted first).
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self { window, recent: Mutex::new(VecDeque::new()), capacity }
    }
}

impl Default for DefaultSpamFilter {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), 256)
    }
}

impl SpamCheck for DefaultSpamFilter {
    fn is_spam(&self, record: &Record) -> bool {
        if record.remove_target().is_some() {
            return false;
        }

        let body = record.body();
        if body.is_empty() && record.get_raw("attach").is_none() {
            return true;
        }

        let mut recent = match self.recent.lock() {
            Ok(g) => g,
            Err(_) => return false,
        };
        let now = Instant::now();
        while let Some((_, seen)) = recent.front() {
            if now.duration_since(*seen) > self.window {
                recent.pop_front();
            } else {
                break;
            }
        }
        if recent.iter().any(|(b, _)| b == &body) {
            return true;
        }
        if recent.len() >= self.capacity {
            recent.pop_front();
        }
        recent.push_back((body, now));
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_then_parse_round_trips() {
        let rec = Record::build(1_000, &[("body", "hello world"), ("name", "anon")], None).unwrap();
        let line = rec.to_line();
        let parsed = Record::parse(&line).unwrap();
        assert_eq!(rec, parsed);
        assert!(parsed.md5check());
    }

    #[test]
    fn escapes_separators_in_values() {
        let rec = Record::build(1, &[("body", "a<>b=c")], None).unwrap();
        let line = rec.to_line();
        let parsed = Record::parse(&line).unwrap();
        assert_eq!(parsed.body(), "a<>b=c");
    }

    #[test]
    fn tampered_id_is_rejected() {
        let rec = Record::build(1, &[("body", "hi")], None).unwrap();
        let mut line = rec.to_line();
        line.push_str("x");
        // still parses as a field boundary issue or hash mismatch depending on shape;
        // a directly corrupted id must fail.
        let bad = format!("1<>{}<>body=hi", "0".repeat(32));
        assert!(matches!(Record::parse(&bad), Err(RecordError::HashMismatch)));
        let _ = line;
    }

    #[test]
    fn idstr_matches_stamp_and_id() {
        let rec = Record::build(42, &[("body", "x")], None).unwrap();
        assert_eq!(rec.idstr(), format!("42_{}", rec.id));
    }

    #[test]
    fn remove_target_parses_when_present() {
        let rec = Record::build(5, &[("remove_stamp", "1"), ("remove_id", "abc")], None).unwrap();
        assert_eq!(rec.remove_target(), Some((1, "abc".to_string())));
    }

    #[test]
    fn boundary_size_limit() {
        let rec = Record::build(1, &[("body", &"a".repeat(100))], None).unwrap();
        assert_eq!(rec.size(), rec.to_line().len());
    }

    #[test]
    fn default_spam_filter_flags_empty_body() {
        let filter = DefaultSpamFilter::default();
        let rec = Record::build(1, &[], None).unwrap();
        assert!(filter.is_spam(&rec));
    }

    #[test]
    fn default_spam_filter_flags_repeat_within_window() {
        let filter = DefaultSpamFilter::new(Duration::from_secs(60), 8);
        let a = Record::build(1, &[("body", "same")], None).unwrap();
        let b = Record::build(2, &[("body", "same")], None).unwrap();
        assert!(!filter.is_spam(&a));
        assert!(filter.is_spam(&b));
    }
}
