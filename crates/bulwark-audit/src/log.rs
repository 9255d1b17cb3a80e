//! The audit log: append, query and verify.

use std::fmt;
use std::io::Write;
use std::ops::{RangeFrom, RangeFull, RangeInclusive};
use std::sync::Arc;

use bulwark_clock::ClockService;
use bulwark_core::{CorrelationId, Timestamp};
use bulwark_crypto::{ContentHash, KeyPair, PublicKey};
use bulwark_storage::{KvStore, KvWrite, MemoryKvStore};
use futures::{Stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::entry::{AuditEntry, AuditRecord};
use crate::error::{AuditError, AuditResult};

// -- Namespace constants --

const NS_ENTRIES: &str = "audit:entries";
const NS_META: &str = "audit:meta";
const HEAD_KEY: &str = "head";

/// Entries read per storage scan.
const PAGE_SIZE: usize = 256;

fn sequence_key(sequence: u64) -> String {
    format!("{sequence:020}")
}

/// An inclusive range of sequence numbers; open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceRange {
    /// First sequence (inclusive); `None` starts at genesis.
    pub from: Option<u64>,
    /// Last sequence (inclusive); `None` runs to the head.
    pub to: Option<u64>,
}

impl SequenceRange {
    /// The whole log.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// `from..=to`, either end optional.
    #[must_use]
    pub fn new(from: Option<u64>, to: Option<u64>) -> Self {
        Self { from, to }
    }

    fn start(&self) -> u64 {
        self.from.unwrap_or(1).max(1)
    }

    /// Exclusive scan end key, if bounded.
    fn end_key(&self) -> Option<String> {
        self.to.and_then(|to| to.checked_add(1)).map(sequence_key)
    }
}

impl From<RangeFull> for SequenceRange {
    fn from(_: RangeFull) -> Self {
        Self::all()
    }
}

impl From<RangeFrom<u64>> for SequenceRange {
    fn from(range: RangeFrom<u64>) -> Self {
        Self::new(Some(range.start), None)
    }
}

impl From<RangeInclusive<u64>> for SequenceRange {
    fn from(range: RangeInclusive<u64>) -> Self {
        Self::new(Some(*range.start()), Some(*range.end()))
    }
}

/// The chain head: the last appended entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditHead {
    /// Sequence of the last entry; 0 when the log is empty.
    pub sequence: u64,
    /// Hash of the last entry; zero when the log is empty.
    pub hash: ContentHash,
    /// Timestamp of the last entry.
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}

impl AuditHead {
    fn genesis() -> Self {
        Self {
            sequence: 0,
            hash: ContentHash::zero(),
            timestamp: None,
        }
    }
}

/// Result of chain verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainVerification {
    /// Entries that passed every check before the first divergence.
    pub entries_verified: u64,
    /// The first divergence, if any.
    pub issue: Option<ChainIssue>,
}

impl ChainVerification {
    /// Whether no divergence was found.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.issue.is_none()
    }
}

/// The first divergence found by [`AuditLog::verify_chain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainIssue {
    /// The first entry does not start from the zero hash.
    InvalidGenesis {
        /// Sequence of the offending entry.
        sequence: u64,
    },
    /// An entry is missing or out of place.
    SequenceGap {
        /// The sequence that should have come next.
        expected: u64,
        /// What was found instead (`None` if the log ended).
        found: Option<u64>,
    },
    /// An entry does not link to its predecessor.
    BrokenLink {
        /// Sequence of the offending entry.
        sequence: u64,
        /// Predecessor's hash.
        expected_prior: ContentHash,
        /// Prior hash recorded in the entry.
        actual_prior: ContentHash,
    },
    /// An entry's content no longer matches its hash.
    HashMismatch {
        /// Sequence of the offending entry.
        sequence: u64,
    },
    /// An entry's signature is invalid or from an unknown key.
    InvalidSignature {
        /// Sequence of the offending entry.
        sequence: u64,
    },
    /// An entry could not be decoded.
    Unreadable {
        /// Sequence from the storage key.
        sequence: u64,
    },
    /// The recorded head disagrees with the last entry.
    HeadMismatch {
        /// Sequence recorded in the head.
        head_sequence: u64,
        /// Last sequence actually present.
        last_sequence: u64,
    },
}

impl fmt::Display for ChainIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidGenesis { sequence } => write!(f, "invalid genesis at #{sequence}"),
            Self::SequenceGap {
                expected,
                found: Some(found),
            } => write!(f, "sequence gap: expected #{expected}, found #{found}"),
            Self::SequenceGap {
                expected,
                found: None,
            } => write!(f, "sequence gap: #{expected} is missing"),
            Self::BrokenLink { sequence, .. } => write!(f, "broken chain link at #{sequence}"),
            Self::HashMismatch { sequence } => write!(f, "content hash mismatch at #{sequence}"),
            Self::InvalidSignature { sequence } => write!(f, "invalid signature at #{sequence}"),
            Self::Unreadable { sequence } => write!(f, "unreadable entry at #{sequence}"),
            Self::HeadMismatch {
                head_sequence,
                last_sequence,
            } => write!(
                f,
                "head records #{head_sequence} but last entry is #{last_sequence}"
            ),
        }
    }
}

/// Append-only, hash-chained audit log.
///
/// Appends are serialized by a short-held lock over the chain head; each
/// append writes the entry and the new head in one atomic batch. Entries
/// are never rewritten or deleted.
pub struct AuditLog {
    store: Arc<dyn KvStore>,
    clock: Arc<ClockService>,
    runtime_key: KeyPair,
    head: Mutex<AuditHead>,
}

impl AuditLog {
    /// Open the log stored in `store`, resuming from its recorded head.
    ///
    /// # Errors
    ///
    /// Returns an error if the head cannot be read or decoded.
    pub async fn open(
        store: Arc<dyn KvStore>,
        clock: Arc<ClockService>,
        runtime_key: KeyPair,
    ) -> AuditResult<Self> {
        let head = match store.get(NS_META, HEAD_KEY).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| AuditError::Serialization(e.to_string()))?,
            None => AuditHead::genesis(),
        };
        // Entries appended after a restart must not sort before older
        // ones, even if the host clock went backwards.
        if let Some(last) = head.timestamp {
            clock.raise_floor(last);
        }
        info!(
            head = head.sequence,
            key_id = %runtime_key.key_id_hex(),
            "opened audit log"
        );
        Ok(Self {
            store,
            clock,
            runtime_key,
            head: Mutex::new(head),
        })
    }

    /// An empty log backed by memory.
    #[must_use]
    pub fn in_memory(clock: Arc<ClockService>, runtime_key: KeyPair) -> Self {
        Self {
            store: Arc::new(MemoryKvStore::new()),
            clock,
            runtime_key,
            head: Mutex::new(AuditHead::genesis()),
        }
    }

    /// Append a record: assign the next sequence and a clock timestamp,
    /// link it to the head, sign it and persist it atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting fails; the head is unchanged then.
    pub async fn append(&self, record: AuditRecord) -> AuditResult<AuditEntry> {
        let mut head = self.head.lock().await;
        let sequence = head.sequence.saturating_add(1);
        let timestamp = self.clock.now();
        let entry = AuditEntry::seal(record, sequence, timestamp, head.hash, &self.runtime_key);
        let next_head = AuditHead {
            sequence,
            hash: entry.entry_hash,
            timestamp: Some(timestamp),
        };

        let entry_bytes =
            serde_json::to_vec(&entry).map_err(|e| AuditError::Serialization(e.to_string()))?;
        let head_bytes =
            serde_json::to_vec(&next_head).map_err(|e| AuditError::Serialization(e.to_string()))?;
        if let Err(e) = self
            .store
            .apply(vec![
                KvWrite::set(NS_ENTRIES, sequence_key(sequence), entry_bytes),
                KvWrite::set(NS_META, HEAD_KEY, head_bytes),
            ])
            .await
        {
            error!(sequence, event = entry.event.name(), error = %e, "audit append failed");
            return Err(e.into());
        }

        *head = next_head;
        debug!(
            sequence,
            event = entry.event.name(),
            hash = %entry.entry_hash.short(),
            "audit entry appended"
        );
        Ok(entry)
    }

    /// The current chain head.
    pub async fn head(&self) -> AuditHead {
        *self.head.lock().await
    }

    /// Number of entries.
    pub async fn len(&self) -> u64 {
        self.head.lock().await.sequence
    }

    /// Whether the log is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// The runtime public key entries are signed with.
    #[must_use]
    pub fn runtime_public_key(&self) -> PublicKey {
        self.runtime_key.public_key()
    }

    /// Fetch one entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the entry is unreadable.
    pub async fn get(&self, sequence: u64) -> AuditResult<Option<AuditEntry>> {
        self.store
            .get(NS_ENTRIES, &sequence_key(sequence))
            .await?
            .map(|bytes| decode(sequence, &bytes))
            .transpose()
    }

    /// Raw rows with `from <= sequence`, bounded by `end_key`.
    async fn raw_page(
        &self,
        from: u64,
        end_key: Option<&str>,
    ) -> AuditResult<Vec<(u64, Vec<u8>)>> {
        let rows = self
            .store
            .scan(NS_ENTRIES, Some(&sequence_key(from)), end_key, PAGE_SIZE)
            .await?;
        rows.into_iter()
            .map(|(key, bytes)| {
                key.parse::<u64>()
                    .map(|seq| (seq, bytes))
                    .map_err(|e| AuditError::CorruptEntry {
                        sequence: 0,
                        reason: format!("bad key {key:?}: {e}"),
                    })
            })
            .collect()
    }

    /// One decoded page starting at `from`, plus the cursor for the next.
    async fn page(
        &self,
        from: u64,
        end_key: Option<String>,
    ) -> AuditResult<Option<(Vec<AuditResult<AuditEntry>>, Option<u64>)>> {
        let rows = self.raw_page(from, end_key.as_deref()).await?;
        if rows.is_empty() {
            return Ok(None);
        }
        let next = if rows.len() < PAGE_SIZE {
            None
        } else {
            rows.last().and_then(|(seq, _)| seq.checked_add(1))
        };
        let entries = rows
            .into_iter()
            .map(|(seq, bytes)| decode(seq, &bytes))
            .collect();
        Ok(Some((entries, next)))
    }

    /// Stream entries in sequence order, one page at a time.
    pub fn stream(
        &self,
        range: SequenceRange,
    ) -> impl Stream<Item = AuditResult<AuditEntry>> + Send + '_ {
        let end_key = range.end_key();
        futures::stream::try_unfold(Some(range.start()), move |cursor| {
            let end_key = end_key.clone();
            async move {
                match cursor {
                    Some(from) => self.page(from, end_key).await.map(|page| {
                        page.map(|(entries, next)| (futures::stream::iter(entries), next))
                    }),
                    None => Ok(None),
                }
            }
        })
        .try_flatten()
    }

    /// Collect entries in a sequence range.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or an entry is unreadable.
    pub async fn entries(&self, range: impl Into<SequenceRange>) -> AuditResult<Vec<AuditEntry>> {
        self.stream(range.into()).try_collect().await
    }

    /// Entries with `from <= timestamp < to`.
    ///
    /// Timestamps are assigned under the append lock from a strictly
    /// increasing clock whose floor is restored on [`open`](Self::open), so
    /// they rise with the sequence and the scan stops at the first entry
    /// past `to`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or an entry is unreadable.
    pub async fn entries_between(
        &self,
        from: Timestamp,
        to: Timestamp,
    ) -> AuditResult<Vec<AuditEntry>> {
        let mut out = Vec::new();
        let mut stream = Box::pin(self.stream(SequenceRange::all()));
        while let Some(entry) = stream.next().await {
            let entry = entry?;
            if entry.timestamp >= to {
                break;
            }
            if entry.timestamp >= from {
                out.push(entry);
            }
        }
        Ok(out)
    }

    /// Every entry recorded for one guarded execution, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or an entry is unreadable.
    pub async fn entries_for_correlation(
        &self,
        correlation_id: CorrelationId,
    ) -> AuditResult<Vec<AuditEntry>> {
        self.stream(SequenceRange::all())
            .try_filter(|e| futures::future::ready(e.correlation_id == Some(correlation_id)))
            .try_collect()
            .await
    }

    /// Write the whole log as JSON lines. Returns the number of entries.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or writing fails.
    pub async fn export_jsonl(&self, mut writer: impl Write + Send) -> AuditResult<u64> {
        let mut count: u64 = 0;
        let mut stream = Box::pin(self.stream(SequenceRange::all()));
        while let Some(entry) = stream.next().await {
            let entry = entry?;
            serde_json::to_writer(&mut writer, &entry)
                .map_err(|e| AuditError::Serialization(e.to_string()))?;
            writer.write_all(b"\n")?;
            count = count.saturating_add(1);
        }
        writer.flush()?;
        info!(entries = count, "exported audit log");
        Ok(count)
    }

    /// Recompute the chain over `range` and report the first divergence.
    ///
    /// Checks, per entry in sequence order: contiguity, genesis or the
    /// link to the preceding entry (also when the range starts mid-log),
    /// the recomputed content hash, and the signature by this log's key.
    /// When the range runs to the end, the recorded head is checked too,
    /// which catches a truncated tail.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store itself fails; tampering is
    /// reported in the result.
    pub async fn verify_chain(
        &self,
        range: impl Into<SequenceRange>,
    ) -> AuditResult<ChainVerification> {
        let range = range.into();
        // Later appends are outside this verification.
        let head = self.head().await;
        let start = range.start();
        let to = range.to.map_or(head.sequence, |t| t.min(head.sequence));
        if start > to {
            return Ok(ChainVerification {
                entries_verified: 0,
                issue: None,
            });
        }
        let end_key = to.checked_add(1).map(sequence_key);
        let trusted = self.runtime_key.public_key();
        let mut verified: u64 = 0;

        let fail = |verified: u64, issue: ChainIssue| -> AuditResult<ChainVerification> {
            error!(issue = %issue, "audit chain divergence");
            Ok(ChainVerification {
                entries_verified: verified,
                issue: Some(issue),
            })
        };

        let mut expected_prior = if start == 1 {
            ContentHash::zero()
        } else {
            let previous = start.saturating_sub(1);
            match self.store.get(NS_ENTRIES, &sequence_key(previous)).await? {
                Some(bytes) => match decode(previous, &bytes) {
                    Ok(entry) => entry.entry_hash,
                    Err(_) => return fail(0, ChainIssue::Unreadable { sequence: previous }),
                },
                None => {
                    return fail(
                        0,
                        ChainIssue::SequenceGap {
                            expected: previous,
                            found: None,
                        },
                    );
                },
            }
        };
        let mut expected_seq = start;
        let mut cursor = Some(start);

        while let Some(from) = cursor {
            let rows = self.raw_page(from, end_key.as_deref()).await?;
            cursor = if rows.len() < PAGE_SIZE {
                None
            } else {
                rows.last().and_then(|(seq, _)| seq.checked_add(1))
            };

            for (key_seq, bytes) in rows {
                if key_seq != expected_seq {
                    return fail(
                        verified,
                        ChainIssue::SequenceGap {
                            expected: expected_seq,
                            found: Some(key_seq),
                        },
                    );
                }
                let Ok(entry) = decode(key_seq, &bytes) else {
                    return fail(verified, ChainIssue::Unreadable { sequence: key_seq });
                };
                if entry.sequence != key_seq {
                    return fail(
                        verified,
                        ChainIssue::SequenceGap {
                            expected: key_seq,
                            found: Some(entry.sequence),
                        },
                    );
                }
                if entry.prior_hash != expected_prior {
                    let issue = if key_seq == 1 {
                        ChainIssue::InvalidGenesis { sequence: key_seq }
                    } else {
                        ChainIssue::BrokenLink {
                            sequence: key_seq,
                            expected_prior,
                            actual_prior: entry.prior_hash,
                        }
                    };
                    return fail(verified, issue);
                }
                if !entry.hash_is_valid() {
                    return fail(verified, ChainIssue::HashMismatch { sequence: key_seq });
                }
                if entry.signer != trusted || entry.verify_signature().is_err() {
                    return fail(verified, ChainIssue::InvalidSignature { sequence: key_seq });
                }

                expected_prior = entry.entry_hash;
                expected_seq = key_seq.saturating_add(1);
                verified = verified.saturating_add(1);
            }
        }

        if expected_seq <= to {
            return fail(
                verified,
                ChainIssue::SequenceGap {
                    expected: expected_seq,
                    found: None,
                },
            );
        }
        if to == head.sequence && expected_prior != head.hash {
            return fail(
                verified,
                ChainIssue::HeadMismatch {
                    head_sequence: head.sequence,
                    last_sequence: to,
                },
            );
        }

        debug!(entries = verified, "audit chain verified");
        Ok(ChainVerification {
            entries_verified: verified,
            issue: None,
        })
    }
}

fn decode(sequence: u64, bytes: &[u8]) -> AuditResult<AuditEntry> {
    serde_json::from_slice(bytes).map_err(|e| AuditError::CorruptEntry {
        sequence,
        reason: e.to_string(),
    })
}

impl fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditLog")
            .field("runtime_key_id", &self.runtime_key.key_id_hex())
            .finish_non_exhaustive()
    }
}
