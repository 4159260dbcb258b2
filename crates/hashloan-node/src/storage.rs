//! RocksDB storage backend for the mirrored loan book.

use anyhow::Result;
use hashloan_core::{Account, Loan, LoanId, Role};
use hashloan_settlement::LoanEvent;
use hashloan_utxo::SignatureEnvelope;
use rocksdb::{ColumnFamilyDescriptor, Direction, IteratorMode, Options, DB};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Column family names for different data types.
const CF_LOANS: &str = "loans";
const CF_BORROWERS: &str = "borrowers";
const CF_EVENTS: &str = "events";
const CF_SIGNATURES: &str = "signatures";
const CF_META: &str = "meta";

const MIRROR_CURSOR: &str = "mirror_cursor";
const BOOK_EPOCH: &str = "book_epoch";

/// Column families holding mirrored book state, cleared on an epoch change.
const MIRRORED_CFS: [&str; 4] = [CF_LOANS, CF_BORROWERS, CF_EVENTS, CF_SIGNATURES];

/// An event as recorded by the mirror.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: Uuid,
    pub event: LoanEvent,
}

/// RocksDB-backed storage for the node.
pub struct Storage {
    db: DB,
}

impl Storage {
    /// Open or create a RocksDB database at the given path with column families.
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_LOANS, Options::default()),
            ColumnFamilyDescriptor::new(CF_BORROWERS, Options::default()),
            ColumnFamilyDescriptor::new(CF_EVENTS, Options::default()),
            ColumnFamilyDescriptor::new(CF_SIGNATURES, Options::default()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors)?;

        Ok(Self { db })
    }

    fn put(&self, cf_name: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let cf = self
            .db
            .cf_handle(cf_name)
            .ok_or_else(|| anyhow::anyhow!("column family '{}' not found", cf_name))?;
        self.db.put_cf(&cf, key, value)?;
        Ok(())
    }

    fn get(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self
            .db
            .cf_handle(cf_name)
            .ok_or_else(|| anyhow::anyhow!("column family '{}' not found", cf_name))?;
        let value = self.db.get_cf(&cf, key)?;
        Ok(value)
    }

    fn delete(&self, cf_name: &str, key: &[u8]) -> Result<()> {
        let cf = self
            .db
            .cf_handle(cf_name)
            .ok_or_else(|| anyhow::anyhow!("column family '{}' not found", cf_name))?;
        self.db.delete_cf(&cf, key)?;
        Ok(())
    }

    /// Key-value pairs whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let cf = self
            .db
            .cf_handle(cf_name)
            .ok_or_else(|| anyhow::anyhow!("column family '{}' not found", cf_name))?;
        let mut out = Vec::new();
        for item in self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }

    /// Store a loan snapshot.
    pub fn put_loan(&self, loan: &Loan) -> Result<()> {
        self.put(CF_LOANS, &loan.id.to_be_bytes(), &serde_json::to_vec(loan)?)
    }

    /// Get a loan snapshot.
    pub fn get_loan(&self, id: LoanId) -> Result<Option<Loan>> {
        self.get(CF_LOANS, &id.to_be_bytes())?
            .map(|bytes| serde_json::from_slice::<Loan>(&bytes).map_err(anyhow::Error::from))
            .transpose()
    }

    /// Remove a loan snapshot and its borrower index entry.
    pub fn delete_loan(&self, id: LoanId) -> Result<()> {
        if let Some(loan) = self.get_loan(id)? {
            self.delete(CF_BORROWERS, &borrower_key(&loan.borrower, id))?;
        }
        self.delete(CF_LOANS, &id.to_be_bytes())
    }

    /// Index `id` under `borrower`.
    pub fn index_borrower_loan(&self, borrower: &Account, id: LoanId) -> Result<()> {
        self.put(CF_BORROWERS, &borrower_key(borrower, id), &[])
    }

    /// Loan ids a borrower has requested, oldest first.
    pub fn loans_of_borrower(&self, borrower: &Account) -> Result<Vec<LoanId>> {
        let prefix = borrower_prefix(borrower);
        self.scan_prefix(CF_BORROWERS, &prefix)?
            .into_iter()
            .map(|(key, _)| -> Result<LoanId> {
                let raw: [u8; 8] = key[prefix.len()..]
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("malformed borrower index key"))?;
                Ok(LoanId(u64::from_be_bytes(raw)))
            })
            .collect()
    }

    /// Record a book event under its sequence number. Returns the record id.
    pub fn put_event(&self, event: &LoanEvent) -> Result<Uuid> {
        let record = StoredEvent {
            id: Uuid::now_v7(),
            event: event.clone(),
        };
        self.put(CF_EVENTS, &event.seq.to_be_bytes(), &serde_json::to_vec(&record)?)?;
        Ok(record.id)
    }

    /// Recorded events with `seq >= from_seq`, in order.
    pub fn events_since(&self, from_seq: u64) -> Result<Vec<StoredEvent>> {
        let cf = self
            .db
            .cf_handle(CF_EVENTS)
            .ok_or_else(|| anyhow::anyhow!("column family '{}' not found", CF_EVENTS))?;
        let start = from_seq.to_be_bytes();
        let mut out = Vec::new();
        for item in self
            .db
            .iterator_cf(&cf, IteratorMode::From(&start, Direction::Forward))
        {
            let (_, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    /// Store a signature envelope received from, or sent to, a counterparty.
    pub fn put_envelope(&self, envelope: &SignatureEnvelope) -> Result<()> {
        self.put(
            CF_SIGNATURES,
            &envelope_key(envelope.loan_id, &envelope.template.leaf().to_string(), envelope.signer),
            envelope.to_json()?.as_bytes(),
        )
    }

    /// All envelopes stored for a loan.
    pub fn envelopes_for(&self, loan_id: LoanId) -> Result<Vec<SignatureEnvelope>> {
        self.scan_envelopes(&loan_id.to_be_bytes())
    }

    /// Every stored envelope, grouped by loan.
    pub fn envelopes(&self) -> Result<Vec<SignatureEnvelope>> {
        self.scan_envelopes(&[])
    }

    pub fn delete_envelopes(&self, loan_id: LoanId) -> Result<()> {
        for (key, _) in self.scan_prefix(CF_SIGNATURES, &loan_id.to_be_bytes())? {
            self.delete(CF_SIGNATURES, &key)?;
        }
        Ok(())
    }

    fn scan_envelopes(&self, prefix: &[u8]) -> Result<Vec<SignatureEnvelope>> {
        self.scan_prefix(CF_SIGNATURES, prefix)?
            .into_iter()
            .map(|(_, value)| -> Result<SignatureEnvelope> {
                let json = std::str::from_utf8(&value)?;
                Ok(SignatureEnvelope::from_json(json)?)
            })
            .collect()
    }

    /// Next event sequence the mirror has not applied.
    pub fn mirror_cursor(&self) -> Result<u64> {
        match self.get(CF_META, MIRROR_CURSOR.as_bytes())? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("malformed mirror cursor"))?;
                Ok(u64::from_be_bytes(raw))
            }
            None => Ok(0),
        }
    }

    pub fn set_mirror_cursor(&self, next_seq: u64) -> Result<()> {
        self.put(CF_META, MIRROR_CURSOR.as_bytes(), &next_seq.to_be_bytes())
    }

    /// Epoch of the book the stored state was mirrored from.
    pub fn book_epoch(&self) -> Result<Option<Uuid>> {
        self.get(CF_META, BOOK_EPOCH.as_bytes())?
            .map(|bytes| Uuid::from_slice(&bytes).map_err(anyhow::Error::from))
            .transpose()
    }

    /// Drop all mirrored state and start over for the book `epoch`.
    pub fn reset_for_epoch(&self, epoch: Uuid) -> Result<()> {
        for cf_name in MIRRORED_CFS {
            for (key, _) in self.scan_prefix(cf_name, &[])? {
                self.delete(cf_name, &key)?;
            }
        }
        self.set_mirror_cursor(0)?;
        self.put(CF_META, BOOK_EPOCH.as_bytes(), epoch.as_bytes())
    }
}

fn borrower_prefix(borrower: &Account) -> Vec<u8> {
    let mut key = borrower.as_str().as_bytes().to_vec();
    key.push(0);
    key
}

fn borrower_key(borrower: &Account, id: LoanId) -> Vec<u8> {
    let mut key = borrower_prefix(borrower);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

/// Loan id first, so one loan's envelopes share a prefix.
fn envelope_key(loan_id: LoanId, leaf: &str, signer: Role) -> Vec<u8> {
    let mut key = loan_id.to_be_bytes().to_vec();
    key.extend_from_slice(format!("/{leaf}/{signer}").as_bytes());
    key
}
