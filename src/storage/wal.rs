// Write-ahead log: a sequence of framed records, each protected by a
// CRC32 so a torn tail can be detected and cut off during recovery.

use bytes::BufMut;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::Result;
use crate::storage::page::PageId;

/// Frame layout: `[type: u8][len: u32][payload][crc32: u32]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalFrame {
    BeginTxn {
        txn_id: u64,
    },
    PagePreImage {
        txn_id: u64,
        page_id: PageId,
        data: Vec<u8>,
    },
    PagePostImage {
        txn_id: u64,
        page_id: PageId,
        data: Vec<u8>,
    },
    CommitTxn {
        txn_id: u64,
    },
    Checkpoint,
}

impl WalFrame {
    fn type_byte(&self) -> u8 {
        match self {
            WalFrame::BeginTxn { .. } => 1,
            WalFrame::PagePreImage { .. } => 2,
            WalFrame::PagePostImage { .. } => 3,
            WalFrame::CommitTxn { .. } => 4,
            WalFrame::Checkpoint => 5,
        }
    }

    pub fn txn_id(&self) -> Option<u64> {
        match self {
            WalFrame::BeginTxn { txn_id }
            | WalFrame::PagePreImage { txn_id, .. }
            | WalFrame::PagePostImage { txn_id, .. }
            | WalFrame::CommitTxn { txn_id } => Some(*txn_id),
            WalFrame::Checkpoint => None,
        }
    }
}

const FRAME_HEADER: usize = 5;
const FRAME_TRAILER: usize = 4;
const MAX_FRAME_PAYLOAD: usize = 1 << 26;

/// Append-only WAL file.
pub struct WalFile {
    file: File,
    path: PathBuf,
}

impl WalFile {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn append(&mut self, frame: &WalFrame) -> Result<()> {
        let payload = bincode::serde::encode_to_vec(frame, bincode::config::standard())?;
        let crc = crc32fast::hash(&payload);

        let mut buf = Vec::with_capacity(FRAME_HEADER + payload.len() + FRAME_TRAILER);
        buf.put_u8(frame.type_byte());
        buf.put_u32_le(payload.len() as u32);
        buf.put_slice(&payload);
        buf.put_u32_le(crc);
        self.file.write_all(&buf)?;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Read every intact frame from the start of the log. Scanning stops at
    /// the first bad length or CRC; the byte offset of the cut is returned
    /// alongside the frames.
    pub fn read_frames(&mut self) -> Result<(Vec<WalFrame>, u64)> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::new();
        self.file.read_to_end(&mut bytes)?;

        let mut frames = Vec::new();
        let mut offset = 0usize;

        while offset < bytes.len() {
            let remaining = bytes.len() - offset;
            if remaining < FRAME_HEADER + FRAME_TRAILER {
                break;
            }
            let len =
                u32::from_le_bytes(bytes[offset + 1..offset + 5].try_into().unwrap()) as usize;
            if len > MAX_FRAME_PAYLOAD || remaining < FRAME_HEADER + len + FRAME_TRAILER {
                break;
            }
            let payload = &bytes[offset + FRAME_HEADER..offset + FRAME_HEADER + len];
            let crc_offset = offset + FRAME_HEADER + len;
            let stored_crc =
                u32::from_le_bytes(bytes[crc_offset..crc_offset + 4].try_into().unwrap());
            if crc32fast::hash(payload) != stored_crc {
                break;
            }
            let decoded: std::result::Result<(WalFrame, usize), _> =
                bincode::serde::decode_from_slice(payload, bincode::config::standard());
            match decoded {
                Ok((frame, _)) => frames.push(frame),
                Err(_) => break,
            }
            offset = crc_offset + 4;
        }

        if offset < bytes.len() {
            warn!(
                valid = offset,
                total = bytes.len(),
                path = %self.path.display(),
                "torn frame in WAL; truncating"
            );
        }

        Ok((frames, offset as u64))
    }

    /// Discard all log content; the caller has made everything durable.
    /// A fresh checkpoint frame marks the new origin.
    pub fn reset(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::End(0))?;
        self.append(&WalFrame::Checkpoint)?;
        self.sync()
    }

    pub fn truncate_to(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        self.file.seek(SeekFrom::End(0))?;
        Ok(())
    }
}
