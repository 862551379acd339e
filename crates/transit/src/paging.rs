//! Offset and cursor pagination over ordered result sets.
//!
//! Both modes are pure slicing. Offset pages work on any slice; cursor pages
//! work on a cache [`Snapshot`] so that a cursor can be checked against the
//! key and version it was issued for.

use crate::cache::snapshot::Snapshot;
use crate::config::QueryLimits;
use crate::models::types::{QueryError, Result, ResultItem};

// ============================================================================
// Offset Mode
// ============================================================================

/// A validated (page, per_page) pair. Pages are numbered from 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct PageRequest {
    page: usize,
    per_page: usize,
}

impl PageRequest {
    pub fn new(page: usize, per_page: usize) -> Result<Self> {
        validate_page_number(page)?;
        validate_page_size(per_page)?;
        Ok(Self { page, per_page })
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn per_page(&self) -> usize {
        self.per_page
    }

    /// Reject page sizes above the configured maximum.
    pub fn validate(&self, limits: &QueryLimits) -> Result<()> {
        if self.per_page > limits.max_page_size {
            return Err(QueryError::InvalidParameter(format!(
                "per_page {} exceeds the maximum of {}",
                self.per_page, limits.max_page_size
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: usize,
    pub page_number: usize,
    pub page_size: usize,
    pub total_pages: usize,
    pub has_next: bool,
    pub has_prev: bool,
}

/// Navigation descriptors for a page; `None` where the target does not exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageLinks {
    pub first: Option<PageRequest>,
    pub prev: Option<PageRequest>,
    pub next: Option<PageRequest>,
    pub last: Option<PageRequest>,
}

impl<T> Page<T> {
    pub fn request(&self) -> PageRequest {
        PageRequest {
            page: self.page_number,
            per_page: self.page_size,
        }
    }

    pub fn links(&self) -> PageLinks {
        let at = |page| PageRequest {
            page,
            per_page: self.page_size,
        };
        let has_pages = self.total_pages > 0;
        PageLinks {
            first: has_pages.then(|| at(1)),
            prev: self.has_prev.then(|| at(self.page_number - 1)),
            next: self.has_next.then(|| at(self.page_number + 1)),
            last: has_pages.then(|| at(self.total_pages)),
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total_count: self.total_count,
            page_number: self.page_number,
            page_size: self.page_size,
            total_pages: self.total_pages,
            has_next: self.has_next,
            has_prev: self.has_prev,
        }
    }
}

/// Cut page `page_number` of size `page_size` out of `sequence`.
///
/// A page past the end is empty with `has_next == false`, not an error.
pub fn page<T: Clone>(sequence: &[T], page_number: usize, page_size: usize) -> Result<Page<T>> {
    validate_page_number(page_number)?;
    validate_page_size(page_size)?;

    let total_count = sequence.len();
    let total_pages = total_count.div_ceil(page_size);

    let start = (page_number - 1).saturating_mul(page_size);
    let items = if start < total_count {
        let end = start.saturating_add(page_size).min(total_count);
        sequence[start..end].to_vec()
    } else {
        Vec::new()
    };

    Ok(Page {
        items,
        total_count,
        page_number,
        page_size,
        total_pages,
        has_next: page_number < total_pages,
        has_prev: page_number > 1,
    })
}

fn validate_page_number(page_number: usize) -> Result<()> {
    if page_number == 0 {
        return Err(QueryError::InvalidParameter(
            "page numbers start at 1".into(),
        ));
    }
    Ok(())
}

fn validate_page_size(page_size: usize) -> Result<()> {
    if page_size == 0 {
        return Err(QueryError::InvalidParameter(
            "page size must be at least 1".into(),
        ));
    }
    Ok(())
}

// ============================================================================
// Cursor Mode
// ============================================================================

const CURSOR_BYTES: usize = 24;

/// Position in one specific snapshot of one specific query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageCursor {
    key_fingerprint: u64,
    version: u64,
    offset: usize,
}

impl PageCursor {
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Opaque token: lowercase hex of fingerprint, version and offset.
    pub fn encode(&self) -> String {
        let mut bytes = [0u8; CURSOR_BYTES];
        bytes[..8].copy_from_slice(&self.key_fingerprint.to_be_bytes());
        bytes[8..16].copy_from_slice(&self.version.to_be_bytes());
        bytes[16..].copy_from_slice(&(self.offset as u64).to_be_bytes());
        hex::encode(bytes)
    }

    pub fn decode(token: &str) -> Result<Self> {
        let bytes = hex::decode(token)
            .map_err(|e| QueryError::InvalidCursor(format!("malformed token: {e}")))?;
        let bytes: [u8; CURSOR_BYTES] = bytes
            .try_into()
            .map_err(|_| QueryError::InvalidCursor("token has the wrong length".into()))?;

        let word = |i: usize| {
            let mut chunk = [0u8; 8];
            chunk.copy_from_slice(&bytes[i * 8..(i + 1) * 8]);
            u64::from_be_bytes(chunk)
        };
        let offset = usize::try_from(word(2))
            .map_err(|_| QueryError::InvalidCursor("offset out of range".into()))?;

        Ok(Self {
            key_fingerprint: word(0),
            version: word(1),
            offset,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CursorPage<T> {
    pub items: Vec<T>,
    /// `None` once the window reaches the end of the sequence
    pub next_cursor: Option<PageCursor>,
}

impl<T> CursorPage<T> {
    pub fn has_more(&self) -> bool {
        self.next_cursor.is_some()
    }
}

/// Window of `page_size` items starting at `cursor`, or at the start for `None`.
///
/// Fails with `InvalidCursor` for a cursor issued for another key or pointing
/// past the end, and with `StaleCursor` when the snapshot has been replaced
/// since the cursor was issued.
pub fn page_by_cursor(
    snapshot: &Snapshot,
    cursor: Option<&PageCursor>,
    page_size: usize,
) -> Result<CursorPage<ResultItem>> {
    validate_page_size(page_size)?;

    let key_fingerprint = snapshot.key().fingerprint();
    let total = snapshot.len();

    let offset = match cursor {
        None => 0,
        Some(cursor) => {
            if cursor.key_fingerprint != key_fingerprint {
                return Err(QueryError::InvalidCursor(
                    "cursor was issued for a different query".into(),
                ));
            }
            if cursor.version != snapshot.version() {
                return Err(QueryError::StaleCursor);
            }
            if cursor.offset >= total {
                return Err(QueryError::InvalidCursor(format!(
                    "offset {} is past the end of {total} results",
                    cursor.offset
                )));
            }
            cursor.offset
        }
    };

    let end = offset.saturating_add(page_size).min(total);
    let next_cursor = (end < total).then(|| PageCursor {
        key_fingerprint,
        version: snapshot.version(),
        offset: end,
    });

    Ok(CursorPage {
        items: snapshot.items()[offset..end].to_vec(),
        next_cursor,
    })
}
