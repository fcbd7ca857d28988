//! Scatter/gather byte buffers produced by the binary serializer.
//!
//! A [`BufferSet`] is an ordered list of segments. Most segments are owned
//! ("copied") byte vectors; a byte-array value may instead contribute a
//! "borrowed" segment that shares the original allocation, avoiding a copy
//! for large payloads (detector images, waveform traces). A borrowed
//! segment is never self-describing: its length always lives in the
//! immediately preceding copied segment, written there by the encoder.

use std::sync::Arc;

/// One contiguous run of bytes within a [`BufferSet`].
#[derive(Clone)]
pub enum Segment {
    Copied(Vec<u8>),
    Borrowed(Arc<Vec<u8>>),
}

impl Segment {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Segment::Copied(v) => v,
            Segment::Borrowed(v) => v,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Segment::Copied(_) => "copied",
            Segment::Borrowed(_) => "borrowed",
        };
        let preview: String = self.as_slice().iter().take(16).map(|b| format!("{b:02x}")).collect();
        let ellipsis = if self.len() > 16 { "..." } else { "" };
        write!(f, "{kind}[{}]({preview}{ellipsis})", self.len())
    }
}

/// An ordered sequence of [`Segment`]s plus a read cursor over them.
#[derive(Clone, Default)]
pub struct BufferSet {
    segments: Vec<Segment>,
    cursor: usize,
}

impl BufferSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an owned copy of `bytes` as a new segment.
    pub fn append_copy(&mut self, bytes: Vec<u8>) {
        self.segments.push(Segment::Copied(bytes));
    }

    /// Append a shared byte-array as a borrowed segment. Callers are
    /// expected to have already written the length into the preceding
    /// copied segment.
    pub fn emplace_byte_array(&mut self, bytes: Arc<Vec<u8>>) {
        self.segments.push(Segment::Borrowed(bytes));
    }

    /// Splice this BufferSet's segments into `other`. In no-copy mode
    /// (`copy = false`) borrowed segments are forwarded as-is, zero-copy;
    /// in copy mode every segment, borrowed or not, is flattened into a
    /// single owned segment appended to `other`.
    pub fn append_to(&mut self, other: &mut BufferSet, copy: bool) {
        if copy {
            if !self.segments.is_empty() {
                other.segments.push(Segment::Copied(self.to_contiguous()));
                self.segments.clear();
            }
        } else {
            other.segments.append(&mut self.segments);
        }
    }

    /// Append a vector-typed leaf's backing storage. In zero-copy mode the
    /// shared allocation is taken on as a borrowed segment, the same as a
    /// byte-array; in copy-all mode the bytes are copied into the current
    /// copied segment instead, keeping the BufferSet free of any borrowed
    /// reference into caller-owned memory.
    pub fn emplace_vector(&mut self, shared: Arc<Vec<u8>>, zero_copy: bool) {
        if zero_copy {
            self.emplace_byte_array(shared);
        } else {
            self.append_copy(shared.as_ref().clone());
        }
    }

    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn total_size(&self) -> usize {
        self.segments.iter().map(Segment::len).sum()
    }

    /// Flatten into a single owned buffer. Convenient for transports that
    /// have no scatter/gather API of their own.
    pub fn to_contiguous(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_size());
        for seg in &self.segments {
            out.extend_from_slice(seg.as_slice());
        }
        out
    }

    /// Reset the read cursor to the first segment.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// The segment currently under the cursor, if any.
    pub fn current(&self) -> Option<&Segment> {
        self.segments.get(self.cursor)
    }

    /// Advance the cursor to the next segment and return it.
    pub fn next(&mut self) -> Option<&Segment> {
        self.cursor += 1;
        self.segments.get(self.cursor)
    }
}

impl std::fmt::Debug for BufferSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferSet")
            .field("segments", &self.segments)
            .field("total_size", &self.total_size())
            .finish()
    }
}

impl FromIterator<Segment> for BufferSet {
    fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
        Self { segments: iter.into_iter().collect(), cursor: 0 }
    }
}
