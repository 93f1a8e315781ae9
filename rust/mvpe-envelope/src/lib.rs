//! Fixed-header frame wrapping a MYRA payload over a pooled segment
//! (component C2). See `SPEC_FULL.md` section 4.2.
//!
//! An [`Envelope`] interprets the first [`HEADER_SIZE`] bytes of a
//! [`mvpe_pool::Segment`] as a typed header and treats the remainder as an
//! opaque payload region that [`mvpe-codec`] fills in. Envelopes are
//! single-owner: the backing segment is either explicitly released (which
//! recycles it through its originating pool) or dropped, which has the same
//! effect.

use mvpe_pool::{Pool, PoolError, Segment};

/// Total size, in bytes, of the fixed envelope header.
pub const HEADER_SIZE: usize = 29;

const OFF_LENGTH: usize = 0;
const OFF_METHOD_ID: usize = 2;
const OFF_CORRELATION_ID: usize = 4;
const OFF_TRACE_ID: usize = 12;
const OFF_FLAGS: usize = 28;

const FLAG_HAS_TRACE: u8 = 0b0000_0001;
const FLAG_IS_RESPONSE: u8 = 0b0000_0010;
const FLAG_HAS_ERROR: u8 = 0b0000_0100;

/// Errors surfaced by envelope operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The envelope's backing segment has already been released.
    Released,
    /// `payload()` was called before `length` was set to at least
    /// `HEADER_SIZE`.
    HeaderIncomplete,
    /// The underlying pool rejected an operation.
    Pool(PoolError),
}

impl std::fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvelopeError::Released => write!(f, "envelope has been released"),
            EnvelopeError::HeaderIncomplete => {
                write!(f, "envelope length is smaller than the header size")
            }
            EnvelopeError::Pool(e) => write!(f, "pool error: {e}"),
        }
    }
}

impl std::error::Error for EnvelopeError {}

impl From<PoolError> for EnvelopeError {
    fn from(e: PoolError) -> Self {
        EnvelopeError::Pool(e)
    }
}

/// A view over a pooled [`Segment`] with the first [`HEADER_SIZE`] bytes
/// interpreted as a typed header.
pub struct Envelope {
    segment: Option<Segment>,
}

impl Envelope {
    /// Acquire a segment sized `HEADER_SIZE + payload_size` from `pool` and
    /// return an envelope owning that lease, with the header zeroed.
    pub fn allocate(pool: &Pool, payload_size: usize) -> Result<Self, EnvelopeError> {
        let segment = pool.acquire_sized(HEADER_SIZE + payload_size)?;
        tracing::trace!(payload_size, "allocated envelope");
        Ok(Envelope {
            segment: Some(segment),
        })
    }

    /// View an existing segment as an envelope without acquiring a new one.
    /// Used on read paths where bytes were already placed by I/O.
    pub fn wrap(segment: Segment) -> Self {
        Envelope {
            segment: Some(segment),
        }
    }

    /// Return the backing segment to its owning pool. After this call, every
    /// accessor on this envelope fails with [`EnvelopeError::Released`].
    pub fn release(&mut self, pool: &Pool) -> Result<(), EnvelopeError> {
        let segment = self.segment.take().ok_or(EnvelopeError::Released)?;
        pool.release(segment)?;
        Ok(())
    }

    /// Consume the envelope, returning its backing segment without
    /// releasing it to any pool (for handing off to a transport, or to
    /// `mvpe-codec` for decoding).
    pub fn into_segment(mut self) -> Result<Segment, EnvelopeError> {
        self.segment.take().ok_or(EnvelopeError::Released)
    }

    fn segment(&self) -> Result<&Segment, EnvelopeError> {
        self.segment.as_ref().ok_or(EnvelopeError::Released)
    }

    fn segment_mut(&mut self) -> Result<&mut Segment, EnvelopeError> {
        self.segment.as_mut().ok_or(EnvelopeError::Released)
    }

    /// Total frame size in bytes (header + payload), as currently recorded
    /// in the header.
    pub fn length(&self) -> Result<u16, EnvelopeError> {
        let seg = self.segment()?;
        Ok(u16::from_be_bytes(
            seg.slice(OFF_LENGTH, 2).try_into().unwrap(),
        ))
    }

    /// Set the `length` header field.
    pub fn set_length(&mut self, length: u16) -> Result<(), EnvelopeError> {
        let seg = self.segment_mut()?;
        seg.slice_mut(OFF_LENGTH, 2).copy_from_slice(&length.to_be_bytes());
        Ok(())
    }

    /// The unsigned method selector.
    pub fn method_id(&self) -> Result<u16, EnvelopeError> {
        let seg = self.segment()?;
        Ok(u16::from_be_bytes(
            seg.slice(OFF_METHOD_ID, 2).try_into().unwrap(),
        ))
    }

    /// Set the `methodId` header field.
    pub fn set_method_id(&mut self, method_id: u16) -> Result<(), EnvelopeError> {
        let seg = self.segment_mut()?;
        seg.slice_mut(OFF_METHOD_ID, 2)
            .copy_from_slice(&method_id.to_be_bytes());
        Ok(())
    }

    /// Caller-assigned request/response match token.
    pub fn correlation_id(&self) -> Result<u64, EnvelopeError> {
        let seg = self.segment()?;
        Ok(u64::from_be_bytes(
            seg.slice(OFF_CORRELATION_ID, 8).try_into().unwrap(),
        ))
    }

    /// Set the `correlationId` header field.
    pub fn set_correlation_id(&mut self, correlation_id: u64) -> Result<(), EnvelopeError> {
        let seg = self.segment_mut()?;
        seg.slice_mut(OFF_CORRELATION_ID, 8)
            .copy_from_slice(&correlation_id.to_be_bytes());
        Ok(())
    }

    /// The trace ID, if the `has trace` flag is set.
    pub fn trace_id(&self) -> Result<Option<u128>, EnvelopeError> {
        if !self.has_trace()? {
            return Ok(None);
        }
        let seg = self.segment()?;
        Ok(Some(u128::from_be_bytes(
            seg.slice(OFF_TRACE_ID, 16).try_into().unwrap(),
        )))
    }

    /// Set the trace ID. `None` clears the `has trace` flag and zeroes the
    /// trace ID bytes.
    pub fn set_trace_id(&mut self, trace_id: Option<u128>) -> Result<(), EnvelopeError> {
        let bytes = trace_id.unwrap_or(0).to_be_bytes();
        {
            let seg = self.segment_mut()?;
            seg.slice_mut(OFF_TRACE_ID, 16).copy_from_slice(&bytes);
        }
        self.set_flag(FLAG_HAS_TRACE, trace_id.is_some())
    }

    /// Raw flags byte.
    pub fn flags(&self) -> Result<u8, EnvelopeError> {
        let seg = self.segment()?;
        Ok(seg.slice(OFF_FLAGS, 1)[0])
    }

    fn set_flag(&mut self, mask: u8, value: bool) -> Result<(), EnvelopeError> {
        let seg = self.segment_mut()?;
        let cur = seg.slice(OFF_FLAGS, 1)[0];
        let next = if value { cur | mask } else { cur & !mask };
        seg.slice_mut(OFF_FLAGS, 1)[0] = next;
        Ok(())
    }

    /// Bit 0 of `flags`: whether a trace ID is present.
    pub fn has_trace(&self) -> Result<bool, EnvelopeError> {
        Ok(self.flags()? & FLAG_HAS_TRACE != 0)
    }

    /// Bit 1 of `flags`: whether this envelope carries a response.
    pub fn is_response(&self) -> Result<bool, EnvelopeError> {
        Ok(self.flags()? & FLAG_IS_RESPONSE != 0)
    }

    /// Set bit 1 of `flags`.
    pub fn set_is_response(&mut self, value: bool) -> Result<(), EnvelopeError> {
        self.set_flag(FLAG_IS_RESPONSE, value)
    }

    /// Bit 2 of `flags`: whether this envelope carries an error.
    pub fn has_error(&self) -> Result<bool, EnvelopeError> {
        Ok(self.flags()? & FLAG_HAS_ERROR != 0)
    }

    /// Set bit 2 of `flags`.
    pub fn set_has_error(&mut self, value: bool) -> Result<(), EnvelopeError> {
        self.set_flag(FLAG_HAS_ERROR, value)
    }

    /// Zero-copy view of the payload region `[HEADER_SIZE, length)`.
    ///
    /// Fails with [`EnvelopeError::HeaderIncomplete`] if `length` has not
    /// yet been set to at least `HEADER_SIZE`.
    pub fn payload(&self) -> Result<&[u8], EnvelopeError> {
        let length = self.length()? as usize;
        if length < HEADER_SIZE {
            return Err(EnvelopeError::HeaderIncomplete);
        }
        let seg = self.segment()?;
        Ok(seg.slice(HEADER_SIZE, length - HEADER_SIZE))
    }

    /// Zero-copy, mutable view of the entire payload capacity backing this
    /// envelope (from `HEADER_SIZE` to the end of the segment), regardless
    /// of the current `length` header value. Used by the codec while
    /// encoding, before `length` has been finalized.
    pub fn payload_capacity_mut(&mut self) -> Result<&mut [u8], EnvelopeError> {
        let seg = self.segment_mut()?;
        let cap = seg.len() - HEADER_SIZE;
        Ok(seg.slice_mut(HEADER_SIZE, cap))
    }

    /// Total capacity available for the payload, in bytes.
    pub fn payload_capacity(&self) -> Result<usize, EnvelopeError> {
        Ok(self.segment()?.len() - HEADER_SIZE)
    }
}
